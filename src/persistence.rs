//! Disk snapshots of cache contents.
//!
//! Each cache is written to `<dir>/<name>.cache` as JSON holding a metadata
//! block and the entries in eviction order. Snapshots of caches configured
//! with `compression` are gzipped; loading detects gzip by its magic bytes.
//!
//! Saving and loading never fail loudly: errors are logged and reported as
//! `false`.

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tracing::{debug, info, warn};

use crate::cache::CacheBackend;
use crate::config::CacheConfig;
use crate::entry::{from_unix_secs, to_unix_secs, CacheEntry};
use crate::error::{CacheError, CacheResult};
use crate::manager::CacheManager;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Snapshots older than this are ignored on load.
const DEFAULT_MAX_AGE: Duration = Duration::from_secs(7 * 24 * 60 * 60);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotMetadata {
    pub cache_name: String,
    /// Unix seconds when the snapshot was taken.
    pub timestamp: f64,
    pub size: usize,
    pub config: CacheConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotEntry {
    pub value: Value,
    pub timestamp: f64,
    pub access_count: u64,
    pub last_accessed: f64,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl SnapshotEntry {
    fn from_entry(entry: &CacheEntry) -> Self {
        Self {
            value: entry.value.clone(),
            timestamp: to_unix_secs(entry.timestamp),
            access_count: entry.access_count,
            last_accessed: to_unix_secs(entry.last_accessed),
            metadata: entry.metadata.clone(),
        }
    }

    fn into_entry(self) -> CacheResult<CacheEntry> {
        let timestamp = parse_time("timestamp", self.timestamp)?;
        let last_accessed = parse_time("last_accessed", self.last_accessed)?;
        let mut entry =
            CacheEntry::with_timestamp(self.value, timestamp).with_metadata(self.metadata);
        entry.access_count = self.access_count;
        entry.last_accessed = last_accessed;
        Ok(entry)
    }
}

fn parse_time(field: &str, secs: f64) -> CacheResult<SystemTime> {
    from_unix_secs(secs)
        .ok_or_else(|| CacheError::CorruptSnapshot(format!("{} out of range: {}", field, secs)))
}

/// On-disk snapshot of one cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub metadata: SnapshotMetadata,
    pub entries: IndexMap<String, SnapshotEntry>,
}

impl Snapshot {
    /// Read a snapshot file, gzipped or plain.
    pub fn read_from(path: &Path) -> CacheResult<Self> {
        let mut raw = Vec::new();
        File::open(path)?.read_to_end(&mut raw)?;

        if raw.starts_with(&GZIP_MAGIC) {
            let decoder = GzDecoder::new(raw.as_slice());
            Ok(serde_json::from_reader(BufReader::new(decoder))?)
        } else {
            Ok(serde_json::from_slice(&raw)?)
        }
    }

    fn write_to(&self, path: &Path, compress: bool) -> CacheResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        // Write to a sibling file first so a crash never leaves half a snapshot.
        let tmp = path.with_extension("cache.tmp");
        {
            let file = BufWriter::new(File::create(&tmp)?);
            if compress {
                let mut encoder = GzEncoder::new(file, Compression::default());
                serde_json::to_writer(&mut encoder, self)?;
                encoder.finish()?.flush()?;
            } else {
                let mut file = file;
                serde_json::to_writer(&mut file, self)?;
                file.flush()?;
            }
        }
        fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Time since the snapshot was taken; zero if it is dated in the future.
    pub fn age(&self) -> CacheResult<Duration> {
        let taken = parse_time("metadata.timestamp", self.metadata.timestamp)?;
        Ok(SystemTime::now()
            .duration_since(taken)
            .unwrap_or(Duration::ZERO))
    }
}

/// Saves and restores cache snapshots in a directory.
///
/// # Example
/// ```
/// use adaptive_cache::{CacheBackend, CacheConfig, CachePersistence, LruCache};
/// use serde_json::json;
///
/// let dir = std::env::temp_dir().join("adaptive-cache-doc");
/// let persistence = CachePersistence::new(&dir);
///
/// let cache = LruCache::new(CacheConfig::default()).unwrap();
/// cache.set("k", json!([1, 2, 3]));
/// assert!(persistence.save("doc", &cache));
///
/// let restored = LruCache::new(CacheConfig::default()).unwrap();
/// assert!(persistence.load("doc", &restored));
/// assert_eq!(restored.get("k"), Some(json!([1, 2, 3])));
/// # let _ = std::fs::remove_dir_all(dir);
/// ```
#[derive(Debug, Clone)]
pub struct CachePersistence {
    dir: PathBuf,
    max_age: Duration,
}

impl CachePersistence {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            max_age: DEFAULT_MAX_AGE,
        }
    }

    /// Ignore snapshots older than `max_age` on load.
    pub fn max_age(mut self, max_age: Duration) -> Self {
        self.max_age = max_age;
        self
    }

    /// Snapshot file for the cache `name`.
    pub fn path_for(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}.cache", name))
    }

    /// Write every entry of `cache` to disk. Returns `false` on failure.
    pub fn save(&self, name: &str, cache: &dyn CacheBackend) -> bool {
        match self.try_save(name, cache) {
            Ok(count) => {
                info!(cache = name, entries = count, "cache snapshot saved");
                true
            }
            Err(e) => {
                warn!(cache = name, error = %e, "failed to save cache snapshot");
                false
            }
        }
    }

    fn try_save(&self, name: &str, cache: &dyn CacheBackend) -> CacheResult<usize> {
        let config = cache.config();
        let entries: IndexMap<String, SnapshotEntry> = cache
            .entries()
            .iter()
            .map(|(key, entry)| (key.clone(), SnapshotEntry::from_entry(entry)))
            .collect();

        let snapshot = Snapshot {
            metadata: SnapshotMetadata {
                cache_name: name.to_string(),
                timestamp: to_unix_secs(SystemTime::now()),
                size: entries.len(),
                config: config.clone(),
            },
            entries,
        };

        snapshot.write_to(&self.path_for(name), config.compression_enabled())?;
        Ok(snapshot.entries.len())
    }

    /// Restore a snapshot into `cache`. Returns `false` if there was nothing
    /// usable to load.
    ///
    /// Snapshots past the maximum age are discarded whole; entries whose TTL
    /// (from the target cache's config) elapsed since they were saved are
    /// skipped.
    pub fn load(&self, name: &str, cache: &dyn CacheBackend) -> bool {
        match self.try_load(name, cache) {
            Ok(Some(count)) => {
                info!(cache = name, entries = count, "cache snapshot loaded");
                true
            }
            Ok(None) => false,
            Err(e) => {
                warn!(cache = name, error = %e, "failed to load cache snapshot");
                false
            }
        }
    }

    fn try_load(&self, name: &str, cache: &dyn CacheBackend) -> CacheResult<Option<usize>> {
        let path = self.path_for(name);
        if !path.exists() {
            debug!(cache = name, path = %path.display(), "no snapshot found");
            return Ok(None);
        }

        let snapshot = Snapshot::read_from(&path)?;
        let age = snapshot.age()?;
        if age > self.max_age {
            info!(cache = name, age_secs = age.as_secs(), "discarding stale snapshot");
            return Ok(None);
        }

        // Parse everything up front so a bad entry leaves the cache untouched.
        let entries = snapshot
            .entries
            .into_iter()
            .map(|(key, saved)| saved.into_entry().map(|entry| (key, entry)))
            .collect::<CacheResult<Vec<_>>>()?;

        let ttl = cache.config().get_ttl();
        let now = SystemTime::now();
        let mut restored = 0;
        for (key, entry) in entries {
            if entry.is_expired_at(now, ttl) {
                continue;
            }
            cache.restore(&key, entry);
            restored += 1;
        }
        Ok(Some(restored))
    }

    /// Save every cache registered with `manager`; returns how many succeeded.
    pub fn save_all(&self, manager: &CacheManager) -> usize {
        manager
            .cache_names()
            .iter()
            .filter_map(|name| manager.get_cache(name).map(|cache| (name, cache)))
            .filter(|(name, cache)| self.save(name, cache.as_ref()))
            .count()
    }

    /// Load snapshots for every cache registered with `manager`.
    pub fn load_all(&self, manager: &CacheManager) -> usize {
        manager
            .cache_names()
            .iter()
            .filter_map(|name| manager.get_cache(name).map(|cache| (name, cache)))
            .filter(|(name, cache)| self.load(name, cache.as_ref()))
            .count()
    }
}

//! A local LRU tier in front of a remote key-value store.
//!
//! The remote store is the source of truth and the local tier is a
//! read-through/write-through accelerator. Remote failures are logged and the
//! cache keeps working from the local tier alone; they are never returned to
//! the caller.
//!
//! Every operation, remote I/O included, runs under one mutex. A slow remote
//! therefore blocks all access to this cache instance; the only bound is the
//! remote client's own timeout.

use bytes::Bytes;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::cache::CacheBackend;
use crate::config::{CacheConfig, StrategyKind};
use crate::entry::CacheEntry;
use crate::error::CacheResult;
use crate::stats::{hit_rate, MetricsSnapshot, RemoteStats};
use crate::storage::LruCache;

/// Minimal Redis-like key-value API used as the remote tier.
pub trait RemoteStore: Send + Sync + Debug {
    fn get(&self, key: &str) -> CacheResult<Option<Bytes>>;

    fn set(&self, key: &str, value: Bytes) -> CacheResult<()>;

    /// Store `value` expiring after `ttl`.
    fn setex(&self, key: &str, ttl: Duration, value: Bytes) -> CacheResult<()>;

    /// Remove `key`, returning whether it existed.
    fn delete(&self, key: &str) -> CacheResult<bool>;
}

/// Hit/miss counters for the combined tiers.
#[derive(Debug, Default)]
struct DistributedStats {
    hits: u64,
    misses: u64,
    remote: RemoteStats,
}

/// A cache combining a local LRU tier with a remote store.
///
/// # Example
/// ```
/// use adaptive_cache::{CacheBackend, CacheConfig, DistributedCache, MemoryStore};
/// use serde_json::json;
///
/// let cache = DistributedCache::new(CacheConfig::default(), MemoryStore::new()).unwrap();
/// cache.set("k", json!("v"));
/// assert_eq!(cache.get("k"), Some(json!("v")));
/// ```
#[derive(Debug)]
pub struct DistributedCache {
    local: LruCache,
    remote: Box<dyn RemoteStore>,
    key_prefix: String,
    stats: Mutex<DistributedStats>,
    config: CacheConfig,
}

impl DistributedCache {
    pub fn new(config: CacheConfig, remote: impl RemoteStore + 'static) -> CacheResult<Self> {
        Self::with_remote(config, Box::new(remote))
    }

    pub fn with_remote(config: CacheConfig, remote: Box<dyn RemoteStore>) -> CacheResult<Self> {
        let local = LruCache::new(config.clone().strategy(StrategyKind::Lru))?;
        Ok(Self {
            local,
            remote,
            key_prefix: String::new(),
            stats: Mutex::new(DistributedStats::default()),
            config,
        })
    }

    /// Namespace remote keys as `<prefix><key>`.
    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    /// The operation lock; it also guards the counters.
    fn lock(&self) -> MutexGuard<'_, DistributedStats> {
        self.stats.lock().unwrap_or_else(|poisoned| {
            warn!("distributed cache lock poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Key as stored in the remote tier.
    pub fn remote_key(&self, key: &str) -> String {
        format!("{}{}", self.key_prefix, key)
    }

    fn fetch_remote(&self, key: &str, stats: &mut DistributedStats) -> Option<Value> {
        let remote_key = self.remote_key(key);
        match self.remote.get(&remote_key) {
            Ok(Some(bytes)) => match serde_json::from_slice::<Value>(&bytes) {
                Ok(value) => {
                    stats.remote.hits += 1;
                    Some(value)
                }
                Err(e) => {
                    warn!(key = %remote_key, error = %e, "undecodable remote value");
                    stats.remote.errors += 1;
                    None
                }
            },
            Ok(None) => {
                stats.remote.misses += 1;
                None
            }
            Err(e) => {
                warn!(key = %remote_key, error = %e, "remote get failed");
                stats.remote.errors += 1;
                None
            }
        }
    }

    fn store_remote(&self, key: &str, value: &Value, stats: &mut DistributedStats) {
        let remote_key = self.remote_key(key);
        let bytes = match serde_json::to_vec(value) {
            Ok(bytes) => Bytes::from(bytes),
            Err(e) => {
                warn!(key = %remote_key, error = %e, "value not encodable for remote store");
                stats.remote.errors += 1;
                return;
            }
        };

        let result = match self.config.ttl {
            Some(ttl) => self.remote.setex(&remote_key, ttl, bytes),
            None => self.remote.set(&remote_key, bytes),
        };
        if let Err(e) = result {
            warn!(key = %remote_key, error = %e, "remote set failed, caching locally only");
            stats.remote.errors += 1;
        }
    }
}

impl CacheBackend for DistributedCache {
    fn get(&self, key: &str) -> Option<Value> {
        let mut stats = self.lock();

        if let Some(value) = self.local.get(key) {
            stats.hits += 1;
            return Some(value);
        }

        match self.fetch_remote(key, &mut stats) {
            Some(value) => {
                debug!(key, "populating local tier from remote");
                self.local.set(key, value.clone());
                stats.hits += 1;
                Some(value)
            }
            None => {
                stats.misses += 1;
                None
            }
        }
    }

    fn set(&self, key: &str, value: Value) {
        let mut stats = self.lock();
        self.store_remote(key, &value, &mut stats);
        self.local.set(key, value);
    }

    fn has(&self, key: &str) -> bool {
        let _guard = self.lock();
        self.local.has(key)
    }

    fn delete(&self, key: &str) -> bool {
        let mut stats = self.lock();
        let remote_key = self.remote_key(key);
        let remote_existed = match self.remote.delete(&remote_key) {
            Ok(existed) => existed,
            Err(e) => {
                warn!(key = %remote_key, error = %e, "remote delete failed");
                stats.remote.errors += 1;
                false
            }
        };
        let local_existed = self.local.delete(key);
        local_existed || remote_existed
    }

    /// Clears the local tier only; the remote store is shared.
    fn clear(&self) {
        let _guard = self.lock();
        self.local.clear();
    }

    fn cleanup_expired(&self) -> usize {
        let _guard = self.lock();
        self.local.cleanup_expired()
    }

    fn get_metrics(&self) -> CacheResult<MetricsSnapshot> {
        let stats = self.lock();
        let mut snapshot = self.local.get_metrics()?;
        snapshot.strategy = "distributed".to_string();
        snapshot.hits = stats.hits;
        snapshot.misses = stats.misses;
        snapshot.hit_rate = hit_rate(stats.hits, stats.misses);
        snapshot.remote = Some(stats.remote.clone());
        Ok(snapshot)
    }

    fn len(&self) -> usize {
        self.local.len()
    }

    fn config(&self) -> CacheConfig {
        self.config.clone()
    }

    fn strategy(&self) -> StrategyKind {
        StrategyKind::Lru
    }

    fn entries(&self) -> Vec<(String, CacheEntry)> {
        self.local.entries()
    }

    fn restore(&self, key: &str, entry: CacheEntry) {
        let _guard = self.lock();
        self.local.restore(key, entry);
    }
}

/// Stored bytes and their optional expiry deadline.
type MemoryEntries = HashMap<String, (Bytes, Option<Instant>)>;

/// An in-process [`RemoteStore`], for tests and single-node setups.
#[derive(Debug, Default)]
pub struct MemoryStore {
    data: Mutex<MemoryEntries>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn data(&self) -> MutexGuard<'_, MemoryEntries> {
        self.data.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl RemoteStore for MemoryStore {
    fn get(&self, key: &str) -> CacheResult<Option<Bytes>> {
        let mut data = self.data();
        let expired = match data.get(key) {
            Some((_, Some(deadline))) => Instant::now() >= *deadline,
            Some((_, None)) => false,
            None => return Ok(None),
        };
        if expired {
            data.remove(key);
            return Ok(None);
        }
        Ok(data.get(key).map(|(bytes, _)| bytes.clone()))
    }

    fn set(&self, key: &str, value: Bytes) -> CacheResult<()> {
        self.data().insert(key.to_string(), (value, None));
        Ok(())
    }

    fn setex(&self, key: &str, ttl: Duration, value: Bytes) -> CacheResult<()> {
        // A ttl past what `Instant` can represent never expires.
        let deadline = Instant::now().checked_add(ttl);
        self.data().insert(key.to_string(), (value, deadline));
        Ok(())
    }

    fn delete(&self, key: &str) -> CacheResult<bool> {
        Ok(self.data().remove(key).is_some())
    }
}

#[cfg(feature = "redis-backend")]
pub use self::redis_store::{RedisConfig, RedisStore};

#[cfg(feature = "redis-backend")]
mod redis_store {
    use bytes::Bytes;
    use redis::Commands;
    use std::sync::Mutex;
    use std::time::Duration;

    use super::RemoteStore;
    use crate::error::{CacheError, CacheResult};

    /// Connection settings for [`RedisStore`].
    #[derive(Debug, Clone)]
    pub struct RedisConfig {
        pub url: String,
        pub connect_timeout: Duration,
    }

    impl Default for RedisConfig {
        fn default() -> Self {
            Self {
                url: "redis://127.0.0.1:6379".to_string(),
                connect_timeout: Duration::from_secs(5),
            }
        }
    }

    /// A [`RemoteStore`] backed by a synchronous Redis connection.
    pub struct RedisStore {
        connection: Mutex<redis::Connection>,
    }

    impl std::fmt::Debug for RedisStore {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("RedisStore").finish_non_exhaustive()
        }
    }

    fn remote_err(e: redis::RedisError) -> CacheError {
        CacheError::Remote(e.to_string())
    }

    impl RedisStore {
        pub fn connect(config: &RedisConfig) -> CacheResult<Self> {
            let client = redis::Client::open(config.url.as_str()).map_err(remote_err)?;
            let connection = client
                .get_connection_with_timeout(config.connect_timeout)
                .map_err(remote_err)?;
            Ok(Self {
                connection: Mutex::new(connection),
            })
        }

        fn connection(&self) -> CacheResult<std::sync::MutexGuard<'_, redis::Connection>> {
            self.connection
                .lock()
                .map_err(|e| CacheError::LockPoisoned(e.to_string()))
        }
    }

    impl RemoteStore for RedisStore {
        fn get(&self, key: &str) -> CacheResult<Option<Bytes>> {
            let value: Option<Vec<u8>> = self.connection()?.get(key).map_err(remote_err)?;
            Ok(value.map(Bytes::from))
        }

        fn set(&self, key: &str, value: Bytes) -> CacheResult<()> {
            self.connection()?
                .set::<_, _, ()>(key, value.as_ref())
                .map_err(remote_err)
        }

        fn setex(&self, key: &str, ttl: Duration, value: Bytes) -> CacheResult<()> {
            let seconds = ttl.as_secs().max(1);
            self.connection()?
                .set_ex::<_, _, ()>(key, value.as_ref(), seconds)
                .map_err(remote_err)
        }

        fn delete(&self, key: &str) -> CacheResult<bool> {
            let removed: i64 = self.connection()?.del(key).map_err(remote_err)?;
            Ok(removed > 0)
        }
    }
}

//! Registry of named caches with background expiry sweeps.
//!
//! A [`CacheManager`] owns every cache it creates together with one
//! [`PeriodicTask`] per cache that calls `cleanup_expired()` on that cache's
//! `cleanup_interval`. Applications compose one manager and pass it where it
//! is needed; [`CacheManager::global`] exists for code that prefers a lazily
//! created shared instance.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, OnceLock, RwLock};
use std::time::Duration;

use sysinfo::System;
use tracing::{debug, info, warn};

use crate::cache::{build_backend, CacheBackend};
use crate::config::{CacheConfig, StrategyKind};
use crate::distributed::{DistributedCache, RemoteStore};
use crate::error::{CacheError, CacheResult};
use crate::persistence::CachePersistence;
use crate::scheduler::PeriodicTask;
use crate::stats::MetricsSnapshot;

/// Metrics for one cache, or the error raised while collecting them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetricsReport {
    Metrics(MetricsSnapshot),
    Error { error: String },
}

impl MetricsReport {
    pub fn metrics(&self) -> Option<&MetricsSnapshot> {
        match self {
            MetricsReport::Metrics(metrics) => Some(metrics),
            MetricsReport::Error { .. } => None,
        }
    }
}

/// Process and host memory figures plus cache totals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemMetrics {
    /// Resident memory of this process, in bytes.
    pub process_memory: u64,
    pub total_memory: u64,
    pub used_memory: u64,
    /// Host memory in use, percent.
    pub memory_percent: f64,
    /// Entries across all registered caches.
    pub total_entries: u64,
    pub cache_count: usize,
}

/// Default caches registered by [`CacheManager::new`].
fn default_caches() -> Vec<(&'static str, CacheConfig)> {
    vec![
        (
            "file",
            CacheConfig::new()
                .max_size(500)
                .ttl(Duration::from_secs(3600))
                .strategy(StrategyKind::Lru),
        ),
        (
            "function",
            CacheConfig::new()
                .max_size(200)
                .ttl(Duration::from_secs(1800))
                .strategy(StrategyKind::Lfu),
        ),
        (
            "dependency",
            CacheConfig::new()
                .max_size(100)
                .ttl(Duration::from_secs(3600))
                .strategy(StrategyKind::Lru),
        ),
        (
            "result",
            CacheConfig::new()
                .max_size(100)
                .ttl(Duration::from_secs(600))
                .strategy(StrategyKind::Lru),
        ),
        (
            "adaptive",
            CacheConfig::new()
                .max_size(1000)
                .ttl(Duration::from_secs(3600))
                .strategy(StrategyKind::Adaptive),
        ),
    ]
}

/// Registry of named caches.
///
/// # Example
/// ```
/// use adaptive_cache::{CacheConfig, CacheManager, StrategyKind};
/// use serde_json::json;
///
/// let manager = CacheManager::new().unwrap();
/// let files = manager.get_cache("file").unwrap();
/// files.set("src/main.rs", json!("fn main() {}"));
///
/// let config = CacheConfig::new().max_size(50).strategy(StrategyKind::Lfu).build().unwrap();
/// manager.create_cache("embeddings", config).unwrap();
///
/// assert!(manager.get_all_metrics().contains_key("embeddings"));
/// manager.shutdown();
/// ```
#[derive(Debug)]
pub struct CacheManager {
    caches: RwLock<HashMap<String, Arc<dyn CacheBackend>>>,
    timers: Mutex<HashMap<String, PeriodicTask>>,
}

static GLOBAL: OnceLock<Arc<CacheManager>> = OnceLock::new();

impl CacheManager {
    /// Create a manager with the default `file`, `function`, `dependency`,
    /// `result` and `adaptive` caches.
    pub fn new() -> CacheResult<Self> {
        let manager = Self::empty();
        for (name, config) in default_caches() {
            manager.create_cache(name, config.build()?)?;
        }
        info!(caches = manager.cache_names().len(), "cache manager initialized");
        Ok(manager)
    }

    /// Create a manager with no caches registered.
    pub fn empty() -> Self {
        Self {
            caches: RwLock::new(HashMap::new()),
            timers: Mutex::new(HashMap::new()),
        }
    }

    /// Shared manager created on first use.
    pub fn global() -> CacheResult<Arc<CacheManager>> {
        if let Some(manager) = GLOBAL.get() {
            return Ok(Arc::clone(manager));
        }
        let manager = Arc::new(CacheManager::new()?);
        Ok(Arc::clone(GLOBAL.get_or_init(|| manager)))
    }

    /// Create and register a cache of the kind named by `config.strategy`.
    ///
    /// Replaces any cache already registered under `name`.
    pub fn create_cache(&self, name: &str, config: CacheConfig) -> CacheResult<Arc<dyn CacheBackend>> {
        let cache = build_backend(config)?;
        self.register(name, Arc::clone(&cache))?;
        Ok(cache)
    }

    /// Create and register a cache backed by `remote`.
    pub fn create_distributed_cache(
        &self,
        name: &str,
        config: CacheConfig,
        remote: Box<dyn RemoteStore>,
    ) -> CacheResult<Arc<dyn CacheBackend>> {
        let cache: Arc<dyn CacheBackend> = Arc::new(DistributedCache::with_remote(config, remote)?);
        self.register(name, Arc::clone(&cache))?;
        Ok(cache)
    }

    /// Register an existing cache and start its cleanup timer.
    pub fn register(&self, name: &str, cache: Arc<dyn CacheBackend>) -> CacheResult<()> {
        let interval = cache.config().get_cleanup_interval();
        let timer = Self::spawn_cleanup(name, Arc::clone(&cache), interval)?;

        self.write_caches().insert(name.to_string(), cache);
        // Replacing a timer drops, and thereby stops, the old one.
        self.lock_timers().insert(name.to_string(), timer);

        debug!(cache = name, interval_secs = interval.as_secs(), "cache registered");
        Ok(())
    }

    fn spawn_cleanup(
        name: &str,
        cache: Arc<dyn CacheBackend>,
        interval: Duration,
    ) -> CacheResult<PeriodicTask> {
        let cache_name = name.to_string();
        PeriodicTask::spawn(format!("cleanup-{}", name), interval, move || {
            let removed = cache.cleanup_expired();
            if removed > 0 {
                debug!(cache = %cache_name, removed, "expired entries swept");
            }
        })
    }

    pub fn get_cache(&self, name: &str) -> Option<Arc<dyn CacheBackend>> {
        self.read_caches().get(name).cloned()
    }

    /// Like [`get_cache`](Self::get_cache) but reports unknown names as errors.
    pub fn cache(&self, name: &str) -> CacheResult<Arc<dyn CacheBackend>> {
        self.get_cache(name)
            .ok_or_else(|| CacheError::UnknownCache(name.to_string()))
    }

    /// Unregister a cache and stop its timer. The cache itself is left as is.
    pub fn remove_cache(&self, name: &str) -> Option<Arc<dyn CacheBackend>> {
        self.lock_timers().remove(name);
        self.write_caches().remove(name)
    }

    /// Registered names, sorted.
    pub fn cache_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.read_caches().keys().cloned().collect();
        names.sort();
        names
    }

    /// Snapshot of every cache, sorted by name.
    fn snapshot(&self) -> Vec<(String, Arc<dyn CacheBackend>)> {
        let mut caches: Vec<_> = self
            .read_caches()
            .iter()
            .map(|(name, cache)| (name.clone(), Arc::clone(cache)))
            .collect();
        caches.sort_by(|a, b| a.0.cmp(&b.0));
        caches
    }

    /// Metrics of every cache keyed by name.
    ///
    /// A cache whose metrics cannot be read is reported as an error entry
    /// instead of failing the whole call.
    pub fn get_all_metrics(&self) -> BTreeMap<String, MetricsReport> {
        self.snapshot()
            .into_iter()
            .map(|(name, cache)| {
                let report = match cache.get_metrics() {
                    Ok(metrics) => MetricsReport::Metrics(metrics),
                    Err(e) => {
                        warn!(cache = %name, error = %e, "failed to collect metrics");
                        MetricsReport::Error {
                            error: e.to_string(),
                        }
                    }
                };
                (name, report)
            })
            .collect()
    }

    pub fn get_system_metrics(&self) -> SystemMetrics {
        let mut system = System::new();
        system.refresh_memory();

        let process_memory = sysinfo::get_current_pid()
            .ok()
            .and_then(|pid| {
                system.refresh_process(pid);
                system.process(pid).map(|process| process.memory())
            })
            .unwrap_or(0);

        let total_memory = system.total_memory();
        let used_memory = system.used_memory();
        let memory_percent = if total_memory == 0 {
            0.0
        } else {
            used_memory as f64 / total_memory as f64 * 100.0
        };

        let caches = self.snapshot();
        SystemMetrics {
            process_memory,
            total_memory,
            used_memory,
            memory_percent,
            total_entries: caches.iter().map(|(_, cache)| cache.len() as u64).sum(),
            cache_count: caches.len(),
        }
    }

    /// Sweep expired entries from every cache now.
    pub fn cleanup_all(&self) -> usize {
        self.snapshot()
            .iter()
            .map(|(_, cache)| cache.cleanup_expired())
            .sum()
    }

    pub fn clear_all(&self) {
        for (_, cache) in self.snapshot() {
            cache.clear();
        }
    }

    /// Stop every cleanup timer and clear every cache.
    ///
    /// Caches configured with persistence are saved to their
    /// `persistence_path` before being cleared.
    pub fn shutdown(&self) {
        let timers: Vec<PeriodicTask> = self.lock_timers().drain().map(|(_, timer)| timer).collect();
        drop(timers);

        for (name, cache) in self.snapshot() {
            let config = cache.config();
            if let (true, Some(path)) = (config.persistence_enabled(), config.get_persistence_path()) {
                let persistence = CachePersistence::new(path);
                if !persistence.save(&name, cache.as_ref()) {
                    warn!(cache = %name, "snapshot on shutdown failed");
                }
            }
            cache.clear();
        }
        info!("cache manager shut down");
    }

    fn read_caches(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, Arc<dyn CacheBackend>>> {
        self.caches.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_caches(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, Arc<dyn CacheBackend>>> {
        self.caches.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_timers(&self) -> std::sync::MutexGuard<'_, HashMap<String, PeriodicTask>> {
        self.timers.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for CacheManager {
    fn drop(&mut self) {
        self.lock_timers().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::CacheEntry;
    use serde_json::{json, Value};

    /// Cache whose metrics call always fails.
    #[derive(Debug)]
    struct BrokenMetrics(CacheConfig);

    impl CacheBackend for BrokenMetrics {
        fn get(&self, _key: &str) -> Option<Value> {
            None
        }
        fn set(&self, _key: &str, _value: Value) {}
        fn has(&self, _key: &str) -> bool {
            false
        }
        fn delete(&self, _key: &str) -> bool {
            false
        }
        fn clear(&self) {}
        fn cleanup_expired(&self) -> usize {
            0
        }
        fn get_metrics(&self) -> CacheResult<MetricsSnapshot> {
            Err(CacheError::LockPoisoned("metrics unavailable".to_string()))
        }
        fn len(&self) -> usize {
            0
        }
        fn config(&self) -> CacheConfig {
            self.0.clone()
        }
        fn strategy(&self) -> StrategyKind {
            StrategyKind::Lru
        }
        fn entries(&self) -> Vec<(String, CacheEntry)> {
            Vec::new()
        }
        fn restore(&self, _key: &str, _entry: CacheEntry) {}
    }

    #[test]
    fn test_default_caches() {
        let manager = CacheManager::new().unwrap();
        assert_eq!(
            manager.cache_names(),
            vec!["adaptive", "dependency", "file", "function", "result"]
        );

        let function = manager.get_cache("function").unwrap();
        assert_eq!(function.strategy(), StrategyKind::Lfu);
        assert_eq!(function.config().get_max_size(), 200);
        assert_eq!(function.config().get_ttl(), Some(Duration::from_secs(1800)));

        let result = manager.get_cache("result").unwrap();
        assert_eq!(result.config().get_ttl(), Some(Duration::from_secs(600)));

        let adaptive = manager.get_cache("adaptive").unwrap();
        assert_eq!(adaptive.config().get_strategy(), StrategyKind::Adaptive);
        assert_eq!(adaptive.config().get_max_size(), 1000);

        manager.shutdown();
    }

    #[test]
    fn test_create_and_remove_cache() {
        let manager = CacheManager::empty();
        let config = CacheConfig::new().max_size(10).build().unwrap();
        let cache = manager.create_cache("custom", config).unwrap();
        cache.set("k", json!(1));

        assert_eq!(manager.get_cache("custom").unwrap().get("k"), Some(json!(1)));
        assert!(manager.remove_cache("custom").is_some());
        assert!(manager.get_cache("custom").is_none());
        assert!(matches!(
            manager.cache("custom"),
            Err(CacheError::UnknownCache(_))
        ));
    }

    #[test]
    fn test_all_metrics_substitutes_errors() {
        let manager = CacheManager::empty();
        manager
            .create_cache("good", CacheConfig::default())
            .unwrap();
        manager
            .register("broken", Arc::new(BrokenMetrics(CacheConfig::default())))
            .unwrap();

        let metrics = manager.get_all_metrics();
        assert!(metrics["good"].metrics().is_some());
        match &metrics["broken"] {
            MetricsReport::Error { error } => assert!(error.contains("metrics unavailable")),
            other => panic!("expected error report, got {:?}", other),
        }
    }

    #[test]
    fn test_background_cleanup_sweeps() {
        let manager = CacheManager::empty();
        let config = CacheConfig::new()
            .ttl(Duration::from_millis(10))
            .cleanup_interval(Duration::from_millis(20))
            .build()
            .unwrap();
        let cache = manager.create_cache("short", config).unwrap();
        cache.set("k", json!(1));

        std::thread::sleep(Duration::from_millis(150));
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn test_cleanup_all_and_system_metrics() {
        let manager = CacheManager::empty();
        let config = CacheConfig::new()
            .ttl(Duration::from_millis(10))
            .build()
            .unwrap();
        let cache = manager.create_cache("short", config).unwrap();
        let keep = manager.create_cache("keep", CacheConfig::default()).unwrap();
        cache.set("a", json!(1));
        cache.set("b", json!(2));
        keep.set("c", json!(3));

        let system = manager.get_system_metrics();
        assert_eq!(system.total_entries, 3);
        assert_eq!(system.cache_count, 2);

        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(manager.cleanup_all(), 2);
    }

    #[test]
    fn test_shutdown_clears_caches() {
        let manager = CacheManager::new().unwrap();
        manager.get_cache("file").unwrap().set("k", json!(1));
        manager.shutdown();
        assert!(manager.get_cache("file").unwrap().is_empty());
        assert!(manager.lock_timers().is_empty());
    }

    #[test]
    fn test_global_is_shared() {
        let a = CacheManager::global().unwrap();
        let b = CacheManager::global().unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }
}

//! The interface every cache variant implements.
//!
//! Strategies, the adaptive wrapper and the distributed cache all implement
//! [`CacheBackend`], so the manager, decorator, warming, persistence and
//! monitoring layers work against one trait object type.

use serde_json::Value;
use std::fmt::Debug;
use std::sync::Arc;

use crate::adaptive::AdaptiveCache;
use crate::config::{CacheConfig, StrategyKind};
use crate::entry::CacheEntry;
use crate::error::CacheResult;
use crate::stats::MetricsSnapshot;
use crate::storage::{LfuCache, LruCache};

/// A thread-safe cache with TTL-aware lookups and eviction metrics.
///
/// All methods take `&self`; implementations serialize access with an
/// internal lock, so a backend can be shared as `Arc<dyn CacheBackend>`.
///
/// # Example
/// ```
/// use adaptive_cache::{CacheBackend, CacheConfig, LruCache};
/// use serde_json::json;
///
/// let cache = LruCache::new(CacheConfig::new().max_size(2).build().unwrap()).unwrap();
/// cache.set("a", json!(1));
/// cache.set("b", json!(2));
/// let _ = cache.get("a");
/// cache.set("c", json!(3));
///
/// assert!(!cache.has("b"));
/// assert!(cache.has("a"));
/// assert!(cache.has("c"));
/// ```
pub trait CacheBackend: Send + Sync + Debug {
    /// Look up `key`, counting a hit or a miss.
    ///
    /// Expired entries are evicted and reported as misses.
    fn get(&self, key: &str) -> Option<Value>;

    /// Store `value` under `key`, evicting first if a new key would overflow
    /// the configured limits.
    fn set(&self, key: &str, value: Value);

    /// Check whether a live entry exists without touching ordering or
    /// hit/miss counters. Expired entries are evicted.
    fn has(&self, key: &str) -> bool;

    /// Remove `key`. Returns `true` if it existed.
    fn delete(&self, key: &str) -> bool;

    /// Remove every entry.
    fn clear(&self);

    /// Evict every expired entry, returning how many were removed.
    fn cleanup_expired(&self) -> usize;

    fn get_metrics(&self) -> CacheResult<MetricsSnapshot>;

    /// Number of stored entries, including expired ones not yet swept.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn config(&self) -> CacheConfig;

    /// The eviction strategy currently in effect.
    fn strategy(&self) -> StrategyKind;

    /// Copies of all entries, next eviction candidate first.
    fn entries(&self) -> Vec<(String, CacheEntry)>;

    /// Insert an entry keeping its timestamps, access count and metadata.
    ///
    /// Capacity limits still apply; restoring does not count as a write.
    fn restore(&self, key: &str, entry: CacheEntry);
}

/// Build the cache variant selected by `config.strategy`.
///
/// # Example
/// ```
/// use adaptive_cache::{build_backend, CacheConfig, StrategyKind};
///
/// let config = CacheConfig::new().strategy(StrategyKind::Lfu).build().unwrap();
/// let cache = build_backend(config).unwrap();
/// assert_eq!(cache.strategy(), StrategyKind::Lfu);
/// ```
pub fn build_backend(config: CacheConfig) -> CacheResult<Arc<dyn CacheBackend>> {
    let backend: Arc<dyn CacheBackend> = match config.strategy {
        StrategyKind::Lru => Arc::new(LruCache::new(config)?),
        StrategyKind::Lfu => Arc::new(LfuCache::new(config)?),
        StrategyKind::Adaptive => Arc::new(AdaptiveCache::new(config)?),
    };
    Ok(backend)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_build_backend_selects_strategy() {
        for kind in [StrategyKind::Lru, StrategyKind::Lfu] {
            let config = CacheConfig::new().strategy(kind).build().unwrap();
            let cache = build_backend(config).unwrap();
            assert_eq!(cache.strategy(), kind);
        }

        let config = CacheConfig::new()
            .strategy(StrategyKind::Adaptive)
            .build()
            .unwrap();
        let cache = build_backend(config).unwrap();
        // Adaptive caches start out on LRU
        assert_eq!(cache.strategy(), StrategyKind::Lru);
        assert_eq!(cache.config().get_strategy(), StrategyKind::Adaptive);
    }

    #[test]
    fn test_trait_object_round_trip() {
        let cache = build_backend(CacheConfig::default()).unwrap();
        assert!(cache.is_empty());

        cache.set("key", json!({"answer": 42}));
        assert_eq!(cache.get("key"), Some(json!({"answer": 42})));
        assert!(cache.delete("key"));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_build_backend_rejects_invalid_config() {
        let config = CacheConfig::new().max_size(0);
        assert!(build_backend(config).is_err());
    }
}

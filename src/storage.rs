//! Storage for the eviction strategies.
//!
//! [`EvictionCache`] keeps entries, ordering policy and metrics behind one
//! mutex. Every public operation holds the lock for its full duration, so
//! operations on one instance never interleave. The policy type parameter
//! decides which key is evicted; [`LruCache`] and [`LfuCache`] are the two
//! concrete strategies.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::{Instant, SystemTime};

use tracing::warn;

use crate::cache::CacheBackend;
use crate::config::{CacheConfig, StrategyKind};
use crate::entry::CacheEntry;
use crate::error::{CacheError, CacheResult};
use crate::policy::{EvictionPolicy, LfuPolicy, LruPolicy};
use crate::stats::{CacheMetrics, EvictionReason, MetricsSnapshot};

/// Cache evicting the least recently used key.
pub type LruCache = EvictionCache<LruPolicy>;

/// Cache evicting the least frequently used key, oldest first on ties.
pub type LfuCache = EvictionCache<LfuPolicy>;

/// Everything guarded by the strategy lock.
#[derive(Debug)]
struct State<P> {
    entries: HashMap<String, CacheEntry>,
    policy: P,
    metrics: CacheMetrics,
    /// Running sum of entry size estimates.
    memory_usage: usize,
}

impl<P: EvictionPolicy> State<P> {
    fn new() -> Self {
        Self {
            entries: HashMap::new(),
            policy: P::default(),
            metrics: CacheMetrics::new(),
            memory_usage: 0,
        }
    }

    fn remove(&mut self, key: &str, reason: EvictionReason) -> Option<CacheEntry> {
        let entry = self.entries.remove(key)?;
        self.policy.on_remove(key);
        self.memory_usage = self.memory_usage.saturating_sub(entry.size);
        self.metrics.record_eviction(reason, 1);
        Some(entry)
    }

    /// Which limit a new insertion would break, if any.
    fn pressure(&self, config: &CacheConfig) -> Option<EvictionReason> {
        if self.entries.len() >= config.max_size {
            return Some(EvictionReason::SizeLimit);
        }
        match config.max_memory_bytes() {
            Some(cap) if self.memory_usage > cap => Some(EvictionReason::MemoryPressure),
            _ => None,
        }
    }

    /// Evict one candidate at a time until nothing is over limit or the
    /// policy has nothing left to offer.
    fn make_room(&mut self, config: &CacheConfig) {
        while let Some(reason) = self.pressure(config) {
            let victim = match self.policy.candidate() {
                Some(key) => key.to_string(),
                None => break,
            };
            if self.remove(&victim, reason).is_none() {
                // Policy and entries disagree; drop the stray key.
                self.policy.on_remove(&victim);
            }
        }
    }

    fn insert(&mut self, key: &str, entry: CacheEntry, config: &CacheConfig) {
        let size = entry.size;
        if let Some(existing) = self.entries.get_mut(key) {
            self.memory_usage = self.memory_usage.saturating_sub(existing.size) + size;
            *existing = entry;
            self.policy.on_access(key);
            return;
        }

        self.make_room(config);
        self.entries.insert(key.to_string(), entry);
        self.policy.on_insert(key);
        self.memory_usage += size;
    }

    /// Like `insert`, but hands the saved access count to the policy.
    fn restore(&mut self, key: &str, entry: CacheEntry, config: &CacheConfig) {
        if self.entries.contains_key(key) {
            self.insert(key, entry, config);
            return;
        }

        let size = entry.size;
        let access_count = entry.access_count;
        self.make_room(config);
        self.entries.insert(key.to_string(), entry);
        self.policy.on_restore(key, access_count);
        self.memory_usage += size;
    }
}

/// A cache whose eviction order is decided by the policy `P`.
///
/// # Example
/// ```
/// use adaptive_cache::{CacheBackend, CacheConfig, LfuCache};
/// use serde_json::json;
///
/// let cache = LfuCache::new(CacheConfig::new().max_size(2).build().unwrap()).unwrap();
/// cache.set("hot", json!(1));
/// cache.set("cold", json!(2));
/// let _ = cache.get("hot");
/// cache.set("new", json!(3));
///
/// assert!(cache.has("hot"));
/// assert!(!cache.has("cold"));
/// ```
#[derive(Debug)]
pub struct EvictionCache<P: EvictionPolicy> {
    state: Mutex<State<P>>,
    config: CacheConfig,
}

impl<P: EvictionPolicy> EvictionCache<P> {
    /// Create a cache, validating the configuration first.
    pub fn new(config: CacheConfig) -> CacheResult<Self> {
        config.validate()?;
        Ok(Self {
            state: Mutex::new(State::new()),
            config,
        })
    }

    /// Acquire the lock, recovering the data if a previous holder panicked.
    fn lock(&self) -> MutexGuard<'_, State<P>> {
        self.state.lock().unwrap_or_else(|poisoned| {
            warn!(strategy = %P::KIND, "cache lock poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Acquire the lock, reporting poisoning as an error.
    fn try_lock(&self) -> CacheResult<MutexGuard<'_, State<P>>> {
        self.state
            .lock()
            .map_err(|e| CacheError::LockPoisoned(e.to_string()))
    }

    fn record_timing(&self, state: &mut State<P>, started: Instant) {
        if self.config.enable_metrics {
            state.metrics.record_access_time(started.elapsed());
        }
    }

    /// Sum of entry size estimates in bytes.
    pub fn memory_usage(&self) -> usize {
        self.lock().memory_usage
    }
}

impl<P: EvictionPolicy> CacheBackend for EvictionCache<P> {
    fn get(&self, key: &str) -> Option<Value> {
        let started = Instant::now();
        let mut state = self.lock();
        let now = SystemTime::now();

        let expired = match state.entries.get(key) {
            Some(entry) => entry.is_expired_at(now, self.config.ttl),
            None => {
                state.metrics.record_miss();
                self.record_timing(&mut state, started);
                return None;
            }
        };

        let value = if expired {
            state.remove(key, EvictionReason::TtlExpired);
            state.metrics.record_miss();
            None
        } else {
            let value = state.entries.get_mut(key).map(|entry| {
                entry.touch_at(now);
                entry.value.clone()
            });
            state.policy.on_access(key);
            state.metrics.record_hit();
            value
        };

        self.record_timing(&mut state, started);
        value
    }

    fn set(&self, key: &str, value: Value) {
        let started = Instant::now();
        let mut state = self.lock();

        state.insert(key, CacheEntry::new(value), &self.config);
        state.metrics.record_write();

        self.record_timing(&mut state, started);
    }

    fn has(&self, key: &str) -> bool {
        let mut state = self.lock();
        let expired = match state.entries.get(key) {
            Some(entry) => entry.is_expired(self.config.ttl),
            None => return false,
        };
        if expired {
            state.remove(key, EvictionReason::TtlExpired);
            return false;
        }
        true
    }

    fn delete(&self, key: &str) -> bool {
        self.lock()
            .remove(key, EvictionReason::ExplicitDelete)
            .is_some()
    }

    fn clear(&self) {
        let mut state = self.lock();
        let cleared = state.entries.len() as u64;
        state.entries.clear();
        state.policy.clear();
        state.memory_usage = 0;
        state.metrics.record_eviction(EvictionReason::CacheClear, cleared);
    }

    fn cleanup_expired(&self) -> usize {
        let ttl = self.config.ttl;
        if ttl.is_none() {
            return 0;
        }

        let mut state = self.lock();
        let now = SystemTime::now();
        let expired: Vec<String> = state
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_expired_at(now, ttl))
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired {
            state.remove(key, EvictionReason::TtlExpired);
        }
        expired.len()
    }

    fn get_metrics(&self) -> CacheResult<MetricsSnapshot> {
        let state = self.try_lock()?;
        Ok(state
            .metrics
            .snapshot(P::KIND.as_str(), state.entries.len(), state.memory_usage))
    }

    fn len(&self) -> usize {
        self.lock().entries.len()
    }

    fn config(&self) -> CacheConfig {
        self.config.clone()
    }

    fn strategy(&self) -> StrategyKind {
        P::KIND
    }

    fn entries(&self) -> Vec<(String, CacheEntry)> {
        let state = self.lock();
        state
            .policy
            .ordered_keys()
            .into_iter()
            .filter_map(|key| {
                let entry = state.entries.get(&key)?.clone();
                Some((key, entry))
            })
            .collect()
    }

    fn restore(&self, key: &str, entry: CacheEntry) {
        let mut state = self.lock();
        state.restore(key, entry, &self.config);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    fn lru(max_size: usize) -> LruCache {
        LruCache::new(CacheConfig::new().max_size(max_size).build().unwrap()).unwrap()
    }

    fn lfu(max_size: usize) -> LfuCache {
        LfuCache::new(CacheConfig::new().max_size(max_size).build().unwrap()).unwrap()
    }

    #[test]
    fn test_basic_set_get() {
        let cache = lru(10);
        cache.set("key1", json!("value1"));
        assert_eq!(cache.get("key1"), Some(json!("value1")));
    }

    #[test]
    fn test_get_nonexistent_counts_miss() {
        let cache = lru(10);
        assert!(cache.get("nonexistent").is_none());

        let metrics = cache.get_metrics().unwrap();
        assert_eq!(metrics.misses, 1);
        assert_eq!(metrics.hits, 0);
    }

    #[test]
    fn test_overwrite_keeps_single_entry() {
        let cache = lru(10);
        cache.set("key1", json!("value1"));
        cache.set("key1", json!("value2"));

        assert_eq!(cache.get("key1"), Some(json!("value2")));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get_metrics().unwrap().writes, 2);
    }

    #[test]
    fn test_overwrite_does_not_evict() {
        let cache = lru(3);
        cache.set("a", json!(1));
        cache.set("b", json!(2));
        cache.set("c", json!(3));
        cache.set("a", json!("updated"));

        assert_eq!(cache.len(), 3);
        assert!(cache.has("b"));
        assert!(cache.has("c"));
        assert_eq!(cache.get_metrics().unwrap().evictions, 0);
    }

    #[test]
    fn test_overwrite_refreshes_recency() {
        let cache = lru(2);
        cache.set("a", json!(1));
        cache.set("b", json!(2));
        cache.set("a", json!(10));
        cache.set("c", json!(3));

        assert!(cache.has("a"));
        assert!(!cache.has("b"));
    }

    #[test]
    fn test_lru_eviction_order() {
        let cache = lru(3);
        cache.set("key1", json!(1));
        cache.set("key2", json!(2));
        cache.set("key3", json!(3));

        // Access key1, making it recently used
        let _ = cache.get("key1");
        cache.set("key4", json!(4));

        assert!(cache.has("key1"));
        assert!(!cache.has("key2"));
        assert!(cache.has("key3"));
        assert!(cache.has("key4"));

        let metrics = cache.get_metrics().unwrap();
        assert_eq!(metrics.evictions_for(EvictionReason::SizeLimit), 1);
    }

    #[test]
    fn test_has_does_not_refresh_recency() {
        let cache = lru(2);
        cache.set("a", json!(1));
        cache.set("b", json!(2));
        assert!(cache.has("a"));
        cache.set("c", json!(3));

        assert!(!cache.has("a"));
        let metrics = cache.get_metrics().unwrap();
        assert_eq!(metrics.hits + metrics.misses, 0);
    }

    #[test]
    fn test_lfu_keeps_frequent_key() {
        let cache = lfu(3);
        cache.set("a", json!(1));
        cache.set("b", json!(2));
        cache.set("c", json!(3));
        let _ = cache.get("a");
        let _ = cache.get("a");
        let _ = cache.get("c");

        cache.set("d", json!(4));
        assert!(!cache.has("b"));
        assert!(cache.has("a"));

        // d is now the sole frequency-1 key
        cache.set("e", json!(5));
        assert!(!cache.has("d"));
        assert!(cache.has("c"));
    }

    #[test]
    fn test_lfu_tie_evicts_oldest() {
        let cache = lfu(2);
        cache.set("first", json!(1));
        cache.set("second", json!(2));
        cache.set("third", json!(3));

        assert!(!cache.has("first"));
        assert!(cache.has("second"));
        assert!(cache.has("third"));
    }

    #[test]
    fn test_delete() {
        let cache = lru(10);
        cache.set("key1", json!(1));

        assert!(cache.delete("key1"));
        assert!(!cache.delete("key1"));
        assert!(!cache.has("key1"));

        let metrics = cache.get_metrics().unwrap();
        assert_eq!(metrics.deletes, 1);
        assert_eq!(metrics.evictions_for(EvictionReason::ExplicitDelete), 1);
    }

    #[test]
    fn test_clear_records_reason() {
        let cache = lru(10);
        cache.set("key1", json!(1));
        cache.set("key2", json!(2));
        cache.clear();

        assert!(cache.is_empty());
        let metrics = cache.get_metrics().unwrap();
        assert_eq!(metrics.size, 0);
        assert_eq!(metrics.memory_usage, 0);
        assert_eq!(metrics.evictions_for(EvictionReason::CacheClear), 2);
    }

    #[test]
    fn test_ttl_expiration_on_get() {
        let config = CacheConfig::new()
            .ttl(Duration::from_millis(20))
            .build()
            .unwrap();
        let cache = LruCache::new(config).unwrap();
        cache.set("key1", json!(1));
        assert!(cache.has("key1"));

        std::thread::sleep(Duration::from_millis(40));

        assert!(cache.get("key1").is_none());
        assert!(cache.get("key1").is_none());
        assert!(!cache.has("key1"));

        let metrics = cache.get_metrics().unwrap();
        assert_eq!(metrics.misses, 2);
        assert_eq!(metrics.evictions_for(EvictionReason::TtlExpired), 1);
    }

    #[test]
    fn test_cleanup_expired() {
        let config = CacheConfig::new()
            .ttl(Duration::from_millis(20))
            .build()
            .unwrap();
        let cache = LfuCache::new(config).unwrap();
        cache.set("a", json!(1));
        cache.set("b", json!(2));

        std::thread::sleep(Duration::from_millis(40));
        cache.set("fresh", json!(3));

        assert_eq!(cache.cleanup_expired(), 2);
        assert_eq!(cache.cleanup_expired(), 0);
        assert!(cache.has("fresh"));
    }

    #[test]
    fn test_cleanup_without_ttl_is_noop() {
        let cache = lru(10);
        cache.set("a", json!(1));
        assert_eq!(cache.cleanup_expired(), 0);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_memory_pressure_eviction() {
        // Cap well below two 1 KiB strings
        let config = CacheConfig::new()
            .max_size(100)
            .max_memory_mb(1500.0 / (1024.0 * 1024.0))
            .build()
            .unwrap();
        let cache = LruCache::new(config).unwrap();
        let big = "x".repeat(1024);

        cache.set("a", json!(big.clone()));
        cache.set("b", json!(big.clone()));
        cache.set("c", json!(big));

        assert!(!cache.has("a"));
        assert!(cache.has("c"));
        let metrics = cache.get_metrics().unwrap();
        assert!(metrics.evictions_for(EvictionReason::MemoryPressure) >= 1);
    }

    #[test]
    fn test_metrics_track_memory_usage() {
        let cache = lru(10);
        cache.set("a", json!("abc"));
        cache.set("b", json!(12));

        let metrics = cache.get_metrics().unwrap();
        assert_eq!(metrics.size, 2);
        assert_eq!(metrics.memory_usage, 5 + 2);
        assert_eq!(cache.memory_usage(), 7);
    }

    #[test]
    fn test_entries_in_eviction_order() {
        let cache = lru(10);
        cache.set("a", json!(1));
        cache.set("b", json!(2));
        let _ = cache.get("a");

        let keys: Vec<String> = cache.entries().into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["b", "a"]);
    }

    #[test]
    fn test_restore_keeps_bookkeeping() {
        let cache = lru(10);
        let mut entry = CacheEntry::new(json!("v"));
        entry.touch();
        entry.touch();
        cache.restore("k", entry.clone());

        let (_, restored) = cache.entries().pop().unwrap();
        assert_eq!(restored.access_count(), 2);
        assert_eq!(restored.timestamp(), entry.timestamp());
        assert_eq!(cache.get_metrics().unwrap().writes, 0);
    }

    #[test]
    fn test_lfu_restore_keeps_hot_entries() {
        let cache = lfu(2);
        let mut hot = CacheEntry::new(json!("hot"));
        for _ in 0..5 {
            hot.touch();
        }
        cache.restore("hot", hot);
        cache.restore("cold", CacheEntry::new(json!("cold")));

        cache.set("new", json!("new"));
        assert!(cache.has("hot"));
        assert!(!cache.has("cold"));
        assert!(cache.has("new"));
    }

    #[test]
    fn test_access_times_sampled() {
        let cache = lru(10);
        cache.set("a", json!(1));
        let _ = cache.get("a");
        assert!(cache.get_metrics().unwrap().avg_access_time >= 0.0);

        let config = CacheConfig::new().enable_metrics(false).build().unwrap();
        let quiet = LruCache::new(config).unwrap();
        quiet.set("a", json!(1));
        assert_eq!(quiet.get_metrics().unwrap().avg_access_time, 0.0);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let result = LruCache::new(CacheConfig::new().max_size(0));
        assert!(matches!(result, Err(CacheError::InvalidConfig(_))));
    }

    #[test]
    fn test_concurrent_access() {
        use std::sync::Arc;
        use std::thread;

        let cache = Arc::new(lru(10_000));
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let cache = Arc::clone(&cache);
                thread::spawn(move || {
                    for i in 0..200 {
                        let key = format!("thread_{}_key_{}", t, i);
                        cache.set(&key, json!(i));
                        let _ = cache.get(&key);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(cache.len(), 1600);
        assert_eq!(cache.get_metrics().unwrap().hits, 1600);
    }
}

//! Statistics and metrics for a cache instance.
//!
//! Counters live inside the owning strategy's lock, so they are plain
//! integers. `MetricsSnapshot` is the serializable point-in-time copy handed
//! out by `get_metrics()`.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::time::Duration;

/// Number of operation durations kept for `avg_access_time`.
const ACCESS_TIME_SAMPLES: usize = 1000;

/// Why an entry left the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvictionReason {
    /// Evicted to stay within `max_size`.
    SizeLimit,
    TtlExpired,
    ExplicitDelete,
    /// Evicted to stay within `max_memory_mb`.
    MemoryPressure,
    CacheClear,
}

impl EvictionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            EvictionReason::SizeLimit => "size_limit",
            EvictionReason::TtlExpired => "ttl_expired",
            EvictionReason::ExplicitDelete => "explicit_delete",
            EvictionReason::MemoryPressure => "memory_pressure",
            EvictionReason::CacheClear => "cache_clear",
        }
    }
}

impl fmt::Display for EvictionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Counters for one strategy instance.
#[derive(Debug, Default, Clone)]
pub struct CacheMetrics {
    hits: u64,
    misses: u64,
    evictions: u64,
    writes: u64,
    deletes: u64,
    eviction_reasons: BTreeMap<EvictionReason, u64>,
    access_times: VecDeque<Duration>,
}

impl CacheMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_hit(&mut self) {
        self.hits += 1;
    }

    pub fn record_miss(&mut self) {
        self.misses += 1;
    }

    pub fn record_write(&mut self) {
        self.writes += 1;
    }

    /// Record `count` entries leaving the cache for `reason`.
    pub fn record_eviction(&mut self, reason: EvictionReason, count: u64) {
        if count == 0 {
            return;
        }
        self.evictions += count;
        if reason == EvictionReason::ExplicitDelete {
            self.deletes += count;
        }
        *self.eviction_reasons.entry(reason).or_insert(0) += count;
    }

    /// Record how long one operation took, keeping the newest samples.
    pub fn record_access_time(&mut self, elapsed: Duration) {
        if self.access_times.len() == ACCESS_TIME_SAMPLES {
            self.access_times.pop_front();
        }
        self.access_times.push_back(elapsed);
    }

    pub fn hits(&self) -> u64 {
        self.hits
    }

    pub fn misses(&self) -> u64 {
        self.misses
    }

    pub fn evictions(&self) -> u64 {
        self.evictions
    }

    pub fn writes(&self) -> u64 {
        self.writes
    }

    pub fn deletes(&self) -> u64 {
        self.deletes
    }

    pub fn evictions_for(&self, reason: EvictionReason) -> u64 {
        self.eviction_reasons.get(&reason).copied().unwrap_or(0)
    }

    /// Hit rate as a percentage (0.0 to 100.0).
    /// Returns 0.0 if no lookups have been performed.
    pub fn hit_rate(&self) -> f64 {
        hit_rate(self.hits, self.misses)
    }

    /// Mean of the sampled operation durations, in seconds.
    pub fn avg_access_time(&self) -> f64 {
        if self.access_times.is_empty() {
            return 0.0;
        }
        let total: Duration = self.access_times.iter().sum();
        total.as_secs_f64() / self.access_times.len() as f64
    }

    /// Snapshot the counters together with the live size figures.
    pub fn snapshot(&self, strategy: &str, size: usize, memory_usage: usize) -> MetricsSnapshot {
        MetricsSnapshot {
            strategy: strategy.to_string(),
            hits: self.hits,
            misses: self.misses,
            evictions: self.evictions,
            writes: self.writes,
            deletes: self.deletes,
            size: size as u64,
            memory_usage: memory_usage as u64,
            hit_rate: self.hit_rate(),
            avg_access_time: self.avg_access_time(),
            eviction_reasons: self
                .eviction_reasons
                .iter()
                .map(|(reason, count)| (reason.as_str().to_string(), *count))
                .collect(),
            remote: None,
        }
    }
}

pub(crate) fn hit_rate(hits: u64, misses: u64) -> f64 {
    let total = hits + misses;
    if total == 0 {
        0.0
    } else {
        (hits as f64 / total as f64) * 100.0
    }
}

/// Remote-tier counters reported by a distributed cache.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RemoteStats {
    pub hits: u64,
    pub misses: u64,
    pub errors: u64,
}

/// A point-in-time snapshot of cache metrics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub strategy: String,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub writes: u64,
    pub deletes: u64,
    /// Current entry count.
    pub size: u64,
    /// Sum of entry size estimates, in bytes.
    pub memory_usage: u64,
    pub hit_rate: f64,
    /// Mean operation duration in seconds.
    pub avg_access_time: f64,
    pub eviction_reasons: BTreeMap<String, u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote: Option<RemoteStats>,
}

impl MetricsSnapshot {
    pub fn evictions_for(&self, reason: EvictionReason) -> u64 {
        self.eviction_reasons
            .get(reason.as_str())
            .copied()
            .unwrap_or(0)
    }

    /// Lookups plus writes.
    pub fn total_operations(&self) -> u64 {
        self.hits + self.misses + self.writes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_metrics() {
        let metrics = CacheMetrics::new();
        assert_eq!(metrics.hits(), 0);
        assert_eq!(metrics.misses(), 0);
        assert_eq!(metrics.evictions(), 0);
        assert_eq!(metrics.avg_access_time(), 0.0);
    }

    #[test]
    fn test_hit_rate() {
        let mut metrics = CacheMetrics::new();

        // No lookups = 0% hit rate
        assert_eq!(metrics.hit_rate(), 0.0);

        metrics.record_hit();
        metrics.record_hit();
        metrics.record_hit();
        metrics.record_miss();

        assert!((metrics.hit_rate() - 75.0).abs() < 0.01);
    }

    #[test]
    fn test_eviction_reasons() {
        let mut metrics = CacheMetrics::new();
        metrics.record_eviction(EvictionReason::SizeLimit, 1);
        metrics.record_eviction(EvictionReason::SizeLimit, 1);
        metrics.record_eviction(EvictionReason::ExplicitDelete, 1);
        metrics.record_eviction(EvictionReason::CacheClear, 0);

        assert_eq!(metrics.evictions(), 3);
        assert_eq!(metrics.deletes(), 1);
        assert_eq!(metrics.evictions_for(EvictionReason::SizeLimit), 2);
        assert_eq!(metrics.evictions_for(EvictionReason::CacheClear), 0);
    }

    #[test]
    fn test_access_time_window() {
        let mut metrics = CacheMetrics::new();
        for _ in 0..ACCESS_TIME_SAMPLES {
            metrics.record_access_time(Duration::from_millis(10));
        }
        for _ in 0..ACCESS_TIME_SAMPLES {
            metrics.record_access_time(Duration::from_millis(2));
        }
        // Older samples have rotated out
        assert!((metrics.avg_access_time() - 0.002).abs() < 1e-9);
    }

    #[test]
    fn test_snapshot() {
        let mut metrics = CacheMetrics::new();
        metrics.record_hit();
        metrics.record_write();
        metrics.record_eviction(EvictionReason::TtlExpired, 1);

        let snapshot = metrics.snapshot("lru", 3, 42);
        assert_eq!(snapshot.strategy, "lru");
        assert_eq!(snapshot.hits, 1);
        assert_eq!(snapshot.writes, 1);
        assert_eq!(snapshot.size, 3);
        assert_eq!(snapshot.memory_usage, 42);
        assert_eq!(snapshot.evictions_for(EvictionReason::TtlExpired), 1);
        assert_eq!(snapshot.total_operations(), 2);
    }
}

//! Configuration for cache instances.
//!
//! This module provides a builder for configuring capacity, TTL, eviction
//! strategy, memory limits, cleanup cadence and persistence.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{CacheError, CacheResult};

/// Which eviction strategy a cache uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrategyKind {
    /// Least recently used.
    Lru,
    /// Least frequently used.
    Lfu,
    /// Switches between LRU and LFU based on observed hit rate.
    Adaptive,
}

impl StrategyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyKind::Lru => "lru",
            StrategyKind::Lfu => "lfu",
            StrategyKind::Adaptive => "adaptive",
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StrategyKind {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "lru" => Ok(StrategyKind::Lru),
            "lfu" => Ok(StrategyKind::Lfu),
            "adaptive" => Ok(StrategyKind::Adaptive),
            other => Err(CacheError::InvalidConfig(format!(
                "unknown strategy '{}'",
                other
            ))),
        }
    }
}

/// Configuration for creating a cache instance.
///
/// Use the builder pattern to construct configuration:
///
/// ```
/// use adaptive_cache::{CacheConfig, StrategyKind};
/// use std::time::Duration;
///
/// let config = CacheConfig::new()
///     .max_size(500)
///     .ttl(Duration::from_secs(3600))
///     .strategy(StrategyKind::Lru)
///     .build()
///     .unwrap();
///
/// assert_eq!(config.get_max_size(), 500);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Maximum number of entries before eviction kicks in.
    pub(crate) max_size: usize,

    /// Entry lifetime. `None` means entries never expire.
    pub(crate) ttl: Option<Duration>,

    pub(crate) strategy: StrategyKind,

    /// Soft memory cap in megabytes, checked before each new insertion.
    pub(crate) max_memory_mb: Option<f64>,

    /// Interval between background expiry sweeps.
    pub(crate) cleanup_interval: Duration,

    /// Whether operation durations are sampled for `avg_access_time`.
    pub(crate) enable_metrics: bool,

    pub(crate) enable_persistence: bool,

    /// Directory holding snapshots when persistence is enabled.
    pub(crate) persistence_path: Option<PathBuf>,

    /// Gzip snapshots written for this cache.
    pub(crate) compression: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_size: 1000,
            ttl: None,
            strategy: StrategyKind::Lru,
            max_memory_mb: None,
            cleanup_interval: Duration::from_secs(300),
            enable_metrics: true,
            enable_persistence: false,
            persistence_path: None,
            compression: false,
        }
    }
}

impl CacheConfig {
    /// Create a new configuration builder with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum number of entries. Must be at least 1.
    pub fn max_size(mut self, max_size: usize) -> Self {
        self.max_size = max_size;
        self
    }

    /// Set the entry TTL.
    ///
    /// `Duration::ZERO` disables expiry.
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = if ttl.is_zero() { None } else { Some(ttl) };
        self
    }

    /// Set the eviction strategy.
    pub fn strategy(mut self, strategy: StrategyKind) -> Self {
        self.strategy = strategy;
        self
    }

    /// Set a soft memory cap in megabytes.
    ///
    /// Before a new key is inserted, entries are evicted while the summed
    /// entry size estimate exceeds this cap.
    pub fn max_memory_mb(mut self, megabytes: f64) -> Self {
        self.max_memory_mb = Some(megabytes);
        self
    }

    /// Set the interval between background expiry sweeps.
    pub fn cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval = interval;
        self
    }

    /// Enable or disable operation timing samples.
    pub fn enable_metrics(mut self, enabled: bool) -> Self {
        self.enable_metrics = enabled;
        self
    }

    /// Enable snapshotting to `path` when the owning manager shuts down.
    pub fn persistence(mut self, path: impl Into<PathBuf>) -> Self {
        self.enable_persistence = true;
        self.persistence_path = Some(path.into());
        self
    }

    /// Gzip snapshots of this cache.
    pub fn compression(mut self, enabled: bool) -> Self {
        self.compression = enabled;
        self
    }

    /// Validate and build the final configuration.
    pub fn build(self) -> CacheResult<Self> {
        self.validate()?;
        Ok(self)
    }

    /// Check every field for values no cache can operate with.
    pub fn validate(&self) -> CacheResult<()> {
        if self.max_size == 0 {
            return Err(CacheError::InvalidConfig(
                "max_size must be at least 1".to_string(),
            ));
        }
        if let Some(mb) = self.max_memory_mb {
            if !(mb.is_finite() && mb > 0.0) {
                return Err(CacheError::InvalidConfig(format!(
                    "max_memory_mb must be positive, got {}",
                    mb
                )));
            }
        }
        if self.cleanup_interval.is_zero() {
            return Err(CacheError::InvalidConfig(
                "cleanup_interval must be non-zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn get_max_size(&self) -> usize {
        self.max_size
    }

    pub fn get_ttl(&self) -> Option<Duration> {
        self.ttl
    }

    pub fn get_strategy(&self) -> StrategyKind {
        self.strategy
    }

    pub fn get_max_memory_mb(&self) -> Option<f64> {
        self.max_memory_mb
    }

    pub fn get_cleanup_interval(&self) -> Duration {
        self.cleanup_interval
    }

    pub fn metrics_enabled(&self) -> bool {
        self.enable_metrics
    }

    pub fn persistence_enabled(&self) -> bool {
        self.enable_persistence
    }

    pub fn get_persistence_path(&self) -> Option<&PathBuf> {
        self.persistence_path.as_ref()
    }

    pub fn compression_enabled(&self) -> bool {
        self.compression
    }

    /// The soft memory cap in bytes, if one is set.
    pub(crate) fn max_memory_bytes(&self) -> Option<usize> {
        self.max_memory_mb
            .map(|mb| (mb * 1024.0 * 1024.0) as usize)
    }
}

//! A cache that switches between LRU and LFU based on hit rate.
//!
//! Every `evaluation_window` lookups the active strategy's hit rate is
//! compared against `hit_rate_threshold`. When it falls short the cache is
//! rebuilt under the other strategy: a fresh instance is created with the same
//! configuration and every live value is copied across with `set`. Timestamps
//! and access counts are not carried over, and the new strategy starts with
//! fresh metrics.
//!
//! The rebuild runs while holding the adaptive lock, so concurrent calls on
//! this cache block until every entry has been copied. For large caches this
//! shows up as a latency spike at each switch.

use serde_json::Value;
use std::sync::{Mutex, MutexGuard};

use tracing::{debug, info, warn};

use crate::cache::CacheBackend;
use crate::config::{CacheConfig, StrategyKind};
use crate::entry::CacheEntry;
use crate::error::{CacheError, CacheResult};
use crate::stats::MetricsSnapshot;
use crate::storage::{LfuCache, LruCache};

/// Tuning knobs for strategy switching.
#[derive(Debug, Clone, PartialEq)]
pub struct AdaptiveConfig {
    /// Number of `get` calls between evaluations.
    pub evaluation_window: u64,
    /// Hit rate (percent) below which the strategy is switched.
    pub hit_rate_threshold: f64,
}

impl Default for AdaptiveConfig {
    fn default() -> Self {
        Self {
            evaluation_window: 1000,
            hit_rate_threshold: 70.0,
        }
    }
}

impl AdaptiveConfig {
    pub fn validate(&self) -> CacheResult<()> {
        if self.evaluation_window == 0 {
            return Err(CacheError::InvalidConfig(
                "evaluation_window must be at least 1".to_string(),
            ));
        }
        if !(0.0..=100.0).contains(&self.hit_rate_threshold) {
            return Err(CacheError::InvalidConfig(format!(
                "hit_rate_threshold must be within 0..=100, got {}",
                self.hit_rate_threshold
            )));
        }
        Ok(())
    }
}

#[derive(Debug)]
struct AdaptiveState {
    active: Box<dyn CacheBackend>,
    request_count: u64,
    switches: u64,
}

/// A cache that rebuilds itself under LRU or LFU depending on performance.
///
/// # Example
/// ```
/// use adaptive_cache::{AdaptiveCache, AdaptiveConfig, CacheBackend, CacheConfig, StrategyKind};
/// use serde_json::json;
///
/// let tuning = AdaptiveConfig { evaluation_window: 4, hit_rate_threshold: 70.0 };
/// let cache = AdaptiveCache::with_tuning(CacheConfig::default(), tuning).unwrap();
/// cache.set("a", json!(1));
///
/// for _ in 0..4 {
///     let _ = cache.get("missing");
/// }
///
/// // 0% hit rate over the window: switched to LFU, values kept
/// assert_eq!(cache.current_strategy(), StrategyKind::Lfu);
/// assert_eq!(cache.get("a"), Some(json!(1)));
/// ```
#[derive(Debug)]
pub struct AdaptiveCache {
    state: Mutex<AdaptiveState>,
    config: CacheConfig,
    tuning: AdaptiveConfig,
}

impl AdaptiveCache {
    /// Create an adaptive cache starting on LRU with default tuning.
    pub fn new(config: CacheConfig) -> CacheResult<Self> {
        Self::with_tuning(config, AdaptiveConfig::default())
    }

    pub fn with_tuning(config: CacheConfig, tuning: AdaptiveConfig) -> CacheResult<Self> {
        Self::with_initial_strategy(config, tuning, StrategyKind::Lru)
    }

    /// Create an adaptive cache starting on `initial` (LRU or LFU).
    pub fn with_initial_strategy(
        config: CacheConfig,
        tuning: AdaptiveConfig,
        initial: StrategyKind,
    ) -> CacheResult<Self> {
        config.validate()?;
        tuning.validate()?;
        let active = build_strategy(initial, &config)?;
        Ok(Self {
            state: Mutex::new(AdaptiveState {
                active,
                request_count: 0,
                switches: 0,
            }),
            config,
            tuning,
        })
    }

    fn lock(&self) -> MutexGuard<'_, AdaptiveState> {
        self.state.lock().unwrap_or_else(|poisoned| {
            warn!("adaptive cache lock poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// The strategy currently serving requests.
    pub fn current_strategy(&self) -> StrategyKind {
        self.lock().active.strategy()
    }

    /// How many times the strategy has been switched.
    pub fn switch_count(&self) -> u64 {
        self.lock().switches
    }

    pub fn tuning(&self) -> &AdaptiveConfig {
        &self.tuning
    }

    fn evaluate(&self, state: &mut AdaptiveState) {
        let metrics = match state.active.get_metrics() {
            Ok(metrics) => metrics,
            Err(e) => {
                warn!(error = %e, "skipping adaptive evaluation");
                return;
            }
        };

        if metrics.hit_rate >= self.tuning.hit_rate_threshold {
            debug!(
                strategy = %state.active.strategy(),
                hit_rate = metrics.hit_rate,
                "adaptive cache keeping strategy"
            );
            return;
        }

        let from = state.active.strategy();
        let to = match from {
            StrategyKind::Lfu => StrategyKind::Lru,
            _ => StrategyKind::Lfu,
        };

        let replacement = match build_strategy(to, &self.config) {
            Ok(replacement) => replacement,
            Err(e) => {
                warn!(error = %e, "failed to build replacement strategy");
                return;
            }
        };

        let migrated = state.active.entries();
        let count = migrated.len();
        for (key, entry) in migrated {
            replacement.set(&key, entry.value);
        }

        info!(
            from = %from,
            to = %to,
            hit_rate = metrics.hit_rate,
            entries = count,
            "adaptive cache switching strategy"
        );
        state.active = replacement;
        state.switches += 1;
    }
}

/// Build a plain strategy of `kind` sharing `config`.
fn build_strategy(kind: StrategyKind, config: &CacheConfig) -> CacheResult<Box<dyn CacheBackend>> {
    let config = config.clone().strategy(kind);
    let strategy: Box<dyn CacheBackend> = match kind {
        StrategyKind::Lfu => Box::new(LfuCache::new(config)?),
        StrategyKind::Lru => Box::new(LruCache::new(config)?),
        StrategyKind::Adaptive => {
            return Err(CacheError::InvalidConfig(
                "adaptive cache cannot wrap another adaptive cache".to_string(),
            ))
        }
    };
    Ok(strategy)
}

impl CacheBackend for AdaptiveCache {
    fn get(&self, key: &str) -> Option<Value> {
        let mut state = self.lock();
        let value = state.active.get(key);

        state.request_count += 1;
        if state.request_count % self.tuning.evaluation_window == 0 {
            self.evaluate(&mut state);
        }
        value
    }

    fn set(&self, key: &str, value: Value) {
        self.lock().active.set(key, value);
    }

    fn has(&self, key: &str) -> bool {
        self.lock().active.has(key)
    }

    fn delete(&self, key: &str) -> bool {
        self.lock().active.delete(key)
    }

    fn clear(&self) {
        self.lock().active.clear();
    }

    fn cleanup_expired(&self) -> usize {
        self.lock().active.cleanup_expired()
    }

    fn get_metrics(&self) -> CacheResult<MetricsSnapshot> {
        self.lock().active.get_metrics()
    }

    fn len(&self) -> usize {
        self.lock().active.len()
    }

    fn config(&self) -> CacheConfig {
        self.config.clone()
    }

    fn strategy(&self) -> StrategyKind {
        self.current_strategy()
    }

    fn entries(&self) -> Vec<(String, CacheEntry)> {
        self.lock().active.entries()
    }

    fn restore(&self, key: &str, entry: CacheEntry) {
        self.lock().active.restore(key, entry);
    }
}

//! Pre-populating caches from a loader.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::cache::CacheBackend;
use crate::error::CacheResult;
use crate::manager::CacheManager;
use crate::scheduler::PeriodicTask;

/// Error type loaders may return.
pub type LoadError = Box<dyn Error + Send + Sync>;

/// Outcome of one warming pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WarmingReport {
    pub total: usize,
    /// Keys stored in the cache.
    pub loaded: usize,
    /// Keys already cached.
    pub skipped: usize,
    /// Keys the loader had no value for.
    pub missing: usize,
    /// Keys whose loader call failed.
    pub errors: usize,
}

/// Loads values into a cache in batches.
///
/// # Example
/// ```
/// use adaptive_cache::{CacheBackend, CacheConfig, CacheWarming, LruCache};
/// use serde_json::json;
///
/// let cache = LruCache::new(CacheConfig::default()).unwrap();
/// let keys = vec!["a".to_string(), "b".to_string()];
///
/// let report = CacheWarming::new().warm(&cache, &keys, |key| Ok(Some(json!(key.len()))));
/// assert_eq!(report.loaded, 2);
/// assert!(cache.has("a"));
/// ```
#[derive(Debug, Clone)]
pub struct CacheWarming {
    batch_size: usize,
}

impl Default for CacheWarming {
    fn default() -> Self {
        Self { batch_size: 100 }
    }
}

impl CacheWarming {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Load each key not already cached with `loader` and store the values
    /// that come back.
    ///
    /// A loader error for one key is logged and counted; the rest of the keys
    /// are still processed.
    pub fn warm<L>(&self, cache: &dyn CacheBackend, keys: &[String], loader: L) -> WarmingReport
    where
        L: Fn(&str) -> Result<Option<Value>, LoadError>,
    {
        let mut report = WarmingReport {
            total: keys.len(),
            ..WarmingReport::default()
        };

        for (batch_no, batch) in keys.chunks(self.batch_size).enumerate() {
            for key in batch {
                if cache.has(key) {
                    report.skipped += 1;
                    continue;
                }
                match loader(key) {
                    Ok(Some(value)) => {
                        cache.set(key, value);
                        report.loaded += 1;
                    }
                    Ok(None) => report.missing += 1,
                    Err(e) => {
                        warn!(key = %key, error = %e, "failed to warm key");
                        report.errors += 1;
                    }
                }
            }
            debug!(batch = batch_no, keys = batch.len(), "warmed batch");
        }

        info!(
            total = report.total,
            loaded = report.loaded,
            skipped = report.skipped,
            missing = report.missing,
            errors = report.errors,
            "cache warming finished"
        );
        report
    }

    /// Warm the cache registered as `name` in `manager`.
    pub fn warm_named<L>(
        &self,
        manager: &CacheManager,
        name: &str,
        keys: &[String],
        loader: L,
    ) -> CacheResult<WarmingReport>
    where
        L: Fn(&str) -> Result<Option<Value>, LoadError>,
    {
        let cache = manager.cache(name)?;
        Ok(self.warm(cache.as_ref(), keys, loader))
    }

    /// Re-run warming every `interval` on a background thread.
    ///
    /// `keys` is called before each pass so the key set can change over time.
    pub fn schedule<K, L>(
        &self,
        cache: Arc<dyn CacheBackend>,
        interval: Duration,
        keys: K,
        loader: L,
    ) -> CacheResult<PeriodicTask>
    where
        K: Fn() -> Vec<String> + Send + 'static,
        L: Fn(&str) -> Result<Option<Value>, LoadError> + Send + 'static,
    {
        let warming = self.clone();
        PeriodicTask::spawn("warming", interval, move || {
            warming.warm(cache.as_ref(), &keys(), &loader);
        })
    }
}

//! Memoization of function results in a cache.
//!
//! Call arguments are collected into [`CallArgs`] and turned into a key. The
//! default key is the MD5 hex digest of the arguments' `Debug` output, with
//! keyword arguments sorted by name. Two arguments whose `Debug` output is
//! identical therefore share a key; types with lossy or non-deterministic
//! `Debug` impls (such as `HashMap`) should supply a custom key function.

use md5::{Digest, Md5};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::fmt::{self, Debug};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::cache::CacheBackend;

/// Arguments of one memoized call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallArgs {
    positional: Vec<String>,
    keyword: Vec<(String, String)>,
}

impl CallArgs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arg(mut self, value: &impl Debug) -> Self {
        self.positional.push(format!("{:?}", value));
        self
    }

    pub fn kwarg(mut self, name: &str, value: &impl Debug) -> Self {
        self.keyword.push((name.to_string(), format!("{:?}", value)));
        self
    }

    pub fn positional(&self) -> &[String] {
        &self.positional
    }

    pub fn keyword(&self) -> &[(String, String)] {
        &self.keyword
    }

    /// MD5 hex of the positional arguments followed by the sorted keyword
    /// arguments.
    pub fn default_key(&self) -> String {
        let mut keyword = self.keyword.clone();
        keyword.sort();

        let mut hasher = Md5::new();
        hasher.update(format!("{:?}", self.positional).as_bytes());
        hasher.update(format!("{:?}", keyword).as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

/// What the cache held for a key.
enum Lookup<T> {
    Hit(T),
    /// A value was cached but `unless` rejected it or it failed to decode.
    Stale,
    Miss,
}

type KeyFn = Arc<dyn Fn(&CallArgs) -> String + Send + Sync>;
type ConditionFn = Arc<dyn Fn(&CallArgs) -> bool + Send + Sync>;
type UnlessFn = Arc<dyn Fn(&Value) -> bool + Send + Sync>;

/// Wraps function calls so their results are served from a cache.
///
/// # Example
/// ```
/// use adaptive_cache::{CacheConfig, CacheDecorator, CallArgs, LruCache};
/// use std::sync::Arc;
///
/// let cache = Arc::new(LruCache::new(CacheConfig::default()).unwrap());
/// let memo = CacheDecorator::new(cache);
///
/// let square = |n: u64| memo.call(&CallArgs::new().arg(&n), || n * n);
/// assert_eq!(square(12), 144);
/// assert_eq!(square(12), 144);
/// ```
#[derive(Clone)]
pub struct CacheDecorator {
    cache: Arc<dyn CacheBackend>,
    key_func: Option<KeyFn>,
    condition: Option<ConditionFn>,
    unless: Option<UnlessFn>,
}

impl fmt::Debug for CacheDecorator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheDecorator")
            .field("cache", &self.cache)
            .field("key_func", &self.key_func.is_some())
            .field("condition", &self.condition.is_some())
            .field("unless", &self.unless.is_some())
            .finish()
    }
}

impl CacheDecorator {
    pub fn new(cache: Arc<dyn CacheBackend>) -> Self {
        Self {
            cache,
            key_func: None,
            condition: None,
            unless: None,
        }
    }

    /// Derive keys with `key_func` instead of hashing the arguments.
    pub fn key_func<F>(mut self, key_func: F) -> Self
    where
        F: Fn(&CallArgs) -> String + Send + Sync + 'static,
    {
        self.key_func = Some(Arc::new(key_func));
        self
    }

    /// Only use the cache when `condition` holds for the call.
    pub fn condition<F>(mut self, condition: F) -> Self
    where
        F: Fn(&CallArgs) -> bool + Send + Sync + 'static,
    {
        self.condition = Some(Arc::new(condition));
        self
    }

    /// Reject results for which `unless` holds: a cached value matching it
    /// is recomputed, a fresh result matching it is not stored.
    pub fn unless<F>(mut self, unless: F) -> Self
    where
        F: Fn(&Value) -> bool + Send + Sync + 'static,
    {
        self.unless = Some(Arc::new(unless));
        self
    }

    pub fn cache(&self) -> &Arc<dyn CacheBackend> {
        &self.cache
    }

    pub fn key_for(&self, args: &CallArgs) -> String {
        match &self.key_func {
            Some(key_func) => key_func(args),
            None => args.default_key(),
        }
    }

    fn use_cache(&self, args: &CallArgs) -> bool {
        self.condition.as_ref().map_or(true, |c| c(args))
    }

    fn rejected(&self, value: &Value) -> bool {
        self.unless.as_ref().map_or(false, |u| u(value))
    }

    fn lookup<T: DeserializeOwned>(&self, key: &str) -> Lookup<T> {
        let Some(cached) = self.cache.get(key) else {
            return Lookup::Miss;
        };
        if self.rejected(&cached) {
            debug!(key, "cached value rejected, recomputing");
            return Lookup::Stale;
        }
        match serde_json::from_value(cached) {
            Ok(value) => Lookup::Hit(value),
            Err(e) => {
                debug!(key, error = %e, "cached value has a different shape, recomputing");
                Lookup::Stale
            }
        }
    }

    /// Cache a fresh result. A stale entry is always replaced, even by a
    /// rejected value, so it is not served again.
    fn store<T: Serialize>(&self, key: &str, value: &T, stale: bool) {
        match serde_json::to_value(value) {
            Ok(encoded) if stale || !self.rejected(&encoded) => self.cache.set(key, encoded),
            Ok(_) => {}
            Err(e) => {
                warn!(key, error = %e, "result not cacheable");
                if stale {
                    self.cache.delete(key);
                }
            }
        }
    }

    /// Return the cached result for `args`, or run `f` and cache what it
    /// returns.
    pub fn call<T, F>(&self, args: &CallArgs, f: F) -> T
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> T,
    {
        if !self.use_cache(args) {
            return f();
        }

        let key = self.key_for(args);
        let stale = match self.lookup(&key) {
            Lookup::Hit(value) => return value,
            Lookup::Stale => true,
            Lookup::Miss => false,
        };

        let value = f();
        self.store(&key, &value, stale);
        value
    }

    /// Like [`call`](Self::call) for fallible functions. Errors are returned
    /// to the caller and never cached.
    pub fn try_call<T, E, F>(&self, args: &CallArgs, f: F) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Result<T, E>,
    {
        if !self.use_cache(args) {
            return f();
        }

        let key = self.key_for(args);
        let stale = match self.lookup(&key) {
            Lookup::Hit(value) => return Ok(value),
            Lookup::Stale => true,
            Lookup::Miss => false,
        };

        let value = f()?;
        self.store(&key, &value, stale);
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheConfig;
    use crate::storage::LruCache;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn decorator() -> CacheDecorator {
        CacheDecorator::new(Arc::new(LruCache::new(CacheConfig::default()).unwrap()))
    }

    #[test]
    fn test_memoizes_results() {
        let memo = decorator();
        let calls = AtomicUsize::new(0);
        let add = |a: i32, b: i32| {
            memo.call(&CallArgs::new().arg(&a).arg(&b), || {
                calls.fetch_add(1, Ordering::SeqCst);
                a + b
            })
        };

        assert_eq!(add(2, 3), 5);
        assert_eq!(add(2, 3), 5);
        assert_eq!(add(3, 2), 5);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_default_key_is_md5_hex() {
        let key = CallArgs::new().arg(&"x").default_key();
        assert_eq!(key.len(), 32);
        assert!(key.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_kwarg_order_does_not_matter() {
        let a = CallArgs::new().kwarg("x", &1).kwarg("y", &2);
        let b = CallArgs::new().kwarg("y", &2).kwarg("x", &1);
        assert_eq!(a.default_key(), b.default_key());

        let positional = CallArgs::new().arg(&1).arg(&2);
        assert_ne!(a.default_key(), positional.default_key());
    }

    #[test]
    fn test_custom_key_func() {
        let memo = decorator().key_func(|args| format!("user:{}", args.positional()[0]));
        let id = 7;
        let name = memo.call(&CallArgs::new().arg(&id), || "ada".to_string());
        assert_eq!(name, "ada");
        assert_eq!(memo.cache().get("user:7"), Some(json!("ada")));
    }

    #[test]
    fn test_condition_bypasses_cache() {
        let calls = AtomicUsize::new(0);
        let memo = decorator().condition(|args| args.positional()[0] != "0");

        let run = |n: i32| {
            memo.call(&CallArgs::new().arg(&n), || {
                calls.fetch_add(1, Ordering::SeqCst);
                n
            })
        };

        run(0);
        run(0);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(memo.cache().is_empty());

        run(1);
        run(1);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(memo.cache().len(), 1);
    }

    #[test]
    fn test_unless_rejects_results() {
        let calls = AtomicUsize::new(0);
        let memo = decorator().unless(|value| value.is_null());
        let args = CallArgs::new().arg(&"lookup");

        let empty: Option<u32> = memo.call(&args, || {
            calls.fetch_add(1, Ordering::SeqCst);
            None
        });
        assert_eq!(empty, None);
        assert!(memo.cache().is_empty());

        let found: Option<u32> = memo.call(&args, || {
            calls.fetch_add(1, Ordering::SeqCst);
            Some(3)
        });
        assert_eq!(found, Some(3));
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        // A rejected value already in the cache is recomputed and overwritten
        memo.cache().set(&memo.key_for(&args), Value::Null);
        let again: Option<u32> = memo.call(&args, || Some(4));
        assert_eq!(again, Some(4));
        assert_eq!(memo.cache().get(&memo.key_for(&args)), Some(json!(4)));
    }

    #[test]
    fn test_rejected_cached_value_replaced_by_rejected_result() {
        let memo = decorator().unless(|value| value.as_i64().map_or(false, |n| n < 0));
        let args = CallArgs::new().arg(&"balance");
        let key = memo.key_for(&args);
        memo.cache().set(&key, json!(-1));

        let value: i64 = memo.call(&args, || -2);
        assert_eq!(value, -2);
        assert_eq!(memo.cache().get(&key), Some(json!(-2)));

        // Nothing stale was cached this time, so a rejected result is not stored
        memo.cache().delete(&key);
        let value: i64 = memo.call(&args, || -3);
        assert_eq!(value, -3);
        assert!(!memo.cache().has(&key));
    }

    #[test]
    fn test_errors_are_not_cached() {
        let memo = decorator();
        let calls = AtomicUsize::new(0);
        let args = CallArgs::new().arg(&"flaky");

        let first: Result<u32, String> = memo.try_call(&args, || {
            calls.fetch_add(1, Ordering::SeqCst);
            Err("boom".to_string())
        });
        assert_eq!(first, Err("boom".to_string()));

        let second: Result<u32, String> = memo.try_call(&args, || {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(9)
        });
        assert_eq!(second, Ok(9));

        let third: Result<u32, String> = memo.try_call(&args, || unreachable!());
        assert_eq!(third, Ok(9));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_mismatched_cached_shape_recomputes() {
        let memo = decorator();
        let args = CallArgs::new().arg(&1);
        memo.cache().set(&memo.key_for(&args), json!("not a number"));

        let value: u32 = memo.call(&args, || 42);
        assert_eq!(value, 42);
        assert_eq!(memo.cache().get(&memo.key_for(&args)), Some(json!(42)));
    }
}

//! # Adaptive Cache
//!
//! A thread-safe caching subsystem with pluggable eviction strategies,
//! adaptive strategy switching and an optional remote tier.
//!
//! ## Features
//!
//! - **Eviction strategies**: LRU and LFU with size and memory limits
//! - **Adaptive switching**: flips between LRU and LFU when the hit rate drops
//! - **TTL support**: lazy expiry on read plus periodic background sweeps
//! - **Distributed tier**: local LRU in front of a remote key-value store
//! - **Registry**: named caches with metrics, health checks and persistence
//! - **Memoization**: cache function results keyed on their arguments
//!
//! ## Quick Start
//!
//! ```rust
//! use adaptive_cache::{build_backend, CacheConfig, StrategyKind};
//! use serde_json::json;
//! use std::time::Duration;
//!
//! let config = CacheConfig::new()
//!     .max_size(2)
//!     .ttl(Duration::from_secs(300))
//!     .strategy(StrategyKind::Lru)
//!     .build()
//!     .unwrap();
//!
//! let cache = build_backend(config).unwrap();
//! cache.set("a", json!(1));
//! cache.set("b", json!(2));
//! let _ = cache.get("a");
//! cache.set("c", json!(3));
//!
//! // "b" was least recently used
//! assert!(!cache.has("b"));
//!
//! let metrics = cache.get_metrics().unwrap();
//! println!("Hit rate: {:.1}%", metrics.hit_rate);
//! ```
//!
//! ## Thread Safety
//!
//! Every backend locks internally, so a cache behind an `Arc` can be used from
//! many threads at once:
//!
//! ```rust
//! use adaptive_cache::{CacheBackend, CacheConfig, LfuCache};
//! use serde_json::json;
//! use std::sync::Arc;
//! use std::thread;
//!
//! let cache = Arc::new(LfuCache::new(CacheConfig::default()).unwrap());
//!
//! let handles: Vec<_> = (0..4).map(|i| {
//!     let cache = Arc::clone(&cache);
//!     thread::spawn(move || {
//!         cache.set(&format!("key_{}", i), json!(i));
//!     })
//! }).collect();
//!
//! for handle in handles {
//!     handle.join().unwrap();
//! }
//! assert_eq!(cache.len(), 4);
//! ```

pub mod adaptive;
pub mod cache;
pub mod config;
pub mod decorator;
pub mod distributed;
pub mod entry;
pub mod error;
pub mod manager;
pub mod monitor;
pub mod persistence;
pub mod policy;
pub mod scheduler;
pub mod stats;
pub mod storage;
pub mod warming;

pub use adaptive::{AdaptiveCache, AdaptiveConfig};
pub use cache::{build_backend, CacheBackend};
pub use config::{CacheConfig, StrategyKind};
pub use decorator::{CacheDecorator, CallArgs};
pub use distributed::{DistributedCache, MemoryStore, RemoteStore};
#[cfg(feature = "redis-backend")]
pub use distributed::{RedisConfig, RedisStore};
pub use entry::CacheEntry;
pub use error::{CacheError, CacheResult};
pub use manager::{CacheManager, MetricsReport, SystemMetrics};
pub use monitor::{CacheHealth, CacheMonitor, HealthReport, HealthStatus, MonitorThresholds};
pub use persistence::{CachePersistence, Snapshot};
pub use policy::{EvictionPolicy, LfuPolicy, LruPolicy};
pub use scheduler::PeriodicTask;
pub use stats::{CacheMetrics, EvictionReason, MetricsSnapshot, RemoteStats};
pub use storage::{EvictionCache, LfuCache, LruCache};
pub use warming::{CacheWarming, LoadError, WarmingReport};

pub mod cli;

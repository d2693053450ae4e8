//! Command-line interface definitions.
//!
//! The `cache-inspect` binary drives synthetic workloads against the cache
//! strategies and inspects health reports and snapshot files.

use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use crate::cache::{build_backend, CacheBackend};
use crate::config::{CacheConfig, StrategyKind};
use crate::error::CacheResult;
use crate::manager::CacheManager;
use crate::monitor::{CacheMonitor, HealthReport};
use crate::persistence::{Snapshot, SnapshotMetadata};
use crate::stats::MetricsSnapshot;

/// Inspect and exercise adaptive caches.
#[derive(Parser, Debug)]
#[command(name = "cache-inspect")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// The command to execute.
    #[clap(subcommand)]
    pub command: InspectCommand,
}

/// Available commands.
#[derive(Subcommand, Debug, PartialEq)]
pub enum InspectCommand {
    /// Run a skewed read-through workload and print the metrics.
    ///
    /// Most lookups go to a small hot set of keys; the rest are spread over
    /// the remaining key space. Every miss is followed by a write.
    Simulate {
        /// Eviction strategy to use.
        #[arg(long, default_value = "lru")]
        strategy: StrategyKind,
        /// Maximum number of entries.
        #[arg(long, default_value_t = 100)]
        capacity: usize,
        /// Number of lookups to perform.
        #[arg(long, default_value_t = 10_000)]
        ops: usize,
        /// Size of the key space.
        #[arg(long, default_value_t = 500)]
        keys: usize,
        /// Entry lifetime in seconds.
        #[arg(long)]
        ttl: Option<u64>,
    },

    /// Run a short workload on the default caches and print their health.
    Health,

    /// Print the metadata of a persisted snapshot.
    Snapshot {
        /// Path to a `.cache` file.
        path: PathBuf,
    },
}

/// Key looked up by operation `op` of a simulated workload.
///
/// Four out of five operations target the hot fifth of the key space.
pub fn workload_key(op: usize, keys: usize) -> String {
    let keys = keys.max(1);
    let hot = (keys / 5).max(1);
    let index = if op % 5 != 0 || hot == keys {
        op % hot
    } else {
        hot + op.wrapping_mul(7919) % (keys - hot)
    };
    format!("key_{}", index)
}

/// Drive `ops` read-through lookups against `cache`.
pub fn run_workload(cache: &dyn CacheBackend, ops: usize, keys: usize) {
    for op in 0..ops {
        let key = workload_key(op, keys);
        if cache.get(&key).is_none() {
            cache.set(&key, json!({ "op": op }));
        }
    }
}

pub fn simulate(
    strategy: StrategyKind,
    capacity: usize,
    ops: usize,
    keys: usize,
    ttl: Option<u64>,
) -> CacheResult<MetricsSnapshot> {
    let mut config = CacheConfig::new().max_size(capacity).strategy(strategy);
    if let Some(secs) = ttl {
        config = config.ttl(Duration::from_secs(secs));
    }
    let cache = build_backend(config.build()?)?;
    run_workload(cache.as_ref(), ops, keys);
    cache.get_metrics()
}

pub fn health() -> CacheResult<HealthReport> {
    let manager = Arc::new(CacheManager::new()?);
    for name in manager.cache_names() {
        if let Some(cache) = manager.get_cache(&name) {
            run_workload(cache.as_ref(), 2_000, 300);
        }
    }
    let report = CacheMonitor::new(Arc::clone(&manager)).health_report();
    manager.shutdown();
    Ok(report)
}

#[derive(Debug, Serialize)]
pub struct SnapshotSummary {
    #[serde(flatten)]
    pub metadata: SnapshotMetadata,
    pub age_secs: u64,
    pub first_keys: Vec<String>,
}

pub fn inspect_snapshot(path: &Path) -> CacheResult<SnapshotSummary> {
    let snapshot = Snapshot::read_from(path)?;
    Ok(SnapshotSummary {
        age_secs: snapshot.age()?.as_secs(),
        first_keys: snapshot.entries.keys().take(10).cloned().collect(),
        metadata: snapshot.metadata,
    })
}

/// Execute `command` and return its output as JSON.
pub fn run(command: InspectCommand) -> CacheResult<String> {
    let output = match command {
        InspectCommand::Simulate {
            strategy,
            capacity,
            ops,
            keys,
            ttl,
        } => serde_json::to_string_pretty(&simulate(strategy, capacity, ops, keys, ttl)?)?,
        InspectCommand::Health => serde_json::to_string_pretty(&health()?)?,
        InspectCommand::Snapshot { path } => {
            serde_json::to_string_pretty(&inspect_snapshot(&path)?)?
        }
    };
    Ok(output)
}

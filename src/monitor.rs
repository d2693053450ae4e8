//! Health checks over every cache a manager owns.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::warn;

use crate::manager::{CacheManager, MetricsReport, SystemMetrics};
use crate::stats::MetricsSnapshot;

/// Limits a cache must stay within to be reported healthy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorThresholds {
    /// Minimum hit rate, percent.
    pub min_hit_rate: f64,
    /// Maximum share of system memory held by one cache, percent.
    pub max_memory_percent: f64,
    /// Maximum evictions per hundred operations.
    pub max_eviction_rate: f64,
    /// Skip the hit-rate check for caches that have had no lookups. When
    /// off, an unread cache reports a 0% hit rate and fails the check.
    #[serde(default = "default_ignore_idle")]
    pub ignore_idle_hit_rate: bool,
}

fn default_ignore_idle() -> bool {
    true
}

impl Default for MonitorThresholds {
    fn default() -> Self {
        Self {
            min_hit_rate: 50.0,
            max_memory_percent: 80.0,
            max_eviction_rate: 10.0,
            ignore_idle_hit_rate: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheHealth {
    pub healthy: bool,
    pub hit_rate: f64,
    /// Evictions per hundred operations.
    pub eviction_rate: f64,
    /// Share of system memory held by the cache; `None` when the system
    /// total is unknown.
    pub memory_percent: Option<f64>,
    pub warnings: Vec<String>,
    pub recommendations: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub caches: BTreeMap<String, CacheHealth>,
    pub system: SystemMetrics,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Healthy
    }
}

/// Evaluates cache metrics against [`MonitorThresholds`].
#[derive(Debug, Clone)]
pub struct CacheMonitor {
    manager: Arc<CacheManager>,
    thresholds: MonitorThresholds,
}

impl CacheMonitor {
    pub fn new(manager: Arc<CacheManager>) -> Self {
        Self {
            manager,
            thresholds: MonitorThresholds::default(),
        }
    }

    pub fn with_thresholds(mut self, thresholds: MonitorThresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    pub fn thresholds(&self) -> &MonitorThresholds {
        &self.thresholds
    }

    /// Check every registered cache.
    pub fn health_report(&self) -> HealthReport {
        let system = self.manager.get_system_metrics();
        let mut caches = BTreeMap::new();
        for (name, report) in self.manager.get_all_metrics() {
            let health = match report {
                MetricsReport::Metrics(metrics) => self.check(&metrics, system.total_memory),
                MetricsReport::Error { error } => CacheHealth {
                    healthy: false,
                    warnings: vec!["metrics unavailable".to_string()],
                    error: Some(error),
                    ..CacheHealth::default()
                },
            };
            if !health.healthy {
                warn!(cache = %name, warnings = ?health.warnings, "cache unhealthy");
            }
            caches.insert(name, health);
        }

        let status = if caches.values().all(|health| health.healthy) {
            HealthStatus::Healthy
        } else {
            HealthStatus::Degraded
        };

        HealthReport {
            status,
            caches,
            system,
        }
    }

    fn check(&self, metrics: &MetricsSnapshot, total_memory: u64) -> CacheHealth {
        let limits = &self.thresholds;
        let mut health = CacheHealth {
            hit_rate: metrics.hit_rate,
            ..CacheHealth::default()
        };

        let idle = metrics.hits + metrics.misses == 0;
        if !(idle && limits.ignore_idle_hit_rate) && metrics.hit_rate < limits.min_hit_rate {
            health.warnings.push(format!(
                "hit rate {:.1}% below {:.1}%",
                metrics.hit_rate, limits.min_hit_rate
            ));
            health
                .recommendations
                .push("increase max_size or review the key pattern".to_string());
        }

        let operations = metrics.total_operations();
        if operations > 0 {
            health.eviction_rate = metrics.evictions as f64 / operations as f64 * 100.0;
            if health.eviction_rate > limits.max_eviction_rate {
                health.warnings.push(format!(
                    "eviction rate {:.1}% above {:.1}%",
                    health.eviction_rate, limits.max_eviction_rate
                ));
                health
                    .recommendations
                    .push("increase max_size or max_memory_mb".to_string());
            }
        }

        if total_memory > 0 {
            let percent = metrics.memory_usage as f64 / total_memory as f64 * 100.0;
            health.memory_percent = Some(percent);
            if percent > limits.max_memory_percent {
                health.warnings.push(format!(
                    "memory at {:.1}% of system memory, above {:.1}%",
                    percent, limits.max_memory_percent
                ));
                health
                    .recommendations
                    .push("set max_memory_mb or shorten the ttl".to_string());
            }
        }

        health.healthy = health.warnings.is_empty();
        health
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheConfig;
    use serde_json::json;

    fn manager_with(name: &str, config: CacheConfig) -> Arc<CacheManager> {
        let manager = Arc::new(CacheManager::empty());
        manager.create_cache(name, config).unwrap();
        manager
    }

    #[test]
    fn test_fresh_caches_are_healthy() {
        let manager = Arc::new(CacheManager::new().unwrap());
        let report = CacheMonitor::new(manager).health_report();
        assert!(report.is_healthy());
        assert_eq!(report.caches.len(), 5);
        assert_eq!(report.system.cache_count, 5);
    }

    #[test]
    fn test_low_hit_rate_degrades() {
        let manager = manager_with("c", CacheConfig::default());
        let cache = manager.cache("c").unwrap();
        cache.set("a", json!(1));
        let _ = cache.get("a");
        for _ in 0..3 {
            let _ = cache.get("missing");
        }

        let report = CacheMonitor::new(manager).health_report();
        assert_eq!(report.status, HealthStatus::Degraded);
        let health = &report.caches["c"];
        assert!(!health.healthy);
        assert_eq!(health.hit_rate, 25.0);
        assert!(!health.recommendations.is_empty());
    }

    #[test]
    fn test_eviction_rate_warning() {
        let config = CacheConfig::new().max_size(1).build().unwrap();
        let manager = manager_with("tiny", config);
        let cache = manager.cache("tiny").unwrap();
        for i in 0..4 {
            cache.set(&format!("k{}", i), json!(i));
        }

        let report = CacheMonitor::new(manager).health_report();
        let health = &report.caches["tiny"];
        // 3 evictions over 4 writes
        assert_eq!(health.eviction_rate, 75.0);
        assert!(health.warnings.iter().any(|w| w.contains("eviction")));
    }

    #[test]
    fn test_memory_percent_warning() {
        let manager = manager_with("mem", CacheConfig::default());
        manager.cache("mem").unwrap().set("blob", json!("x".repeat(900)));

        let monitor = CacheMonitor::new(manager).with_thresholds(MonitorThresholds {
            max_memory_percent: 0.0,
            ..MonitorThresholds::default()
        });
        let report = monitor.health_report();
        if report.system.total_memory == 0 {
            return;
        }
        let health = &report.caches["mem"];
        assert!(health.memory_percent.unwrap() > 0.0);
        assert!(health.warnings.iter().any(|w| w.contains("memory")));
        assert!(!health.healthy);
    }

    #[test]
    fn test_idle_hit_rate_check_can_be_enabled() {
        let manager = manager_with("idle", CacheConfig::default());
        manager.cache("idle").unwrap().set("a", json!(1));

        let default = CacheMonitor::new(Arc::clone(&manager)).health_report();
        assert!(default.caches["idle"].healthy);

        let strict = CacheMonitor::new(manager).with_thresholds(MonitorThresholds {
            ignore_idle_hit_rate: false,
            ..MonitorThresholds::default()
        });
        let report = strict.health_report();
        let health = &report.caches["idle"];
        assert!(!health.healthy);
        assert!(health.warnings.iter().any(|w| w.contains("hit rate")));
    }

    #[test]
    fn test_custom_thresholds() {
        let manager = manager_with("c", CacheConfig::default());
        let cache = manager.cache("c").unwrap();
        cache.set("a", json!(1));
        let _ = cache.get("a");
        let _ = cache.get("missing");

        let strict = CacheMonitor::new(Arc::clone(&manager)).with_thresholds(MonitorThresholds {
            min_hit_rate: 90.0,
            ..MonitorThresholds::default()
        });
        assert!(!strict.health_report().is_healthy());

        let lenient = CacheMonitor::new(manager).with_thresholds(MonitorThresholds {
            min_hit_rate: 10.0,
            ..MonitorThresholds::default()
        });
        assert!(lenient.health_report().is_healthy());
    }
}

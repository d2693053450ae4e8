//! Eviction ordering policies.
//!
//! A policy only tracks keys; values and bookkeeping live in the storage
//! layer. The storage calls back into the policy on every insert, read and
//! removal, and asks it which key should go next.

use indexmap::IndexSet;
use std::collections::HashMap;
use std::fmt::Debug;

use crate::config::StrategyKind;

/// Ordering bookkeeping behind an eviction strategy.
pub trait EvictionPolicy: Debug + Default + Send + 'static {
    /// Strategy this policy implements.
    const KIND: StrategyKind;

    /// A new key was inserted.
    fn on_insert(&mut self, key: &str);

    /// An existing key was read or overwritten.
    fn on_access(&mut self, key: &str);

    /// A key left the cache.
    fn on_remove(&mut self, key: &str);

    /// A key was loaded back from a snapshot after `access_count` reads.
    fn on_restore(&mut self, key: &str, access_count: u64) {
        let _ = access_count;
        self.on_insert(key);
    }

    /// The key that should be evicted next, if any.
    fn candidate(&self) -> Option<&str>;

    /// All tracked keys, eviction candidate first.
    fn ordered_keys(&self) -> Vec<String>;

    fn clear(&mut self);
}

/// Least-recently-used ordering.
///
/// Keys sit in an insertion-ordered set; every access moves a key to the back,
/// so the front is always the least recently used.
#[derive(Debug, Default)]
pub struct LruPolicy {
    order: IndexSet<String>,
}

impl EvictionPolicy for LruPolicy {
    const KIND: StrategyKind = StrategyKind::Lru;

    fn on_insert(&mut self, key: &str) {
        self.order.insert(key.to_string());
    }

    fn on_access(&mut self, key: &str) {
        if let Some(idx) = self.order.get_index_of(key) {
            let last = self.order.len() - 1;
            self.order.move_index(idx, last);
        }
    }

    fn on_remove(&mut self, key: &str) {
        self.order.shift_remove(key);
    }

    fn candidate(&self) -> Option<&str> {
        self.order.first().map(String::as_str)
    }

    fn ordered_keys(&self) -> Vec<String> {
        self.order.iter().cloned().collect()
    }

    fn clear(&mut self) {
        self.order.clear();
    }
}

/// Least-frequently-used ordering.
///
/// Keys are grouped in per-frequency buckets. Each bucket keeps insertion
/// order, so ties within the minimum frequency go to the key that entered the
/// bucket first.
#[derive(Debug, Default)]
pub struct LfuPolicy {
    frequencies: HashMap<String, u64>,
    buckets: HashMap<u64, IndexSet<String>>,
    min_freq: u64,
}

impl LfuPolicy {
    /// Access frequency of `key`, if tracked.
    pub fn frequency(&self, key: &str) -> Option<u64> {
        self.frequencies.get(key).copied()
    }

    fn detach(&mut self, key: &str, freq: u64) {
        if let Some(bucket) = self.buckets.get_mut(&freq) {
            bucket.shift_remove(key);
            if bucket.is_empty() {
                self.buckets.remove(&freq);
            }
        }
    }

    fn recompute_min(&mut self) {
        self.min_freq = self.buckets.keys().copied().min().unwrap_or(0);
    }
}

impl EvictionPolicy for LfuPolicy {
    const KIND: StrategyKind = StrategyKind::Lfu;

    fn on_insert(&mut self, key: &str) {
        if self.frequencies.contains_key(key) {
            self.on_access(key);
            return;
        }
        self.frequencies.insert(key.to_string(), 1);
        self.buckets.entry(1).or_default().insert(key.to_string());
        self.min_freq = 1;
    }

    fn on_access(&mut self, key: &str) {
        let freq = match self.frequencies.get_mut(key) {
            Some(freq) => {
                *freq += 1;
                *freq - 1
            }
            None => return,
        };

        self.detach(key, freq);
        self.buckets
            .entry(freq + 1)
            .or_default()
            .insert(key.to_string());

        if freq == self.min_freq && !self.buckets.contains_key(&freq) {
            self.min_freq = freq + 1;
        }
    }

    /// Seeds the frequency from the saved access count, so a key that was
    /// hot before a restart is not the first to go after it.
    fn on_restore(&mut self, key: &str, access_count: u64) {
        if self.frequencies.contains_key(key) {
            self.on_access(key);
            return;
        }
        let freq = access_count.saturating_add(1);
        self.frequencies.insert(key.to_string(), freq);
        self.buckets.entry(freq).or_default().insert(key.to_string());
        self.recompute_min();
    }

    fn on_remove(&mut self, key: &str) {
        if let Some(freq) = self.frequencies.remove(key) {
            self.detach(key, freq);
            if freq == self.min_freq && !self.buckets.contains_key(&freq) {
                self.recompute_min();
            }
        }
    }

    fn candidate(&self) -> Option<&str> {
        self.buckets
            .get(&self.min_freq)
            .and_then(|bucket| bucket.first())
            .map(String::as_str)
    }

    fn ordered_keys(&self) -> Vec<String> {
        let mut freqs: Vec<u64> = self.buckets.keys().copied().collect();
        freqs.sort_unstable();
        freqs
            .iter()
            .filter_map(|freq| self.buckets.get(freq))
            .flat_map(|bucket| bucket.iter().cloned())
            .collect()
    }

    fn clear(&mut self) {
        self.frequencies.clear();
        self.buckets.clear();
        self.min_freq = 0;
    }
}

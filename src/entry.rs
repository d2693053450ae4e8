//! Cache entry with bookkeeping for TTL, access tracking and sizing.

use serde_json::{Map, Value};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// A single cache entry containing the value and its metadata.
///
/// Each entry tracks:
/// - The stored value
/// - When it was created (wall clock, used for TTL)
/// - How often and when it was last read
/// - An estimate of its size in bytes
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub(crate) value: Value,
    pub(crate) timestamp: SystemTime,
    pub(crate) access_count: u64,
    pub(crate) last_accessed: SystemTime,
    pub(crate) size: usize,
    pub(crate) metadata: Map<String, Value>,
}

impl CacheEntry {
    /// Create a new entry stamped with the current time.
    pub fn new(value: Value) -> Self {
        Self::with_timestamp(value, SystemTime::now())
    }

    /// Create a new entry with an explicit creation time.
    pub fn with_timestamp(value: Value, timestamp: SystemTime) -> Self {
        let size = estimate_size(&value);
        Self {
            value,
            timestamp,
            access_count: 0,
            last_accessed: timestamp,
            size,
            metadata: Map::new(),
        }
    }

    pub fn with_metadata(mut self, metadata: Map<String, Value>) -> Self {
        self.metadata = metadata;
        self
    }

    /// Check if this entry has outlived `ttl`.
    pub fn is_expired(&self, ttl: Option<Duration>) -> bool {
        self.is_expired_at(SystemTime::now(), ttl)
    }

    /// Check expiry against a given time.
    /// Entries stamped in the future (clock skew) are never expired.
    pub fn is_expired_at(&self, now: SystemTime, ttl: Option<Duration>) -> bool {
        match ttl {
            Some(ttl) => match now.duration_since(self.timestamp) {
                Ok(age) => age > ttl,
                Err(_) => false,
            },
            None => false,
        }
    }

    /// Record a successful read.
    pub fn touch(&mut self) {
        self.touch_at(SystemTime::now());
    }

    pub fn touch_at(&mut self, now: SystemTime) {
        self.access_count += 1;
        self.last_accessed = now;
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn timestamp(&self) -> SystemTime {
        self.timestamp
    }

    pub fn access_count(&self) -> u64 {
        self.access_count
    }

    pub fn last_accessed(&self) -> SystemTime {
        self.last_accessed
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn metadata(&self) -> &Map<String, Value> {
        &self.metadata
    }
}

/// Byte estimate of a value: its serialized length, or the length of its
/// display string if serialization fails.
pub(crate) fn estimate_size(value: &Value) -> usize {
    match serde_json::to_vec(value) {
        Ok(bytes) => bytes.len(),
        Err(_) => value.to_string().len(),
    }
}

/// Seconds since the unix epoch, as stored in snapshots.
pub(crate) fn to_unix_secs(time: SystemTime) -> f64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// Inverse of [`to_unix_secs`]. Times before the epoch clamp to it; NaN and
/// values past what `SystemTime` can hold give `None`.
pub(crate) fn from_unix_secs(secs: f64) -> Option<SystemTime> {
    if secs.is_nan() {
        return None;
    }
    if secs <= 0.0 {
        return Some(UNIX_EPOCH);
    }
    Duration::try_from_secs_f64(secs)
        .ok()
        .and_then(|d| UNIX_EPOCH.checked_add(d))
}

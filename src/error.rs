//! Error types for the cache library.
//!
//! Cache misses are never errors: lookups return `None`/`false`. The variants
//! here cover invalid configuration, unknown cache names, remote store
//! failures, snapshot I/O and poisoned locks.

use std::io;

use thiserror::Error;

/// The main error type for cache operations.
#[derive(Debug, Error)]
pub enum CacheError {
    /// A configuration value failed validation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// No cache is registered under the given name.
    #[error("unknown cache: '{0}'")]
    UnknownCache(String),

    /// The remote key-value store reported a failure.
    #[error("remote store error: {0}")]
    Remote(String),

    /// A value or snapshot could not be (de)serialized.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// An I/O error occurred while reading or writing a snapshot.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A snapshot file parsed but holds values that cannot be restored.
    #[error("corrupt snapshot: {0}")]
    CorruptSnapshot(String),

    /// A cache lock was poisoned by a panicking thread.
    #[error("lock poisoned: {0}")]
    LockPoisoned(String),
}

/// A specialized Result type for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;

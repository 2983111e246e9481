//! Error types for the cache engine
//!
//! One unified error enum shared by every crate in the workspace, derived
//! with `thiserror`. Filter rejection is deliberately NOT represented here:
//! a failed filter means "no mutation occurred" and surfaces as `Ok(None)` /
//! `Ok(false)`, never as an error.

use crate::types::{Key, PartitionId};
use std::io;
use thiserror::Error;

/// Result type alias for cache operations
pub type Result<T> = std::result::Result<T, CacheError>;

/// Which half of the store bridge a failure came from
///
/// Read-through failures abort the triggering operation. Write-through
/// failures are reported after the in-memory mutation has already been
/// applied and do not undo it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreFailure {
    /// Load on cache miss failed; the operation is aborted
    ReadThrough,
    /// Store write after a successful in-memory mutation failed
    WriteThrough,
}

/// Error types for the cache engine
#[derive(Debug, Error)]
pub enum CacheError {
    /// Operation disallowed under the projection's active flag set
    #[error("flag violation: {0}")]
    FlagViolation(String),

    /// Lock not acquired within its deadline
    #[error("lock timeout on key {key:?} after {timeout_ms}ms")]
    LockTimeout {
        /// Key whose lock could not be acquired
        key: Key,
        /// Deadline that elapsed
        timeout_ms: i64,
    },

    /// Transaction used in a state that does not permit the operation
    #[error("transaction state error: {0}")]
    TransactionState(String),

    /// External persistent store failure
    #[error("store {kind:?} failure: {message}")]
    Store {
        /// Read-through or write-through
        kind: StoreFailure,
        /// Underlying store error text
        message: String,
    },

    /// Topology points at no reachable owner for the key's partition
    #[error("partition {partition} unavailable for key {key:?}")]
    PartitionUnavailable {
        /// Partition the key routes to
        partition: PartitionId,
        /// Key being routed
        key: Key,
    },

    /// Async operation cancelled before its mutation applied
    #[error("operation cancelled before apply")]
    Cancelled,

    /// Swap codec failure
    #[error("codec error: {0}")]
    Codec(String),

    /// I/O error (disk swap files)
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl CacheError {
    /// Build a read-through store error
    pub fn read_through(message: impl Into<String>) -> Self {
        CacheError::Store {
            kind: StoreFailure::ReadThrough,
            message: message.into(),
        }
    }

    /// Build a write-through store error
    pub fn write_through(message: impl Into<String>) -> Self {
        CacheError::Store {
            kind: StoreFailure::WriteThrough,
            message: message.into(),
        }
    }

    /// Whether the engine may retry this error locally
    ///
    /// Lock timeouts and unavailable partitions are retried up to a bounded
    /// count. Store and transaction-state errors surface immediately: they
    /// indicate external failure or caller misuse, not transient contention.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CacheError::LockTimeout { .. } | CacheError::PartitionUnavailable { .. }
        )
    }
}

impl From<bincode::Error> for CacheError {
    fn from(e: bincode::Error) -> Self {
        CacheError::Codec(e.to_string())
    }
}

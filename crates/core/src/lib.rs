//! Core types for the GridCache engine
//!
//! Shared data model, error taxonomy, configuration and the trait seams the
//! upper crates are built on. This crate has no engine logic of its own.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod entry;
pub mod error;
pub mod filter;
pub mod flags;
pub mod traits;
pub mod types;

pub use config::{CacheConfig, RetryConfig};
pub use entry::Entry;
pub use error::{CacheError, Result, StoreFailure};
pub use filter::{eval_all, Filter, FilterSet};
pub use flags::{CacheFlag, FlagSet};
pub use traits::{BridgeError, BridgeResult, NoopReplicator, Replicator, StoreBridge};
pub use types::{
    partition_for, CtxId, Key, LockOwner, NodeId, PartitionId, PartitionState, PeekMode,
    Residency, TxId, Value,
};

//! GridCache: a partitioned, transactional key-value cache engine
//!
//! Entries live in memory, demote to a bounded swap space under memory
//! pressure, and optionally read/write through an external store bridge.
//! Mutations can be guarded by atomic entry filters; transactions offer
//! pessimistic and optimistic concurrency at three isolation levels.
//!
//! ```no_run
//! use gridcache::{CacheConfig, CacheEngine, CacheReadOps, CacheWriteOps, CtxId, Key, Value};
//!
//! # fn main() -> gridcache::Result<()> {
//! let cache = CacheEngine::new(CacheConfig::default())?;
//! let ctx = CtxId::next();
//! cache.putx(ctx, &Key::new("greeting"), Value::String("hello".into()), &[])?;
//! assert_eq!(
//!     cache.get(ctx, &Key::new("greeting"))?,
//!     Some(Value::String("hello".into()))
//! );
//! # Ok(())
//! # }
//! ```

pub use gridcache_core::{
    eval_all, BridgeError, BridgeResult, CacheConfig, CacheError, CacheFlag, CtxId, Entry, Filter,
    FilterSet, FlagSet, Key, LockOwner, NodeId, NoopReplicator, PartitionId, PartitionState,
    PeekMode, Replicator, Residency, Result, RetryConfig, StoreBridge, StoreFailure, TxId, Value,
};

pub use gridcache_storage::{CacheStorage, EvictionPolicy, LruPolicy, SwapSpace};

pub use gridcache_concurrency::{
    LockManager, Transaction, TransactionManager, TxConcurrency, TxIsolation, TxState,
};

pub use gridcache_engine::{
    CacheEngine, CacheLockOps, CacheProjection, CacheReadOps, CacheTxOps, CacheWriteOps,
    LocalReplicator, OpExecutor, OpHandle, PartitionRouter, TopologySnapshot,
};

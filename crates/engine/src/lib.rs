//! gridcache-engine: the operation surface of the cache
//!
//! Assembles storage, locking and transactions behind [`CacheEngine`],
//! routes keys to partitions, replicates applied mutations, and runs
//! asynchronous operation siblings on a worker pool.

pub mod cache;
pub mod ops;
pub mod projection;
pub mod replicate;
pub mod router;
pub mod topology;
pub mod traits;

pub use cache::CacheEngine;
pub use ops::{OpExecutor, OpHandle};
pub use projection::CacheProjection;
pub use replicate::LocalReplicator;
pub use router::{PartitionRouter, Route};
pub use topology::{PartitionAssignment, TopologySnapshot};
pub use traits::{CacheLockOps, CacheReadOps, CacheTxOps, CacheWriteOps};

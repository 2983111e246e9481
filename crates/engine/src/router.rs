//! Key-to-node routing over the installed topology snapshot
//!
//! Routing is a pure mapping: affinity hash to partition, partition to nodes
//! via the assignment table. The only stateful part is the snapshot swap and
//! the bounded retry against `Moving` partitions, which gives an in-flight
//! rebalance a chance to finish before the caller sees
//! `PartitionUnavailable`.

use crate::topology::TopologySnapshot;
use gridcache_core::{
    partition_for, CacheError, Key, NodeId, PartitionId, PartitionState, Result, RetryConfig,
};
use parking_lot::RwLock;
use std::sync::Arc;

/// Result of routing one key
#[derive(Debug, Clone)]
pub struct Route {
    /// Partition the key hashes to
    pub partition: PartitionId,
    /// Primary owner
    pub primary: NodeId,
    /// Backup owners
    pub backups: Vec<NodeId>,
}

/// Maps keys to owning nodes, with bounded retry on unstable partitions
pub struct PartitionRouter {
    topology: RwLock<Arc<TopologySnapshot>>,
    retry: RetryConfig,
}

impl PartitionRouter {
    /// Create a router over an initial snapshot
    pub fn new(topology: TopologySnapshot, retry: RetryConfig) -> Self {
        Self {
            topology: RwLock::new(Arc::new(topology)),
            retry,
        }
    }

    /// Install a new topology snapshot
    pub fn install(&self, topology: TopologySnapshot) {
        let version = topology.version;
        *self.topology.write() = Arc::new(topology);
        tracing::debug!(version, "topology snapshot installed");
    }

    /// Current snapshot
    pub fn snapshot(&self) -> Arc<TopologySnapshot> {
        self.topology.read().clone()
    }

    /// Number of partitions in the current snapshot
    pub fn partition_count(&self) -> u16 {
        self.snapshot().partition_count()
    }

    /// Route a key to its owners
    ///
    /// A `Moving` partition is retried against a freshly read snapshot, with
    /// backoff, up to the configured attempt count; a `Lost` partition fails
    /// immediately.
    ///
    /// # Errors
    ///
    /// [`CacheError::PartitionUnavailable`] when no owning assignment exists
    /// within the retry budget.
    pub fn route(&self, key: &Key) -> Result<Route> {
        let mut partition = PartitionId(0);
        for attempt in 0..self.retry.max_attempts.max(1) {
            let topo = self.snapshot();
            partition = partition_for(key, topo.partition_count());
            let assignment = topo.assignment(partition);
            match assignment.state {
                PartitionState::Owning => {
                    return Ok(Route {
                        partition,
                        primary: assignment.primary,
                        backups: assignment.backups.clone(),
                    });
                }
                PartitionState::Moving => {
                    if attempt + 1 < self.retry.max_attempts.max(1) {
                        std::thread::sleep(self.retry.backoff);
                    }
                }
                PartitionState::Lost => break,
            }
        }
        tracing::warn!(%key, %partition, "no owning assignment for key");
        Err(CacheError::PartitionUnavailable {
            partition,
            key: key.clone(),
        })
    }

    /// Whether the key's partition is primarily owned by this node
    pub fn is_local_primary(&self, key: &Key) -> bool {
        let topo = self.snapshot();
        topo.is_local_primary(partition_for(key, topo.partition_count()))
    }
}

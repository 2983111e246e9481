//! Externally supplied partition-to-node assignment
//!
//! The engine never discovers topology itself; whoever embeds it installs a
//! [`TopologySnapshot`] and replaces it when the cluster view changes. A
//! snapshot is immutable once installed, so routing reads it without locks.

use gridcache_core::{NodeId, PartitionId, PartitionState};

/// One partition's ownership record
#[derive(Debug, Clone)]
pub struct PartitionAssignment {
    /// Node that owns the partition's primary copy
    pub primary: NodeId,
    /// Backup nodes, in replication order
    pub backups: Vec<NodeId>,
    /// Availability state
    pub state: PartitionState,
}

/// Immutable view of the cluster at one topology version
#[derive(Debug, Clone)]
pub struct TopologySnapshot {
    /// Monotonic topology version
    pub version: u64,
    /// The embedding node's own id
    pub local: NodeId,
    /// All known nodes
    pub nodes: Vec<NodeId>,
    assignments: Vec<PartitionAssignment>,
}

impl TopologySnapshot {
    /// Snapshot for a single embedded node owning every partition
    pub fn single_node(local: NodeId, partition_count: u16) -> Self {
        let assignments = (0..partition_count)
            .map(|_| PartitionAssignment {
                primary: local,
                backups: Vec::new(),
                state: PartitionState::Owning,
            })
            .collect();
        Self {
            version: 1,
            local,
            nodes: vec![local],
            assignments,
        }
    }

    /// Snapshot from an explicit assignment table
    pub fn new(
        version: u64,
        local: NodeId,
        nodes: Vec<NodeId>,
        assignments: Vec<PartitionAssignment>,
    ) -> Self {
        Self {
            version,
            local,
            nodes,
            assignments,
        }
    }

    /// Number of partitions in the assignment table
    pub fn partition_count(&self) -> u16 {
        self.assignments.len() as u16
    }

    /// Ownership record for a partition
    pub fn assignment(&self, partition: PartitionId) -> &PartitionAssignment {
        &self.assignments[partition.0 as usize]
    }

    /// Availability state of a partition
    pub fn state(&self, partition: PartitionId) -> PartitionState {
        self.assignment(partition).state
    }

    /// Replace one partition's state, returning the modified snapshot
    ///
    /// Snapshots are installed whole; this is for building the next one.
    pub fn with_state(mut self, partition: PartitionId, state: PartitionState) -> Self {
        self.assignments[partition.0 as usize].state = state;
        self
    }

    /// Whether this node is the partition's primary
    pub fn is_local_primary(&self, partition: PartitionId) -> bool {
        self.assignment(partition).primary == self.local
    }

    /// Whether this node is one of the partition's backups
    pub fn is_local_backup(&self, partition: PartitionId) -> bool {
        self.assignment(partition).backups.contains(&self.local)
    }
}

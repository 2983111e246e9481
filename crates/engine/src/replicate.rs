//! In-process backup replication
//!
//! The default deployment of an embedded cache has no network; backup copies
//! live in a table owned by this replicator. That is enough to make
//! replication observable: tests and the `global_*` sizing operations can
//! see exactly what a real transport would have shipped.

use dashmap::DashMap;
use gridcache_core::{Key, NodeId, Replicator, Value};

/// Replicator keeping backup copies in an in-process table
pub struct LocalReplicator {
    node: NodeId,
    backups: DashMap<Key, (Value, u64)>,
}

impl LocalReplicator {
    /// Create a replicator acting as backup node `node`
    pub fn new(node: NodeId) -> Self {
        Self {
            node,
            backups: DashMap::new(),
        }
    }

    /// Backup copy of a key, if replicated
    pub fn backup_value(&self, key: &Key) -> Option<(Value, u64)> {
        self.backups.get(key).map(|e| e.value().clone())
    }

    /// Number of backup entries held
    pub fn len(&self) -> usize {
        self.backups.len()
    }

    /// Whether no backup entries are held
    pub fn is_empty(&self) -> bool {
        self.backups.is_empty()
    }
}

impl Replicator for LocalReplicator {
    fn replicate_put(&self, key: &Key, value: &Value, version: u64) {
        // Replication can arrive out of order; never step a version backwards
        let stale = self
            .backups
            .get(key)
            .is_some_and(|existing| existing.1 > version);
        if !stale {
            self.backups.insert(key.clone(), (value.clone(), version));
        }
    }

    fn replicate_remove(&self, key: &Key, version: u64) {
        self.backups
            .remove_if(key, |_, (_, existing)| *existing <= version);
    }

    fn clear(&self) {
        self.backups.clear();
    }

    fn backup_size(&self, node: NodeId) -> usize {
        if node == self.node {
            self.backups.len()
        } else {
            0
        }
    }

    fn primary_size(&self, _node: NodeId) -> usize {
        // No remote primaries exist in-process
        0
    }
}

//! Trait seams consumed by the engine
//!
//! Two external collaborators are abstracted here:
//! - `StoreBridge`: the external persistent store behind read-through /
//!   write-through
//! - `Replicator`: propagation of committed mutations to backup replicas
//!
//! Both are trait objects held by the engine so tests can substitute
//! in-process fakes and a deployment can plug in real network/store clients.

use crate::types::{Key, NodeId, TxId, Value};
use thiserror::Error;

/// Failure reported by a store bridge implementation
///
/// The persistence tier wraps this into `CacheError::Store`, tagging it as a
/// read-through or write-through failure depending on the calling path.
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct BridgeError(pub String);

impl BridgeError {
    /// Build a bridge error from anything displayable
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

/// Result alias for store bridge calls
pub type BridgeResult<T> = std::result::Result<T, BridgeError>;

/// External persistent store
///
/// Invoked only on cache miss (read-through) and after successful mutations
/// (write-through), each independently configurable. Mutating calls carry the
/// enclosing transaction id, when any, so an implementation can batch a
/// transaction's writes.
///
/// Implementations may be slow; the engine never holds a per-key lock across
/// a bridge call longer than the call itself.
pub trait StoreBridge: Send + Sync {
    /// Load one key from the store
    fn load(&self, key: &Key) -> BridgeResult<Option<Value>>;

    /// Load a batch of keys; absent keys are simply missing from the result
    fn load_all(&self, keys: &[Key]) -> BridgeResult<Vec<(Key, Value)>> {
        let mut out = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(value) = self.load(key)? {
                out.push((key.clone(), value));
            }
        }
        Ok(out)
    }

    /// Write one key to the store
    fn put(&self, key: &Key, value: &Value, tx: Option<TxId>) -> BridgeResult<()>;

    /// Write a batch of keys to the store
    fn put_all(&self, entries: &[(Key, Value)], tx: Option<TxId>) -> BridgeResult<()> {
        for (key, value) in entries {
            self.put(key, value, tx)?;
        }
        Ok(())
    }

    /// Remove one key from the store
    fn remove(&self, key: &Key, tx: Option<TxId>) -> BridgeResult<()>;

    /// Remove a batch of keys from the store
    fn remove_all(&self, keys: &[Key], tx: Option<TxId>) -> BridgeResult<()> {
        for key in keys {
            self.remove(key, tx)?;
        }
        Ok(())
    }
}

/// Backup replica propagation
///
/// Called after a mutation has been applied to the local entry store, with
/// the version the mutation produced. Implementations resolve the key's
/// backup node set themselves. The sizing queries feed the `global_*` size
/// operations; an implementation that cannot answer for a node returns 0.
pub trait Replicator: Send + Sync {
    /// Propagate a committed put
    fn replicate_put(&self, key: &Key, value: &Value, version: u64);

    /// Propagate a committed remove
    fn replicate_remove(&self, key: &Key, version: u64);

    /// Drop all backup state (cluster-wide clear)
    fn clear(&self);

    /// Number of backup entries held for `node`
    fn backup_size(&self, node: NodeId) -> usize;

    /// Number of primary entries owned by `node`, for remote nodes
    fn primary_size(&self, node: NodeId) -> usize;
}

/// Replicator that drops everything
///
/// Used when the topology has no backups configured.
#[derive(Debug, Default)]
pub struct NoopReplicator;

impl Replicator for NoopReplicator {
    fn replicate_put(&self, _key: &Key, _value: &Value, _version: u64) {}

    fn replicate_remove(&self, _key: &Key, _version: u64) {}

    fn clear(&self) {}

    fn backup_size(&self, _node: NodeId) -> usize {
        0
    }

    fn primary_size(&self, _node: NodeId) -> usize {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::HashMap;

    struct MapBridge {
        data: Mutex<HashMap<Key, Value>>,
    }

    impl StoreBridge for MapBridge {
        fn load(&self, key: &Key) -> BridgeResult<Option<Value>> {
            Ok(self.data.lock().get(key).cloned())
        }

        fn put(&self, key: &Key, value: &Value, _tx: Option<TxId>) -> BridgeResult<()> {
            self.data.lock().insert(key.clone(), value.clone());
            Ok(())
        }

        fn remove(&self, key: &Key, _tx: Option<TxId>) -> BridgeResult<()> {
            self.data.lock().remove(key);
            Ok(())
        }
    }

    #[test]
    fn default_batch_methods_delegate() {
        let bridge = MapBridge {
            data: Mutex::new(HashMap::new()),
        };
        let entries = vec![
            (Key::new("a"), Value::I64(1)),
            (Key::new("b"), Value::I64(2)),
        ];
        bridge.put_all(&entries, None).unwrap();

        let keys = vec![Key::new("a"), Key::new("b"), Key::new("missing")];
        let loaded = bridge.load_all(&keys).unwrap();
        assert_eq!(loaded.len(), 2);

        bridge.remove_all(&keys[..2], None).unwrap();
        assert_eq!(bridge.load(&Key::new("a")).unwrap(), None);
    }

    #[test]
    fn noop_replicator_reports_zero() {
        let r = NoopReplicator;
        r.replicate_put(&Key::new("a"), &Value::Bool(true), 1);
        assert_eq!(r.backup_size(NodeId::new()), 0);
        assert_eq!(r.primary_size(NodeId::new()), 0);
    }
}

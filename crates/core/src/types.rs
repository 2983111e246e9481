//! Core types for the cache engine
//!
//! This module defines the foundational types:
//! - Key: cache key with canonical ordering (used for multi-key lock acquisition)
//! - Value: cache value payload
//! - PartitionId / NodeId: partition and cluster-node identity
//! - CtxId / TxId: caller-context and transaction identity
//! - Residency: which tier currently holds an entry's payload
//! - PeekMode: tier selector for non-loading reads

use rustc_hash::FxHasher;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

/// Cache key
///
/// Keys are never empty and have a total order. The order is what multi-key
/// operations (lock_all, optimistic prepare) use as the canonical acquisition
/// order, so it must be stable across callers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Key(String);

impl Key {
    /// Create a key from anything string-like
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Key contents as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Key {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for Key {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Cache value payload
///
/// "Absent" is expressed as `Option::None` at every API boundary; a null
/// value is never stored. Serializable so the swap tier can demote payloads
/// out of memory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// Raw bytes
    Bytes(Vec<u8>),
    /// UTF-8 string
    String(String),
    /// Signed integer
    I64(i64),
    /// Floating point
    F64(f64),
    /// Boolean
    Bool(bool),
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::I64(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

/// Partition identifier
///
/// A partition is a disjoint shard of the keyspace and the unit of
/// ownership/replication. Partition count is fixed at engine construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PartitionId(pub u16);

impl fmt::Display for PartitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "p{}", self.0)
    }
}

/// Map a key to its partition
///
/// Affinity hash: FxHash of the key modulo the partition count. Stable for
/// the lifetime of a topology; the router and the entry store must agree on
/// it, which is why it lives here and not in either crate.
pub fn partition_for(key: &Key, partition_count: u16) -> PartitionId {
    debug_assert!(partition_count > 0, "partition count must be non-zero");
    let mut hasher = FxHasher::default();
    key.hash(&mut hasher);
    PartitionId((hasher.finish() % partition_count as u64) as u16)
}

/// Cluster node identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(Uuid);

impl NodeId {
    /// Create a new random node id
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Caller execution-context identifier
///
/// Lock ownership and the one-active-transaction-per-context rule are keyed
/// by CtxId. Callers allocate one per logical execution context and pass it
/// explicitly; there is no thread-local current context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CtxId(u64);

static NEXT_CTX: AtomicU64 = AtomicU64::new(1);

impl CtxId {
    /// Allocate a fresh context id
    pub fn next() -> Self {
        Self(NEXT_CTX.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw id value
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for CtxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ctx{}", self.0)
    }
}

/// Transaction identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TxId(Uuid);

impl TxId {
    /// Create a new random transaction id
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TxId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tx:{}", self.0)
    }
}

/// Who holds a per-key lock
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockOwner {
    /// Explicit lock or implicit single-operation lock, owned by a context
    Context(CtxId),
    /// Pessimistic transactional enlistment
    Tx(TxId),
}

impl fmt::Display for LockOwner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockOwner::Context(c) => write!(f, "{}", c),
            LockOwner::Tx(t) => write!(f, "{}", t),
        }
    }
}

/// Which tier currently holds an entry's payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Residency {
    /// Payload resident in the entry table
    InMemory,
    /// Payload demoted to the in-process swap space
    Swapped,
    /// Payload demoted to a swap file on disk
    OnDisk,
    /// No payload anywhere local; must be reloaded through the store bridge
    Evicted,
}

/// Tier selector for non-loading reads and sizing
///
/// An ordered list of peek modes is consulted first-hit-wins. Peeks never
/// trigger read-through and never wait on locks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeekMode {
    /// In-memory payload, regardless of partition role
    Near,
    /// Entries in partitions this node is primary for
    Primary,
    /// Entries in partitions this node backs up
    Backup,
    /// Swapped or on-disk payloads
    Swap,
}

/// State of a partition on this node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartitionState {
    /// This node serves the partition (as primary or backup)
    Owning,
    /// Partition is being rebalanced to/from this node
    Moving,
    /// No owner reachable; operations fail with PartitionUnavailable
    Lost,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_canonical_ordering() {
        let mut keys = vec![Key::new("b"), Key::new("a"), Key::new("c")];
        keys.sort();
        assert_eq!(keys[0].as_str(), "a");
        assert_eq!(keys[2].as_str(), "c");
    }

    #[test]
    fn partition_for_is_stable() {
        let key = Key::new("user:42");
        assert_eq!(partition_for(&key, 64), partition_for(&key, 64));
    }

    #[test]
    fn partition_for_in_range() {
        for i in 0..1000 {
            let key = Key::new(format!("k{}", i));
            assert!(partition_for(&key, 16).0 < 16);
        }
    }

    #[test]
    fn ctx_ids_unique() {
        let a = CtxId::next();
        let b = CtxId::next();
        assert_ne!(a, b);
    }

    #[test]
    fn tx_ids_unique() {
        assert_ne!(TxId::new(), TxId::new());
    }

    #[test]
    fn uuid_backed_ids_encode_with_bincode() {
        let node = NodeId::new();
        let encoded = bincode::serialize(&node).unwrap();
        let decoded: NodeId = bincode::deserialize(&encoded).unwrap();
        assert_eq!(node, decoded);

        let tx = TxId::new();
        let decoded: TxId = bincode::deserialize(&bincode::serialize(&tx).unwrap()).unwrap();
        assert_eq!(tx, decoded);
    }

    mod routing_props {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn partition_always_in_range(key in "\\PC{1,64}", count in 1u16..1024) {
                let key = Key::new(key);
                prop_assert!(partition_for(&key, count).0 < count);
            }

            #[test]
            fn equal_keys_route_identically(key in "\\PC{1,64}", count in 1u16..1024) {
                let a = Key::new(key.clone());
                let b = Key::new(key);
                prop_assert_eq!(partition_for(&a, count), partition_for(&b, count));
            }

            #[test]
            fn key_ordering_is_total_and_string_compatible(a in "\\PC{0,32}", b in "\\PC{0,32}") {
                let (ka, kb) = (Key::new(a.clone()), Key::new(b.clone()));
                prop_assert_eq!(ka.cmp(&kb), a.cmp(&b));
            }
        }
    }
}

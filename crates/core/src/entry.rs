//! Cache entry
//!
//! An entry tracks its payload (absent while demoted to a lower tier), a
//! strictly increasing per-key version used for optimistic validation, the
//! partition it belongs to, its residency tier and an optional expiry
//! deadline.

use crate::types::{PartitionId, Residency, Value};
use std::time::{Duration, Instant};

/// A single cache entry
///
/// Invariants:
/// - `version` strictly increases on every successful mutation of the key
/// - `value` is `Some` exactly when `residency == InMemory`
/// - an `Evicted` entry must be reloaded through the persistence tier before
///   it can be read again
#[derive(Debug, Clone)]
pub struct Entry {
    /// Payload; `None` while the payload lives in a lower tier
    value: Option<Value>,
    /// Monotonic per-key version
    pub version: u64,
    /// Partition the key hashes to
    pub partition: PartitionId,
    /// Tier currently holding the payload
    pub residency: Residency,
    /// Expiry deadline, if a TTL was set
    pub expires_at: Option<Instant>,
}

impl Entry {
    /// Create a fresh in-memory entry
    pub fn new(value: Value, version: u64, partition: PartitionId, ttl: Option<Duration>) -> Self {
        Self {
            value: Some(value),
            version,
            partition,
            residency: Residency::InMemory,
            expires_at: ttl.map(|t| Instant::now() + t),
        }
    }

    /// In-memory payload, if resident
    pub fn value(&self) -> Option<&Value> {
        self.value.as_ref()
    }

    /// Take the payload out, leaving the entry demoted
    ///
    /// Used by the swap path: the payload is serialized into the swap space
    /// and the in-memory slot is dropped.
    pub fn demote(&mut self, to: Residency) -> Option<Value> {
        debug_assert!(to != Residency::InMemory);
        self.residency = to;
        self.value.take()
    }

    /// Restore a payload promoted back from a lower tier
    ///
    /// Promotion does not count as a mutation: the version is unchanged.
    pub fn promote(&mut self, value: Value) {
        self.value = Some(value);
        self.residency = Residency::InMemory;
    }

    /// Replace the payload as a successful mutation, bumping the version
    pub fn mutate(&mut self, value: Value, ttl: Option<Duration>) {
        self.value = Some(value);
        self.version += 1;
        self.residency = Residency::InMemory;
        self.expires_at = ttl.map(|t| Instant::now() + t);
    }

    /// Whether the entry's payload is resident in memory
    pub fn is_resident(&self) -> bool {
        self.residency == Residency::InMemory
    }

    /// Whether the entry has passed its expiry deadline
    pub fn is_expired(&self, now: Instant) -> bool {
        matches!(self.expires_at, Some(deadline) if now >= deadline)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(v: i64) -> Entry {
        Entry::new(Value::I64(v), 1, PartitionId(0), None)
    }

    #[test]
    fn fresh_entry_is_resident() {
        let e = entry(1);
        assert!(e.is_resident());
        assert_eq!(e.value(), Some(&Value::I64(1)));
        assert_eq!(e.version, 1);
    }

    #[test]
    fn mutate_bumps_version() {
        let mut e = entry(1);
        e.mutate(Value::I64(2), None);
        assert_eq!(e.version, 2);
        e.mutate(Value::I64(3), None);
        assert_eq!(e.version, 3);
    }

    #[test]
    fn demote_takes_payload() {
        let mut e = entry(7);
        let taken = e.demote(Residency::Swapped);
        assert_eq!(taken, Some(Value::I64(7)));
        assert!(e.value().is_none());
        assert_eq!(e.residency, Residency::Swapped);
    }

    #[test]
    fn promote_keeps_version() {
        let mut e = entry(7);
        let v = e.demote(Residency::Swapped).unwrap();
        let version = e.version;
        e.promote(v);
        assert_eq!(e.version, version);
        assert!(e.is_resident());
    }

    #[test]
    fn expiry_deadline() {
        let e = Entry::new(Value::Bool(true), 1, PartitionId(0), Some(Duration::from_secs(60)));
        assert!(!e.is_expired(Instant::now()));
        assert!(e.is_expired(Instant::now() + Duration::from_secs(61)));
    }

    #[test]
    fn no_ttl_never_expires() {
        let e = entry(1);
        assert!(!e.is_expired(Instant::now() + Duration::from_secs(3600)));
    }
}

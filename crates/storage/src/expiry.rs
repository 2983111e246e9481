//! Expiry index for efficient TTL cleanup
//!
//! Maps expiry deadline → set of keys using a BTreeMap, so finding every
//! expired key is O(expired count) instead of a full scan. The index is an
//! accelerator only: the entry's own `expires_at` remains authoritative and
//! is re-checked before anything is purged.

use gridcache_core::Key;
use std::collections::{BTreeMap, HashSet};
use std::time::Instant;

/// Deadline → keys index
#[derive(Debug, Default)]
pub struct ExpiryIndex {
    index: BTreeMap<Instant, HashSet<Key>>,
}

impl ExpiryIndex {
    /// Create an empty index
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a key expiring at `deadline`
    pub fn insert(&mut self, deadline: Instant, key: Key) {
        self.index.entry(deadline).or_default().insert(key);
    }

    /// Stop tracking a key at `deadline`
    ///
    /// Used when a key is removed or overwritten with a different TTL.
    pub fn remove(&mut self, deadline: Instant, key: &Key) {
        if let Some(keys) = self.index.get_mut(&deadline) {
            keys.remove(key);
            if keys.is_empty() {
                self.index.remove(&deadline);
            }
        }
    }

    /// Remove and return every key whose deadline has passed
    pub fn drain_expired(&mut self, now: Instant) -> Vec<Key> {
        let still_live = self.index.split_off(&now);
        let expired = std::mem::replace(&mut self.index, still_live);
        expired.into_values().flatten().collect()
    }

    /// Number of tracked keys
    pub fn len(&self) -> usize {
        self.index.values().map(HashSet::len).sum()
    }

    /// Whether nothing is tracked
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Forget everything
    pub fn clear(&mut self) {
        self.index.clear();
    }
}

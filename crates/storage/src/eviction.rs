//! Pluggable eviction policy
//!
//! The policy only decides WHICH resident entry to demote; the storage layer
//! decides WHEN (memory ceiling exceeded) and performs the demotion. A
//! victim is never an entry the engine reports as in use (locked or enlisted
//! in an active transaction).

use gridcache_core::Key;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::collections::BTreeMap;

/// Eviction victim selection
pub trait EvictionPolicy: Send + Sync {
    /// Record an access to a resident entry
    fn note_touch(&self, key: &Key);

    /// Record that an entry left memory (removed or demoted)
    fn note_remove(&self, key: &Key);

    /// Pick a victim among tracked entries, skipping in-use keys
    fn victim(&self, in_use: &dyn Fn(&Key) -> bool) -> Option<Key>;

    /// Forget all tracked entries
    fn reset(&self);
}

/// Default least-recently-used policy
///
/// Tracks a logical clock stamp per key plus a stamp-ordered index, so
/// victim selection is O(log n) and skips in-use keys by walking the index
/// from the oldest stamp upward.
pub struct LruPolicy {
    state: Mutex<LruState>,
}

#[derive(Default)]
struct LruState {
    /// key → last-touch stamp
    stamps: FxHashMap<Key, u64>,
    /// stamp → key, oldest first
    order: BTreeMap<u64, Key>,
    clock: u64,
}

impl LruPolicy {
    /// Create an empty LRU policy
    pub fn new() -> Self {
        Self {
            state: Mutex::new(LruState::default()),
        }
    }
}

impl Default for LruPolicy {
    fn default() -> Self {
        Self::new()
    }
}

impl EvictionPolicy for LruPolicy {
    fn note_touch(&self, key: &Key) {
        let mut state = self.state.lock();
        state.clock += 1;
        let stamp = state.clock;
        if let Some(old) = state.stamps.insert(key.clone(), stamp) {
            state.order.remove(&old);
        }
        state.order.insert(stamp, key.clone());
    }

    fn note_remove(&self, key: &Key) {
        let mut state = self.state.lock();
        if let Some(stamp) = state.stamps.remove(key) {
            state.order.remove(&stamp);
        }
    }

    fn victim(&self, in_use: &dyn Fn(&Key) -> bool) -> Option<Key> {
        let state = self.state.lock();
        state
            .order
            .values()
            .find(|key| !in_use(key))
            .cloned()
    }

    fn reset(&self) {
        let mut state = self.state.lock();
        state.stamps.clear();
        state.order.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch_all(policy: &LruPolicy, keys: &[&str]) {
        for k in keys {
            policy.note_touch(&Key::new(*k));
        }
    }

    #[test]
    fn victim_is_least_recently_used() {
        let policy = LruPolicy::new();
        touch_all(&policy, &["a", "b", "c"]);
        assert_eq!(policy.victim(&|_| false), Some(Key::new("a")));

        // Re-touching "a" makes "b" the victim
        policy.note_touch(&Key::new("a"));
        assert_eq!(policy.victim(&|_| false), Some(Key::new("b")));
    }

    #[test]
    fn victim_skips_in_use_keys() {
        let policy = LruPolicy::new();
        touch_all(&policy, &["a", "b", "c"]);
        let victim = policy.victim(&|k| k.as_str() == "a");
        assert_eq!(victim, Some(Key::new("b")));
    }

    #[test]
    fn all_in_use_yields_no_victim() {
        let policy = LruPolicy::new();
        touch_all(&policy, &["a", "b"]);
        assert_eq!(policy.victim(&|_| true), None);
    }

    #[test]
    fn removed_keys_are_not_candidates() {
        let policy = LruPolicy::new();
        touch_all(&policy, &["a", "b"]);
        policy.note_remove(&Key::new("a"));
        assert_eq!(policy.victim(&|_| false), Some(Key::new("b")));
    }

    #[test]
    fn reset_forgets_everything() {
        let policy = LruPolicy::new();
        touch_all(&policy, &["a", "b"]);
        policy.reset();
        assert_eq!(policy.victim(&|_| false), None);
    }
}

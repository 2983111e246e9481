//! Transaction context: enlisted keys, buffered post-images, isolation state
//!
//! A transaction never mutates the entry store directly. Every write is
//! buffered as a post-image inside the transaction and applied by the
//! manager at commit, so rollback is always "throw the buffer away" and
//! other callers never observe uncommitted state.
//!
//! What a read pins depends on isolation:
//!
//! - `ReadCommitted` — nothing; each read sees the current committed value
//! - `RepeatableRead` — the first-read value, returned to every later read
//! - `Serializable` — the first-read value plus its version, revalidated at
//!   commit for optimistic transactions

use gridcache_core::{CtxId, Key, TxId, Value};
use rustc_hash::FxHashMap;
use std::time::{Duration, Instant};

/// How a transaction interacts with locks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxConcurrency {
    /// Locks acquired as keys are accessed, held until commit or rollback
    Pessimistic,
    /// No locks during the transaction; short-term locks and validation at
    /// commit
    Optimistic,
}

/// Read visibility level
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxIsolation {
    /// Reads always see the latest committed value
    ReadCommitted,
    /// Repeated reads of a key return the first-read value
    RepeatableRead,
    /// RepeatableRead plus commit-time validation of the whole read set
    Serializable,
}

/// Transaction lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxState {
    /// Accepting operations
    Active,
    /// Commit in progress (locking, validating, applying)
    Preparing,
    /// Applied and visible
    Committed,
    /// Discarded without applying
    RolledBack,
    /// Forcibly rolled back after exceeding its time budget
    TimedOut,
}

/// Per-key enlistment record
#[derive(Debug, Default)]
pub struct TxEntry {
    /// Whether the transaction read this key
    pub read: bool,
    /// Version observed at first access (0 = key was absent)
    pub observed_version: u64,
    /// Value pinned at first read; outer `None` until a pinning read happens
    pub pinned: Option<Option<Value>>,
    /// Buffered post-image; `Some(None)` is a staged remove
    pub post: Option<Option<Value>>,
}

/// One in-flight transaction
pub struct Transaction {
    /// Transaction identifier
    pub id: TxId,
    /// Owning caller context
    pub ctx: CtxId,
    /// Lock discipline
    pub concurrency: TxConcurrency,
    /// Read visibility level
    pub isolation: TxIsolation,
    state: TxState,
    entries: FxHashMap<Key, TxEntry>,
    /// Keys this transaction holds pessimistic locks on
    locked: Vec<Key>,
    started: Instant,
    /// Time budget; `Duration::ZERO` means no limit
    timeout: Duration,
}

impl Transaction {
    /// Create an active transaction
    ///
    /// `size_hint` pre-sizes the enlistment table for callers that know how
    /// many keys they will touch.
    pub fn new(
        ctx: CtxId,
        concurrency: TxConcurrency,
        isolation: TxIsolation,
        timeout: Duration,
        size_hint: usize,
    ) -> Self {
        Self {
            id: TxId::new(),
            ctx,
            concurrency,
            isolation,
            state: TxState::Active,
            entries: FxHashMap::with_capacity_and_hasher(size_hint, Default::default()),
            locked: Vec::new(),
            started: Instant::now(),
            timeout,
        }
    }

    /// Current lifecycle state
    pub fn state(&self) -> TxState {
        self.state
    }

    /// Whether the transaction still accepts operations
    pub fn is_active(&self) -> bool {
        self.state == TxState::Active
    }

    /// Whether the time budget has run out
    pub fn expired(&self, now: Instant) -> bool {
        self.timeout != Duration::ZERO && now >= self.started + self.timeout
    }

    /// Remaining time budget as a lock-timeout value
    ///
    /// `0` (wait forever) for unlimited transactions; `None` when a finite
    /// budget is already exhausted.
    pub fn remaining_lock_budget(&self) -> Option<i64> {
        if self.timeout == Duration::ZERO {
            return Some(0);
        }
        let deadline = self.started + self.timeout;
        let left = deadline.checked_duration_since(Instant::now())?;
        let ms = left.as_millis() as i64;
        if ms > 0 {
            Some(ms)
        } else {
            None
        }
    }

    /// Transition into commit processing
    pub fn begin_prepare(&mut self) {
        debug_assert_eq!(self.state, TxState::Active);
        self.state = TxState::Preparing;
    }

    /// Mark applied and visible
    pub fn mark_committed(&mut self) {
        self.state = TxState::Committed;
    }

    /// Mark discarded
    pub fn mark_rolled_back(&mut self) {
        self.state = TxState::RolledBack;
    }

    /// Mark forcibly discarded after a timeout
    pub fn mark_timed_out(&mut self) {
        self.state = TxState::TimedOut;
    }

    /// Value the transaction itself sees for a key, if already determined
    ///
    /// A staged post-image wins over a pinned read. `None` means this key's
    /// visibility must come from the entry store.
    pub fn visible(&self, key: &Key) -> Option<Option<Value>> {
        let entry = self.entries.get(key)?;
        if let Some(post) = &entry.post {
            return Some(post.clone());
        }
        match self.isolation {
            TxIsolation::ReadCommitted => None,
            TxIsolation::RepeatableRead | TxIsolation::Serializable => entry.pinned.clone(),
        }
    }

    /// Record a read of the current committed state
    ///
    /// The observed version is kept from the first access only; later reads
    /// must not overwrite what commit-time validation compares against.
    pub fn note_read(&mut self, key: &Key, observed: Option<(Value, u64)>) {
        let pin = self.isolation != TxIsolation::ReadCommitted;
        let entry = self.entries.entry(key.clone()).or_default();
        let first_access = !entry.read && entry.post.is_none();
        entry.read = true;
        if first_access {
            entry.observed_version = observed.as_ref().map(|(_, v)| *v).unwrap_or(0);
        }
        if pin && entry.pinned.is_none() {
            entry.pinned = Some(observed.map(|(v, _)| v));
        }
    }

    /// Buffer a post-image for a key; `None` stages a remove
    pub fn stage_write(&mut self, key: &Key, post: Option<Value>, observed_version: u64) {
        let entry = self.entries.entry(key.clone()).or_default();
        if !entry.read && entry.post.is_none() {
            entry.observed_version = observed_version;
        }
        entry.post = Some(post);
    }

    /// Record a pessimistic lock held by this transaction
    pub fn note_locked(&mut self, key: &Key) {
        if !self.locked.contains(key) {
            self.locked.push(key.clone());
        }
    }

    /// Whether this transaction has enlisted the key (read or write)
    pub fn touches(&self, key: &Key) -> bool {
        self.entries.contains_key(key)
    }

    /// Staged writes in canonical key order
    pub fn write_set(&self) -> Vec<(Key, Option<Value>)> {
        let mut writes: Vec<(Key, Option<Value>)> = self
            .entries
            .iter()
            .filter_map(|(k, e)| e.post.clone().map(|post| (k.clone(), post)))
            .collect();
        writes.sort_by(|a, b| a.0.cmp(&b.0));
        writes
    }

    /// Keys of staged writes in canonical order
    pub fn write_keys(&self) -> Vec<Key> {
        self.write_set().into_iter().map(|(k, _)| k).collect()
    }

    /// Entries to validate at commit, per isolation
    ///
    /// `Serializable` validates every read key; `RepeatableRead` only read
    /// keys that are also written (blind writes never conflict);
    /// `ReadCommitted` validates nothing.
    pub fn validation_set(&self) -> Vec<(Key, u64)> {
        self.entries
            .iter()
            .filter(|(_, e)| match self.isolation {
                TxIsolation::ReadCommitted => false,
                TxIsolation::RepeatableRead => e.read && e.post.is_some(),
                TxIsolation::Serializable => e.read,
            })
            .map(|(k, e)| (k.clone(), e.observed_version))
            .collect()
    }

    /// Keys pessimistically locked by this transaction
    pub fn locked_keys(&self) -> &[Key] {
        &self.locked
    }

    /// Number of enlisted keys
    pub fn enlisted_len(&self) -> usize {
        self.entries.len()
    }
}

//! Transaction manager: lifecycle, isolation-aware access, two-phase commit
//!
//! One manager serves the whole cache. Each caller context owns at most one
//! active transaction; operations address it through the context id.
//!
//! # Commit sequence
//!
//! Pessimistic transactions arrive at commit already holding every lock
//! their accesses required, so commit is apply-and-release:
//!
//! ```text
//! 1. begin_prepare()
//! 2. apply write set to storage in canonical key order
//! 3. replicate each applied write
//! 4. release all transaction locks
//! 5. mark committed
//! ```
//!
//! Optimistic transactions insert a prepare phase before step 2: acquire
//! short-term locks on the write set (canonical order, all-or-nothing within
//! the remaining time budget), then validate observed versions per
//! isolation. Any conflict rolls the transaction back before anything is
//! applied.
//!
//! # Timeouts
//!
//! The time budget is checked at every operation and at commit. An expired
//! transaction is forcibly rolled back on the spot: locks released, buffer
//! discarded, and the caller gets a `TransactionState` error.

use crate::lock::LockManager;
use crate::transaction::{Transaction, TxConcurrency, TxIsolation, TxState};
use dashmap::DashMap;
use gridcache_core::{
    eval_all, CacheError, CtxId, Filter, Key, LockOwner, Replicator, Result, TxId, Value,
};
use gridcache_storage::CacheStorage;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Coordinates every in-flight transaction
pub struct TransactionManager {
    /// Active transaction per caller context
    active: DashMap<CtxId, Arc<Mutex<Transaction>>>,
    locks: Arc<LockManager>,
    default_timeout: Duration,
    committed: AtomicU64,
    rolled_back: AtomicU64,
}

impl TransactionManager {
    /// Create a manager sharing the cache's lock manager
    pub fn new(locks: Arc<LockManager>, default_timeout: Duration) -> Self {
        Self {
            active: DashMap::new(),
            locks,
            default_timeout,
            committed: AtomicU64::new(0),
            rolled_back: AtomicU64::new(0),
        }
    }

    /// Begin a transaction for a context
    ///
    /// `timeout: None` uses the cache default; `Some(Duration::ZERO)` means
    /// no limit. `size_hint` pre-sizes the enlistment table.
    ///
    /// # Errors
    ///
    /// [`CacheError::TransactionState`] when the context already has an
    /// active transaction.
    pub fn tx_start(
        &self,
        ctx: CtxId,
        concurrency: TxConcurrency,
        isolation: TxIsolation,
        timeout: Option<Duration>,
        size_hint: usize,
    ) -> Result<TxId> {
        if self.active.contains_key(&ctx) {
            return Err(CacheError::TransactionState(format!(
                "{ctx} already has an active transaction"
            )));
        }
        let tx = Transaction::new(
            ctx,
            concurrency,
            isolation,
            timeout.unwrap_or(self.default_timeout),
            size_hint,
        );
        let id = tx.id;
        self.active.insert(ctx, Arc::new(Mutex::new(tx)));
        tracing::debug!(%ctx, %id, ?concurrency, ?isolation, "transaction started");
        Ok(id)
    }

    /// Id of the context's active transaction, if any
    pub fn current(&self, ctx: CtxId) -> Option<TxId> {
        self.active.get(&ctx).map(|h| h.lock().id)
    }

    /// Whether the context is inside a transaction
    pub fn in_tx(&self, ctx: CtxId) -> bool {
        self.active.contains_key(&ctx)
    }

    /// Whether any active transaction has enlisted the key
    ///
    /// Conservative: a transaction busy in an operation counts as touching.
    /// Eviction uses this to leave transactional keys alone.
    pub fn is_enlisted(&self, key: &Key) -> bool {
        self.active.iter().any(|item| match item.value().try_lock() {
            Some(tx) => tx.touches(key),
            None => true,
        })
    }

    fn tx_handle(&self, ctx: CtxId) -> Result<Arc<Mutex<Transaction>>> {
        self.active
            .get(&ctx)
            .map(|h| h.clone())
            .ok_or_else(|| CacheError::TransactionState(format!("{ctx} has no active transaction")))
    }

    /// Read a key inside the context's transaction
    ///
    /// A staged post-image wins; `RepeatableRead` and `Serializable` return
    /// the pinned first-read value on repeats. Pessimistic transactions at
    /// those isolations lock the key before the first read.
    pub fn read(
        &self,
        ctx: CtxId,
        storage: &CacheStorage,
        key: &Key,
        skip_store: bool,
    ) -> Result<Option<Value>> {
        let handle = self.tx_handle(ctx)?;
        let mut tx = handle.lock();
        self.check_operable(ctx, &mut tx)?;

        if let Some(visible) = tx.visible(key) {
            return Ok(visible);
        }

        let lock_read = tx.concurrency == TxConcurrency::Pessimistic
            && tx.isolation != TxIsolation::ReadCommitted;
        if lock_read {
            self.acquire_for_tx(ctx, &mut tx, key)?;
        }

        let observed = storage.get_versioned(key, skip_store)?;
        let value = observed.as_ref().map(|(v, _)| v.clone());
        tx.note_read(key, observed);
        Ok(value)
    }

    /// Stage a put or remove inside the context's transaction
    ///
    /// `post: None` stages a remove. Filters are evaluated against the value
    /// the transaction currently sees for the key; rejection stages nothing
    /// and returns `false`. Pessimistic transactions lock the key first.
    pub fn write(
        &self,
        ctx: CtxId,
        storage: &CacheStorage,
        key: &Key,
        post: Option<Value>,
        filters: &[Filter],
        skip_store: bool,
    ) -> Result<bool> {
        let handle = self.tx_handle(ctx)?;
        let mut tx = handle.lock();
        self.check_operable(ctx, &mut tx)?;

        if tx.concurrency == TxConcurrency::Pessimistic {
            self.acquire_for_tx(ctx, &mut tx, key)?;
        }

        let (current, observed_version) = match tx.visible(key) {
            Some(visible) => (visible, 0),
            None => {
                let observed = storage.get_versioned(key, skip_store)?;
                let version = observed.as_ref().map(|(_, v)| *v).unwrap_or(0);
                (observed.map(|(v, _)| v), version)
            }
        };
        if !eval_all(filters, key, current.as_ref()) {
            return Ok(false);
        }
        tx.stage_write(key, post, observed_version);
        Ok(true)
    }

    /// Commit the context's transaction
    ///
    /// On success the transaction's writes are applied, replicated and its
    /// locks released. A write-through failure does not undo the commit: the
    /// in-memory and replicated state stand, and the store error surfaces as
    /// [`CacheError::Store`].
    ///
    /// # Errors
    ///
    /// - [`CacheError::LockTimeout`] — optimistic prepare could not lock the
    ///   write set in the remaining budget (transaction rolled back)
    /// - [`CacheError::TransactionState`] — no active transaction, expired
    ///   budget, or optimistic validation conflict (transaction rolled back)
    pub fn commit(
        &self,
        ctx: CtxId,
        storage: &CacheStorage,
        replicator: &dyn Replicator,
        skip_store: bool,
    ) -> Result<()> {
        let handle = self.tx_handle(ctx)?;
        let mut tx = handle.lock();
        self.check_operable(ctx, &mut tx)?;
        tx.begin_prepare();
        let owner = LockOwner::Tx(tx.id);

        if tx.concurrency == TxConcurrency::Optimistic {
            let Some(budget) = tx.remaining_lock_budget() else {
                self.finish(ctx, &mut tx, TxState::TimedOut);
                return Err(CacheError::TransactionState(
                    "transaction timed out during prepare".to_string(),
                ));
            };
            let write_keys = tx.write_keys();
            if let Err(e) = self.locks.lock_all(write_keys.iter(), owner, budget) {
                self.finish(ctx, &mut tx, TxState::RolledBack);
                return Err(e);
            }
            for (key, expected) in tx.validation_set() {
                let found = storage.current_version(&key).unwrap_or(0);
                if found != expected {
                    self.finish(ctx, &mut tx, TxState::RolledBack);
                    return Err(CacheError::TransactionState(format!(
                        "optimistic conflict on key '{key}': version {found}, observed {expected}"
                    )));
                }
            }
        }

        let mut store_error = None;
        for (key, post) in tx.write_set() {
            let applied = storage.apply_tx_write(&key, post.clone(), tx.id, skip_store);
            let (version, err) = match applied {
                Ok(outcome) => outcome,
                Err(e) => {
                    // Part of the write set may already be applied; the
                    // buffer is discarded either way.
                    tracing::error!(%key, error = %e, "storage failure mid-commit");
                    self.finish(ctx, &mut tx, TxState::RolledBack);
                    return Err(e);
                }
            };
            match &post {
                Some(value) => replicator.replicate_put(&key, value, version),
                None => replicator.replicate_remove(&key, version),
            }
            if store_error.is_none() {
                store_error = err;
            }
        }

        let id = tx.id;
        let writes = tx.write_set().len();
        self.finish(ctx, &mut tx, TxState::Committed);
        tracing::debug!(%ctx, %id, writes, "transaction committed");
        if let Some(e) = store_error {
            return Err(CacheError::write_through(e.to_string()));
        }
        Ok(())
    }

    /// Roll the context's transaction back, discarding its buffer
    pub fn rollback(&self, ctx: CtxId) -> Result<()> {
        let handle = self.tx_handle(ctx)?;
        let mut tx = handle.lock();
        if !tx.is_active() {
            return Err(CacheError::TransactionState(format!(
                "transaction {} is not active",
                tx.id
            )));
        }
        let id = tx.id;
        self.finish(ctx, &mut tx, TxState::RolledBack);
        tracing::debug!(%ctx, %id, "transaction rolled back");
        Ok(())
    }

    /// Transactions committed since construction
    pub fn committed_count(&self) -> u64 {
        self.committed.load(Ordering::Relaxed)
    }

    /// Transactions rolled back (including forced) since construction
    pub fn rolled_back_count(&self) -> u64 {
        self.rolled_back.load(Ordering::Relaxed)
    }

    /// Lock a key on behalf of the transaction, within its time budget
    fn acquire_for_tx(&self, ctx: CtxId, tx: &mut Transaction, key: &Key) -> Result<()> {
        let Some(budget) = tx.remaining_lock_budget() else {
            self.finish(ctx, tx, TxState::TimedOut);
            return Err(CacheError::TransactionState(
                "transaction timed out".to_string(),
            ));
        };
        self.locks.lock(key, LockOwner::Tx(tx.id), budget)?;
        tx.note_locked(key);
        Ok(())
    }

    /// Reject operations on finished transactions; force-roll-back expired
    /// ones
    fn check_operable(&self, ctx: CtxId, tx: &mut Transaction) -> Result<()> {
        if !tx.is_active() {
            return Err(CacheError::TransactionState(format!(
                "transaction {} is {:?}",
                tx.id,
                tx.state()
            )));
        }
        if tx.expired(Instant::now()) {
            let id = tx.id;
            self.finish(ctx, tx, TxState::TimedOut);
            tracing::warn!(%ctx, %id, "transaction exceeded its time budget, forced rollback");
            return Err(CacheError::TransactionState(format!(
                "transaction {id} timed out and was rolled back"
            )));
        }
        Ok(())
    }

    /// Terminal bookkeeping: release locks, set state, drop from registry
    fn finish(&self, ctx: CtxId, tx: &mut Transaction, state: TxState) {
        self.locks.release_owner(LockOwner::Tx(tx.id));
        match state {
            TxState::Committed => {
                tx.mark_committed();
                self.committed.fetch_add(1, Ordering::Relaxed);
            }
            TxState::TimedOut => {
                tx.mark_timed_out();
                self.rolled_back.fetch_add(1, Ordering::Relaxed);
            }
            _ => {
                tx.mark_rolled_back();
                self.rolled_back.fetch_add(1, Ordering::Relaxed);
            }
        }
        self.active.remove(&ctx);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gridcache_core::{CacheConfig, NoopReplicator};
    use gridcache_storage::LruPolicy;
    use std::thread;

    fn setup() -> (TransactionManager, CacheStorage, Arc<LockManager>) {
        let locks = Arc::new(LockManager::new());
        let manager = TransactionManager::new(locks.clone(), Duration::from_secs(60));
        let storage = CacheStorage::new(
            &CacheConfig::for_testing(),
            None,
            Box::new(LruPolicy::new()),
        )
        .unwrap();
        (manager, storage, locks)
    }

    fn put(storage: &CacheStorage, key: &Key, value: Value) {
        storage.put(key, value, &[], None, false, false).unwrap();
    }

    #[test]
    fn one_transaction_per_context() {
        let (manager, _, _) = setup();
        let ctx = CtxId::next();
        manager
            .tx_start(ctx, TxConcurrency::Pessimistic, TxIsolation::ReadCommitted, None, 0)
            .unwrap();
        let err = manager
            .tx_start(ctx, TxConcurrency::Pessimistic, TxIsolation::ReadCommitted, None, 0)
            .unwrap_err();
        assert!(matches!(err, CacheError::TransactionState(_)));
    }

    #[test]
    fn buffered_writes_invisible_until_commit() {
        let (manager, storage, _) = setup();
        let ctx = CtxId::next();
        let key = Key::new("a");

        manager
            .tx_start(ctx, TxConcurrency::Optimistic, TxIsolation::ReadCommitted, None, 0)
            .unwrap();
        manager
            .write(ctx, &storage, &key, Some(Value::I64(1)), &[], false)
            .unwrap();

        // Outside the transaction nothing is visible
        assert_eq!(storage.get(&key, false).unwrap(), None);
        // Inside, the staged write is
        assert_eq!(
            manager.read(ctx, &storage, &key, false).unwrap(),
            Some(Value::I64(1))
        );

        manager.commit(ctx, &storage, &NoopReplicator, false).unwrap();
        assert_eq!(storage.get(&key, false).unwrap(), Some(Value::I64(1)));
    }

    #[test]
    fn rollback_discards_buffer_and_locks() {
        let (manager, storage, locks) = setup();
        let ctx = CtxId::next();
        let key = Key::new("a");
        put(&storage, &key, Value::I64(1));

        manager
            .tx_start(ctx, TxConcurrency::Pessimistic, TxIsolation::RepeatableRead, None, 0)
            .unwrap();
        manager
            .write(ctx, &storage, &key, Some(Value::I64(2)), &[], false)
            .unwrap();
        assert!(locks.is_locked(&key));

        manager.rollback(ctx).unwrap();
        assert_eq!(storage.get(&key, false).unwrap(), Some(Value::I64(1)));
        assert!(!locks.is_locked(&key));
        assert!(!manager.in_tx(ctx));
        assert_eq!(manager.rolled_back_count(), 1);
    }

    #[test]
    fn repeatable_read_ignores_concurrent_commit() {
        let (manager, storage, _) = setup();
        let key = Key::new("a");
        put(&storage, &key, Value::I64(1));

        let ctx = CtxId::next();
        manager
            .tx_start(ctx, TxConcurrency::Optimistic, TxIsolation::RepeatableRead, None, 0)
            .unwrap();
        assert_eq!(
            manager.read(ctx, &storage, &key, false).unwrap(),
            Some(Value::I64(1))
        );

        // Concurrent non-transactional overwrite
        put(&storage, &key, Value::I64(99));

        assert_eq!(
            manager.read(ctx, &storage, &key, false).unwrap(),
            Some(Value::I64(1))
        );
        manager.rollback(ctx).unwrap();
    }

    #[test]
    fn read_committed_sees_latest() {
        let (manager, storage, _) = setup();
        let key = Key::new("a");
        put(&storage, &key, Value::I64(1));

        let ctx = CtxId::next();
        manager
            .tx_start(ctx, TxConcurrency::Optimistic, TxIsolation::ReadCommitted, None, 0)
            .unwrap();
        assert_eq!(
            manager.read(ctx, &storage, &key, false).unwrap(),
            Some(Value::I64(1))
        );
        put(&storage, &key, Value::I64(2));
        assert_eq!(
            manager.read(ctx, &storage, &key, false).unwrap(),
            Some(Value::I64(2))
        );
        manager.rollback(ctx).unwrap();
    }

    #[test]
    fn serializable_optimistic_conflict_rolls_back() {
        let (manager, storage, _) = setup();
        let key = Key::new("shared");
        put(&storage, &key, Value::I64(1));

        let ctx = CtxId::next();
        manager
            .tx_start(ctx, TxConcurrency::Optimistic, TxIsolation::Serializable, None, 0)
            .unwrap();
        manager.read(ctx, &storage, &key, false).unwrap();
        manager
            .write(ctx, &storage, &key, Some(Value::I64(2)), &[], false)
            .unwrap();

        // Concurrent commit bumps the version the transaction observed
        put(&storage, &key, Value::I64(50));

        let err = manager
            .commit(ctx, &storage, &NoopReplicator, false)
            .unwrap_err();
        assert!(matches!(err, CacheError::TransactionState(_)));
        // Nothing from the transaction was applied
        assert_eq!(storage.get(&key, false).unwrap(), Some(Value::I64(50)));
        assert!(!manager.in_tx(ctx));
    }

    #[test]
    fn serializable_read_only_conflict_detected() {
        let (manager, storage, _) = setup();
        let read_key = Key::new("watched");
        let write_key = Key::new("out");
        put(&storage, &read_key, Value::I64(1));

        let ctx = CtxId::next();
        manager
            .tx_start(ctx, TxConcurrency::Optimistic, TxIsolation::Serializable, None, 0)
            .unwrap();
        manager.read(ctx, &storage, &read_key, false).unwrap();
        manager
            .write(ctx, &storage, &write_key, Some(Value::I64(2)), &[], false)
            .unwrap();

        // The conflicting write touches a key the transaction only read
        put(&storage, &read_key, Value::I64(9));

        assert!(manager.commit(ctx, &storage, &NoopReplicator, false).is_err());
        assert_eq!(storage.get(&write_key, false).unwrap(), None);
    }

    #[test]
    fn optimistic_blind_writes_do_not_conflict() {
        let (manager, storage, _) = setup();
        let key = Key::new("blind");
        put(&storage, &key, Value::I64(0));

        let ctx = CtxId::next();
        manager
            .tx_start(ctx, TxConcurrency::Optimistic, TxIsolation::RepeatableRead, None, 0)
            .unwrap();
        manager
            .write(ctx, &storage, &key, Some(Value::I64(1)), &[], false)
            .unwrap();

        // Concurrent overwrite; the transaction never read the key
        put(&storage, &key, Value::I64(7));

        manager.commit(ctx, &storage, &NoopReplicator, false).unwrap();
        assert_eq!(storage.get(&key, false).unwrap(), Some(Value::I64(1)));
    }

    #[test]
    fn pessimistic_write_blocks_conflicting_lock() {
        let (manager, storage, locks) = setup();
        let key = Key::new("a");
        put(&storage, &key, Value::I64(1));

        let ctx = CtxId::next();
        manager
            .tx_start(ctx, TxConcurrency::Pessimistic, TxIsolation::ReadCommitted, None, 0)
            .unwrap();
        manager
            .write(ctx, &storage, &key, Some(Value::I64(2)), &[], false)
            .unwrap();

        // Another owner cannot take the key while the transaction holds it
        let other = LockOwner::Context(CtxId::next());
        assert!(!locks.try_lock(&key, other));

        manager.commit(ctx, &storage, &NoopReplicator, false).unwrap();
        assert!(locks.try_lock(&key, other));
    }

    #[test]
    fn timed_out_transaction_is_force_rolled_back() {
        let (manager, storage, locks) = setup();
        let key = Key::new("a");

        let ctx = CtxId::next();
        manager
            .tx_start(
                ctx,
                TxConcurrency::Pessimistic,
                TxIsolation::ReadCommitted,
                Some(Duration::from_millis(10)),
                0,
            )
            .unwrap();
        manager
            .write(ctx, &storage, &key, Some(Value::I64(1)), &[], false)
            .unwrap();

        thread::sleep(Duration::from_millis(25));
        let err = manager
            .commit(ctx, &storage, &NoopReplicator, false)
            .unwrap_err();
        assert!(matches!(err, CacheError::TransactionState(_)));
        assert_eq!(storage.get(&key, false).unwrap(), None);
        assert!(!locks.is_locked(&key));
        assert!(!manager.in_tx(ctx));
    }

    #[test]
    fn filters_guard_transactional_writes() {
        let (manager, storage, _) = setup();
        let key = Key::new("a");
        put(&storage, &key, Value::I64(1));

        let ctx = CtxId::next();
        manager
            .tx_start(ctx, TxConcurrency::Optimistic, TxIsolation::ReadCommitted, None, 0)
            .unwrap();
        let applied = manager
            .write(
                ctx,
                &storage,
                &key,
                Some(Value::I64(2)),
                &[Filter::no_value()],
                false,
            )
            .unwrap();
        assert!(!applied);

        manager.commit(ctx, &storage, &NoopReplicator, false).unwrap();
        assert_eq!(storage.get(&key, false).unwrap(), Some(Value::I64(1)));
    }

    #[test]
    fn commit_applies_in_canonical_order_and_counts() {
        let (manager, storage, _) = setup();
        let ctx = CtxId::next();
        manager
            .tx_start(ctx, TxConcurrency::Optimistic, TxIsolation::ReadCommitted, None, 4)
            .unwrap();
        for name in ["z", "a", "m"] {
            manager
                .write(ctx, &storage, &Key::new(name), Some(Value::I64(1)), &[], false)
                .unwrap();
        }
        manager.commit(ctx, &storage, &NoopReplicator, false).unwrap();
        assert_eq!(manager.committed_count(), 1);
        for name in ["z", "a", "m"] {
            assert_eq!(
                storage.get(&Key::new(name), false).unwrap(),
                Some(Value::I64(1))
            );
        }
    }

    #[test]
    fn staged_remove_applies_at_commit() {
        let (manager, storage, _) = setup();
        let key = Key::new("doomed");
        put(&storage, &key, Value::I64(1));

        let ctx = CtxId::next();
        manager
            .tx_start(ctx, TxConcurrency::Pessimistic, TxIsolation::ReadCommitted, None, 0)
            .unwrap();
        manager.write(ctx, &storage, &key, None, &[], false).unwrap();
        assert_eq!(manager.read(ctx, &storage, &key, false).unwrap(), None);
        assert_eq!(storage.get(&key, false).unwrap(), Some(Value::I64(1)));

        manager.commit(ctx, &storage, &NoopReplicator, false).unwrap();
        assert_eq!(storage.get(&key, false).unwrap(), None);
    }

    #[test]
    fn enlisted_keys_reported_in_use() {
        let (manager, storage, _) = setup();
        let key = Key::new("a");
        put(&storage, &key, Value::I64(1));

        let ctx = CtxId::next();
        manager
            .tx_start(ctx, TxConcurrency::Optimistic, TxIsolation::RepeatableRead, None, 0)
            .unwrap();
        manager.read(ctx, &storage, &key, false).unwrap();
        assert!(manager.is_enlisted(&key));
        assert!(!manager.is_enlisted(&Key::new("other")));

        manager.rollback(ctx).unwrap();
        assert!(!manager.is_enlisted(&key));
    }
}

//! Capability traits implemented by the engine and its projections
//!
//! The cache API is split by capability so a consumer can depend on exactly
//! the surface it uses. [`CacheEngine`] implements all of them;
//! [`CacheProjection`] implements them too, applying its flag set and view
//! filter before delegating.
//!
//! Filter-taking operations accept `&[Filter]` evaluated as a logical AND;
//! an empty slice always passes. Filter rejection is not an error: it comes
//! back as `Ok(None)` / `Ok(false)`.
//!
//! [`CacheEngine`]: crate::cache::CacheEngine
//! [`CacheProjection`]: crate::projection::CacheProjection

use gridcache_concurrency::{TxConcurrency, TxIsolation};
use gridcache_core::{CtxId, Filter, Key, PeekMode, Result, TxId, Value};
use std::time::Duration;

/// Read-side cache operations
pub trait CacheReadOps {
    /// Read a value, consulting the caller's transaction, the swap tier and
    /// the store bridge as configured
    fn get(&self, ctx: CtxId, key: &Key) -> Result<Option<Value>>;

    /// Read several keys; absent keys are missing from the result
    fn get_all(&self, ctx: CtxId, keys: &[Key]) -> Result<Vec<(Key, Value)>>;

    /// Inspect the memory-resident value without loading or promoting
    fn peek(&self, key: &Key) -> Option<Value>;

    /// Peek through an ordered list of modes; first hit wins
    fn peek_modes(&self, key: &Key, modes: &[PeekMode]) -> Result<Option<Value>>;

    /// Whether the key has a locally reachable payload; never loads through
    fn contains_key(&self, key: &Key) -> bool;

    /// Whether any resident entry holds this value
    fn contains_value(&self, value: &Value) -> bool;

    /// Force a fresh load from the store bridge, replacing the cached value
    fn reload(&self, key: &Key) -> Result<Option<Value>>;
}

/// Write-side cache operations
pub trait CacheWriteOps {
    /// Put a value, returning the previous one; filters guard atomically
    fn put(&self, ctx: CtxId, key: &Key, value: Value, filters: &[Filter])
        -> Result<Option<Value>>;

    /// Put without materializing the previous value
    fn putx(&self, ctx: CtxId, key: &Key, value: Value, filters: &[Filter]) -> Result<bool>;

    /// Put only when the key is absent, returning the existing value if any
    fn put_if_absent(&self, ctx: CtxId, key: &Key, value: Value) -> Result<Option<Value>>;

    /// Boolean sibling of `put_if_absent`
    fn putx_if_absent(&self, ctx: CtxId, key: &Key, value: Value) -> Result<bool>;

    /// Put only when the key is present, returning the previous value
    fn replace(&self, ctx: CtxId, key: &Key, value: Value) -> Result<Option<Value>>;

    /// Boolean sibling of `replace`
    fn replacex(&self, ctx: CtxId, key: &Key, value: Value) -> Result<bool>;

    /// Replace only when the current value equals `old`
    fn replace_if(&self, ctx: CtxId, key: &Key, old: &Value, new: Value) -> Result<bool>;

    /// Put a batch of entries; filters guard each entry independently
    fn put_all(&self, ctx: CtxId, entries: &[(Key, Value)], filters: &[Filter]) -> Result<()>;

    /// Remove an entry, returning what was removed
    fn remove(&self, ctx: CtxId, key: &Key, filters: &[Filter]) -> Result<Option<Value>>;

    /// Remove without materializing the previous value
    fn removex(&self, ctx: CtxId, key: &Key, filters: &[Filter]) -> Result<bool>;

    /// Remove only when the current value equals `expected`
    fn remove_if(&self, ctx: CtxId, key: &Key, expected: &Value) -> Result<bool>;

    /// Remove a batch of keys; filters guard each key independently
    fn remove_all(&self, ctx: CtxId, keys: &[Key], filters: &[Filter]) -> Result<()>;

    /// Remove every entry here and on backups; never touches the store
    fn clear(&self, ctx: CtxId) -> Result<()>;

    /// Remove every local entry; backups and the store are untouched
    fn clear_locally(&self, ctx: CtxId) -> Result<()>;

    /// Atomic compare-and-set; `expected: None` requires absence, `new:
    /// None` removes
    fn compare_and_set(
        &self,
        ctx: CtxId,
        key: &Key,
        expected: Option<&Value>,
        new: Option<Value>,
    ) -> Result<bool>;
}

/// Explicit lock operations
pub trait CacheLockOps {
    /// Lock a key; filters are checked atomically with acquisition
    ///
    /// Returns false on timeout or filter rejection. `timeout_ms`: positive
    /// waits, `0` waits forever, negative fails fast.
    fn lock(&self, ctx: CtxId, key: &Key, timeout_ms: i64, filters: &[Filter]) -> Result<bool>;

    /// Lock several keys all-or-nothing, in canonical order
    fn lock_all(
        &self,
        ctx: CtxId,
        keys: &[Key],
        timeout_ms: i64,
        filters: &[Filter],
    ) -> Result<bool>;

    /// Release one hold; no-op if the caller does not hold the key
    fn unlock(&self, ctx: CtxId, key: &Key) -> bool;

    /// Release one hold on each key
    fn unlock_all(&self, ctx: CtxId, keys: &[Key]);

    /// Whether any owner holds the key
    fn is_locked(&self, key: &Key) -> bool;

    /// Whether this caller context holds the key
    fn is_locked_by(&self, ctx: CtxId, key: &Key) -> bool;
}

/// Transaction demarcation
pub trait CacheTxOps {
    /// Begin a transaction for the caller context
    ///
    /// `timeout: None` uses the configured default; `Some(Duration::ZERO)`
    /// disables the time budget. `size_hint` pre-sizes the enlistment table.
    fn tx_start(
        &self,
        ctx: CtxId,
        concurrency: TxConcurrency,
        isolation: TxIsolation,
        timeout: Option<Duration>,
        size_hint: usize,
    ) -> Result<TxId>;

    /// Id of the context's active transaction, if any
    fn current_tx(&self, ctx: CtxId) -> Option<TxId>;

    /// Commit the context's transaction
    fn tx_commit(&self, ctx: CtxId) -> Result<()>;

    /// Roll the context's transaction back
    fn tx_rollback(&self, ctx: CtxId) -> Result<()>;
}

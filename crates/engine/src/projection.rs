//! Flag- and filter-scoped cache views
//!
//! A `CacheProjection` is a lightweight handle over a [`CacheEngine`] that
//! applies a fixed set of flags and an optional entry filter to every
//! operation. Projections compose: deriving a projection from a projection
//! merges flags and chains filters.

use crate::cache::CacheEngine;
use crate::traits::{CacheLockOps, CacheReadOps, CacheTxOps, CacheWriteOps};
use gridcache_concurrency::{TxConcurrency, TxIsolation};
use gridcache_core::{CacheFlag, CtxId, Filter, FlagSet, Key, PeekMode, Result, TxId, Value};
use std::time::Duration;

/// Decoded per-operation behavior flags
#[derive(Debug, Clone, Copy, Default)]
pub struct OpFlags {
    /// Mutations fail with `FlagViolation`
    pub read_only: bool,
    /// Skip the external store on both read and write paths
    pub skip_store: bool,
    /// Reads do not promote from swap; eviction discards instead of swapping
    pub skip_swap: bool,
    /// Operations touch only keys this node primarily owns
    pub local_only: bool,
}

impl OpFlags {
    pub fn from_set(flags: FlagSet) -> Self {
        Self {
            read_only: flags.contains(CacheFlag::ReadOnly),
            skip_store: flags.contains(CacheFlag::SkipStore),
            skip_swap: flags.contains(CacheFlag::SkipSwap),
            local_only: flags.contains(CacheFlag::Local),
        }
    }
}

/// A view over the cache with fixed flags and an optional filter
#[derive(Clone)]
pub struct CacheProjection {
    engine: CacheEngine,
    flags: FlagSet,
    filter: Option<Filter>,
}

impl CacheProjection {
    pub(crate) fn new(engine: CacheEngine) -> Self {
        Self {
            engine,
            flags: FlagSet::empty(),
            filter: None,
        }
    }

    /// Narrow the view with an entry filter
    ///
    /// Filters chain: entries must pass every filter on the path back to the
    /// engine. Chaining keeps the earlier filter's name for diagnostics.
    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filter = Some(match self.filter.take() {
            Some(existing) => existing.and(filter),
            None => filter,
        });
        self
    }

    /// Alias for [`with_filter`](Self::with_filter), mirroring the engine API
    pub fn projection(self, filter: Filter) -> Self {
        self.with_filter(filter)
    }

    /// Enable additional flags on this view
    pub fn flags_on(mut self, flags: &[CacheFlag]) -> Self {
        for &flag in flags {
            self.flags = self.flags.with(flag);
        }
        self
    }

    /// Disable flags on this view
    pub fn flags_off(mut self, flags: &[CacheFlag]) -> Self {
        for &flag in flags {
            self.flags = self.flags.without(flag);
        }
        self
    }

    /// The flags in force on this view
    pub fn flags(&self) -> FlagSet {
        self.flags
    }

    /// The underlying engine
    pub fn cache(&self) -> &CacheEngine {
        &self.engine
    }

    fn op_flags(&self) -> OpFlags {
        OpFlags::from_set(self.flags)
    }

    fn view(&self) -> Option<&Filter> {
        self.filter.as_ref()
    }

    /// Local entries visible through this view's filter
    pub fn size(&self) -> usize {
        match &self.filter {
            None => self.engine.size(),
            Some(f) => {
                let f = f.clone();
                self.engine
                    .inner()
                    .storage
                    .count_matching(&move |k, e| e.value().is_some() && f.eval(k, e.value()))
            }
        }
    }
}

impl CacheReadOps for CacheProjection {
    fn get(&self, ctx: CtxId, key: &Key) -> Result<Option<Value>> {
        self.engine
            .inner()
            .do_get(ctx, key, self.op_flags(), self.view())
    }

    fn get_all(&self, ctx: CtxId, keys: &[Key]) -> Result<Vec<(Key, Value)>> {
        self.engine
            .inner()
            .do_get_all(ctx, keys, self.op_flags(), self.view())
    }

    fn peek(&self, key: &Key) -> Option<Value> {
        self.engine.inner().do_peek(key, self.view())
    }

    fn peek_modes(&self, key: &Key, modes: &[PeekMode]) -> Result<Option<Value>> {
        self.engine.inner().do_peek_modes(key, modes, self.view())
    }

    fn contains_key(&self, key: &Key) -> bool {
        match self.view() {
            None => self.engine.contains_key(key),
            // A filtered view only admits keys whose value passes the filter
            Some(_) => matches!(self.peek_modes(key, &[PeekMode::Near, PeekMode::Swap]), Ok(Some(_))),
        }
    }

    fn contains_value(&self, value: &Value) -> bool {
        match self.view() {
            None => self.engine.contains_value(value),
            Some(f) => {
                let f = f.clone();
                let value = value.clone();
                self.engine.inner().storage.count_matching(&move |k, e| {
                    e.value() == Some(&value) && f.eval(k, e.value())
                }) > 0
            }
        }
    }

    fn reload(&self, key: &Key) -> Result<Option<Value>> {
        self.engine.reload(key)
    }
}

impl CacheWriteOps for CacheProjection {
    fn put(
        &self,
        ctx: CtxId,
        key: &Key,
        value: Value,
        filters: &[Filter],
    ) -> Result<Option<Value>> {
        self.engine
            .inner()
            .do_put(ctx, key, &value, filters, None, self.op_flags(), self.view(), true)
            .map(|r| r.previous)
    }

    fn putx(&self, ctx: CtxId, key: &Key, value: Value, filters: &[Filter]) -> Result<bool> {
        self.engine
            .inner()
            .do_put(ctx, key, &value, filters, None, self.op_flags(), self.view(), false)
            .map(|r| r.applied)
    }

    fn put_if_absent(&self, ctx: CtxId, key: &Key, value: Value) -> Result<Option<Value>> {
        let applied = self.putx(ctx, key, value, &[Filter::no_value()])?;
        if applied {
            Ok(None)
        } else {
            self.get(ctx, key)
        }
    }

    fn putx_if_absent(&self, ctx: CtxId, key: &Key, value: Value) -> Result<bool> {
        self.putx(ctx, key, value, &[Filter::no_value()])
    }

    fn replace(&self, ctx: CtxId, key: &Key, value: Value) -> Result<Option<Value>> {
        self.put(ctx, key, value, &[Filter::has_value()])
    }

    fn replacex(&self, ctx: CtxId, key: &Key, value: Value) -> Result<bool> {
        self.putx(ctx, key, value, &[Filter::has_value()])
    }

    fn replace_if(&self, ctx: CtxId, key: &Key, old: &Value, new: Value) -> Result<bool> {
        self.putx(ctx, key, new, &[Filter::value_equals(old.clone())])
    }

    fn put_all(&self, ctx: CtxId, entries: &[(Key, Value)], filters: &[Filter]) -> Result<()> {
        self.engine
            .inner()
            .do_put_all(ctx, entries, filters, self.op_flags(), self.view())
    }

    fn remove(&self, ctx: CtxId, key: &Key, filters: &[Filter]) -> Result<Option<Value>> {
        self.engine
            .inner()
            .do_remove(ctx, key, filters, self.op_flags(), self.view(), true)
            .map(|r| r.previous)
    }

    fn removex(&self, ctx: CtxId, key: &Key, filters: &[Filter]) -> Result<bool> {
        self.engine
            .inner()
            .do_remove(ctx, key, filters, self.op_flags(), self.view(), false)
            .map(|r| r.applied)
    }

    fn remove_if(&self, ctx: CtxId, key: &Key, expected: &Value) -> Result<bool> {
        self.removex(ctx, key, &[Filter::value_equals(expected.clone())])
    }

    fn remove_all(&self, ctx: CtxId, keys: &[Key], filters: &[Filter]) -> Result<()> {
        self.engine
            .inner()
            .do_remove_all(ctx, keys, filters, self.op_flags(), self.view())
    }

    fn clear(&self, ctx: CtxId) -> Result<()> {
        self.engine.inner().do_clear(ctx, self.op_flags())
    }

    fn clear_locally(&self, _ctx: CtxId) -> Result<()> {
        self.engine.inner().do_clear_locally(self.op_flags())
    }

    fn compare_and_set(
        &self,
        ctx: CtxId,
        key: &Key,
        expected: Option<&Value>,
        new: Option<Value>,
    ) -> Result<bool> {
        self.engine
            .inner()
            .do_compare_and_set(ctx, key, expected, new, self.op_flags(), self.view())
    }
}

impl CacheLockOps for CacheProjection {
    fn lock(&self, ctx: CtxId, key: &Key, timeout_ms: i64, filters: &[Filter]) -> Result<bool> {
        self.engine
            .inner()
            .do_lock(ctx, key, timeout_ms, filters, self.op_flags(), self.view())
    }

    fn lock_all(
        &self,
        ctx: CtxId,
        keys: &[Key],
        timeout_ms: i64,
        filters: &[Filter],
    ) -> Result<bool> {
        self.engine
            .inner()
            .do_lock_all(ctx, keys, timeout_ms, filters, self.op_flags(), self.view())
    }

    fn unlock(&self, ctx: CtxId, key: &Key) -> bool {
        self.engine.unlock(ctx, key)
    }

    fn unlock_all(&self, ctx: CtxId, keys: &[Key]) {
        self.engine.unlock_all(ctx, keys)
    }

    fn is_locked(&self, key: &Key) -> bool {
        self.engine.is_locked(key)
    }

    fn is_locked_by(&self, ctx: CtxId, key: &Key) -> bool {
        self.engine.is_locked_by(ctx, key)
    }
}

impl CacheTxOps for CacheProjection {
    fn tx_start(
        &self,
        ctx: CtxId,
        concurrency: TxConcurrency,
        isolation: TxIsolation,
        timeout: Option<Duration>,
        size_hint: usize,
    ) -> Result<TxId> {
        self.engine
            .tx_start(ctx, concurrency, isolation, timeout, size_hint)
    }

    fn current_tx(&self, ctx: CtxId) -> Option<TxId> {
        self.engine.current_tx(ctx)
    }

    fn tx_commit(&self, ctx: CtxId) -> Result<()> {
        self.engine.tx_commit(ctx)
    }

    fn tx_rollback(&self, ctx: CtxId) -> Result<()> {
        self.engine.tx_rollback(ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gridcache_core::{CacheConfig, CacheError};

    fn engine() -> CacheEngine {
        CacheEngine::new(CacheConfig::for_testing()).unwrap()
    }

    #[test]
    fn read_only_projection_rejects_writes() {
        let cache = engine();
        let ctx = CtxId::next();
        let key = Key::new("a");
        cache.putx(ctx, &key, Value::I64(1), &[]).unwrap();

        let frozen = cache.flags_on(&[CacheFlag::ReadOnly]);
        assert_eq!(frozen.get(ctx, &key).unwrap(), Some(Value::I64(1)));
        assert!(matches!(
            frozen.putx(ctx, &key, Value::I64(2), &[]).unwrap_err(),
            CacheError::FlagViolation(_)
        ));
        assert!(matches!(
            frozen.removex(ctx, &key, &[]).unwrap_err(),
            CacheError::FlagViolation(_)
        ));
        assert!(matches!(
            frozen.clear(ctx).unwrap_err(),
            CacheError::FlagViolation(_)
        ));
        // The base handle is unaffected
        assert!(cache.putx(ctx, &key, Value::I64(2), &[]).unwrap());
    }

    #[test]
    fn filtered_view_hides_nonmatching_entries() {
        let cache = engine();
        let ctx = CtxId::next();
        let odd = Key::new("odd");
        let even = Key::new("even");
        cache.putx(ctx, &odd, Value::I64(1), &[]).unwrap();
        cache.putx(ctx, &even, Value::I64(2), &[]).unwrap();

        let odds = cache.projection(Filter::new("odd-values", |_, v| {
            matches!(v, Some(Value::I64(n)) if n % 2 == 1)
        }));
        assert_eq!(odds.get(ctx, &odd).unwrap(), Some(Value::I64(1)));
        assert_eq!(odds.get(ctx, &even).unwrap(), None);
        assert!(odds.contains_key(&odd));
        assert!(!odds.contains_key(&even));
        assert_eq!(odds.size(), 1);
    }

    #[test]
    fn filtered_view_scans_values_through_the_filter() {
        let cache = engine();
        let ctx = CtxId::next();
        cache.putx(ctx, &Key::new("a"), Value::I64(1), &[]).unwrap();
        cache.putx(ctx, &Key::new("b"), Value::I64(2), &[]).unwrap();

        let odds = cache.projection(Filter::new("odd-values", |_, v| {
            matches!(v, Some(Value::I64(n)) if n % 2 == 1)
        }));
        assert!(odds.contains_value(&Value::I64(1)));
        // Present in the cache, but the view's filter hides it
        assert!(!odds.contains_value(&Value::I64(2)));
        assert_eq!(odds.size(), 1);
    }

    #[test]
    fn filtered_view_guards_writes() {
        let cache = engine();
        let ctx = CtxId::next();
        let odd = Key::new("odd");
        let even = Key::new("even");
        cache.putx(ctx, &odd, Value::I64(1), &[]).unwrap();
        cache.putx(ctx, &even, Value::I64(2), &[]).unwrap();

        let odds = cache.projection(Filter::new("odd-values", |_, v| {
            matches!(v, Some(Value::I64(n)) if n % 2 == 1)
        }));
        // Mutating through the view only touches entries the view admits
        assert!(odds.putx(ctx, &odd, Value::I64(3), &[]).unwrap());
        assert!(!odds.putx(ctx, &even, Value::I64(4), &[]).unwrap());
        assert_eq!(cache.get(ctx, &even).unwrap(), Some(Value::I64(2)));
        assert!(!odds.removex(ctx, &even, &[]).unwrap());
        assert!(odds.removex(ctx, &odd, &[]).unwrap());
    }

    #[test]
    fn chained_filters_intersect() {
        let cache = engine();
        let ctx = CtxId::next();
        for i in 0..10 {
            cache
                .putx(ctx, &Key::new(format!("k{i}")), Value::I64(i), &[])
                .unwrap();
        }
        let mid = cache
            .projection(Filter::new("ge3", |_, v| {
                matches!(v, Some(Value::I64(n)) if *n >= 3)
            }))
            .with_filter(Filter::new("lt7", |_, v| {
                matches!(v, Some(Value::I64(n)) if *n < 7)
            }));
        assert_eq!(mid.size(), 4);
        assert_eq!(mid.get(ctx, &Key::new("k2")).unwrap(), None);
        assert_eq!(mid.get(ctx, &Key::new("k5")).unwrap(), Some(Value::I64(5)));
        assert_eq!(mid.get(ctx, &Key::new("k8")).unwrap(), None);
    }

    #[test]
    fn flags_off_restores_behavior() {
        let cache = engine();
        let ctx = CtxId::next();
        let key = Key::new("a");

        let view = cache
            .flags_on(&[CacheFlag::ReadOnly])
            .flags_off(&[CacheFlag::ReadOnly]);
        assert!(view.putx(ctx, &key, Value::I64(1), &[]).unwrap());
    }

    #[test]
    fn skip_swap_reads_do_not_promote() {
        let cache = engine();
        let ctx = CtxId::next();
        let key = Key::new("cold");
        cache.putx(ctx, &key, Value::I64(1), &[]).unwrap();
        cache.evict(&key).unwrap();

        let view = cache.flags_on(&[CacheFlag::SkipSwap]);
        assert_eq!(view.get(ctx, &key).unwrap(), Some(Value::I64(1)));
        // Still swapped out; a plain get promotes
        assert_eq!(cache.peek(&key), None);
        assert_eq!(cache.get(ctx, &key).unwrap(), Some(Value::I64(1)));
        assert_eq!(cache.peek(&key), Some(Value::I64(1)));
    }
}

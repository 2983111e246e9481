//! The cache engine facade
//!
//! `CacheEngine` wires the storage stack, the lock manager, the transaction
//! manager, the router, the replicator and the worker pool together and
//! exposes the operation surface through the capability traits.
//!
//! # Operation pipeline
//!
//! Every mutation follows the same path: route the key (surfacing
//! `PartitionUnavailable`), take the implicit per-operation lock (so
//! explicit locks and pessimistic transactions are honored), evaluate
//! filters atomically with the write inside the entry store, replicate the
//! applied mutation, then enforce the memory ceiling. Transactional callers
//! branch off after routing: their operations go to the transaction manager
//! and reach storage only at commit.
//!
//! Retryable failures (lock timeouts on the implicit lock, unavailable
//! partitions) are retried locally per `RetryConfig` before surfacing.

use crate::ops::{OpExecutor, OpHandle};
use crate::projection::{CacheProjection, OpFlags};
use crate::replicate::LocalReplicator;
use crate::router::PartitionRouter;
use crate::topology::TopologySnapshot;
use crate::traits::{CacheLockOps, CacheReadOps, CacheTxOps, CacheWriteOps};
use gridcache_concurrency::{LockManager, TransactionManager, TxConcurrency, TxIsolation};
use gridcache_core::{
    eval_all, partition_for, CacheConfig, CacheError, CacheFlag, CtxId, Filter, FilterSet, Key,
    LockOwner, NodeId, NoopReplicator, PeekMode, Replicator, Residency, Result, StoreBridge, TxId,
    Value,
};
use gridcache_storage::{CacheStorage, LruPolicy};
use std::sync::Arc;
use std::time::Duration;

/// Internal result of a put/remove-shaped operation
pub(crate) struct MutationResult {
    pub applied: bool,
    pub previous: Option<Value>,
}

/// Shared engine state behind the facade and every projection
pub(crate) struct EngineInner {
    pub(crate) config: CacheConfig,
    pub(crate) storage: CacheStorage,
    pub(crate) locks: Arc<LockManager>,
    pub(crate) txs: TransactionManager,
    pub(crate) router: PartitionRouter,
    pub(crate) replicator: Arc<dyn Replicator>,
}

impl EngineInner {
    fn view_passes(view: Option<&Filter>, key: &Key, current: Option<&Value>) -> bool {
        view.map_or(true, |f| f.eval(key, current))
    }

    fn combined(view: Option<&Filter>, filters: &[Filter]) -> FilterSet {
        let mut all = FilterSet::new();
        if let Some(f) = view {
            all.push(f.clone());
        }
        all.extend(filters.iter().cloned());
        all
    }

    fn is_in_use(&self, key: &Key) -> bool {
        self.locks.is_in_use(key) || self.txs.is_enlisted(key)
    }

    /// Whether this node primarily owns the key under the current topology
    fn key_is_local(&self, key: &Key) -> bool {
        self.router.is_local_primary(key)
    }

    /// Bounded local retry for transiently failing operations
    fn with_retry<T>(&self, mut op: impl FnMut() -> Result<T>) -> Result<T> {
        let mut attempt = 0;
        loop {
            match op() {
                Err(e) if e.is_retryable() && attempt + 1 < self.config.retry.max_attempts => {
                    attempt += 1;
                    tracing::debug!(error = %e, attempt, "retrying cache operation");
                    std::thread::sleep(self.config.retry.backoff);
                }
                other => return other,
            }
        }
    }

    // === Reads ===

    pub(crate) fn do_get(
        &self,
        ctx: CtxId,
        key: &Key,
        flags: OpFlags,
        view: Option<&Filter>,
    ) -> Result<Option<Value>> {
        self.router.route(key)?;
        if flags.local_only && !self.key_is_local(key) {
            return Ok(None);
        }
        let value = if self.txs.in_tx(ctx) {
            self.txs.read(ctx, &self.storage, key, flags.skip_store)?
        } else if flags.skip_swap {
            // Serve without promoting: memory, then a non-destructive swap
            // read, then the regular path for absent/evicted entries
            match self.storage.peek(key) {
                Some(v) => Some(v),
                None => match self.storage.peek_swap(key)? {
                    Some(v) => Some(v),
                    None => self.storage.get(key, flags.skip_store)?,
                },
            }
        } else {
            self.storage.get(key, flags.skip_store)?
        };
        Ok(value.filter(|v| Self::view_passes(view, key, Some(v))))
    }

    pub(crate) fn do_get_all(
        &self,
        ctx: CtxId,
        keys: &[Key],
        flags: OpFlags,
        view: Option<&Filter>,
    ) -> Result<Vec<(Key, Value)>> {
        let mut out = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(value) = self.do_get(ctx, key, flags, view)? {
                out.push((key.clone(), value));
            }
        }
        Ok(out)
    }

    pub(crate) fn do_peek(&self, key: &Key, view: Option<&Filter>) -> Option<Value> {
        self.storage
            .peek(key)
            .filter(|v| Self::view_passes(view, key, Some(v)))
    }

    pub(crate) fn do_peek_modes(
        &self,
        key: &Key,
        modes: &[PeekMode],
        view: Option<&Filter>,
    ) -> Result<Option<Value>> {
        let topo = self.router.snapshot();
        let partition = partition_for(key, topo.partition_count());
        for mode in modes {
            let value = match mode {
                PeekMode::Near => self.storage.peek(key),
                PeekMode::Primary => {
                    if topo.is_local_primary(partition) {
                        self.storage.peek(key)
                    } else {
                        None
                    }
                }
                PeekMode::Backup => {
                    if topo.is_local_backup(partition) {
                        self.storage.peek(key)
                    } else {
                        None
                    }
                }
                PeekMode::Swap => self.storage.peek_swap(key)?,
            };
            if let Some(v) = value {
                if Self::view_passes(view, key, Some(&v)) {
                    return Ok(Some(v));
                }
            }
        }
        Ok(None)
    }

    pub(crate) fn do_reload(&self, key: &Key) -> Result<Option<Value>> {
        self.router.route(key)?;
        self.storage.reload(key)
    }

    // === Mutations ===

    pub(crate) fn do_put(
        &self,
        ctx: CtxId,
        key: &Key,
        value: &Value,
        filters: &[Filter],
        ttl: Option<Duration>,
        flags: OpFlags,
        view: Option<&Filter>,
        want_previous: bool,
    ) -> Result<MutationResult> {
        if flags.read_only {
            return Err(CacheError::FlagViolation(
                "put through a read-only projection".to_string(),
            ));
        }
        self.router.route(key)?;
        if flags.local_only && !self.key_is_local(key) {
            return Ok(MutationResult {
                applied: false,
                previous: None,
            });
        }
        let all = Self::combined(view, filters);

        if self.txs.in_tx(ctx) {
            let previous = if want_previous {
                self.txs.read(ctx, &self.storage, key, flags.skip_store)?
            } else {
                None
            };
            let applied = self.txs.write(
                ctx,
                &self.storage,
                key,
                Some(value.clone()),
                &all,
                flags.skip_store,
            )?;
            return Ok(MutationResult {
                applied,
                previous: previous.filter(|_| applied),
            });
        }

        let owner = LockOwner::Context(ctx);
        self.with_retry(|| {
            self.locks
                .lock(key, owner, self.config.default_lock_timeout_ms)?;
            let result = self.storage.put(
                key,
                value.clone(),
                &all,
                ttl,
                flags.skip_store,
                want_previous,
            );
            self.locks.unlock(key, owner);
            let out = result?;
            if out.applied {
                self.replicator.replicate_put(key, value, out.version);
                self.storage
                    .enforce_memory_ceiling(&|k| self.is_in_use(k))?;
            }
            if let Some(e) = out.store_error {
                return Err(CacheError::write_through(e.to_string()));
            }
            Ok(MutationResult {
                applied: out.applied,
                previous: out.previous,
            })
        })
    }

    pub(crate) fn do_remove(
        &self,
        ctx: CtxId,
        key: &Key,
        filters: &[Filter],
        flags: OpFlags,
        view: Option<&Filter>,
        want_previous: bool,
    ) -> Result<MutationResult> {
        if flags.read_only {
            return Err(CacheError::FlagViolation(
                "remove through a read-only projection".to_string(),
            ));
        }
        self.router.route(key)?;
        if flags.local_only && !self.key_is_local(key) {
            return Ok(MutationResult {
                applied: false,
                previous: None,
            });
        }
        let all = Self::combined(view, filters);

        if self.txs.in_tx(ctx) {
            let previous = if want_previous {
                self.txs.read(ctx, &self.storage, key, flags.skip_store)?
            } else {
                None
            };
            let applied =
                self.txs
                    .write(ctx, &self.storage, key, None, &all, flags.skip_store)?;
            return Ok(MutationResult {
                applied,
                previous: previous.filter(|_| applied),
            });
        }

        let owner = LockOwner::Context(ctx);
        self.with_retry(|| {
            self.locks
                .lock(key, owner, self.config.default_lock_timeout_ms)?;
            let result = self
                .storage
                .remove(key, &all, flags.skip_store, want_previous);
            self.locks.unlock(key, owner);
            let out = result?;
            if out.applied {
                self.replicator.replicate_remove(key, out.version);
            }
            if let Some(e) = out.store_error {
                return Err(CacheError::write_through(e.to_string()));
            }
            Ok(MutationResult {
                applied: out.applied,
                previous: out.previous,
            })
        })
    }

    pub(crate) fn do_put_all(
        &self,
        ctx: CtxId,
        entries: &[(Key, Value)],
        filters: &[Filter],
        flags: OpFlags,
        view: Option<&Filter>,
    ) -> Result<()> {
        for (key, value) in entries {
            self.do_put(ctx, key, value, filters, None, flags, view, false)?;
        }
        Ok(())
    }

    pub(crate) fn do_remove_all(
        &self,
        ctx: CtxId,
        keys: &[Key],
        filters: &[Filter],
        flags: OpFlags,
        view: Option<&Filter>,
    ) -> Result<()> {
        for key in keys {
            self.do_remove(ctx, key, filters, flags, view, false)?;
        }
        Ok(())
    }

    pub(crate) fn do_compare_and_set(
        &self,
        ctx: CtxId,
        key: &Key,
        expected: Option<&Value>,
        new: Option<Value>,
        flags: OpFlags,
        view: Option<&Filter>,
    ) -> Result<bool> {
        let guard = match expected {
            Some(v) => Filter::value_equals(v.clone()),
            None => Filter::no_value(),
        };
        let result = match new {
            Some(value) => {
                self.do_put(ctx, key, &value, &[guard], None, flags, view, false)?
            }
            None => self.do_remove(ctx, key, &[guard], flags, view, false)?,
        };
        Ok(result.applied)
    }

    pub(crate) fn do_clear(&self, ctx: CtxId, flags: OpFlags) -> Result<()> {
        if flags.read_only {
            return Err(CacheError::FlagViolation(
                "clear through a read-only projection".to_string(),
            ));
        }
        if self.txs.in_tx(ctx) {
            return Err(CacheError::TransactionState(
                "clear is not transactional".to_string(),
            ));
        }
        self.replicator.clear();
        self.storage.clear_local();
        tracing::debug!("cache cleared");
        Ok(())
    }

    pub(crate) fn do_clear_locally(&self, flags: OpFlags) -> Result<()> {
        if flags.read_only {
            return Err(CacheError::FlagViolation(
                "clear through a read-only projection".to_string(),
            ));
        }
        self.storage.clear_local();
        Ok(())
    }

    // === Locks ===

    pub(crate) fn do_lock(
        &self,
        ctx: CtxId,
        key: &Key,
        timeout_ms: i64,
        filters: &[Filter],
        flags: OpFlags,
        view: Option<&Filter>,
    ) -> Result<bool> {
        self.router.route(key)?;
        let owner = LockOwner::Context(ctx);
        match self.locks.lock(key, owner, timeout_ms) {
            Ok(()) => {}
            Err(CacheError::LockTimeout { .. }) => return Ok(false),
            Err(e) => return Err(e),
        }
        // Holding the lock makes the filter check atomic: mutations contend
        // on this same lock through the implicit per-op acquire. The filter
        // sees the same resolved value a mutation's filter would, including
        // a bridge load for evicted entries.
        let current = self.storage.current_value(key, flags.skip_store)?;
        let all = Self::combined(view, filters);
        if eval_all(&all, key, current.as_ref()) {
            Ok(true)
        } else {
            self.locks.unlock(key, owner);
            Ok(false)
        }
    }

    pub(crate) fn do_lock_all(
        &self,
        ctx: CtxId,
        keys: &[Key],
        timeout_ms: i64,
        filters: &[Filter],
        flags: OpFlags,
        view: Option<&Filter>,
    ) -> Result<bool> {
        for key in keys {
            self.router.route(key)?;
        }
        let owner = LockOwner::Context(ctx);
        match self.locks.lock_all(keys.iter(), owner, timeout_ms) {
            Ok(()) => {}
            Err(CacheError::LockTimeout { .. }) => return Ok(false),
            Err(e) => return Err(e),
        }
        let all = Self::combined(view, filters);
        for key in keys {
            let current = self.storage.current_value(key, flags.skip_store)?;
            if !eval_all(&all, key, current.as_ref()) {
                self.locks.unlock_all(keys.iter(), owner);
                return Ok(false);
            }
        }
        Ok(true)
    }

    // === Eviction / swap ===

    pub(crate) fn do_evict(&self, key: &Key, flags: OpFlags) -> Result<bool> {
        let use_swap = !flags.skip_swap && self.config.max_swap_entries > 0;
        self.storage
            .evict(key, use_swap, &|k| self.is_in_use(k))
    }

    pub(crate) fn do_evict_all(&self, keys: &[Key], flags: OpFlags) -> Result<usize> {
        let mut evicted = 0;
        for key in keys {
            if self.do_evict(key, flags)? {
                evicted += 1;
            }
        }
        Ok(evicted)
    }

    // === Sizing ===

    pub(crate) fn local_size(&self, modes: &[PeekMode]) -> usize {
        if modes.is_empty() {
            return self.storage.len();
        }
        let topo = self.router.snapshot();
        self.storage.count_matching(&|_, entry| {
            modes.iter().any(|mode| match mode {
                PeekMode::Near => entry.is_resident(),
                PeekMode::Primary => topo.is_local_primary(entry.partition),
                PeekMode::Backup => topo.is_local_backup(entry.partition),
                PeekMode::Swap => {
                    matches!(entry.residency, Residency::Swapped | Residency::OnDisk)
                }
            })
        })
    }

    pub(crate) fn global_size(&self) -> usize {
        let topo = self.router.snapshot();
        topo.nodes
            .iter()
            .map(|&node| {
                if node == topo.local {
                    self.storage.len()
                } else {
                    self.replicator.primary_size(node) + self.replicator.backup_size(node)
                }
            })
            .sum()
    }

    pub(crate) fn global_primary_size(&self) -> usize {
        let topo = self.router.snapshot();
        topo.nodes
            .iter()
            .map(|&node| {
                if node == topo.local {
                    self.local_size(&[PeekMode::Primary])
                } else {
                    self.replicator.primary_size(node)
                }
            })
            .sum()
    }
}

/// The partitioned, transactional cache engine
///
/// Cheaply cloneable; clones share all state. Construct with
/// [`CacheEngine::new`] for an embedded single-node cache or
/// [`CacheEngine::with_parts`] to supply a store bridge, replicator or
/// topology.
#[derive(Clone)]
pub struct CacheEngine {
    inner: Arc<EngineInner>,
    executor: Arc<OpExecutor>,
}

impl CacheEngine {
    /// Single-node engine with no store bridge and no backups
    pub fn new(config: CacheConfig) -> Result<Self> {
        Self::with_parts(config, None, None, None)
    }

    /// Engine with explicit collaborators
    ///
    /// Defaults: a fresh single-node topology, no store bridge, and a
    /// [`NoopReplicator`]. A supplied topology must carry the same partition
    /// count as the config.
    pub fn with_parts(
        config: CacheConfig,
        bridge: Option<Arc<dyn StoreBridge>>,
        replicator: Option<Arc<dyn Replicator>>,
        topology: Option<TopologySnapshot>,
    ) -> Result<Self> {
        let topology = topology
            .unwrap_or_else(|| TopologySnapshot::single_node(NodeId::new(), config.partition_count));
        debug_assert_eq!(topology.partition_count(), config.partition_count);

        let locks = Arc::new(LockManager::new());
        let storage = CacheStorage::new(&config, bridge, Box::new(LruPolicy::new()))?;
        let txs = TransactionManager::new(locks.clone(), config.default_tx_timeout);
        let router = PartitionRouter::new(topology, config.retry.clone());
        let replicator = replicator.unwrap_or_else(|| Arc::new(NoopReplicator));
        let executor = Arc::new(OpExecutor::new(config.worker_threads));

        tracing::info!(
            partitions = config.partition_count,
            memory_ceiling = config.max_memory_entries,
            "cache engine started"
        );
        Ok(Self {
            inner: Arc::new(EngineInner {
                config,
                storage,
                locks,
                txs,
                router,
                replicator,
            }),
            executor,
        })
    }

    /// Engine whose backups land in a returned [`LocalReplicator`]
    pub fn with_local_replication(
        config: CacheConfig,
        bridge: Option<Arc<dyn StoreBridge>>,
    ) -> Result<(Self, Arc<LocalReplicator>)> {
        let node = NodeId::new();
        let replicator = Arc::new(LocalReplicator::new(node));
        let topology = TopologySnapshot::single_node(node, config.partition_count);
        let engine = Self::with_parts(config, bridge, Some(replicator.clone()), Some(topology))?;
        Ok((engine, replicator))
    }

    /// View restricted by an entry filter
    pub fn projection(&self, filter: Filter) -> CacheProjection {
        CacheProjection::new(self.clone()).with_filter(filter)
    }

    /// View with additional flags enabled
    pub fn flags_on(&self, flags: &[CacheFlag]) -> CacheProjection {
        CacheProjection::new(self.clone()).flags_on(flags)
    }

    pub(crate) fn inner(&self) -> &Arc<EngineInner> {
        &self.inner
    }

    /// Install a new topology snapshot
    pub fn install_topology(&self, topology: TopologySnapshot) {
        self.inner.router.install(topology);
    }

    /// Put with a time-to-live; the entry reads as absent after `ttl`
    pub fn putx_ttl(
        &self,
        ctx: CtxId,
        key: &Key,
        value: Value,
        ttl: Duration,
        filters: &[Filter],
    ) -> Result<bool> {
        self.inner
            .do_put(
                ctx,
                key,
                &value,
                filters,
                Some(ttl),
                OpFlags::default(),
                None,
                false,
            )
            .map(|r| r.applied)
    }

    /// Demote an entry out of memory; false when absent or in use
    pub fn evict(&self, key: &Key) -> Result<bool> {
        self.inner.do_evict(key, OpFlags::default())
    }

    /// Demote several entries; returns how many were demoted
    pub fn evict_all(&self, keys: &[Key]) -> Result<usize> {
        self.inner.do_evict_all(keys, OpFlags::default())
    }

    /// Bring a demoted entry's payload back into memory
    pub fn promote(&self, key: &Key) -> Result<Option<Value>> {
        self.inner.storage.promote(key)
    }

    /// Promote a batch of keys
    pub fn promote_all(&self, keys: &[Key]) -> Result<()> {
        for key in keys {
            self.inner.storage.promote(key)?;
        }
        Ok(())
    }

    /// Total local entries, all residencies
    pub fn size(&self) -> usize {
        self.inner.storage.len()
    }

    /// Local entries matching any of the peek modes (empty = all)
    pub fn local_size(&self, modes: &[PeekMode]) -> usize {
        self.inner.local_size(modes)
    }

    /// Local entries in partitions this node primarily owns
    pub fn primary_size(&self) -> usize {
        self.inner.local_size(&[PeekMode::Primary])
    }

    /// Entries across the cluster, as far as the replicator can see
    pub fn global_size(&self) -> usize {
        self.inner.global_size()
    }

    /// Primary-owned entries across the cluster
    pub fn global_primary_size(&self) -> usize {
        self.inner.global_primary_size()
    }

    /// Entries whose payload currently sits in memory
    pub fn memory_size(&self) -> usize {
        self.inner.storage.resident_len()
    }

    /// Payloads currently held by the swap space
    pub fn swap_size(&self) -> usize {
        self.inner.storage.swapped_len()
    }

    /// Sweep expired entries; returns the purge count
    pub fn purge_expired(&self) -> usize {
        self.inner.storage.purge_expired()
    }

    // === Async siblings ===

    /// Asynchronous `get`
    pub fn get_async(&self, ctx: CtxId, key: Key) -> OpHandle<Option<Value>> {
        let inner = self.inner.clone();
        self.executor
            .submit(move || inner.do_get(ctx, &key, OpFlags::default(), None))
    }

    /// Asynchronous `put`
    pub fn put_async(&self, ctx: CtxId, key: Key, value: Value) -> OpHandle<Option<Value>> {
        let inner = self.inner.clone();
        self.executor.submit(move || {
            inner
                .do_put(ctx, &key, &value, &[], None, OpFlags::default(), None, true)
                .map(|r| r.previous)
        })
    }

    /// Asynchronous `putx`
    pub fn putx_async(&self, ctx: CtxId, key: Key, value: Value) -> OpHandle<bool> {
        let inner = self.inner.clone();
        self.executor.submit(move || {
            inner
                .do_put(ctx, &key, &value, &[], None, OpFlags::default(), None, false)
                .map(|r| r.applied)
        })
    }

    /// Asynchronous `remove`
    pub fn remove_async(&self, ctx: CtxId, key: Key) -> OpHandle<Option<Value>> {
        let inner = self.inner.clone();
        self.executor.submit(move || {
            inner
                .do_remove(ctx, &key, &[], OpFlags::default(), None, true)
                .map(|r| r.previous)
        })
    }

    /// Asynchronous `removex`
    pub fn removex_async(&self, ctx: CtxId, key: Key) -> OpHandle<bool> {
        let inner = self.inner.clone();
        self.executor.submit(move || {
            inner
                .do_remove(ctx, &key, &[], OpFlags::default(), None, false)
                .map(|r| r.applied)
        })
    }

    /// Asynchronous `put_all`
    pub fn put_all_async(&self, ctx: CtxId, entries: Vec<(Key, Value)>) -> OpHandle<()> {
        let inner = self.inner.clone();
        self.executor
            .submit(move || inner.do_put_all(ctx, &entries, &[], OpFlags::default(), None))
    }

    /// Asynchronous `remove_all`
    pub fn remove_all_async(&self, ctx: CtxId, keys: Vec<Key>) -> OpHandle<()> {
        let inner = self.inner.clone();
        self.executor
            .submit(move || inner.do_remove_all(ctx, &keys, &[], OpFlags::default(), None))
    }
}

impl CacheReadOps for CacheEngine {
    fn get(&self, ctx: CtxId, key: &Key) -> Result<Option<Value>> {
        self.inner.do_get(ctx, key, OpFlags::default(), None)
    }

    fn get_all(&self, ctx: CtxId, keys: &[Key]) -> Result<Vec<(Key, Value)>> {
        self.inner.do_get_all(ctx, keys, OpFlags::default(), None)
    }

    fn peek(&self, key: &Key) -> Option<Value> {
        self.inner.do_peek(key, None)
    }

    fn peek_modes(&self, key: &Key, modes: &[PeekMode]) -> Result<Option<Value>> {
        self.inner.do_peek_modes(key, modes, None)
    }

    fn contains_key(&self, key: &Key) -> bool {
        self.inner.storage.contains_key(key)
    }

    fn contains_value(&self, value: &Value) -> bool {
        self.inner.storage.contains_value(value)
    }

    fn reload(&self, key: &Key) -> Result<Option<Value>> {
        self.inner.do_reload(key)
    }
}

impl CacheWriteOps for CacheEngine {
    fn put(
        &self,
        ctx: CtxId,
        key: &Key,
        value: Value,
        filters: &[Filter],
    ) -> Result<Option<Value>> {
        self.inner
            .do_put(ctx, key, &value, filters, None, OpFlags::default(), None, true)
            .map(|r| r.previous)
    }

    fn putx(&self, ctx: CtxId, key: &Key, value: Value, filters: &[Filter]) -> Result<bool> {
        self.inner
            .do_put(ctx, key, &value, filters, None, OpFlags::default(), None, false)
            .map(|r| r.applied)
    }

    fn put_if_absent(&self, ctx: CtxId, key: &Key, value: Value) -> Result<Option<Value>> {
        // Rejection means a value exists; report it like `put` would
        let result = self.inner.do_put(
            ctx,
            key,
            &value,
            &[Filter::no_value()],
            None,
            OpFlags::default(),
            None,
            true,
        )?;
        if result.applied {
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
        self.inner
            .do_put_all(ctx, entries, filters, OpFlags::default(), None)
    }

    fn remove(&self, ctx: CtxId, key: &Key, filters: &[Filter]) -> Result<Option<Value>> {
        self.inner
            .do_remove(ctx, key, filters, OpFlags::default(), None, true)
            .map(|r| r.previous)
    }

    fn removex(&self, ctx: CtxId, key: &Key, filters: &[Filter]) -> Result<bool> {
        self.inner
            .do_remove(ctx, key, filters, OpFlags::default(), None, false)
            .map(|r| r.applied)
    }

    fn remove_if(&self, ctx: CtxId, key: &Key, expected: &Value) -> Result<bool> {
        self.removex(ctx, key, &[Filter::value_equals(expected.clone())])
    }

    fn remove_all(&self, ctx: CtxId, keys: &[Key], filters: &[Filter]) -> Result<()> {
        self.inner
            .do_remove_all(ctx, keys, filters, OpFlags::default(), None)
    }

    fn clear(&self, ctx: CtxId) -> Result<()> {
        self.inner.do_clear(ctx, OpFlags::default())
    }

    fn clear_locally(&self, _ctx: CtxId) -> Result<()> {
        self.inner.do_clear_locally(OpFlags::default())
    }

    fn compare_and_set(
        &self,
        ctx: CtxId,
        key: &Key,
        expected: Option<&Value>,
        new: Option<Value>,
    ) -> Result<bool> {
        self.inner
            .do_compare_and_set(ctx, key, expected, new, OpFlags::default(), None)
    }
}

impl CacheLockOps for CacheEngine {
    fn lock(&self, ctx: CtxId, key: &Key, timeout_ms: i64, filters: &[Filter]) -> Result<bool> {
        self.inner
            .do_lock(ctx, key, timeout_ms, filters, OpFlags::default(), None)
    }

    fn lock_all(
        &self,
        ctx: CtxId,
        keys: &[Key],
        timeout_ms: i64,
        filters: &[Filter],
    ) -> Result<bool> {
        self.inner
            .do_lock_all(ctx, keys, timeout_ms, filters, OpFlags::default(), None)
    }

    fn unlock(&self, ctx: CtxId, key: &Key) -> bool {
        self.inner.locks.unlock(key, LockOwner::Context(ctx))
    }

    fn unlock_all(&self, ctx: CtxId, keys: &[Key]) {
        self.inner
            .locks
            .unlock_all(keys.iter(), LockOwner::Context(ctx));
    }

    fn is_locked(&self, key: &Key) -> bool {
        self.inner.locks.is_locked(key)
    }

    fn is_locked_by(&self, ctx: CtxId, key: &Key) -> bool {
        self.inner
            .locks
            .is_locked_by(key, LockOwner::Context(ctx))
    }
}

impl CacheTxOps for CacheEngine {
    fn tx_start(
        &self,
        ctx: CtxId,
        concurrency: TxConcurrency,
        isolation: TxIsolation,
        timeout: Option<Duration>,
        size_hint: usize,
    ) -> Result<TxId> {
        self.inner
            .txs
            .tx_start(ctx, concurrency, isolation, timeout, size_hint)
    }

    fn current_tx(&self, ctx: CtxId) -> Option<TxId> {
        self.inner.txs.current(ctx)
    }

    fn tx_commit(&self, ctx: CtxId) -> Result<()> {
        self.inner.txs.commit(
            ctx,
            &self.inner.storage,
            self.inner.replicator.as_ref(),
            false,
        )
    }

    fn tx_rollback(&self, ctx: CtxId) -> Result<()> {
        self.inner.txs.rollback(ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gridcache_core::PartitionState;

    fn engine() -> CacheEngine {
        CacheEngine::new(CacheConfig::for_testing()).unwrap()
    }

    #[test]
    fn put_get_remove_round() {
        let cache = engine();
        let ctx = CtxId::next();
        let key = Key::new("a");

        assert_eq!(cache.put(ctx, &key, Value::I64(1), &[]).unwrap(), None);
        assert_eq!(cache.get(ctx, &key).unwrap(), Some(Value::I64(1)));
        assert_eq!(
            cache.put(ctx, &key, Value::I64(2), &[]).unwrap(),
            Some(Value::I64(1))
        );
        assert_eq!(
            cache.remove(ctx, &key, &[]).unwrap(),
            Some(Value::I64(2))
        );
        assert_eq!(cache.get(ctx, &key).unwrap(), None);
    }

    #[test]
    fn put_if_absent_semantics() {
        let cache = engine();
        let ctx = CtxId::next();
        let key = Key::new("a");

        assert_eq!(cache.put_if_absent(ctx, &key, Value::I64(1)).unwrap(), None);
        // Occupied: reports the standing value, does not overwrite
        assert_eq!(
            cache.put_if_absent(ctx, &key, Value::I64(2)).unwrap(),
            Some(Value::I64(1))
        );
        assert_eq!(cache.get(ctx, &key).unwrap(), Some(Value::I64(1)));
        assert!(!cache.putx_if_absent(ctx, &key, Value::I64(3)).unwrap());
    }

    #[test]
    fn replace_only_touches_present_keys() {
        let cache = engine();
        let ctx = CtxId::next();
        let key = Key::new("a");

        assert_eq!(cache.replace(ctx, &key, Value::I64(1)).unwrap(), None);
        assert_eq!(cache.get(ctx, &key).unwrap(), None);

        cache.putx(ctx, &key, Value::I64(1), &[]).unwrap();
        assert!(cache.replacex(ctx, &key, Value::I64(2)).unwrap());
        assert_eq!(cache.get(ctx, &key).unwrap(), Some(Value::I64(2)));

        assert!(!cache
            .replace_if(ctx, &key, &Value::I64(99), Value::I64(3))
            .unwrap());
        assert!(cache
            .replace_if(ctx, &key, &Value::I64(2), Value::I64(3))
            .unwrap());
    }

    #[test]
    fn explicit_lock_blocks_other_contexts() {
        let cache = engine();
        let holder = CtxId::next();
        let other = CtxId::next();
        let key = Key::new("guarded");

        assert!(cache.lock(holder, &key, 0, &[]).unwrap());
        assert!(cache.is_locked(&key));
        assert!(cache.is_locked_by(holder, &key));
        assert!(!cache.is_locked_by(other, &key));

        // Holder mutates freely (reentrant implicit lock)
        cache.putx(holder, &key, Value::I64(1), &[]).unwrap();
        // Other context cannot lock
        assert!(!cache.lock(other, &key, -1, &[]).unwrap());

        assert!(cache.unlock(holder, &key));
        assert!(cache.lock(other, &key, -1, &[]).unwrap());
        cache.unlock(other, &key);
    }

    #[test]
    fn lock_filter_rejection_releases() {
        let cache = engine();
        let ctx = CtxId::next();
        let key = Key::new("a");

        // Filter requires a value the key does not have
        assert!(!cache.lock(ctx, &key, 0, &[Filter::has_value()]).unwrap());
        assert!(!cache.is_locked(&key));
    }

    #[test]
    fn unavailable_partition_fails_ops() {
        let cache = engine();
        let ctx = CtxId::next();
        let key = Key::new("lost-key");

        let topo = cache.inner().router.snapshot();
        let partition = partition_for(&key, topo.partition_count());
        cache.install_topology(
            TopologySnapshot::single_node(topo.local, topo.partition_count())
                .with_state(partition, PartitionState::Lost),
        );

        assert!(matches!(
            cache.get(ctx, &key).unwrap_err(),
            CacheError::PartitionUnavailable { .. }
        ));
        assert!(matches!(
            cache.putx(ctx, &key, Value::I64(1), &[]).unwrap_err(),
            CacheError::PartitionUnavailable { .. }
        ));
    }

    #[test]
    fn async_siblings_deliver_through_handles() {
        let cache = engine();
        let ctx = CtxId::next();
        let key = Key::new("async");

        cache
            .put_async(ctx, key.clone(), Value::I64(1))
            .wait()
            .unwrap();
        assert_eq!(
            cache.get_async(ctx, key.clone()).wait().unwrap(),
            Some(Value::I64(1))
        );
        assert_eq!(
            cache.remove_async(ctx, key.clone()).wait().unwrap(),
            Some(Value::I64(1))
        );
        assert_eq!(cache.get(ctx, &key).unwrap(), None);
    }

    #[test]
    fn ttl_entries_expire() {
        let cache = engine();
        let ctx = CtxId::next();
        let key = Key::new("ephemeral");

        cache
            .putx_ttl(ctx, &key, Value::I64(1), Duration::from_millis(10), &[])
            .unwrap();
        assert_eq!(cache.get(ctx, &key).unwrap(), Some(Value::I64(1)));
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(cache.get(ctx, &key).unwrap(), None);
    }

    #[test]
    fn sizes_track_residency() {
        let mut config = CacheConfig::for_testing();
        config.max_memory_entries = 4;
        let cache = CacheEngine::new(config).unwrap();
        let ctx = CtxId::next();

        for i in 0..8 {
            cache
                .putx(ctx, &Key::new(format!("k{i}")), Value::I64(i), &[])
                .unwrap();
        }
        assert_eq!(cache.size(), 8);
        assert!(cache.memory_size() <= 4);
        assert_eq!(cache.memory_size() + cache.swap_size(), 8);
        assert_eq!(cache.local_size(&[PeekMode::Near]), cache.memory_size());
        assert_eq!(cache.local_size(&[PeekMode::Swap]), cache.swap_size());
        // Single node: everything is primary
        assert_eq!(cache.primary_size(), 8);
        assert_eq!(cache.global_size(), 8);
        assert_eq!(cache.global_primary_size(), 8);
    }

    #[test]
    fn evict_and_promote_preserve_values() {
        let cache = engine();
        let ctx = CtxId::next();
        let key = Key::new("cold");

        cache.putx(ctx, &key, Value::String("v".into()), &[]).unwrap();
        assert!(cache.evict(&key).unwrap());
        assert_eq!(cache.peek(&key), None);
        assert_eq!(
            cache.peek_modes(&key, &[PeekMode::Swap]).unwrap(),
            Some(Value::String("v".into()))
        );
        assert_eq!(
            cache.promote(&key).unwrap(),
            Some(Value::String("v".into()))
        );
        assert_eq!(cache.peek(&key), Some(Value::String("v".into())));
    }

    #[test]
    fn locked_key_refuses_eviction() {
        let cache = engine();
        let ctx = CtxId::next();
        let key = Key::new("pinned");

        cache.putx(ctx, &key, Value::I64(1), &[]).unwrap();
        assert!(cache.lock(ctx, &key, 0, &[]).unwrap());
        assert!(!cache.evict(&key).unwrap());
        cache.unlock(ctx, &key);
        assert!(cache.evict(&key).unwrap());
    }

    #[test]
    fn clear_drops_local_and_backups() {
        let (cache, replicator) =
            CacheEngine::with_local_replication(CacheConfig::for_testing(), None).unwrap();
        let ctx = CtxId::next();
        for i in 0..4 {
            cache
                .putx(ctx, &Key::new(format!("k{i}")), Value::I64(i), &[])
                .unwrap();
        }
        assert_eq!(replicator.len(), 4);

        cache.clear(ctx).unwrap();
        assert_eq!(cache.size(), 0);
        assert!(replicator.is_empty());
    }

    #[test]
    fn transactional_ops_reach_storage_at_commit() {
        let cache = engine();
        let ctx = CtxId::next();
        let outside = CtxId::next();
        let key = Key::new("txn");

        cache
            .tx_start(
                ctx,
                TxConcurrency::Pessimistic,
                TxIsolation::RepeatableRead,
                None,
                0,
            )
            .unwrap();
        cache.putx(ctx, &key, Value::I64(1), &[]).unwrap();
        assert_eq!(cache.get(outside, &key).unwrap(), None);
        assert_eq!(cache.get(ctx, &key).unwrap(), Some(Value::I64(1)));

        cache.tx_commit(ctx).unwrap();
        assert_eq!(cache.get(outside, &key).unwrap(), Some(Value::I64(1)));
        assert!(cache.current_tx(ctx).is_none());
    }
}

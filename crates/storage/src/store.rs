//! Partition-sharded entry store with a tiered fall-through path
//!
//! `CacheStorage` composes the in-memory entry table, the swap space, the
//! expiry index, the eviction policy and the optional store bridge into the
//! single storage object the engine mutates.
//!
//! # Atomicity
//!
//! Each partition is one shard guarded by a mutex. Filter evaluation and the
//! mutation it guards run under the same shard guard, so no operation can
//! interleave between check and write on the same key.
//!
//! # Store bridge and guards
//!
//! Plain read-through on a miss drops the shard guard for the duration of
//! the bridge call and re-checks on re-acquire, so slow store loads do not
//! block unrelated keys in the partition. The one exception is a mutation on
//! an `Evicted` entry: its synchronous reload runs under the guard, because
//! the reloaded value feeds the filter evaluation that must stay atomic with
//! the mutation.

use crate::eviction::EvictionPolicy;
use crate::expiry::ExpiryIndex;
use crate::swap::SwapSpace;
use gridcache_core::{
    eval_all, partition_for, BridgeError, CacheConfig, CacheError, Entry, Filter, Key,
    PartitionId, Residency, Result, StoreBridge, TxId, Value,
};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

type Shard = Mutex<FxHashMap<Key, Entry>>;

/// Result of a put-shaped mutation
#[derive(Debug)]
pub struct PutOutcome {
    /// Whether the mutation was applied (false = a filter rejected it)
    pub applied: bool,
    /// Previous value, when requested and present
    pub previous: Option<Value>,
    /// Entry version after the mutation (0 when not applied)
    pub version: u64,
    /// Write-through failure, if any; the in-memory mutation stands
    pub store_error: Option<BridgeError>,
}

impl PutOutcome {
    fn rejected() -> Self {
        Self {
            applied: false,
            previous: None,
            version: 0,
            store_error: None,
        }
    }
}

/// Result of a remove-shaped mutation
#[derive(Debug)]
pub struct RemoveOutcome {
    /// Whether an entry was removed
    pub applied: bool,
    /// Removed value, when requested
    pub previous: Option<Value>,
    /// Tombstone version (removed entry's version + 1; 0 when not applied)
    pub version: u64,
    /// Write-through failure, if any; the in-memory removal stands
    pub store_error: Option<BridgeError>,
}

impl RemoveOutcome {
    fn rejected() -> Self {
        Self {
            applied: false,
            previous: None,
            version: 0,
            store_error: None,
        }
    }
}

/// The storage tier stack: entry table + swap + expiry + bridge
pub struct CacheStorage {
    shards: Vec<Shard>,
    partition_count: u16,
    swap: SwapSpace,
    policy: Box<dyn EvictionPolicy>,
    bridge: Option<Arc<dyn StoreBridge>>,
    expiry: Mutex<ExpiryIndex>,
    /// Entries whose payload is currently in memory
    resident: AtomicUsize,
    max_memory_entries: usize,
    read_through: bool,
    write_through: bool,
}

impl CacheStorage {
    /// Build storage from config, an optional bridge and an eviction policy
    pub fn new(
        config: &CacheConfig,
        bridge: Option<Arc<dyn StoreBridge>>,
        policy: Box<dyn EvictionPolicy>,
    ) -> Result<Self> {
        let swap = SwapSpace::new(config.max_swap_entries, config.swap_dir.clone())?;
        let shards = (0..config.partition_count)
            .map(|_| Mutex::new(FxHashMap::default()))
            .collect();
        Ok(Self {
            shards,
            partition_count: config.partition_count,
            swap,
            policy,
            bridge,
            expiry: Mutex::new(ExpiryIndex::new()),
            resident: AtomicUsize::new(0),
            max_memory_entries: config.max_memory_entries,
            read_through: config.read_through,
            write_through: config.write_through,
        })
    }

    fn shard(&self, key: &Key) -> (&Shard, PartitionId) {
        let partition = partition_for(key, self.partition_count);
        (&self.shards[partition.0 as usize], partition)
    }

    // === Reads ===

    /// Read a value, promoting from swap and loading through on a miss
    pub fn get(&self, key: &Key, skip_store: bool) -> Result<Option<Value>> {
        Ok(self.get_versioned(key, skip_store)?.map(|(v, _)| v))
    }

    /// Read a value together with its current version
    ///
    /// Swapped payloads are promoted back into memory. On a miss (or an
    /// `Evicted` entry) the store bridge is consulted if read-through is on;
    /// the loaded value is installed so the next read is memory-resident.
    pub fn get_versioned(&self, key: &Key, skip_store: bool) -> Result<Option<(Value, u64)>> {
        let (shard, partition) = self.shard(key);
        let mut guard = shard.lock();
        self.purge_if_expired_locked(&mut guard, key);

        if let Some(entry) = guard.get_mut(key) {
            match entry.residency {
                Residency::InMemory => {
                    let value = entry.value().cloned().expect("resident entry has payload");
                    let version = entry.version;
                    self.policy.note_touch(key);
                    return Ok(Some((value, version)));
                }
                Residency::Swapped | Residency::OnDisk => {
                    if let Some(value) = self.swap.take(key)? {
                        entry.promote(value.clone());
                        let version = entry.version;
                        self.resident.fetch_add(1, Ordering::Relaxed);
                        self.policy.note_touch(key);
                        return Ok(Some((value, version)));
                    }
                    // Swap record lost; fall through to the store bridge
                    entry.residency = Residency::Evicted;
                }
                Residency::Evicted => {}
            }
        }

        if skip_store || !self.read_through {
            return Ok(None);
        }
        let Some(bridge) = self.bridge.clone() else {
            return Ok(None);
        };

        // Load outside the guard so slow stores don't block the partition
        drop(guard);
        let loaded = bridge
            .load(key)
            .map_err(|e| CacheError::read_through(e.to_string()))?;
        let Some(value) = loaded else {
            return Ok(None);
        };

        let mut guard = shard.lock();
        let version = match guard.get_mut(key) {
            Some(entry) if entry.is_resident() => {
                // Someone else installed a value while we were loading;
                // theirs wins.
                let value = entry.value().cloned().expect("resident entry has payload");
                let version = entry.version;
                self.policy.note_touch(key);
                return Ok(Some((value, version)));
            }
            Some(entry) => {
                entry.promote(value.clone());
                self.resident.fetch_add(1, Ordering::Relaxed);
                entry.version
            }
            None => {
                guard.insert(key.clone(), Entry::new(value.clone(), 1, partition, None));
                self.resident.fetch_add(1, Ordering::Relaxed);
                1
            }
        };
        self.policy.note_touch(key);
        Ok(Some((value, version)))
    }

    /// Inspect the in-memory value without promoting, loading or touching
    pub fn peek(&self, key: &Key) -> Option<Value> {
        let (shard, _) = self.shard(key);
        let guard = shard.lock();
        let entry = guard.get(key)?;
        if entry.is_expired(Instant::now()) {
            return None;
        }
        entry.value().cloned()
    }

    /// Inspect the swap space without promoting
    pub fn peek_swap(&self, key: &Key) -> Result<Option<Value>> {
        self.swap.fetch(key)
    }

    /// Resolve the value a filter should see for the key, without promoting
    ///
    /// Same resolution the mutation paths use: memory, a non-destructive
    /// swap read, or a synchronous bridge load for `Evicted` entries.
    pub fn current_value(&self, key: &Key, skip_store: bool) -> Result<Option<Value>> {
        let (shard, _) = self.shard(key);
        let mut guard = shard.lock();
        self.purge_if_expired_locked(&mut guard, key);
        self.current_value_locked(&guard, key, skip_store)
    }

    /// Residency, partition and version of an entry, if present
    pub fn entry_info(&self, key: &Key) -> Option<(Residency, PartitionId, u64)> {
        let (shard, _) = self.shard(key);
        let guard = shard.lock();
        guard
            .get(key)
            .filter(|e| !e.is_expired(Instant::now()))
            .map(|e| (e.residency, e.partition, e.version))
    }

    /// Current version of an entry, if present
    pub fn current_version(&self, key: &Key) -> Option<u64> {
        self.entry_info(key).map(|(_, _, v)| v)
    }

    /// Whether the key has a locally reachable payload (memory or swap)
    ///
    /// Never consults the store bridge.
    pub fn contains_key(&self, key: &Key) -> bool {
        matches!(
            self.entry_info(key),
            Some((Residency::InMemory | Residency::Swapped | Residency::OnDisk, _, _))
        )
    }

    /// Whether any resident entry currently holds `value`
    pub fn contains_value(&self, value: &Value) -> bool {
        let now = Instant::now();
        self.shards.iter().any(|shard| {
            shard
                .lock()
                .values()
                .any(|e| !e.is_expired(now) && e.value() == Some(value))
        })
    }

    // === Mutations ===

    /// Put a value, guarded by filters evaluated atomically with the write
    ///
    /// A rejected filter leaves the entry untouched, returns
    /// `applied: false` and performs no write-through. A mutation on a
    /// demoted entry first resolves the current value (swap read, or a
    /// synchronous bridge reload for `Evicted`) so the filters see the real
    /// current state.
    pub fn put(
        &self,
        key: &Key,
        value: Value,
        filters: &[Filter],
        ttl: Option<Duration>,
        skip_store: bool,
        want_previous: bool,
    ) -> Result<PutOutcome> {
        let (shard, partition) = self.shard(key);
        let mut guard = shard.lock();
        self.purge_if_expired_locked(&mut guard, key);

        let current = self.current_value_locked(&guard, key, skip_store)?;
        if !eval_all(filters, key, current.as_ref()) {
            return Ok(PutOutcome::rejected());
        }

        let version = self.apply_put_locked(&mut guard, key, partition, value.clone(), ttl);
        drop(guard);

        let store_error = self.write_through_put(key, &value, None, skip_store);
        Ok(PutOutcome {
            applied: true,
            previous: if want_previous { current } else { None },
            version,
            store_error,
        })
    }

    /// Remove an entry, guarded by filters
    ///
    /// Removing an absent key is a no-op that reports `applied: false`.
    pub fn remove(
        &self,
        key: &Key,
        filters: &[Filter],
        skip_store: bool,
        want_previous: bool,
    ) -> Result<RemoveOutcome> {
        let (shard, _) = self.shard(key);
        let mut guard = shard.lock();
        self.purge_if_expired_locked(&mut guard, key);

        if !guard.contains_key(key) {
            return Ok(RemoveOutcome::rejected());
        }
        let current = self.current_value_locked(&guard, key, skip_store)?;
        if !eval_all(filters, key, current.as_ref()) {
            return Ok(RemoveOutcome::rejected());
        }

        let entry = self
            .detach_locked(&mut guard, key)
            .expect("checked entry presence under guard");
        drop(guard);

        let store_error = self.write_through_remove(key, None, skip_store);
        Ok(RemoveOutcome {
            applied: true,
            previous: if want_previous { current } else { None },
            version: entry.version + 1,
            store_error,
        })
    }

    /// Atomic compare-and-set
    ///
    /// `expected: None` means the key must be absent; `new: None` removes.
    /// Returns whether the swap happened. A write-through failure after the
    /// in-memory apply surfaces as an error while the mutation stands.
    pub fn compare_and_set(
        &self,
        key: &Key,
        expected: Option<&Value>,
        new: Option<Value>,
        skip_store: bool,
    ) -> Result<bool> {
        let filter = match expected {
            Some(v) => Filter::value_equals(v.clone()),
            None => Filter::no_value(),
        };
        let (applied, store_error) = match new {
            Some(value) => {
                let out = self.put(key, value, &[filter], None, skip_store, false)?;
                (out.applied, out.store_error)
            }
            None => {
                let out = self.remove(key, &[filter], skip_store, false)?;
                (out.applied, out.store_error)
            }
        };
        if let Some(e) = store_error {
            return Err(CacheError::write_through(e.to_string()));
        }
        Ok(applied)
    }

    /// Apply a transaction's committed post-image for one key
    ///
    /// No filters: validation already happened at prepare time. `None`
    /// removes the key. Write-through carries the transaction id so the
    /// bridge can batch.
    pub fn apply_tx_write(
        &self,
        key: &Key,
        post: Option<Value>,
        tx: TxId,
        skip_store: bool,
    ) -> Result<(u64, Option<BridgeError>)> {
        let (shard, partition) = self.shard(key);
        let mut guard = shard.lock();
        self.purge_if_expired_locked(&mut guard, key);

        match post {
            Some(value) => {
                let version = self.apply_put_locked(&mut guard, key, partition, value.clone(), None);
                drop(guard);
                let store_error = self.write_through_put(key, &value, Some(tx), skip_store);
                Ok((version, store_error))
            }
            None => {
                let version = self
                    .detach_locked(&mut guard, key)
                    .map(|e| e.version + 1)
                    .unwrap_or(0);
                drop(guard);
                let store_error = self.write_through_remove(key, Some(tx), skip_store);
                Ok((version, store_error))
            }
        }
    }

    /// Force a fresh load from the store bridge, replacing the cached value
    ///
    /// An absent store value removes the local entry. No write-through: the
    /// value just came from the store.
    pub fn reload(&self, key: &Key) -> Result<Option<Value>> {
        let Some(bridge) = self.bridge.clone() else {
            return Ok(None);
        };
        let loaded = bridge
            .load(key)
            .map_err(|e| CacheError::read_through(e.to_string()))?;

        let (shard, partition) = self.shard(key);
        let mut guard = shard.lock();
        match loaded {
            Some(value) => {
                self.apply_put_locked(&mut guard, key, partition, value.clone(), None);
                Ok(Some(value))
            }
            None => {
                self.detach_locked(&mut guard, key);
                Ok(None)
            }
        }
    }

    // === Eviction / swap ===

    /// Demote an entry out of memory
    ///
    /// Returns false when the entry is absent, not resident, or reported in
    /// use (locked or enlisted). With `use_swap` the payload lands in the
    /// swap space; otherwise the entry becomes `Evicted` when the store
    /// bridge can reload it later, or is destroyed when nothing below memory
    /// could hold it.
    pub fn evict(&self, key: &Key, use_swap: bool, in_use: &dyn Fn(&Key) -> bool) -> Result<bool> {
        if in_use(key) {
            return Ok(false);
        }
        let (shard, _) = self.shard(key);
        let mut guard = shard.lock();
        if !guard.get(key).is_some_and(Entry::is_resident) {
            return Ok(false);
        }

        if use_swap {
            let value = guard
                .get(key)
                .and_then(Entry::value)
                .cloned()
                .expect("resident entry has payload");
            // Persist to swap before dropping the in-memory payload
            let residency = self.swap.store(key, &value)?;
            if let Some(entry) = guard.get_mut(key) {
                entry.demote(residency);
            }
            self.resident.fetch_sub(1, Ordering::Relaxed);
            self.policy.note_remove(key);
        } else if self.bridge.is_some() && self.write_through {
            if let Some(entry) = guard.get_mut(key) {
                entry.demote(Residency::Evicted);
            }
            self.resident.fetch_sub(1, Ordering::Relaxed);
            self.policy.note_remove(key);
        } else {
            // No tier below memory can hold the payload: destroy
            self.detach_locked(&mut guard, key);
        }
        tracing::debug!(key = %key, "evicted entry from memory");
        Ok(true)
    }

    /// Promote a demoted entry's payload back into memory
    ///
    /// Swapped payloads come from the swap space; `Evicted` entries reload
    /// through the store bridge. Promotion does not bump the version.
    pub fn promote(&self, key: &Key) -> Result<Option<Value>> {
        let (shard, _) = self.shard(key);
        let mut guard = shard.lock();
        let Some(entry) = guard.get_mut(key) else {
            return Ok(None);
        };
        match entry.residency {
            Residency::InMemory => Ok(entry.value().cloned()),
            Residency::Swapped | Residency::OnDisk => {
                let Some(value) = self.swap.take(key)? else {
                    return Ok(None);
                };
                entry.promote(value.clone());
                self.resident.fetch_add(1, Ordering::Relaxed);
                self.policy.note_touch(key);
                Ok(Some(value))
            }
            Residency::Evicted => {
                let Some(bridge) = self.bridge.clone() else {
                    return Ok(None);
                };
                let loaded = bridge
                    .load(key)
                    .map_err(|e| CacheError::read_through(e.to_string()))?;
                let Some(value) = loaded else {
                    return Ok(None);
                };
                entry.promote(value.clone());
                self.resident.fetch_add(1, Ordering::Relaxed);
                self.policy.note_touch(key);
                Ok(Some(value))
            }
        }
    }

    /// Demote LRU victims until the memory ceiling is respected
    ///
    /// Returns the number of entries demoted. Stops early when no victim is
    /// available (everything in use).
    pub fn enforce_memory_ceiling(&self, in_use: &dyn Fn(&Key) -> bool) -> Result<usize> {
        let mut demoted = 0;
        while self.resident_len() > self.max_memory_entries {
            let Some(victim) = self.policy.victim(in_use) else {
                break;
            };
            if self.evict(&victim, true, in_use)? {
                demoted += 1;
            } else {
                // Stale policy entry; drop it so we don't spin
                self.policy.note_remove(&victim);
            }
        }
        if demoted > 0 {
            tracing::debug!(count = demoted, "memory ceiling enforcement demoted entries");
        }
        Ok(demoted)
    }

    // === Expiry ===

    /// Remove every entry whose TTL has passed; returns the purge count
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let expired = self.expiry.lock().drain_expired(now);
        let mut purged = 0;
        for key in expired {
            let (shard, _) = self.shard(&key);
            let mut guard = shard.lock();
            // The deadline index is advisory; re-check before purging
            let really_expired = guard.get(&key).is_some_and(|e| e.is_expired(now));
            if really_expired {
                self.detach_locked(&mut guard, &key);
                purged += 1;
            }
        }
        if purged > 0 {
            tracing::debug!(count = purged, "purged expired entries");
        }
        purged
    }

    // === Bulk / sizing ===

    /// Drop all local state: entries, swap, expiry index, policy history
    ///
    /// Never calls the store bridge.
    pub fn clear_local(&self) {
        for shard in &self.shards {
            shard.lock().clear();
        }
        self.swap.clear();
        self.expiry.lock().clear();
        self.resident.store(0, Ordering::Relaxed);
        self.policy.reset();
    }

    /// Total entries in the table (all residencies)
    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.lock().len()).sum()
    }

    /// Whether the table is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Entries whose payload is in memory
    pub fn resident_len(&self) -> usize {
        self.resident.load(Ordering::Relaxed)
    }

    /// Payloads currently held by the swap space
    pub fn swapped_len(&self) -> usize {
        self.swap.len()
    }

    /// Count entries matching a predicate (one shard locked at a time)
    pub fn count_matching(&self, pred: &dyn Fn(&Key, &Entry) -> bool) -> usize {
        let now = Instant::now();
        self.shards
            .iter()
            .map(|shard| {
                shard
                    .lock()
                    .iter()
                    .filter(|(k, e)| !e.is_expired(now) && pred(k, e))
                    .count()
            })
            .sum()
    }

    /// Snapshot of all live keys
    pub fn collect_keys(&self) -> Vec<Key> {
        let now = Instant::now();
        let mut keys = Vec::new();
        for shard in &self.shards {
            let guard = shard.lock();
            keys.extend(
                guard
                    .iter()
                    .filter(|(_, e)| !e.is_expired(now))
                    .map(|(k, _)| k.clone()),
            );
        }
        keys
    }

    // === Internal helpers ===

    /// Resolve the key's current value for filter evaluation
    ///
    /// Resident: clone. Swapped: non-destructive swap read. Evicted: a
    /// synchronous bridge reload under the guard, because the value feeds a
    /// filter that must stay atomic with the following mutation.
    fn current_value_locked(
        &self,
        guard: &FxHashMap<Key, Entry>,
        key: &Key,
        skip_store: bool,
    ) -> Result<Option<Value>> {
        let Some(entry) = guard.get(key) else {
            return Ok(None);
        };
        match entry.residency {
            Residency::InMemory => Ok(entry.value().cloned()),
            Residency::Swapped | Residency::OnDisk => self.swap.fetch(key),
            Residency::Evicted => {
                if skip_store || !self.read_through {
                    return Ok(None);
                }
                let Some(bridge) = &self.bridge else {
                    return Ok(None);
                };
                bridge
                    .load(key)
                    .map_err(|e| CacheError::read_through(e.to_string()))
            }
        }
    }

    /// Write or overwrite an entry under the guard; returns the new version
    fn apply_put_locked(
        &self,
        guard: &mut FxHashMap<Key, Entry>,
        key: &Key,
        partition: PartitionId,
        value: Value,
        ttl: Option<Duration>,
    ) -> u64 {
        let version = match guard.get_mut(key) {
            Some(entry) => {
                if let Some(deadline) = entry.expires_at {
                    self.expiry.lock().remove(deadline, key);
                }
                let was_resident = entry.is_resident();
                entry.mutate(value, ttl);
                if !was_resident {
                    self.resident.fetch_add(1, Ordering::Relaxed);
                    // Overwritten payload may still sit in the swap space
                    let _ = self.swap.remove(key);
                }
                entry.version
            }
            None => {
                guard.insert(key.clone(), Entry::new(value, 1, partition, ttl));
                self.resident.fetch_add(1, Ordering::Relaxed);
                1
            }
        };
        if let Some(deadline) = guard.get(key).and_then(|e| e.expires_at) {
            self.expiry.lock().insert(deadline, key.clone());
        }
        self.policy.note_touch(key);
        version
    }

    /// Remove an entry under the guard with full tier bookkeeping
    fn detach_locked(&self, guard: &mut FxHashMap<Key, Entry>, key: &Key) -> Option<Entry> {
        let entry = guard.remove(key)?;
        if let Some(deadline) = entry.expires_at {
            self.expiry.lock().remove(deadline, key);
        }
        if entry.is_resident() {
            self.resident.fetch_sub(1, Ordering::Relaxed);
        }
        let _ = self.swap.remove(key);
        self.policy.note_remove(key);
        Some(entry)
    }

    /// Lazily purge a single expired entry under the guard
    fn purge_if_expired_locked(&self, guard: &mut FxHashMap<Key, Entry>, key: &Key) {
        let expired = guard.get(key).is_some_and(|e| e.is_expired(Instant::now()));
        if expired {
            self.detach_locked(guard, key);
        }
    }

    fn write_through_put(
        &self,
        key: &Key,
        value: &Value,
        tx: Option<TxId>,
        skip_store: bool,
    ) -> Option<BridgeError> {
        if skip_store || !self.write_through {
            return None;
        }
        let err = self.bridge.as_ref()?.put(key, value, tx).err()?;
        tracing::error!(key = %key, error = %err, "write-through put failed; in-memory state kept");
        Some(err)
    }

    fn write_through_remove(
        &self,
        key: &Key,
        tx: Option<TxId>,
        skip_store: bool,
    ) -> Option<BridgeError> {
        if skip_store || !self.write_through {
            return None;
        }
        let err = self.bridge.as_ref()?.remove(key, tx).err()?;
        tracing::error!(key = %key, error = %err, "write-through remove failed; in-memory state kept");
        Some(err)
    }
}

//! Per-key reentrant locks with FIFO fairness
//!
//! # Design
//!
//! Each contended key gets one [`KeyLock`]: a parking_lot mutex over the
//! owner state plus a condvar for waiters. Waiters draw a ticket on arrival
//! and acquire strictly in ticket order, so a stream of short lock holds
//! cannot starve an early waiter.
//!
//! Owners are [`LockOwner`] values, not threads: an explicit lock taken by a
//! caller context and a lock taken on behalf of a transaction are the same
//! kind of hold, which lets transactions and explicit `lock()` calls contend
//! through one mechanism.
//!
//! # Timeout encoding
//!
//! `timeout_ms` follows the cache-wide convention: positive waits that many
//! milliseconds, `0` waits forever, negative fails immediately if the lock
//! is not free.

use dashmap::DashMap;
use gridcache_core::{CacheError, Key, LockOwner, Result};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

struct LockState {
    owner: Option<LockOwner>,
    /// Reentrant hold depth of the current owner
    holds: u32,
    /// Tickets of parked waiters, in arrival order
    queue: VecDeque<u64>,
    next_ticket: u64,
}

/// One key's lock: owner state plus a condvar for parked waiters
struct KeyLock {
    state: Mutex<LockState>,
    cond: Condvar,
}

impl KeyLock {
    fn new() -> Self {
        Self {
            state: Mutex::new(LockState {
                owner: None,
                holds: 0,
                queue: VecDeque::new(),
                next_ticket: 0,
            }),
            cond: Condvar::new(),
        }
    }
}

/// Registry of per-key locks
///
/// Explicit lock operations and transaction-held locks both go through this
/// manager; eviction asks it whether a key is in use.
pub struct LockManager {
    locks: DashMap<Key, Arc<KeyLock>>,
}

impl LockManager {
    /// Create an empty lock manager
    pub fn new() -> Self {
        Self {
            locks: DashMap::new(),
        }
    }

    fn key_lock(&self, key: &Key) -> Arc<KeyLock> {
        self.locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(KeyLock::new()))
            .clone()
    }

    /// Drop a key's lock record if nothing references it anymore
    ///
    /// Holders keep no `Arc` handle of their own, so the strong count alone
    /// cannot prove the lock is idle; the state must also show no owner and
    /// no queued waiters.
    fn reap(&self, key: &Key) {
        self.locks.remove_if(key, |_, lock| {
            if Arc::strong_count(lock) != 1 {
                return false;
            }
            let state = lock.state.lock();
            state.owner.is_none() && state.queue.is_empty()
        });
    }

    /// Acquire a key's lock for `owner`
    ///
    /// Reentrant: an owner that already holds the lock acquires again
    /// immediately and must unlock once per acquire. Waiters acquire in FIFO
    /// order.
    ///
    /// # Errors
    ///
    /// [`CacheError::LockTimeout`] when the wait budget runs out, or
    /// immediately for a negative `timeout_ms` on a held lock.
    pub fn lock(&self, key: &Key, owner: LockOwner, timeout_ms: i64) -> Result<()> {
        let lock = self.key_lock(key);
        let deadline = if timeout_ms > 0 {
            Some(Instant::now() + Duration::from_millis(timeout_ms as u64))
        } else {
            None
        };

        let mut state = lock.state.lock();
        if state.owner == Some(owner) {
            state.holds += 1;
            return Ok(());
        }
        if state.owner.is_none() && state.queue.is_empty() {
            state.owner = Some(owner);
            state.holds = 1;
            return Ok(());
        }
        if timeout_ms < 0 {
            return Err(CacheError::LockTimeout {
                key: key.clone(),
                timeout_ms,
            });
        }

        let ticket = state.next_ticket;
        state.next_ticket += 1;
        state.queue.push_back(ticket);

        loop {
            if state.owner.is_none() && state.queue.front() == Some(&ticket) {
                state.queue.pop_front();
                state.owner = Some(owner);
                state.holds = 1;
                return Ok(());
            }
            match deadline {
                Some(deadline) => {
                    if lock.cond.wait_until(&mut state, deadline).timed_out() {
                        state.queue.retain(|t| *t != ticket);
                        // Our turn may have arrived while we timed out
                        lock.cond.notify_all();
                        drop(state);
                        drop(lock);
                        self.reap(key);
                        return Err(CacheError::LockTimeout {
                            key: key.clone(),
                            timeout_ms,
                        });
                    }
                }
                None => lock.cond.wait(&mut state),
            }
        }
    }

    /// Acquire without waiting; returns whether the lock was taken
    pub fn try_lock(&self, key: &Key, owner: LockOwner) -> bool {
        self.lock(key, owner, -1).is_ok()
    }

    /// Acquire several keys atomically, in canonical key order
    ///
    /// All-or-nothing: a timeout on any key releases every lock this call
    /// already took before the error is returned. Acquiring in sorted order
    /// makes concurrent `lock_all` calls deadlock-free against each other.
    pub fn lock_all<'a, I>(&self, keys: I, owner: LockOwner, timeout_ms: i64) -> Result<()>
    where
        I: IntoIterator<Item = &'a Key>,
    {
        let mut sorted: Vec<&Key> = keys.into_iter().collect();
        sorted.sort();
        sorted.dedup();

        let started = Instant::now();
        let mut acquired: Vec<&Key> = Vec::with_capacity(sorted.len());
        for key in sorted {
            let remaining = remaining_budget(timeout_ms, started);
            let result = match remaining {
                Some(ms) => self.lock(key, owner, ms),
                None => Err(CacheError::LockTimeout {
                    key: key.clone(),
                    timeout_ms,
                }),
            };
            if let Err(e) = result {
                for held in acquired {
                    self.unlock(held, owner);
                }
                return Err(e);
            }
            acquired.push(key);
        }
        Ok(())
    }

    /// Release one hold on a key
    ///
    /// Returns whether a hold was released. Unlocking a key the owner does
    /// not hold is a no-op, matching how unlock behaves for already-released
    /// or never-acquired locks.
    pub fn unlock(&self, key: &Key, owner: LockOwner) -> bool {
        let Some(lock) = self.locks.get(key).map(|l| l.clone()) else {
            return false;
        };
        let mut state = lock.state.lock();
        if state.owner != Some(owner) {
            return false;
        }
        state.holds -= 1;
        if state.holds == 0 {
            state.owner = None;
            lock.cond.notify_all();
        }
        drop(state);
        drop(lock);
        self.reap(key);
        true
    }

    /// Release one hold on each key, ignoring keys the owner does not hold
    pub fn unlock_all<'a, I>(&self, keys: I, owner: LockOwner)
    where
        I: IntoIterator<Item = &'a Key>,
    {
        for key in keys {
            self.unlock(key, owner);
        }
    }

    /// Whether any owner currently holds the key
    pub fn is_locked(&self, key: &Key) -> bool {
        self.locks
            .get(key)
            .is_some_and(|lock| lock.state.lock().owner.is_some())
    }

    /// Whether this specific owner holds the key
    pub fn is_locked_by(&self, key: &Key, owner: LockOwner) -> bool {
        self.locks
            .get(key)
            .is_some_and(|lock| lock.state.lock().owner == Some(owner))
    }

    /// Whether the key is held or has waiters (eviction guard)
    pub fn is_in_use(&self, key: &Key) -> bool {
        self.locks.get(key).is_some_and(|lock| {
            let state = lock.state.lock();
            state.owner.is_some() || !state.queue.is_empty()
        })
    }

    /// Release every hold of `owner` across all keys
    ///
    /// Used when an owner disappears without unlocking (forced transaction
    /// rollback, context teardown).
    pub fn release_owner(&self, owner: LockOwner) {
        let mut released: Vec<Key> = Vec::new();
        for item in self.locks.iter() {
            let mut state = item.value().state.lock();
            if state.owner == Some(owner) {
                state.owner = None;
                state.holds = 0;
                item.value().cond.notify_all();
                released.push(item.key().clone());
            }
        }
        for key in &released {
            self.reap(key);
        }
        if !released.is_empty() {
            tracing::debug!(owner = ?owner, count = released.len(), "released abandoned locks");
        }
    }
}

impl Default for LockManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Remaining wait budget for a multi-key acquire
///
/// `Some(ms)` keeps the caller's encoding (0 = infinite, negative = try);
/// `None` means a positive budget has been exhausted.
fn remaining_budget(timeout_ms: i64, started: Instant) -> Option<i64> {
    if timeout_ms <= 0 {
        return Some(timeout_ms);
    }
    let spent = started.elapsed().as_millis() as i64;
    let left = timeout_ms - spent;
    if left > 0 {
        Some(left)
    } else {
        None
    }
}

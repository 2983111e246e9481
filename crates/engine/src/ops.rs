//! Async operation engine: completion handles over a worker pool
//!
//! Every async cache operation is a closure submitted to a fixed pool of
//! worker threads; the caller gets an [`OpHandle`] to wait on. Sync
//! operations are the same closures run inline, so both paths share one
//! implementation.
//!
//! # Cancellation
//!
//! `cancel()` succeeds only while the operation is still queued. Once a
//! worker has picked the closure up the mutation may already be applying, so
//! cancellation is refused and the result is delivered normally. A
//! cancelled handle resolves to [`CacheError::Cancelled`].

use gridcache_core::{CacheError, Result};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

struct HandleState<T> {
    result: Option<Result<T>>,
    done: bool,
    cancelled: bool,
    /// Set once a worker has claimed the operation; cancel fails after this
    claimed: bool,
}

struct HandleShared<T> {
    state: Mutex<HandleState<T>>,
    cond: Condvar,
}

/// Completion handle for one asynchronous operation
pub struct OpHandle<T> {
    shared: Arc<HandleShared<T>>,
}

impl<T> OpHandle<T> {
    fn new() -> Self {
        Self {
            shared: Arc::new(HandleShared {
                state: Mutex::new(HandleState {
                    result: None,
                    done: false,
                    cancelled: false,
                    claimed: false,
                }),
                cond: Condvar::new(),
            }),
        }
    }

    /// Handle that is already complete (inline execution path)
    pub fn ready(result: Result<T>) -> Self {
        let handle = Self::new();
        {
            let mut state = handle.shared.state.lock();
            state.result = Some(result);
            state.done = true;
            state.claimed = true;
        }
        handle
    }

    /// Block until the operation completes and take its result
    pub fn wait(self) -> Result<T> {
        let mut state = self.shared.state.lock();
        while !state.done {
            self.shared.cond.wait(&mut state);
        }
        state
            .result
            .take()
            .unwrap_or(Err(CacheError::Cancelled))
    }

    /// Block up to `timeout`; `None` means still pending
    pub fn wait_for(&self, timeout: Duration) -> Option<Result<T>> {
        let mut state = self.shared.state.lock();
        if !state.done {
            self.shared.cond.wait_for(&mut state, timeout);
        }
        if state.done {
            state.result.take()
        } else {
            None
        }
    }

    /// Take the result if already complete, without blocking
    pub fn try_get(&self) -> Option<Result<T>> {
        let mut state = self.shared.state.lock();
        if state.done {
            state.result.take()
        } else {
            None
        }
    }

    /// Whether the operation has completed (or been cancelled)
    pub fn is_done(&self) -> bool {
        self.shared.state.lock().done
    }

    /// Cancel if still queued; returns whether cancellation took effect
    pub fn cancel(&self) -> bool {
        let mut state = self.shared.state.lock();
        if state.done || state.claimed {
            return false;
        }
        state.cancelled = true;
        state.done = true;
        state.result = Some(Err(CacheError::Cancelled));
        self.shared.cond.notify_all();
        true
    }
}

impl<T> HandleShared<T> {
    /// Worker-side claim; false when the handle was cancelled while queued
    fn claim(&self) -> bool {
        let mut state = self.state.lock();
        if state.cancelled {
            return false;
        }
        state.claimed = true;
        true
    }

    fn complete(&self, result: Result<T>) {
        let mut state = self.state.lock();
        state.result = Some(result);
        state.done = true;
        self.cond.notify_all();
    }
}

type Task = Box<dyn FnOnce() + Send>;

struct ExecutorInner {
    queue: Mutex<VecDeque<Task>>,
    work_ready: Condvar,
    shutdown: AtomicBool,
}

/// Fixed worker pool executing cache operations
///
/// Workers park on a condvar over the task queue and drain it in FIFO
/// order. Per-key ordering guarantees come from the lock and entry layers,
/// not from the queue.
pub struct OpExecutor {
    inner: Arc<ExecutorInner>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl OpExecutor {
    /// Create a pool with `threads` workers; `0` uses available parallelism
    pub fn new(threads: usize) -> Self {
        let threads = if threads == 0 {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4)
        } else {
            threads
        };
        let inner = Arc::new(ExecutorInner {
            queue: Mutex::new(VecDeque::new()),
            work_ready: Condvar::new(),
            shutdown: AtomicBool::new(false),
        });
        let workers = (0..threads)
            .map(|i| {
                let inner = inner.clone();
                std::thread::Builder::new()
                    .name(format!("gridcache-op-{i}"))
                    .spawn(move || worker_loop(&inner))
                    .unwrap_or_else(|e| panic!("failed to spawn op worker: {e}"))
            })
            .collect();
        Self {
            inner,
            workers: Mutex::new(workers),
        }
    }

    /// Submit an operation, receiving its completion handle
    pub fn submit<T, F>(&self, op: F) -> OpHandle<T>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T> + Send + 'static,
    {
        let handle = OpHandle::new();
        let shared = handle.shared.clone();
        let task: Task = Box::new(move || {
            if !shared.claim() {
                // Cancelled while queued; the handle already resolved
                return;
            }
            shared.complete(op());
        });
        {
            let mut queue = self.inner.queue.lock();
            queue.push_back(task);
        }
        self.inner.work_ready.notify_one();
        handle
    }

    /// Stop accepting work and join the workers; queued tasks are dropped
    pub fn shutdown(&self) {
        self.inner.shutdown.store(true, Ordering::SeqCst);
        self.inner.work_ready.notify_all();
        let mut workers = self.workers.lock();
        for handle in workers.drain(..) {
            if handle.join().is_err() {
                tracing::error!("op worker panicked during shutdown");
            }
        }
    }
}

impl Drop for OpExecutor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(inner: &ExecutorInner) {
    loop {
        let task = {
            let mut queue = inner.queue.lock();
            loop {
                if inner.shutdown.load(Ordering::SeqCst) {
                    return;
                }
                if let Some(task) = queue.pop_front() {
                    break task;
                }
                inner.work_ready.wait(&mut queue);
            }
        };
        task();
    }
}

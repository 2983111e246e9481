//! Engine configuration
//!
//! Plain structs with `Default` impls. There is no config-file layer; the
//! embedding application builds a `CacheConfig` and hands it to the engine.

use std::path::PathBuf;
use std::time::Duration;

/// Bounded local retry policy
///
/// Applied to retryable errors only (lock timeouts inside engine retry
/// paths, partition routing against a stale topology). Store and
/// transaction-state errors are never retried.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total attempts including the first
    pub max_attempts: u32,
    /// Pause between attempts
    pub backoff: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_millis(10),
        }
    }
}

/// Top-level engine configuration
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Number of partitions the keyspace is hashed into
    pub partition_count: u16,
    /// In-memory entry ceiling; exceeding it triggers eviction
    pub max_memory_entries: usize,
    /// Swap-space entry ceiling; overflow demotes to disk when a swap
    /// directory is configured
    pub max_swap_entries: usize,
    /// Directory for on-disk swap files; `None` disables the disk level
    pub swap_dir: Option<PathBuf>,
    /// Load from the store bridge on cache miss
    pub read_through: bool,
    /// Write to the store bridge after successful mutations
    pub write_through: bool,
    /// Deadline for the implicit per-operation lock, in ms
    /// (0 = wait indefinitely, negative = fail immediately)
    pub default_lock_timeout_ms: i64,
    /// Transaction timeout used when `tx_start` passes none
    pub default_tx_timeout: Duration,
    /// Async operation worker threads; 0 means available parallelism
    pub worker_threads: usize,
    /// Retry policy for retryable errors
    pub retry: RetryConfig,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            partition_count: 64,
            max_memory_entries: 100_000,
            max_swap_entries: 100_000,
            swap_dir: None,
            read_through: true,
            write_through: true,
            default_lock_timeout_ms: 30_000,
            default_tx_timeout: Duration::from_secs(60),
            worker_threads: 0,
            retry: RetryConfig::default(),
        }
    }
}

impl CacheConfig {
    /// Small-footprint config for tests: few partitions, tiny memory ceiling
    pub fn for_testing() -> Self {
        Self {
            partition_count: 8,
            max_memory_entries: 64,
            max_swap_entries: 64,
            ..Self::default()
        }
    }
}

//! Locking and transactions for GridCache
//!
//! # Design
//!
//! Two layers:
//!
//! - [`LockManager`] — per-key reentrant locks with FIFO fairness, owned by
//!   [`LockOwner`] values so explicit locks and transactional enlistments
//!   contend through one mechanism
//! - [`TransactionManager`] — per-context transactions with buffered
//!   post-images, pessimistic or optimistic lock discipline, and three
//!   isolation levels
//!
//! A transaction's writes only reach the entry store at commit; everything
//! before that is private buffer state, which makes rollback unconditional.
//!
//! [`LockOwner`]: gridcache_core::LockOwner

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod lock;
pub mod manager;
pub mod transaction;

pub use lock::LockManager;
pub use manager::TransactionManager;
pub use transaction::{Transaction, TxConcurrency, TxIsolation, TxState};

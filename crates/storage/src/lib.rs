//! Tiered storage for GridCache: memory, swap space and store bridge
//!
//! # Design
//!
//! The storage stack mirrors the cache's fall-through read path:
//!
//! 1. **Entry table** — partition-sharded `FxHashMap`s holding [`Entry`]
//!    metadata and memory-resident payloads
//! 2. **Swap space** — serialized payloads demoted out of memory, with an
//!    optional disk overflow level
//! 3. **Store bridge** — the user-supplied external store, reached through
//!    read-through and write-through
//!
//! [`CacheStorage`] is the composition the engine talks to; the other
//! modules are its parts.
//!
//! [`Entry`]: gridcache_core::Entry

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod eviction;
pub mod expiry;
pub mod store;
pub mod swap;

pub use eviction::{EvictionPolicy, LruPolicy};
pub use expiry::ExpiryIndex;
pub use store::{CacheStorage, PutOutcome, RemoveOutcome};
pub use swap::SwapSpace;

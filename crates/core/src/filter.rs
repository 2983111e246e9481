//! Atomic entry filters
//!
//! A filter is a predicate over a key and its current value, evaluated
//! atomically with the mutation it guards: no other operation can interleave
//! between the filter check and the write on the same key.
//!
//! The original variadic nullable-filter surface is replaced by an explicit,
//! possibly-empty ordered list combined as logical AND; the empty list is
//! vacuous truth.

use crate::types::{Key, Value};
use smallvec::SmallVec;
use std::fmt;
use std::sync::Arc;

/// A single entry predicate
///
/// Receives the key and the entry's current value (`None` when absent).
/// Filters must be cheap and side-effect free; they run under the entry's
/// shard guard.
#[derive(Clone)]
pub struct Filter {
    name: &'static str,
    pred: Arc<dyn Fn(&Key, Option<&Value>) -> bool + Send + Sync>,
}

impl Filter {
    /// Wrap a predicate closure
    pub fn new<F>(name: &'static str, pred: F) -> Self
    where
        F: Fn(&Key, Option<&Value>) -> bool + Send + Sync + 'static,
    {
        Self {
            name,
            pred: Arc::new(pred),
        }
    }

    /// Passes only when the entry currently has a value
    pub fn has_value() -> Self {
        Self::new("has-value", |_, v| v.is_some())
    }

    /// Passes only when the entry is currently absent
    pub fn no_value() -> Self {
        Self::new("no-value", |_, v| v.is_none())
    }

    /// Passes only when the current value equals `expected`
    pub fn value_equals(expected: Value) -> Self {
        Self::new("value-equals", move |_, v| v == Some(&expected))
    }

    /// Conjunction of two filters, keeping this filter's name
    pub fn and(self, other: Filter) -> Self {
        let name = self.name;
        Self::new(name, move |k, v| self.eval(k, v) && other.eval(k, v))
    }

    /// Evaluate against a key and its current value
    pub fn eval(&self, key: &Key, current: Option<&Value>) -> bool {
        (self.pred)(key, current)
    }
}

impl fmt::Debug for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Filter({})", self.name)
    }
}

/// Evaluate an ordered filter list as logical AND
///
/// The empty list passes (vacuous truth). Short-circuits on the first
/// rejection.
pub fn eval_all(filters: &[Filter], key: &Key, current: Option<&Value>) -> bool {
    filters.iter().all(|f| f.eval(key, current))
}

/// Small inline filter list
///
/// Most call sites pass zero or one filter; SmallVec avoids the allocation.
pub type FilterSet = SmallVec<[Filter; 2]>;

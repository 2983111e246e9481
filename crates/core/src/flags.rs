//! Projection flags
//!
//! A projection is a lightweight view of the cache carrying a set of flags
//! that restrict or redirect the operations issued through it. Violating a
//! restriction fails with `CacheError::FlagViolation`.

use std::fmt;

/// A single projection flag
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheFlag {
    /// Mutating operations are rejected
    ReadOnly,
    /// Read-through and write-through to the store bridge are skipped
    SkipStore,
    /// Swap demotion/promotion is skipped; evicting without persistence
    /// destroys the entry
    SkipSwap,
    /// Operations are restricted to locally-owned partitions
    Local,
}

/// Immutable set of projection flags
///
/// Small enough to be a bitset; flag sets are combined with `with`/`without`
/// when deriving one projection from another.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlagSet(u8);

impl FlagSet {
    const fn bit(flag: CacheFlag) -> u8 {
        match flag {
            CacheFlag::ReadOnly => 1 << 0,
            CacheFlag::SkipStore => 1 << 1,
            CacheFlag::SkipSwap => 1 << 2,
            CacheFlag::Local => 1 << 3,
        }
    }

    /// The empty flag set
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Set with the given flags raised
    pub fn from_flags(flags: &[CacheFlag]) -> Self {
        let mut set = Self::empty();
        for &f in flags {
            set = set.with(f);
        }
        set
    }

    /// Copy of this set with `flag` raised
    pub fn with(self, flag: CacheFlag) -> Self {
        Self(self.0 | Self::bit(flag))
    }

    /// Copy of this set with `flag` cleared
    pub fn without(self, flag: CacheFlag) -> Self {
        Self(self.0 & !Self::bit(flag))
    }

    /// Whether `flag` is raised
    pub fn contains(&self, flag: CacheFlag) -> bool {
        self.0 & Self::bit(flag) != 0
    }

    /// Whether no flags are raised
    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for FlagSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for flag in [
            CacheFlag::ReadOnly,
            CacheFlag::SkipStore,
            CacheFlag::SkipSwap,
            CacheFlag::Local,
        ] {
            if self.contains(flag) {
                if !first {
                    write!(f, "|")?;
                }
                write!(f, "{:?}", flag)?;
                first = false;
            }
        }
        if first {
            write!(f, "none")?;
        }
        Ok(())
    }
}

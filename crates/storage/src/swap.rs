//! Swap space: the demotion target for evicted payloads
//!
//! Two levels:
//! - memory level: bincode-encoded payloads in a DashMap (the "off-heap"
//!   stand-in; encoded form, not live values)
//! - disk level: one encoded file per key under the configured swap
//!   directory, used once the memory level hits its ceiling
//!
//! The swap space stores payloads only. The owning `Entry` stays in the
//! entry table with its residency marker, keeping version and partition
//! intact across a demote/promote round trip.

use dashmap::DashMap;
use gridcache_core::{Key, Residency, Result, Value};
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

/// Tiered swap store for demoted payloads
pub struct SwapSpace {
    /// Memory level: encoded payloads
    mem: DashMap<Key, Vec<u8>>,
    /// Disk level: key → swap file
    disk: DashMap<Key, PathBuf>,
    /// Swap directory; `None` disables the disk level
    dir: Option<PathBuf>,
    /// Memory-level entry ceiling before overflowing to disk
    max_mem: usize,
    /// Swap file name sequence
    seq: AtomicU64,
}

impl SwapSpace {
    /// Create a swap space
    ///
    /// Creates the swap directory if one is configured.
    pub fn new(max_mem: usize, dir: Option<PathBuf>) -> Result<Self> {
        if let Some(d) = &dir {
            fs::create_dir_all(d)?;
        }
        Ok(Self {
            mem: DashMap::new(),
            disk: DashMap::new(),
            dir,
            max_mem,
            seq: AtomicU64::new(0),
        })
    }

    /// Demote a payload into the swap space
    ///
    /// Returns the residency level the payload landed on. Overflows to disk
    /// only when the memory level is full and a directory is configured.
    pub fn store(&self, key: &Key, value: &Value) -> Result<Residency> {
        let encoded = bincode::serialize(value)?;

        if self.mem.len() >= self.max_mem {
            if let Some(dir) = &self.dir {
                let file = dir.join(format!("swap-{}.bin", self.seq.fetch_add(1, Ordering::Relaxed)));
                fs::write(&file, &encoded)?;
                self.disk.insert(key.clone(), file);
                return Ok(Residency::OnDisk);
            }
        }

        self.mem.insert(key.clone(), encoded);
        Ok(Residency::Swapped)
    }

    /// Read a payload back without removing it
    ///
    /// Used by swap-mode peeks.
    pub fn fetch(&self, key: &Key) -> Result<Option<Value>> {
        if let Some(encoded) = self.mem.get(key) {
            return Ok(Some(bincode::deserialize(&encoded)?));
        }
        if let Some(path) = self.disk.get(key) {
            let bytes = fs::read(path.value())?;
            return Ok(Some(bincode::deserialize(&bytes)?));
        }
        Ok(None)
    }

    /// Read a payload back and drop it from the swap space
    ///
    /// This is the promote path.
    pub fn take(&self, key: &Key) -> Result<Option<Value>> {
        if let Some((_, encoded)) = self.mem.remove(key) {
            return Ok(Some(bincode::deserialize(&encoded)?));
        }
        if let Some((_, path)) = self.disk.remove(key) {
            let bytes = fs::read(&path)?;
            fs::remove_file(&path)?;
            return Ok(Some(bincode::deserialize(&bytes)?));
        }
        Ok(None)
    }

    /// Drop a payload from both levels
    pub fn remove(&self, key: &Key) -> Result<()> {
        self.mem.remove(key);
        if let Some((_, path)) = self.disk.remove(key) {
            if let Err(e) = fs::remove_file(&path) {
                // The payload is already unreachable; a leaked file is not
                // a correctness problem.
                tracing::warn!(key = %key, error = %e, "failed to delete swap file");
            }
        }
        Ok(())
    }

    /// Whether the swap space holds a payload for `key`
    pub fn contains(&self, key: &Key) -> bool {
        self.mem.contains_key(key) || self.disk.contains_key(key)
    }

    /// Total payloads held, both levels
    pub fn len(&self) -> usize {
        self.mem.len() + self.disk.len()
    }

    /// Whether the swap space is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop everything, both levels
    pub fn clear(&self) {
        self.mem.clear();
        for item in self.disk.iter() {
            let _ = fs::remove_file(item.value());
        }
        self.disk.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn store_and_take_round_trip() {
        let swap = SwapSpace::new(16, None).unwrap();
        let key = Key::new("k");
        let residency = swap.store(&key, &Value::String("payload".into())).unwrap();
        assert_eq!(residency, Residency::Swapped);
        assert!(swap.contains(&key));

        let back = swap.take(&key).unwrap();
        assert_eq!(back, Some(Value::String("payload".into())));
        assert!(!swap.contains(&key));
    }

    #[test]
    fn fetch_is_non_destructive() {
        let swap = SwapSpace::new(16, None).unwrap();
        let key = Key::new("k");
        swap.store(&key, &Value::I64(9)).unwrap();
        assert_eq!(swap.fetch(&key).unwrap(), Some(Value::I64(9)));
        assert!(swap.contains(&key));
    }

    #[test]
    fn overflows_to_disk_when_memory_full() {
        let dir = TempDir::new().unwrap();
        let swap = SwapSpace::new(2, Some(dir.path().to_path_buf())).unwrap();

        swap.store(&Key::new("a"), &Value::I64(1)).unwrap();
        swap.store(&Key::new("b"), &Value::I64(2)).unwrap();
        let residency = swap.store(&Key::new("c"), &Value::I64(3)).unwrap();
        assert_eq!(residency, Residency::OnDisk);

        // Disk-resident payload reads back like any other
        assert_eq!(swap.take(&Key::new("c")).unwrap(), Some(Value::I64(3)));
    }

    #[test]
    fn no_disk_level_without_directory() {
        let swap = SwapSpace::new(1, None).unwrap();
        swap.store(&Key::new("a"), &Value::I64(1)).unwrap();
        // Ceiling exceeded but no directory: stays on the memory level
        let residency = swap.store(&Key::new("b"), &Value::I64(2)).unwrap();
        assert_eq!(residency, Residency::Swapped);
        assert_eq!(swap.len(), 2);
    }

    #[test]
    fn remove_drops_both_levels() {
        let dir = TempDir::new().unwrap();
        let swap = SwapSpace::new(1, Some(dir.path().to_path_buf())).unwrap();
        swap.store(&Key::new("a"), &Value::I64(1)).unwrap();
        swap.store(&Key::new("b"), &Value::I64(2)).unwrap();

        swap.remove(&Key::new("a")).unwrap();
        swap.remove(&Key::new("b")).unwrap();
        assert!(swap.is_empty());
        assert_eq!(swap.fetch(&Key::new("b")).unwrap(), None);
    }

    #[test]
    fn clear_empties_everything() {
        let swap = SwapSpace::new(8, None).unwrap();
        for i in 0..5 {
            swap.store(&Key::new(format!("k{}", i)), &Value::I64(i)).unwrap();
        }
        swap.clear();
        assert!(swap.is_empty());
    }
}

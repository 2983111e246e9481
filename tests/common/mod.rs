//! Shared fixtures for the integration suites

// Each test binary compiles its own copy and uses a subset
#![allow(dead_code)]

use gridcache::{
    BridgeError, BridgeResult, CacheConfig, CacheEngine, CtxId, Key, StoreBridge, TxId, Value,
};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// In-memory external store with failure injection and call counters
#[derive(Default)]
pub struct TestBridge {
    pub backing: Mutex<BTreeMap<Key, Value>>,
    pub fail_puts: AtomicBool,
    pub fail_loads: AtomicBool,
    pub loads: AtomicUsize,
    pub puts: AtomicUsize,
    pub removes: AtomicUsize,
}

impl TestBridge {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn seeded(entries: &[(&str, Value)]) -> Arc<Self> {
        let bridge = Self::default();
        {
            let mut backing = bridge.backing.lock();
            for (k, v) in entries {
                backing.insert(Key::new(*k), v.clone());
            }
        }
        Arc::new(bridge)
    }

    pub fn stored(&self, key: &Key) -> Option<Value> {
        self.backing.lock().get(key).cloned()
    }
}

impl StoreBridge for TestBridge {
    fn load(&self, key: &Key) -> BridgeResult<Option<Value>> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        if self.fail_loads.load(Ordering::SeqCst) {
            return Err(BridgeError::new("injected load failure"));
        }
        Ok(self.backing.lock().get(key).cloned())
    }

    fn put(&self, key: &Key, value: &Value, _tx: Option<TxId>) -> BridgeResult<()> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        if self.fail_puts.load(Ordering::SeqCst) {
            return Err(BridgeError::new("injected put failure"));
        }
        self.backing.lock().insert(key.clone(), value.clone());
        Ok(())
    }

    fn remove(&self, key: &Key, _tx: Option<TxId>) -> BridgeResult<()> {
        self.removes.fetch_add(1, Ordering::SeqCst);
        self.backing.lock().remove(key);
        Ok(())
    }
}

pub fn engine() -> CacheEngine {
    CacheEngine::new(CacheConfig::for_testing()).unwrap()
}

pub fn engine_with_bridge(bridge: Arc<TestBridge>) -> CacheEngine {
    let mut config = CacheConfig::for_testing();
    config.read_through = true;
    config.write_through = true;
    CacheEngine::with_parts(config, Some(bridge), None, None).unwrap()
}

pub fn ctx() -> CtxId {
    CtxId::next()
}

pub fn key(s: &str) -> Key {
    Key::new(s)
}

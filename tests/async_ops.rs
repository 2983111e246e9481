//! Asynchronous operation siblings and their handles

mod common;

use common::{ctx, engine, key};
use gridcache::{CacheError, CacheReadOps, CacheWriteOps, Value};
use std::time::Duration;

#[test]
fn async_put_then_get_round_trip() {
    let cache = engine();
    let c = ctx();

    assert_eq!(
        cache.put_async(c, key("a"), Value::I64(1)).wait().unwrap(),
        None
    );
    assert_eq!(
        cache.get_async(c, key("a")).wait().unwrap(),
        Some(Value::I64(1))
    );
    assert_eq!(
        cache.put_async(c, key("a"), Value::I64(2)).wait().unwrap(),
        Some(Value::I64(1))
    );
}

#[test]
fn async_remove_returns_previous() {
    let cache = engine();
    let c = ctx();
    cache.putx(c, &key("a"), Value::I64(1), &[]).unwrap();

    assert!(cache.removex_async(c, key("a")).wait().unwrap());
    assert_eq!(cache.remove_async(c, key("a")).wait().unwrap(), None);
}

#[test]
fn wait_for_times_out_then_delivers() {
    let cache = engine();
    let c = ctx();
    let handle = cache.put_all_async(
        c,
        (0..64)
            .map(|i| (key(&format!("k{i}")), Value::I64(i)))
            .collect(),
    );
    // Either the short poll caught it or the blocking wait does
    if handle.wait_for(Duration::from_millis(1)).is_none() {
        handle.wait().unwrap();
    }
    assert_eq!(cache.size(), 64);
}

#[test]
fn try_get_before_and_after_completion() {
    let cache = engine();
    let c = ctx();
    let handle = cache.putx_async(c, key("a"), Value::I64(1));
    // Spin until the worker finishes
    while !handle.is_done() {
        std::thread::yield_now();
    }
    assert!(matches!(handle.try_get(), Some(Ok(true))));
}

#[test]
fn cancelled_handle_reports_cancellation() {
    let cache = engine();
    let c = ctx();
    // Saturate the pool with slow work so a queued op can be cancelled
    let blockers: Vec<_> = (0..32)
        .map(|i| cache.put_all_async(c, vec![(key(&format!("b{i}")), Value::I64(i))]))
        .collect();
    let mut cancelled = None;
    for i in 0..256 {
        let handle = cache.putx_async(c, key(&format!("x{i}")), Value::I64(i));
        if handle.cancel() {
            cancelled = Some(handle);
            break;
        }
    }
    for b in blockers {
        b.wait().unwrap();
    }
    if let Some(handle) = cancelled {
        assert!(matches!(handle.wait(), Err(CacheError::Cancelled)));
    }
}

#[test]
fn cancel_after_completion_fails() {
    let cache = engine();
    let c = ctx();
    let handle = cache.putx_async(c, key("a"), Value::I64(1));
    while !handle.is_done() {
        std::thread::yield_now();
    }
    assert!(!handle.cancel());
    assert!(matches!(handle.try_get(), Some(Ok(true))));
}

#[test]
fn many_contexts_interleave_safely() {
    let cache = engine();
    let handles: Vec<_> = (0..100)
        .map(|i| cache.putx_async(ctx(), key(&format!("k{}", i % 10)), Value::I64(i)))
        .collect();
    for h in handles {
        assert!(h.wait().unwrap());
    }
    assert_eq!(cache.size(), 10);
}

//! Fallback behavior of the resilient facade
//!
//! Covers the persistent backend being unusable at startup and failing while
//! serving, plus retry of transient lock contention.

mod common;

use common::{fast_retry, sqlite_config, FaultyBackend, SharedFaulty};
use coord_memory::{
    BackendKind, BackendMode, FallbackReason, ListOptions, ManualClock, MemoryStore, RetryPolicy,
    StoreError, StoreOptions, VolatileBackend,
};
use serde_json::json;
use std::sync::atomic::Ordering;
use std::sync::Arc;

fn exercise(store: &MemoryStore) -> Vec<serde_json::Value> {
    store.store("tasks", "task:1", json!({"n": 1}), StoreOptions::default()).unwrap();
    store.store("tasks", "task:2", json!({"n": 2}), StoreOptions::default()).unwrap();
    store.store("tasks", "task:1", json!({"n": 3}), StoreOptions::default()).unwrap();
    assert!(store.delete("tasks", "task:2").unwrap());
    store.store("tasks", "other", json!({"n": 4}), StoreOptions::default()).unwrap();

    let mut observed = vec![store.retrieve("tasks", "task:1").unwrap().unwrap().value];
    observed.extend(
        store
            .list("tasks", ListOptions::default())
            .unwrap()
            .into_iter()
            .map(|e| json!([e.key, e.value])),
    );
    observed.extend(
        store
            .search("tasks", "task:*", ListOptions::default())
            .unwrap()
            .into_iter()
            .map(|e| json!(e.key)),
    );
    observed
}

#[test]
fn garbage_file_falls_back_at_init() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("memory.db");
    let garbage = b"this is definitely not an sqlite database, just bytes".repeat(100);
    std::fs::write(&path, garbage).unwrap();

    let store = MemoryStore::open(&sqlite_config(&path));
    assert!(store.is_using_fallback());
    let health = store.health();
    assert_eq!(health.backend, BackendKind::Volatile);
    assert!(matches!(health.reason, Some(FallbackReason::UnavailableAtInit { .. })));

    // Same result shape as the persistent case
    let healthy = MemoryStore::open(&sqlite_config(&dir.path().join("healthy.db")));
    assert!(!healthy.is_using_fallback());
    assert_eq!(exercise(&store), exercise(&healthy));
}

#[test]
fn unwritable_location_falls_back_at_init() {
    let dir = tempfile::tempdir().unwrap();
    let blocker = dir.path().join("not-a-dir");
    std::fs::write(&blocker, b"file").unwrap();

    let store = MemoryStore::open(&sqlite_config(&blocker.join("nested").join("memory.db")));
    assert!(store.is_using_fallback());
    store.store("", "k", json!("v"), StoreOptions::default()).unwrap();
    assert_eq!(store.retrieve("default", "k").unwrap().unwrap().value, json!("v"));
}

#[test]
fn fatal_error_demotes_once_and_reissues() {
    let clock = Arc::new(ManualClock::starting_now());
    let faulty = Arc::new(FaultyBackend::new(clock.clone()));
    let store = MemoryStore::with_backends(
        Box::new(SharedFaulty(faulty.clone())),
        Box::new(VolatileBackend::new(clock.clone())),
        RetryPolicy::from_config(&fast_retry()),
        clock,
    );
    assert_eq!(store.health().mode, BackendMode::Primary);
    store.store("ns", "before", json!(1), StoreOptions::default()).unwrap();

    faulty.break_now();
    let entry = store.store("ns", "during", json!(2), StoreOptions::default()).unwrap();
    assert_eq!(entry.value, json!(2));
    assert!(store.is_using_fallback());
    match store.health().reason {
        Some(FallbackReason::FailedAtRuntime { operation, .. }) => assert_eq!(operation, "store"),
        other => panic!("unexpected reason: {:?}", other),
    }

    // Fatal errors are not retried, and the primary is never consulted again
    let calls = faulty.calls.load(Ordering::SeqCst);
    assert_eq!(store.retrieve("ns", "during").unwrap().unwrap().value, json!(2));
    // Data written before the failure stayed with the broken backend
    assert!(store.retrieve("ns", "before").unwrap().is_none());
    assert_eq!(faulty.calls.load(Ordering::SeqCst), calls);
}

#[test]
fn lock_timeouts_are_retried_then_surfaced() {
    let clock = Arc::new(ManualClock::starting_now());
    let faulty = Arc::new(FaultyBackend::new(clock.clone()));
    let store = MemoryStore::with_backends(
        Box::new(SharedFaulty(faulty.clone())),
        Box::new(VolatileBackend::new(clock.clone())),
        RetryPolicy::from_config(&fast_retry()),
        clock,
    );
    let baseline = faulty.calls.load(Ordering::SeqCst);

    faulty.busy_for(2);
    store.store("ns", "k", json!("ok"), StoreOptions::default()).unwrap();
    assert_eq!(faulty.calls.load(Ordering::SeqCst) - baseline, 3);

    faulty.busy_for(10);
    let err = store.retrieve("ns", "k").unwrap_err();
    assert!(matches!(err, StoreError::LockTimeout { .. }));
    // Contention never triggers fallback
    assert!(!store.is_using_fallback());
}

#[test]
fn failing_initialize_binds_fallback() {
    let clock = Arc::new(ManualClock::starting_now());
    let faulty = Arc::new(FaultyBackend::new(clock.clone()));
    faulty.break_now();
    let store = MemoryStore::with_backends(
        Box::new(SharedFaulty(faulty)),
        Box::new(VolatileBackend::new(clock.clone())),
        RetryPolicy::none(),
        clock,
    );
    assert!(store.is_using_fallback());
    assert!(matches!(
        store.health().reason,
        Some(FallbackReason::UnavailableAtInit { .. })
    ));
}

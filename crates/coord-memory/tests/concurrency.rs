//! Concurrent writers against one backing file

mod common;

use coord_memory::{ListOptions, MemoryStore, StoreOptions};
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;
use std::thread;

#[test]
fn same_key_writers_leave_exactly_one_marker() {
    let (_dir, _clock, store) = common::sqlite_store();
    let store = Arc::new(store);

    let markers: Vec<String> = (0..16).map(|i| format!("writer-{}", i)).collect();
    let handles: Vec<_> = markers
        .iter()
        .cloned()
        .map(|marker| {
            let store = store.clone();
            thread::spawn(move || {
                store
                    .store(
                        "race",
                        "shared",
                        json!({"marker": marker, "pad": "x".repeat(512)}),
                        StoreOptions::default(),
                    )
                    .unwrap();
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let entry = store.retrieve("race", "shared").unwrap().unwrap();
    let winner = entry.value["marker"].as_str().unwrap().to_string();
    assert!(markers.contains(&winner));
    assert_eq!(entry.value["pad"].as_str().unwrap().len(), 512);
    assert_eq!(store.list("race", ListOptions::default()).unwrap().len(), 1);
}

#[test]
fn two_handles_on_one_file_see_each_other() {
    let dir = tempfile::tempdir().unwrap();
    let config = common::sqlite_config(&dir.path().join("shared.db"));
    let a = Arc::new(MemoryStore::open(&config));
    let b = Arc::new(MemoryStore::open(&config));
    assert!(!a.is_using_fallback() && !b.is_using_fallback());

    let handles: Vec<_> = [a.clone(), b.clone()]
        .into_iter()
        .enumerate()
        .map(|(writer, store)| {
            thread::spawn(move || {
                for i in 0..50 {
                    store
                        .store(
                            "agents",
                            &format!("agent:{}-{}", writer, i),
                            json!(i),
                            StoreOptions::default(),
                        )
                        .unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    for store in [&a, &b] {
        let keys: HashSet<String> = store
            .list("agents", ListOptions::default())
            .unwrap()
            .into_iter()
            .map(|e| e.key)
            .collect();
        assert_eq!(keys.len(), 100);
    }
}

#[test]
fn readers_run_alongside_writers() {
    let (_dir, _clock, store) = common::sqlite_store();
    let store = Arc::new(store);
    store.store("metrics", "seed", json!(0), StoreOptions::default()).unwrap();

    let writer = {
        let store = store.clone();
        thread::spawn(move || {
            for i in 0..200 {
                store.store("metrics", "counter", json!(i), StoreOptions::default()).unwrap();
            }
        })
    };
    let reader = {
        let store = store.clone();
        thread::spawn(move || {
            for _ in 0..200 {
                // Never a torn value: either absent or a whole number
                if let Some(entry) = store.retrieve("metrics", "counter").unwrap() {
                    assert!(entry.value.is_u64());
                }
            }
        })
    };
    writer.join().unwrap();
    reader.join().unwrap();
    assert_eq!(store.retrieve("metrics", "counter").unwrap().unwrap().value, json!(199));
}

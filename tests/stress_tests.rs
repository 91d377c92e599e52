//! Stress tests for concurrency and durability.

use segkv::{Options, OptionsBuilder, Store};
use std::sync::Arc;
use std::thread;
use tempfile::TempDir;

fn options(capacity: u64) -> Options {
    OptionsBuilder::new()
        .segment_capacity(capacity)
        .auto_compaction(false)
        .build()
        .unwrap()
}

/// Test concurrent writers with many keys.
#[test]
fn stress_concurrent_writers() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(Store::open_with_options(dir.path(), options(25)).unwrap());

    let num_threads = 8;
    let keys_per_thread = 200;

    let handles: Vec<_> = (0..num_threads)
        .map(|t| {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                for i in 0..keys_per_thread {
                    let key = format!("thread{:02}_key{:05}", t, i);
                    let value = format!("value_{}", i);
                    store.put(&key, &value).unwrap();
                }
            })
        })
        .collect();

    for h in handles {
        h.join().unwrap();
    }

    // Verify all keys exist
    for t in 0..num_threads {
        for i in 0..keys_per_thread {
            let key = format!("thread{:02}_key{:05}", t, i);
            let value = store.get(&key).unwrap();
            assert!(value.is_some(), "missing key: {}", key);
        }
    }

    // Indices are unique and dense
    let records = store.read_log().unwrap();
    assert_eq!(records.len(), num_threads * keys_per_thread);
    let mut indices: Vec<u64> = records.iter().map(|r| r.index).collect();
    indices.sort();
    indices.dedup();
    assert_eq!(indices.len(), num_threads * keys_per_thread);
}

/// Test concurrent readers and writers.
#[test]
fn stress_concurrent_read_write() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(Store::open_with_options(dir.path(), options(25)).unwrap());

    // Pre-populate some data
    for i in 0..500 {
        let key = format!("key{:05}", i);
        let value = format!("value_{}", i);
        store.put(&key, &value).unwrap();
    }

    let num_readers = 4;
    let num_writers = 4;
    let ops_per_thread = 300;

    let mut handles = vec![];

    // Spawn readers
    for _ in 0..num_readers {
        let store = Arc::clone(&store);
        handles.push(thread::spawn(move || {
            for i in 0..ops_per_thread {
                let key = format!("key{:05}", i % 500);
                let value = store.get(&key).unwrap();
                assert!(value.is_some(), "missing pre-populated key: {}", key);
            }
        }));
    }

    // Spawn writers
    for t in 0..num_writers {
        let store = Arc::clone(&store);
        handles.push(thread::spawn(move || {
            for i in 0..ops_per_thread {
                let key = format!("new_key_t{}_i{}", t, i);
                let value = format!("new_value_{}", i);
                store.put(&key, &value).unwrap();
            }
        }));
    }

    for h in handles {
        h.join().unwrap();
    }
}

/// Readers and writers keep working while compaction passes run.
#[test]
fn stress_compaction_under_load() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(Store::open_with_options(dir.path(), options(10)).unwrap());

    let writers = 3;
    let ops_per_writer = 300;

    let mut handles = vec![];

    for t in 0..writers {
        let store = Arc::clone(&store);
        handles.push(thread::spawn(move || {
            for i in 0..ops_per_writer {
                // A small keyspace so compaction has overwrites to drop
                let key = format!("k{}", (i * 7 + t) % 20);
                store.put(&key, &format!("w{}_{}", t, i)).unwrap();
            }
        }));
    }

    {
        let store = Arc::clone(&store);
        handles.push(thread::spawn(move || {
            for _ in 0..10 {
                store.compact().unwrap();
                thread::sleep(std::time::Duration::from_millis(5));
            }
        }));
    }

    {
        let store = Arc::clone(&store);
        handles.push(thread::spawn(move || {
            for i in 0..500 {
                let key = format!("k{}", i % 20);
                // Value may or may not exist yet; the read must not fail
                let _ = store.get(&key).unwrap();
            }
        }));
    }

    for h in handles {
        h.join().unwrap();
    }

    // Every key in the keyspace was written at least once
    for i in 0..20 {
        let key = format!("k{}", i);
        assert!(store.get(&key).unwrap().is_some(), "missing key: {}", key);
    }
}

/// Test rapid open/close cycles.
#[test]
fn stress_open_close_cycles() {
    let dir = TempDir::new().unwrap();

    for cycle in 0..10 {
        let store = Store::open_with_options(dir.path(), options(10)).unwrap();

        for i in 0..15 {
            let key = format!("cycle{}_key{}", cycle, i);
            store.put(&key, &cycle.to_string()).unwrap();
        }

        // All earlier cycles are still readable
        for c in 0..=cycle {
            let key = format!("cycle{}_key0", c);
            assert_eq!(store.get(&key).unwrap(), Some(c.to_string()));
        }

        store.close().unwrap();
    }
}

/// The background timer keeps the segment count bounded under churn.
#[test]
fn stress_background_compaction_timer() {
    let dir = TempDir::new().unwrap();
    let opts = OptionsBuilder::new()
        .segment_capacity(10)
        .compaction_interval(std::time::Duration::from_millis(20))
        .build()
        .unwrap();
    let store = Arc::new(Store::open_with_options(dir.path(), opts).unwrap());

    for i in 0..200 {
        store.put("churn", &i.to_string()).unwrap();
        if i % 50 == 0 {
            thread::sleep(std::time::Duration::from_millis(30));
        }
    }

    // Give the timer a chance to run at least once more
    thread::sleep(std::time::Duration::from_millis(100));

    assert_eq!(store.get("churn").unwrap(), Some("199".to_string()));
    assert!(store.last_compaction_error().is_none());

    store.close().unwrap();
}

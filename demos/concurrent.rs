//! Concurrent access example for segkv.
//!
//! Three writers race on one key while readers poll it; writes are
//! totally ordered by the log, so the final value is whichever write
//! got the highest record index.
//!
//! Run with: cargo run --example concurrent

use segkv::Store;
use std::sync::Arc;
use std::thread;
use std::time::Instant;
use tempfile::TempDir;

fn main() -> segkv::Result<()> {
    tracing_subscriber::fmt::init();

    let dir = TempDir::new().expect("failed to create temp dir");
    let store = Arc::new(Store::open(dir.path())?);

    println!("=== Concurrent Access Example ===\n");

    // Three writers race on a single key
    let mut handles = vec![];
    for value in ["hameed", "umaima", "aneesa"] {
        let store = Arc::clone(&store);
        handles.push(thread::spawn(move || {
            store.put("name", value).expect("write failed");
        }));
    }
    for handle in handles {
        handle.join().expect("thread panicked");
    }

    println!("get name -> {:?}", store.get("name")?);
    println!("log records for the race: {}\n", store.read_log()?.len());

    // Many writers, many readers
    let num_writers = 4;
    let num_readers = 4;
    let ops_per_writer = 500;
    let ops_per_reader = 1000;

    for i in 0..500 {
        store.put(&format!("preload:{:05}", i), &format!("value_{}", i))?;
    }

    let start = Instant::now();
    let mut handles = vec![];

    for writer_id in 0..num_writers {
        let store = Arc::clone(&store);
        handles.push(thread::spawn(move || {
            for i in 0..ops_per_writer {
                let key = format!("writer{}:{:05}", writer_id, i);
                store
                    .put(&key, &format!("data_from_writer_{}", writer_id))
                    .expect("write failed");
            }
            println!("Writer {} completed {} writes", writer_id, ops_per_writer);
        }));
    }

    for reader_id in 0..num_readers {
        let store = Arc::clone(&store);
        handles.push(thread::spawn(move || {
            let mut found = 0;
            for i in 0..ops_per_reader {
                let key = format!("preload:{:05}", i % 500);
                if store.get(&key).expect("read failed").is_some() {
                    found += 1;
                }
            }
            println!(
                "Reader {} completed {} reads ({} found)",
                reader_id, ops_per_reader, found
            );
        }));
    }

    for handle in handles {
        handle.join().expect("thread panicked");
    }

    let elapsed = start.elapsed();
    let total_ops = (num_writers * ops_per_writer) + (num_readers * ops_per_reader);

    println!("\n--- Summary ---");
    println!("Total operations: {}", total_ops);
    println!("Time: {:?}", elapsed);
    println!(
        "Throughput: {:.0} ops/sec",
        total_ops as f64 / elapsed.as_secs_f64()
    );

    store.close()?;
    println!("\n=== Concurrent Access Example Complete ===");
    Ok(())
}

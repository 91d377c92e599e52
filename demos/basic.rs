//! Basic usage example for segkv.
//!
//! Run with: cargo run --example basic

use segkv::Store;

fn main() -> segkv::Result<()> {
    tracing_subscriber::fmt::init();

    let store = Store::open("./dat")?;

    println!("=== Basic Example ===\n");

    // Write
    store.put("name", "alice")?;
    store.put("city", "nairobi")?;
    println!("put name=alice, city=nairobi");

    // Read
    println!("get name  -> {:?}", store.get("name")?);
    println!("get city  -> {:?}", store.get("city")?);
    println!("get ghost -> {:?}", store.get("ghost")?);

    // Overwrite
    store.put("name", "bob")?;
    println!("get name  -> {:?} (after overwrite)", store.get("name")?);

    // Delete
    store.delete("city")?;
    println!("get city  -> {:?} (after delete)", store.get("city")?);

    // Reclaim space held by overwritten and deleted records
    let stats = store.compact()?;
    println!(
        "\ncompaction: {} segments rewritten, {} live records kept",
        stats.segments_compacted, stats.live_records
    );

    let stats = store.stats();
    println!("segments: {}", stats.segment_count);
    for segment in &stats.segments {
        println!(
            "  segment {} [{}, {}) closed={} compacted={}",
            segment.segment_index,
            segment.first_index,
            segment.last_index,
            segment.closed,
            segment.is_compacted
        );
    }

    store.close()?;
    println!("\n=== Basic Example Complete ===");
    Ok(())
}

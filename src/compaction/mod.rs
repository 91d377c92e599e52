//! Background compaction.
//!
//! The compactor periodically rewrites the oldest run of closed segments
//! into compacted segments that hold only the live value per key,
//! reclaiming the space of overwritten and deleted records.
//!
//! A pass is crash-safe by construction: compacted segments are written
//! with `compaction_completed = false` (invisible to readers), the gate
//! is flipped only once every batch is durable, and the originals are
//! retired only after that. A crash at any point leaves either the
//! pre-compaction or the post-compaction view observable, never a hybrid.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use parking_lot::{Condvar, Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::options::Options;
use crate::wal::segment::{Segment, SegmentMeta};
use crate::wal::{record::Record, Wal};
use crate::{Error, Result};

/// Statistics from a single compaction pass.
#[derive(Debug, Default, Clone)]
pub struct CompactionStats {
    /// Closed segments rewritten (and subsequently retired).
    pub segments_compacted: usize,
    /// Records scanned while gathering live state.
    pub records_scanned: u64,
    /// Records that survived into compacted segments.
    pub live_records: u64,
    /// Compacted segments created.
    pub segments_created: usize,
    /// Wall-clock time of the pass in milliseconds.
    pub elapsed_ms: u64,
}

/// Background compaction scheduler and executor.
pub struct Compactor {
    /// The log to compact.
    wal: Arc<Wal>,
    /// Store options.
    options: Arc<Options>,
    /// Exclusive lock held for the duration of one pass.
    pass_lock: Mutex<()>,
    /// Reentry guard; a tick that lands mid-pass is a no-op.
    running: AtomicBool,
    /// Whether the timer thread should shut down.
    shutdown: AtomicBool,
    /// Timer state; the condvar interrupts the interval sleep on stop.
    tick: Mutex<()>,
    cond: Condvar,
    /// Timer thread handle.
    thread_handle: Mutex<Option<JoinHandle<()>>>,
    /// Error from the last pass, if any.
    last_error: RwLock<Option<Error>>,
}

impl Compactor {
    /// Create a compactor over the given WAL.
    pub fn new(wal: Arc<Wal>, options: Arc<Options>) -> Arc<Self> {
        Arc::new(Self {
            wal,
            options,
            pass_lock: Mutex::new(()),
            running: AtomicBool::new(false),
            shutdown: AtomicBool::new(false),
            tick: Mutex::new(()),
            cond: Condvar::new(),
            thread_handle: Mutex::new(None),
            last_error: RwLock::new(None),
        })
    }

    /// Start the background timer thread.
    pub fn start(self: &Arc<Self>) {
        let this = Arc::clone(self);
        let handle = thread::Builder::new()
            .name("segkv-compaction".to_string())
            .spawn(move || {
                this.background_loop();
            })
            .expect("failed to spawn compaction thread");

        *self.thread_handle.lock() = Some(handle);
    }

    /// Stop the timer thread, waiting for an in-flight pass to drain.
    pub fn stop(&self) {
        self.shutdown.store(true, Ordering::SeqCst);

        {
            let _tick = self.tick.lock();
            self.cond.notify_all();
        }

        if let Some(handle) = self.thread_handle.lock().take() {
            let _ = handle.join();
        }
    }

    /// Error from the last pass, if any.
    pub fn last_error(&self) -> Option<Error> {
        self.last_error.read().clone()
    }

    fn background_loop(&self) {
        while !self.shutdown.load(Ordering::SeqCst) {
            {
                let mut tick = self.tick.lock();
                self.cond
                    .wait_for(&mut tick, self.options.compaction_interval);
            }

            if self.shutdown.load(Ordering::SeqCst) {
                break;
            }

            match self.run_pass() {
                Ok(stats) => {
                    *self.last_error.write() = None;
                    if stats.segments_compacted > 0 {
                        debug!(
                            segments_compacted = stats.segments_compacted,
                            live_records = stats.live_records,
                            "timed compaction pass finished"
                        );
                    }
                }
                Err(e) => {
                    if e.is_invariant() {
                        error!(error = %e, "compactor halting on invariant violation");
                        *self.last_error.write() = Some(e);
                        break;
                    }
                    // The pass aborted cleanly; any partially written
                    // compacted segments stay invisible and the next
                    // tick reselects the same target.
                    warn!(error = %e, "compaction pass aborted");
                    *self.last_error.write() = Some(e);
                }
            }
        }
    }

    /// Run one compaction pass now.
    ///
    /// Returns empty stats if another pass is already in flight or there
    /// is no eligible target.
    pub fn run_pass(&self) -> Result<CompactionStats> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(CompactionStats::default());
        }

        let result = {
            let _pass = self.pass_lock.lock();
            self.compact_once()
        };

        self.running.store(false, Ordering::SeqCst);
        result
    }

    fn compact_once(&self) -> Result<CompactionStats> {
        let start = Instant::now();
        let mut stats = CompactionStats::default();

        // Discard compacted segments a crashed pass never finalized;
        // they are invisible to readers and their data still lives in
        // the originals.
        for segment in self.wal.segments().iter() {
            let meta = segment.meta();
            if meta.is_compacted_segment && !meta.compaction_completed {
                warn!(
                    segment_index = meta.segment_index,
                    id = %meta.id,
                    "discarding unfinished compacted segment"
                );
                self.wal.retire_segment(&meta.id)?;
            }
        }

        // Select the oldest non-compacted segment as the target.
        let segments = self.wal.segments();
        let Some(target) = segments
            .iter()
            .find(|s| !s.meta().is_compacted_segment)
        else {
            return Ok(stats);
        };
        if !target.is_closed() {
            return Ok(stats);
        }
        let target_meta = target.meta();

        debug!(
            segment_index = target_meta.segment_index,
            id = %target_meta.id,
            "starting compaction pass"
        );

        // Newest record index per key within the target.
        let mut latest: HashMap<String, u64> = HashMap::new();
        target.scan(|record| {
            let key = record.key()?;
            let newest = latest.entry(key).or_insert(record.index);
            if record.index > *newest {
                *newest = record.index;
            }
            Ok(())
        })?;

        // Gather live records across every closed segment up to and
        // including the target, in manifest order.
        let mut live: Vec<(String, Record)> = Vec::new();
        let mut cleaned: Vec<Arc<Segment>> = Vec::new();

        for segment in segments.iter() {
            let meta = segment.meta();

            if meta.segment_index <= target_meta.segment_index && meta.closed {
                segment.scan(|record| {
                    stats.records_scanned += 1;
                    let command = record.command()?;
                    let key = command.key().to_string();

                    match latest.get(&key) {
                        None => {
                            if command.value().is_some() {
                                live.push((key, record));
                            }
                        }
                        Some(&newest) => {
                            if record.index >= newest {
                                if command.value().is_some() {
                                    live.push((key, record));
                                } else {
                                    // The newest state is a tombstone;
                                    // drop everything gathered for it.
                                    live.retain(|(k, _)| k != &key);
                                }
                            }
                        }
                    }

                    Ok(())
                })?;

                cleaned.push(Arc::clone(segment));
            }

            if meta.id == target_meta.id {
                break;
            }
        }

        stats.segments_compacted = cleaned.len();
        stats.live_records = live.len() as u64;

        // Write live records into fresh compacted segments, one batch
        // per segment capacity, preserving original indices. Each batch
        // lands in the manifest gated behind compaction_completed.
        let capacity = self.options.segment_capacity as usize;
        let mut created: Vec<Arc<Segment>> = Vec::new();

        for batch in live.chunks(capacity) {
            let Some((_, first)) = batch.first() else {
                continue;
            };

            let mut meta = SegmentMeta::new(created.len() as u64, first.index);
            meta.is_compacted_segment = true;
            let segment = Arc::new(Segment::open(self.wal.data_dir(), meta, &self.options));

            for (_, record) in batch {
                segment.append(record.clone(), Some(record.index))?;
            }
            if let Some((_, last)) = batch.last() {
                segment.set_last_entry_index(last.index);
            }

            self.wal.register_segment(Arc::clone(&segment))?;
            created.push(segment);
        }
        stats.segments_created = created.len();

        // Flip the visibility gate on every new segment, then persist.
        for segment in &created {
            segment.finalize_compaction()?;
        }
        self.wal.persist_manifest()?;

        // Retire the originals; their replacements are durable.
        for segment in &cleaned {
            self.wal.retire_segment(&segment.id())?;
        }

        stats.elapsed_ms = start.elapsed().as_millis() as u64;
        info!(
            segments_compacted = stats.segments_compacted,
            segments_created = stats.segments_created,
            live_records = stats.live_records,
            elapsed_ms = stats.elapsed_ms,
            "compaction pass complete"
        );

        Ok(stats)
    }
}

impl Drop for Compactor {
    fn drop(&mut self) {
        self.stop();
    }
}

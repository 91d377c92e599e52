//! Segmented write-ahead log.
//!
//! The WAL is an ordered collection of bounded segments. It owns the
//! roll policy (seal the active segment, open the next), the write path,
//! the read path, and the persistent manifest listing every segment.
//!
//! # Concurrency
//!
//! A single write lock serializes appends (including rolls) and manifest
//! persistence, which gives writes a total order over record indices.
//! Readers never take it: the segment list is an atomically swapped
//! snapshot, and closed segments are immutable, so a lookup resolves an
//! offset from a hash index and reads the file lock-free.

pub mod manifest;
pub mod record;
pub mod segment;

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::options::Options;
use crate::util::filename;
use crate::{Error, Result};

use self::manifest::Manifest;
use self::record::{Command, Record};
use self::segment::{Segment, SegmentMeta};

/// The segmented write-ahead log.
pub struct Wal {
    /// Data directory holding segment files and the manifest.
    data_dir: PathBuf,
    /// Store options.
    options: Arc<Options>,
    /// Sorted segment list; the tail is the active segment. Swapped
    /// atomically so readers work from a consistent snapshot.
    segments: ArcSwap<Vec<Arc<Segment>>>,
    /// Serializes appends, rolls, segment-list mutation, and manifest
    /// persistence.
    write_lock: Mutex<()>,
}

impl Wal {
    /// Open the WAL under `data_dir`.
    ///
    /// Loads the manifest, reconstructs a handle per listed segment,
    /// rebuilds the hash index of every visible segment, and removes
    /// segment files that a crashed compaction pass left without a
    /// manifest entry. An absent or empty manifest starts the log with
    /// segment 0.
    pub fn open(data_dir: &Path, options: Arc<Options>) -> Result<Self> {
        filename::create_dir_if_missing(data_dir)?;
        filename::create_dir_if_missing(&filename::meta_dir(data_dir))?;

        let mut segments: Vec<Arc<Segment>> = Vec::new();
        if let Some(manifest) = Manifest::load(data_dir)? {
            for meta in manifest.sorted_segments_metadata {
                if meta.last_entry_index < meta.first_entry_index {
                    return Err(Error::invariant(format!(
                        "manifest entry for segment {} has inverted index range [{}, {}]",
                        meta.segment_index, meta.first_entry_index, meta.last_entry_index
                    )));
                }
                segments.push(Arc::new(Segment::open(data_dir, meta, &options)));
            }
        }

        for segment in &segments {
            if segment.is_visible() {
                segment.load_hash_index()?;
            }
        }

        // A crash between a manifest rewrite and the unlink of a retired
        // segment leaves its file orphaned on disk.
        let known: HashSet<String> = segments.iter().map(|s| s.id()).collect();
        for (segment_index, id) in filename::list_segment_files(data_dir)? {
            if !known.contains(&id) {
                warn!(segment_index, id = %id, "removing orphan segment file");
                filename::delete_file(&filename::segment_file_path(data_dir, segment_index, &id))?;
            }
        }

        let started_empty = segments.is_empty();
        if started_empty {
            segments.push(Arc::new(Segment::open(
                data_dir,
                SegmentMeta::new(0, 0),
                &options,
            )));
        }

        let wal = Self {
            data_dir: data_dir.to_path_buf(),
            options,
            segments: ArcSwap::from_pointee(segments),
            write_lock: Mutex::new(()),
        };

        if started_empty {
            let _guard = wal.write_lock.lock();
            wal.save_manifest_locked()?;
        }

        info!(
            path = %wal.data_dir.display(),
            segments = wal.segments.load().len(),
            "opened write-ahead log"
        );

        Ok(wal)
    }

    /// The data directory this WAL lives in.
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Snapshot of the sorted segment list.
    pub fn segments(&self) -> Arc<Vec<Arc<Segment>>> {
        self.segments.load_full()
    }

    /// Append a command to the log, returning the index it was assigned.
    ///
    /// Rolls to a fresh segment first if the active one is at capacity or
    /// sealed; persists the manifest after the append.
    pub fn append(&self, command: &Command) -> Result<u64> {
        let _guard = self.write_lock.lock();

        self.roll_locked()?;

        let segments = self.segments.load();
        let active = segments
            .last()
            .ok_or_else(|| Error::invariant("wal has no active segment"))?;

        let record = Record::from_command(command)?;
        let index = active.append(record, None)?;

        self.save_manifest_locked()?;
        Ok(index)
    }

    /// Seal the active segment and open the next if the roll policy says
    /// so; a no-op otherwise.
    pub fn maybe_roll(&self) -> Result<()> {
        let _guard = self.write_lock.lock();
        if self.roll_locked()? {
            self.save_manifest_locked()?;
        }
        Ok(())
    }

    fn roll_locked(&self) -> Result<bool> {
        let segments = self.segments.load_full();
        let active = segments
            .last()
            .ok_or_else(|| Error::invariant("wal has no active segment"))?;

        if !active.is_at_capacity() && !active.is_closed() {
            return Ok(false);
        }

        active.close()?;

        let active_meta = active.meta();
        let meta = SegmentMeta::new(
            active_meta.segment_index + 1,
            active_meta.last_entry_index,
        );
        debug!(
            segment_index = meta.segment_index,
            first_index = meta.first_entry_index,
            "rolling wal segment"
        );

        let segment = Arc::new(Segment::open(&self.data_dir, meta, &self.options));
        let mut next = segments.as_ref().clone();
        next.push(segment);
        self.segments.store(Arc::new(next));

        Ok(true)
    }

    /// Find the newest record for `key`, consulting segments newest to
    /// oldest. Returns the record as written; the caller interprets
    /// `Set` versus `Delete`.
    pub fn lookup(&self, key: &str) -> Result<Option<Record>> {
        let mut retried = false;
        loop {
            let segments = self.segments.load_full();
            match Self::lookup_in(&segments, key) {
                Ok(found) => return Ok(found),
                // A compaction pass may retire a segment (and unlink its
                // file) between our snapshot and the file read; take one
                // fresh snapshot before giving up.
                Err(e) if e.is_io() && !retried => retried = true,
                Err(e) => return Err(e),
            }
        }
    }

    fn lookup_in(segments: &[Arc<Segment>], key: &str) -> Result<Option<Record>> {
        for segment in segments.iter().rev() {
            if !segment.is_visible() {
                continue;
            }
            let Some(offset) = segment.lookup_offset(key) else {
                continue;
            };
            return segment.read_at(offset).map(Some);
        }
        Ok(None)
    }

    /// Every record of every visible segment, in manifest order.
    pub fn read_all(&self) -> Result<Vec<Record>> {
        let segments = self.segments.load_full();
        let mut records = Vec::new();

        for segment in segments.iter() {
            if !segment.is_visible() {
                continue;
            }
            segment.scan(|record| {
                records.push(record);
                Ok(())
            })?;
        }

        Ok(records)
    }

    /// Add a compactor-produced segment to the list and persist the
    /// manifest.
    pub fn register_segment(&self, segment: Arc<Segment>) -> Result<()> {
        let _guard = self.write_lock.lock();

        let mut next = self.segments.load_full().as_ref().clone();
        next.push(segment);
        next.sort_by_cached_key(|s| s.meta().sort_key());
        self.segments.store(Arc::new(next));

        self.save_manifest_locked()
    }

    /// Persist the manifest from the current in-memory segment state.
    pub fn persist_manifest(&self) -> Result<()> {
        let _guard = self.write_lock.lock();
        self.save_manifest_locked()
    }

    /// Remove a segment from the list, persist the manifest, then unlink
    /// its file. The manifest stops referencing the segment before its
    /// bytes disappear.
    pub fn retire_segment(&self, id: &str) -> Result<()> {
        let _guard = self.write_lock.lock();

        let mut next = self.segments.load_full().as_ref().clone();
        let Some(position) = next.iter().position(|s| s.id() == id) else {
            return Ok(());
        };
        let retired = next.remove(position);
        self.segments.store(Arc::new(next));

        self.save_manifest_locked()?;
        retired.delete_file()?;
        debug!(id = %id, path = %retired.path().display(), "retired segment");

        Ok(())
    }

    fn save_manifest_locked(&self) -> Result<()> {
        let metas = self
            .segments
            .load()
            .iter()
            .map(|segment| segment.meta())
            .collect();
        Manifest::new(metas).save(&self.data_dir)
    }

    /// Flush and release every segment file handle and persist the
    /// manifest. The active segment is not sealed; it stays appendable
    /// after a reopen.
    pub fn close(&self) -> Result<()> {
        let _guard = self.write_lock.lock();

        for segment in self.segments.load().iter() {
            segment.release()?;
        }

        self.save_manifest_locked()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::OptionsBuilder;
    use tempfile::tempdir;

    fn test_options(capacity: u64) -> Arc<Options> {
        Arc::new(
            OptionsBuilder::new()
                .segment_capacity(capacity)
                .auto_compaction(false)
                .build()
                .unwrap(),
        )
    }

    fn put(wal: &Wal, key: &str, value: &str) -> u64 {
        wal.append(&Command::set(key, value).unwrap()).unwrap()
    }

    #[test]
    fn test_open_creates_initial_segment() {
        let dir = tempdir().unwrap();
        let wal = Wal::open(dir.path(), test_options(50)).unwrap();

        let segments = wal.segments();
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].meta().segment_index, 0);
        assert!(!segments[0].is_closed());

        assert!(filename::manifest_file_path(dir.path()).exists());
    }

    #[test]
    fn test_append_assigns_increasing_indices() {
        let dir = tempdir().unwrap();
        let wal = Wal::open(dir.path(), test_options(50)).unwrap();

        assert_eq!(put(&wal, "a", "1"), 0);
        assert_eq!(put(&wal, "b", "2"), 1);
        assert_eq!(put(&wal, "a", "3"), 2);
    }

    #[test]
    fn test_roll_boundary() {
        let dir = tempdir().unwrap();
        let wal = Wal::open(dir.path(), test_options(2)).unwrap();

        // The capacity-th record does not roll
        put(&wal, "a", "1");
        put(&wal, "b", "2");
        assert_eq!(wal.segments().len(), 1);

        // The next one does
        put(&wal, "c", "3");
        let segments = wal.segments();
        assert_eq!(segments.len(), 2);
        assert!(segments[0].is_closed());
        assert!(!segments[1].is_closed());

        let first_meta = segments[0].meta();
        let second_meta = segments[1].meta();
        assert_eq!(first_meta.first_entry_index, 0);
        assert_eq!(first_meta.last_entry_index, 2);
        assert_eq!(second_meta.first_entry_index, 2);
        assert_eq!(second_meta.last_entry_index, 3);
    }

    #[test]
    fn test_lookup_consults_newest_segment_first() {
        let dir = tempdir().unwrap();
        let wal = Wal::open(dir.path(), test_options(2)).unwrap();

        put(&wal, "k", "old");
        put(&wal, "pad", "x");
        put(&wal, "k", "new"); // lands in segment 1

        let record = wal.lookup("k").unwrap().unwrap();
        assert_eq!(record.index, 2);
        assert_eq!(record.command().unwrap().value(), Some("new"));
    }

    #[test]
    fn test_lookup_missing_key() {
        let dir = tempdir().unwrap();
        let wal = Wal::open(dir.path(), test_options(50)).unwrap();

        put(&wal, "a", "1");
        assert!(wal.lookup("missing").unwrap().is_none());
    }

    #[test]
    fn test_lookup_skips_invisible_compacted_segment() {
        let dir = tempdir().unwrap();
        let options = test_options(50);
        let wal = Wal::open(dir.path(), Arc::clone(&options)).unwrap();

        put(&wal, "k", "real");

        // A compacted segment mid-build is not yet observable
        let mut meta = SegmentMeta::new(0, 0);
        meta.is_compacted_segment = true;
        let shadow = Arc::new(Segment::open(dir.path(), meta, &options));
        let mut record = Record::from_command(&Command::set("k", "shadow").unwrap()).unwrap();
        record.index = 0;
        shadow.append(record, Some(0)).unwrap();
        wal.register_segment(Arc::clone(&shadow)).unwrap();

        let record = wal.lookup("k").unwrap().unwrap();
        assert_eq!(record.command().unwrap().value(), Some("real"));
    }

    #[test]
    fn test_read_all_indices_non_decreasing() {
        let dir = tempdir().unwrap();
        let wal = Wal::open(dir.path(), test_options(2)).unwrap();

        for i in 0..7 {
            put(&wal, &format!("k{}", i), &format!("v{}", i));
        }

        let records = wal.read_all().unwrap();
        assert_eq!(records.len(), 7);
        for pair in records.windows(2) {
            assert!(pair[0].index <= pair[1].index);
        }
    }

    #[test]
    fn test_reopen_restores_state() {
        let dir = tempdir().unwrap();

        {
            let wal = Wal::open(dir.path(), test_options(2)).unwrap();
            put(&wal, "a", "1");
            put(&wal, "b", "2");
            put(&wal, "c", "3");
            wal.close().unwrap();
        }

        let wal = Wal::open(dir.path(), test_options(2)).unwrap();
        assert_eq!(wal.segments().len(), 2);

        // Indices continue where they left off
        assert_eq!(put(&wal, "d", "4"), 3);

        let record = wal.lookup("a").unwrap().unwrap();
        assert_eq!(record.command().unwrap().value(), Some("1"));
    }

    #[test]
    fn test_orphan_segment_file_removed_on_open() {
        let dir = tempdir().unwrap();

        {
            let wal = Wal::open(dir.path(), test_options(50)).unwrap();
            put(&wal, "a", "1");
            wal.close().unwrap();
        }

        let orphan = filename::segment_file_path(dir.path(), 9, "dead-beef");
        std::fs::write(&orphan, "{\"index\":0}\n").unwrap();

        let _wal = Wal::open(dir.path(), test_options(50)).unwrap();
        assert!(!orphan.exists());
    }

    #[test]
    fn test_retire_segment_unlinks_file() {
        let dir = tempdir().unwrap();
        let wal = Wal::open(dir.path(), test_options(2)).unwrap();

        put(&wal, "a", "1");
        put(&wal, "b", "2");
        put(&wal, "c", "3");

        let segments = wal.segments();
        let sealed = &segments[0];
        let path = sealed.path().to_path_buf();
        assert!(path.exists());

        wal.retire_segment(&sealed.id()).unwrap();
        assert!(!path.exists());
        assert_eq!(wal.segments().len(), 1);
    }
}

//! WAL segments.
//!
//! A segment is one append-only file of newline-delimited records plus the
//! metadata describing it. Each segment owns an in-memory hash index
//! mapping every key it contains to the byte offset of the newest record
//! for that key within the file.
//!
//! # Locking
//!
//! The writer mutex is the segment's exclusive write lock: it protects the
//! file handle, the buffered writer, and all metadata / hash-index
//! mutation. Point reads never take it; closed segments are immutable, so
//! readers resolve an offset through the hash index and then read the file
//! lock-free.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::options::{Options, SyncMode};
use crate::util::filename;
use crate::{Error, Result};

use super::record::Record;

/// Metadata describing one segment.
///
/// Persisted in the manifest; field names match the on-disk document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SegmentMeta {
    /// Index of the first record contained.
    pub first_entry_index: u64,

    /// One past the index of the newest auto-assigned record; equal to
    /// `first_entry_index` while the segment is empty.
    pub last_entry_index: u64,

    /// Sealed; no further appends permitted.
    pub closed: bool,

    /// Ordinal of this segment within the WAL.
    pub segment_index: u64,

    /// Creation timestamp; sort tie-break for reused segment indices.
    pub created_at: DateTime<Utc>,

    /// Unique identifier distinguishing segments that transiently share a
    /// segment index during compaction.
    pub id: String,

    /// Produced by the compactor.
    pub is_compacted_segment: bool,

    /// A compacted segment is exposed to readers only once this is set.
    pub compaction_completed: bool,
}

impl SegmentMeta {
    /// Create metadata for a fresh, writable segment.
    pub fn new(segment_index: u64, first_entry_index: u64) -> Self {
        Self {
            first_entry_index,
            last_entry_index: first_entry_index,
            closed: false,
            segment_index,
            created_at: Utc::now(),
            id: Uuid::new_v4().to_string(),
            is_compacted_segment: false,
            compaction_completed: false,
        }
    }

    /// Whether the segment holds its maximum record count.
    pub fn is_at_capacity(&self, capacity: u64) -> bool {
        if self.last_entry_index < self.first_entry_index {
            return false;
        }
        self.last_entry_index - self.first_entry_index >= capacity
    }

    /// Whether readers (and hash-index loading) may observe this segment.
    pub fn is_visible(&self) -> bool {
        !self.is_compacted_segment || self.compaction_completed
    }

    /// Sort key for the manifest ordering.
    pub fn sort_key(&self) -> (u64, DateTime<Utc>) {
        (self.segment_index, self.created_at)
    }
}

/// One append-only segment file plus its in-memory state.
pub struct Segment {
    path: PathBuf,
    capacity: u64,
    sync_mode: SyncMode,
    meta: RwLock<SegmentMeta>,
    hash_index: RwLock<HashMap<String, u64>>,
    writer: Mutex<Option<BufWriter<File>>>,
}

impl Segment {
    /// Open a segment handle for the given metadata.
    ///
    /// The backing file is prepared lazily on first append; reads open
    /// their own short-lived handles.
    pub fn open(data_dir: &Path, meta: SegmentMeta, options: &Options) -> Self {
        let path = filename::segment_file_path(data_dir, meta.segment_index, &meta.id);
        Self {
            path,
            capacity: options.segment_capacity,
            sync_mode: options.sync_mode,
            meta: RwLock::new(meta),
            hash_index: RwLock::new(HashMap::new()),
            writer: Mutex::new(None),
        }
    }

    /// Snapshot the segment metadata.
    pub fn meta(&self) -> SegmentMeta {
        self.meta.read().clone()
    }

    /// The segment's unique id.
    pub fn id(&self) -> String {
        self.meta.read().id.clone()
    }

    /// Whether the segment is sealed.
    pub fn is_closed(&self) -> bool {
        self.meta.read().closed
    }

    /// Whether readers may observe this segment.
    pub fn is_visible(&self) -> bool {
        self.meta.read().is_visible()
    }

    /// Whether the segment holds its maximum record count.
    pub fn is_at_capacity(&self) -> bool {
        self.meta.read().is_at_capacity(self.capacity)
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append a record.
    ///
    /// With `explicit_index` of `None` the record is assigned the
    /// segment's next index and `last_entry_index` advances on success;
    /// the compactor passes the original index to preserve it, which
    /// leaves `last_entry_index` untouched. Returns the index written.
    ///
    /// The byte offset of the record is captured before the write and
    /// recorded in the hash index; the buffered writer is flushed before
    /// the append is reported successful.
    pub fn append(&self, mut record: Record, explicit_index: Option<u64>) -> Result<u64> {
        let mut writer_guard = self.writer.lock();

        {
            let meta = self.meta.read();
            if meta.closed {
                return Err(Error::invariant(format!(
                    "append to closed segment {}",
                    meta.segment_index
                )));
            }
            if meta.is_at_capacity(self.capacity) {
                return Err(Error::invariant(format!(
                    "append to segment {} at capacity {}",
                    meta.segment_index, self.capacity
                )));
            }
        }

        let writer = match writer_guard.take() {
            Some(writer) => writer_guard.insert(writer),
            None => {
                let file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(&self.path)?;
                writer_guard.insert(BufWriter::new(file))
            }
        };

        record.index = match explicit_index {
            Some(index) => index,
            None => self.meta.read().last_entry_index,
        };
        let key = record.key()?;
        let line = record.encode()?;

        // The hash index stores the offset the record lives at in the
        // file, so probe end-of-file before staging the write. Every
        // append flushes, which keeps the probe consistent.
        let offset = writer.get_mut().seek(SeekFrom::End(0))?;

        writer.write_all(&line)?;
        writer.flush()?;
        if self.sync_mode == SyncMode::Always {
            writer.get_ref().sync_data()?;
        }

        if explicit_index.is_none() {
            self.meta.write().last_entry_index += 1;
        }
        self.hash_index.write().insert(key, offset);

        Ok(record.index)
    }

    /// Look up the byte offset of the newest record for `key` in this
    /// segment, if any.
    pub fn lookup_offset(&self, key: &str) -> Option<u64> {
        self.hash_index.read().get(key).copied()
    }

    /// Read the single record whose first byte is at `offset`.
    pub fn read_at(&self, offset: u64) -> Result<Record> {
        let mut file = File::open(&self.path)?;
        file.seek(SeekFrom::Start(offset))?;

        let mut reader = BufReader::new(file);
        let mut line = Vec::new();
        let n = reader.read_until(b'\n', &mut line)?;

        if n == 0 || line.last() != Some(&b'\n') {
            return Err(Error::malformed(format!(
                "no newline-terminated record at offset {} in {}",
                offset,
                self.path.display()
            )));
        }

        Record::decode(&line)
    }

    /// Iterate every record in file order.
    ///
    /// A trailing partial or undecodable line is treated as end-of-file;
    /// a malformed record mid-file is fatal.
    pub fn scan<F>(&self, mut visit: F) -> Result<()>
    where
        F: FnMut(Record) -> Result<()>,
    {
        self.read_records(|_, record| visit(record))
    }

    /// Rebuild the hash index from the file.
    ///
    /// Records are replayed in order, so each key ends up mapped to the
    /// offset of its newest record within the segment.
    pub fn load_hash_index(&self) -> Result<()> {
        let mut index = HashMap::new();
        self.read_records(|offset, record| {
            index.insert(record.key()?, offset);
            Ok(())
        })?;

        *self.hash_index.write() = index;
        Ok(())
    }

    fn read_records<F>(&self, mut visit: F) -> Result<()>
    where
        F: FnMut(u64, Record) -> Result<()>,
    {
        // An unsealed segment may have a writer racing us; hold its write
        // lock so the file is quiescent and flushed. Closed segments are
        // immutable and scan lock-free.
        let _write_guard = if self.is_closed() {
            None
        } else {
            Some(self.writer.lock())
        };
        let meta = self.meta();

        let file = match File::open(&self.path) {
            Ok(file) => file,
            // No appends yet; an empty segment has no backing file.
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };

        let mut reader = BufReader::new(file);
        let mut offset = 0u64;
        let mut line = Vec::new();

        loop {
            line.clear();
            let n = reader.read_until(b'\n', &mut line)?;
            if n == 0 {
                break;
            }
            if line.last() != Some(&b'\n') {
                // Torn final record from an interrupted write.
                break;
            }

            let record = match Record::decode(&line) {
                Ok(record) => record,
                Err(e) => {
                    if reader.fill_buf()?.is_empty() {
                        // Undecodable final line; treat as clean EOF.
                        break;
                    }
                    return Err(e);
                }
            };

            if record.index < meta.first_entry_index || record.index > meta.last_entry_index {
                return Err(Error::invariant(format!(
                    "record index {} outside range [{}, {}] of segment {}",
                    record.index, meta.first_entry_index, meta.last_entry_index, meta.segment_index
                )));
            }

            visit(offset, record)?;
            offset += n as u64;
        }

        Ok(())
    }

    /// Set `last_entry_index` directly.
    ///
    /// Used by the compactor after writing a batch with preserved indices.
    pub fn set_last_entry_index(&self, last_entry_index: u64) {
        self.meta.write().last_entry_index = last_entry_index;
    }

    /// Flush and release the file handle without sealing the segment.
    ///
    /// Used at shutdown; the segment stays appendable after a reopen.
    pub fn release(&self) -> Result<()> {
        let mut writer_guard = self.writer.lock();
        if let Some(writer) = writer_guard.as_mut() {
            writer.flush()?;
            writer.get_ref().sync_data()?;
        }
        *writer_guard = None;
        Ok(())
    }

    /// Seal the segment: flush, release the file, and mark it closed.
    ///
    /// Idempotent.
    pub fn close(&self) -> Result<()> {
        self.release()?;
        self.meta.write().closed = true;
        Ok(())
    }

    /// Mark a compacted segment durable and sealed.
    pub fn finalize_compaction(&self) -> Result<()> {
        self.release()?;
        let mut meta = self.meta.write();
        meta.compaction_completed = true;
        meta.closed = true;
        Ok(())
    }

    /// Unlink the backing file.
    pub fn delete_file(&self) -> Result<()> {
        filename::delete_file(&self.path)?;
        Ok(())
    }
}

impl std::fmt::Debug for Segment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let meta = self.meta();
        f.debug_struct("Segment")
            .field("segment_index", &meta.segment_index)
            .field("id", &meta.id)
            .field("range", &(meta.first_entry_index, meta.last_entry_index))
            .field("closed", &meta.closed)
            .field("compacted", &meta.is_compacted_segment)
            .finish()
    }
}

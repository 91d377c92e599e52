//! Store - the client-facing key-value façade.
//!
//! The Store translates `put`/`get`/`delete` into log appends and
//! hash-index lookups. It owns the WAL and the background compactor, and
//! holds an exclusive lock on the data directory for its lifetime.
//!
//! # Thread Safety
//!
//! The Store is thread-safe and can be shared across threads using Arc.
//! Writes are serialized by the WAL lock; reads run lock-free against
//! immutable closed segments.

use std::fs::{File, OpenOptions};
use std::io::Write as IoWrite;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::info;

use crate::compaction::{CompactionStats, Compactor};
use crate::options::Options;
use crate::util::filename;
use crate::wal::record::{validate_component, Command, Record};
use crate::wal::Wal;
use crate::{Error, Result};

/// The persistent key-value store.
pub struct Store {
    /// Data directory path.
    data_dir: PathBuf,
    /// Store options.
    options: Arc<Options>,
    /// The segmented write-ahead log.
    wal: Arc<Wal>,
    /// Background compactor.
    compactor: Arc<Compactor>,
    /// Lock file handle (kept open to hold the lock).
    _lock_file: File,
    /// Whether the store has been closed.
    closed: AtomicBool,
}

impl Store {
    /// Open a store at the given path with default options.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_options(path, Options::default())
    }

    /// Open a store with custom options.
    pub fn open_with_options(path: impl AsRef<Path>, options: Options) -> Result<Self> {
        options.validate()?;

        let data_dir = path.as_ref().to_path_buf();
        let options = Arc::new(options);

        if !data_dir.exists() {
            if options.create_if_missing {
                filename::create_dir_if_missing(&data_dir)?;
            } else {
                return Err(Error::NotFound(format!(
                    "data directory does not exist: {}",
                    data_dir.display()
                )));
            }
        }

        let lock_file = Self::acquire_lock(&data_dir)?;

        let wal = Arc::new(Wal::open(&data_dir, Arc::clone(&options))?);
        let compactor = Compactor::new(Arc::clone(&wal), Arc::clone(&options));

        if options.auto_compaction {
            compactor.start();
        }

        info!(path = %data_dir.display(), "opened store");

        Ok(Self {
            data_dir,
            options,
            wal,
            compactor,
            _lock_file: lock_file,
            closed: AtomicBool::new(false),
        })
    }

    /// Acquire the data directory lock file.
    fn acquire_lock(data_dir: &Path) -> Result<File> {
        let lock_path = filename::lock_file_path(data_dir);

        let lock_file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&lock_path)
            .map_err(|e| {
                Error::LockError(format!(
                    "failed to open lock file {}: {}",
                    lock_path.display(),
                    e
                ))
            })?;

        #[cfg(unix)]
        {
            use std::os::unix::io::AsRawFd;
            let fd = lock_file.as_raw_fd();
            let result = unsafe { libc::flock(fd, libc::LOCK_EX | libc::LOCK_NB) };
            if result != 0 {
                return Err(Error::LockError(
                    "data directory is locked by another process".to_string(),
                ));
            }
        }

        #[allow(unused_mut)]
        let mut lock_file = lock_file;
        writeln!(lock_file, "segkv lock").ok();

        Ok(lock_file)
    }

    /// Insert or overwrite a key.
    pub fn put(&self, key: &str, value: &str) -> Result<()> {
        self.check_open()?;
        self.check_key(key)?;
        self.check_value(value)?;

        let command = Command::set(key, value)?;
        self.wal.append(&command)?;
        Ok(())
    }

    /// Point lookup. Returns `None` for an unknown or deleted key.
    pub fn get(&self, key: &str) -> Result<Option<String>> {
        self.check_open()?;
        validate_component("key", key)?;
        self.check_key(key)?;

        match self.wal.lookup(key)? {
            None => Ok(None),
            Some(record) => match record.command()? {
                Command::Set { value, .. } => Ok(Some(value)),
                Command::Delete { .. } => Ok(None),
            },
        }
    }

    /// Tombstone a key. Subsequent `get` calls return `None`.
    pub fn delete(&self, key: &str) -> Result<()> {
        self.check_open()?;
        self.check_key(key)?;

        let command = Command::delete(key)?;
        self.wal.append(&command)?;
        Ok(())
    }

    /// Run one synchronous compaction pass.
    ///
    /// An active segment that has reached capacity is sealed first (the
    /// normal roll policy), making it eligible for this pass.
    pub fn compact(&self) -> Result<CompactionStats> {
        self.check_open()?;
        self.wal.maybe_roll()?;
        self.compactor.run_pass()
    }

    /// Error from the most recent background compaction pass, if any.
    pub fn last_compaction_error(&self) -> Option<Error> {
        self.compactor.last_error()
    }

    /// Every record in the log, in manifest order.
    ///
    /// Replaying this sequence reconstructs the full store state; it is
    /// the bulk-read path for callers that materialize their own view.
    pub fn read_log(&self) -> Result<Vec<Record>> {
        self.check_open()?;
        self.wal.read_all()
    }

    /// Store statistics.
    pub fn stats(&self) -> StoreStats {
        let segments: Vec<SegmentInfo> = self
            .wal
            .segments()
            .iter()
            .map(|segment| {
                let meta = segment.meta();
                SegmentInfo {
                    segment_index: meta.segment_index,
                    id: meta.id,
                    first_index: meta.first_entry_index,
                    last_index: meta.last_entry_index,
                    closed: meta.closed,
                    is_compacted: meta.is_compacted_segment,
                    compaction_completed: meta.compaction_completed,
                }
            })
            .collect();

        StoreStats {
            segment_count: segments.len(),
            next_index: segments.last().map(|s| s.last_index).unwrap_or(0),
            segments,
        }
    }

    /// Close the store gracefully: stop the compaction timer (waiting
    /// for an in-flight pass), flush and release every segment file, and
    /// persist the manifest. Idempotent.
    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        self.compactor.stop();
        self.wal.close()?;

        info!(path = %self.data_dir.display(), "closed store");
        Ok(())
    }

    /// Get the data directory path.
    pub fn path(&self) -> &Path {
        &self.data_dir
    }

    fn check_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::StoreClosed);
        }
        Ok(())
    }

    fn check_key(&self, key: &str) -> Result<()> {
        if key.len() > self.options.max_key_size {
            return Err(Error::KeyTooLarge {
                size: key.len(),
                max: self.options.max_key_size,
            });
        }
        Ok(())
    }

    fn check_value(&self, value: &str) -> Result<()> {
        if value.len() > self.options.max_value_size {
            return Err(Error::ValueTooLarge {
                size: value.len(),
                max: self.options.max_value_size,
            });
        }
        Ok(())
    }
}

impl Drop for Store {
    fn drop(&mut self) {
        // Try to close gracefully, ignore errors
        let _ = self.close();
    }
}

/// Store statistics.
#[derive(Debug, Clone)]
pub struct StoreStats {
    /// Number of segments in the manifest.
    pub segment_count: usize,
    /// The index the next record will be assigned.
    pub next_index: u64,
    /// Per-segment metadata snapshots, in manifest order.
    pub segments: Vec<SegmentInfo>,
}

/// Metadata snapshot for a single segment.
#[derive(Debug, Clone)]
pub struct SegmentInfo {
    /// Ordinal within the WAL.
    pub segment_index: u64,
    /// Unique segment id.
    pub id: String,
    /// Index of the first record contained.
    pub first_index: u64,
    /// One past the newest auto-assigned record index.
    pub last_index: u64,
    /// Sealed against further appends.
    pub closed: bool,
    /// Produced by the compactor.
    pub is_compacted: bool,
    /// Durable and visible to readers.
    pub compaction_completed: bool,
}

//! # segkv
//!
//! An embeddable, single-node, persistent key-value store built on a
//! log-structured storage engine.
//!
//! ## Features
//!
//! - **Segmented WAL**: every write lands in a bounded append-only
//!   segment file; segments roll at a fixed record count
//! - **Hash-indexed reads**: each segment keeps an in-memory map from
//!   key to the file offset of its newest record
//! - **Tombstoned deletes**: deletes append a record; readers resolve
//!   them to absence
//! - **Background compaction**: closed segments are periodically
//!   rewritten to hold only live keys, reclaiming space
//! - **Crash recovery**: a persistent manifest plus append-only files
//!   make restart a replay-free metadata load
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use segkv::Store;
//!
//! let store = Store::open("./dat")?;
//!
//! store.put("hello", "world")?;
//! let value = store.get("hello")?;
//! store.delete("hello")?;
//! ```

// Public modules
pub mod error;
pub mod options;

// Internal modules
mod compaction;
mod store;
mod util;
mod wal;

// Re-export main types for convenience
pub use error::{Error, Result};
pub use options::{Options, OptionsBuilder, SyncMode};

// Store
pub use store::{SegmentInfo, Store, StoreStats};

// Log records (useful for bulk reads via `Store::read_log`)
pub use wal::record::{Command, Record, RecordKind};

// Compaction (re-export useful types)
pub use compaction::CompactionStats;

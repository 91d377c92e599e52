//! Error types for segkv.

use std::io;
use thiserror::Error;

/// Result type alias for segkv operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for store operations.
#[derive(Error, Debug, Clone)]
pub enum Error {
    /// I/O error from file operations.
    #[error("I/O error: {0}")]
    Io(String),

    /// Rejected client input (empty key/value, embedded newline).
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Key is too large.
    #[error("key too large: {size} bytes (max: {max})")]
    KeyTooLarge { size: usize, max: usize },

    /// Value is too large.
    #[error("value too large: {size} bytes (max: {max})")]
    ValueTooLarge { size: usize, max: usize },

    /// A log record could not be decoded.
    #[error("malformed record: {0}")]
    MalformedRecord(String),

    /// An engine-level invariant was violated (append to a closed or full
    /// segment, irreconcilable manifest, record index outside its segment
    /// range). Fatal; the engine refuses further operation.
    #[error("engine invariant violated: {0}")]
    EngineInvariant(String),

    /// Resource not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Data directory is locked by another process.
    #[error("lock error: {0}")]
    LockError(String),

    /// The store has been closed.
    #[error("store is closed")]
    StoreClosed,
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::MalformedRecord(err.to_string())
    }
}

impl Error {
    /// Create a malformed-record error with the given message.
    pub fn malformed<S: Into<String>>(msg: S) -> Self {
        Error::MalformedRecord(msg.into())
    }

    /// Create an engine-invariant error.
    pub fn invariant<S: Into<String>>(msg: S) -> Self {
        Error::EngineInvariant(msg.into())
    }

    /// Create an invalid-input error.
    pub fn invalid_input<S: Into<String>>(msg: S) -> Self {
        Error::InvalidInput(msg.into())
    }

    /// Check if this error indicates corrupt on-disk data.
    pub fn is_corruption(&self) -> bool {
        matches!(self, Error::MalformedRecord(_))
    }

    /// Check if this error is a fatal invariant violation.
    pub fn is_invariant(&self) -> bool {
        matches!(self, Error::EngineInvariant(_))
    }

    /// Check if this error came from the I/O layer.
    pub fn is_io(&self) -> bool {
        matches!(self, Error::Io(_))
    }
}

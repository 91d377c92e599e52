//! Log record codec.
//!
//! Records are persisted one per line as self-describing JSON:
//!
//! ```text
//! {"index":3,"entryType":0,"data":"{\"key\":\"a\",\"value\":\"1\"}"}
//! ```
//!
//! The `data` field carries the encoded command payload; the WAL and
//! segment layers treat it as opaque. Newlines delimit records, so keys
//! and values must not contain them.

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// The kind of operation a record describes.
///
/// Encoded on the wire as an integer: 0 = Set, 1 = Delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum RecordKind {
    /// Insert or overwrite a key.
    Set,
    /// Tombstone a key.
    Delete,
}

impl From<RecordKind> for u8 {
    fn from(kind: RecordKind) -> u8 {
        match kind {
            RecordKind::Set => 0,
            RecordKind::Delete => 1,
        }
    }
}

impl TryFrom<u8> for RecordKind {
    type Error = String;

    fn try_from(value: u8) -> std::result::Result<Self, String> {
        match value {
            0 => Ok(RecordKind::Set),
            1 => Ok(RecordKind::Delete),
            other => Err(format!("unknown entry type {}", other)),
        }
    }
}

/// A mutating operation against the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Insert or overwrite `key` with `value`.
    Set { key: String, value: String },
    /// Tombstone `key`.
    Delete { key: String },
}

/// Wire form of a command payload.
#[derive(Debug, Serialize, Deserialize)]
struct Payload {
    key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    value: Option<String>,
}

impl Command {
    /// Build a `Set` command, validating the key and value.
    pub fn set(key: &str, value: &str) -> Result<Self> {
        validate_component("key", key)?;
        validate_component("value", value)?;
        Ok(Command::Set {
            key: key.to_string(),
            value: value.to_string(),
        })
    }

    /// Build a `Delete` command, validating the key.
    pub fn delete(key: &str) -> Result<Self> {
        validate_component("key", key)?;
        Ok(Command::Delete {
            key: key.to_string(),
        })
    }

    /// The key this command operates on.
    pub fn key(&self) -> &str {
        match self {
            Command::Set { key, .. } => key,
            Command::Delete { key } => key,
        }
    }

    /// The value for a `Set`, `None` for a `Delete`.
    pub fn value(&self) -> Option<&str> {
        match self {
            Command::Set { value, .. } => Some(value),
            Command::Delete { .. } => None,
        }
    }

    /// The record kind this command maps to.
    pub fn kind(&self) -> RecordKind {
        match self {
            Command::Set { .. } => RecordKind::Set,
            Command::Delete { .. } => RecordKind::Delete,
        }
    }

    fn to_payload(&self) -> Payload {
        match self {
            Command::Set { key, value } => Payload {
                key: key.clone(),
                value: Some(value.clone()),
            },
            Command::Delete { key } => Payload {
                key: key.clone(),
                value: None,
            },
        }
    }
}

/// Keys and values are non-empty strings with no embedded newline.
pub(crate) fn validate_component(what: &str, s: &str) -> Result<()> {
    if s.is_empty() {
        return Err(Error::invalid_input(format!("{} must not be empty", what)));
    }
    if s.contains('\n') {
        return Err(Error::invalid_input(format!(
            "{} must not contain a newline",
            what
        )));
    }
    Ok(())
}

/// A single log record: the unit persisted to a segment file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    /// Monotonically increasing sequence number, unique across the
    /// lifetime of a database.
    pub index: u64,

    /// Operation kind.
    pub entry_type: RecordKind,

    /// Encoded command payload.
    pub data: String,
}

impl Record {
    /// Build a record from a command.
    ///
    /// The index is a placeholder; the segment assigns the real one at
    /// append time.
    pub fn from_command(command: &Command) -> Result<Self> {
        let data = serde_json::to_string(&command.to_payload())?;
        Ok(Record {
            index: 0,
            entry_type: command.kind(),
            data,
        })
    }

    /// Decode the command payload.
    pub fn command(&self) -> Result<Command> {
        let payload: Payload = serde_json::from_str(&self.data)?;

        match self.entry_type {
            RecordKind::Set => {
                let value = payload.value.ok_or_else(|| {
                    Error::malformed(format!(
                        "set record at index {} is missing a value",
                        self.index
                    ))
                })?;
                Ok(Command::Set {
                    key: payload.key,
                    value,
                })
            }
            RecordKind::Delete => Ok(Command::Delete { key: payload.key }),
        }
    }

    /// Decode just the key from the command payload.
    pub fn key(&self) -> Result<String> {
        let payload: Payload = serde_json::from_str(&self.data)?;
        Ok(payload.key)
    }

    /// Encode the record as a newline-terminated line.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut line = serde_json::to_vec(self)?;
        line.push(b'\n');
        Ok(line)
    }

    /// Decode a record from a line (with or without its terminator).
    pub fn decode(line: &[u8]) -> Result<Self> {
        let line = match line.last() {
            Some(b'\n') => &line[..line.len() - 1],
            _ => line,
        };
        Ok(serde_json::from_slice(line)?)
    }
}

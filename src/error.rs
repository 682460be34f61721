//! Error types for tilestore
//!
//! A single error enum covers every fallible path of the storage and transaction core.
//! Write-write conflicts are ordinary values: the caller decides whether to restart the
//! transaction. Protocol misuse (e.g. updating a slot the caller does not own) is an
//! assertion failure instead and never shows up here.

use std::fmt;
use std::io;

use crate::types::{ItemPointer, Oid};

/// Unified error type for storage and transaction operations
#[derive(Debug)]
pub enum StorageError {
    /// Ownership could not be acquired; the transaction must abort
    Conflict(String),
    /// No free slot and no replacement tile group could be allocated
    StorageFull(String),
    /// Tile group id is not registered (dropped or never created)
    TileGroupNotFound(Oid),
    /// Table lookup failed
    TableNotFound(String),
    /// Table name already in use
    TableExists(String),
    /// Value does not fit the column type
    Type(String),
    /// Transaction lifecycle error
    Transaction(String),
    /// I/O error (WAL, config files)
    Io(io::Error),
    /// JSON error (config files)
    Json(String),
    /// Encoding error (WAL frames)
    Encoding(String),
    /// Invalid configuration
    Config(String),
}

impl StorageError {
    /// Write-write conflict on a tuple version
    pub fn write_conflict(location: ItemPointer) -> Self {
        StorageError::Conflict(format!(
            "Write conflict on tuple ({}, {})",
            location.block, location.offset
        ))
    }

    /// Tile group refused a new slot and the table may not grow further
    pub fn table_full(table: &str, tile_groups: usize) -> Self {
        StorageError::StorageFull(format!(
            "Table '{}' is full ({} tile groups)",
            table, tile_groups
        ))
    }

    /// True for errors that mean "abort and retry the whole transaction"
    pub fn is_conflict(&self) -> bool {
        matches!(self, StorageError::Conflict(_))
    }
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::Conflict(msg) => write!(f, "{}", msg),
            StorageError::StorageFull(msg) => write!(f, "{}", msg),
            StorageError::TileGroupNotFound(id) => write!(f, "Tile group {} not found", id),
            StorageError::TableNotFound(name) => write!(f, "Table '{}' doesn't exist", name),
            StorageError::TableExists(name) => write!(f, "Table '{}' already exists", name),
            StorageError::Type(msg) => write!(f, "{}", msg),
            StorageError::Transaction(msg) => write!(f, "{}", msg),
            StorageError::Io(e) => write!(f, "{}", e),
            StorageError::Json(msg) => write!(f, "{}", msg),
            StorageError::Encoding(msg) => write!(f, "{}", msg),
            StorageError::Config(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for StorageError {}

impl From<io::Error> for StorageError {
    fn from(e: io::Error) -> Self {
        StorageError::Io(e)
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(e: serde_json::Error) -> Self {
        StorageError::Json(e.to_string())
    }
}

impl From<bincode::Error> for StorageError {
    fn from(e: bincode::Error) -> Self {
        StorageError::Encoding(e.to_string())
    }
}

/// Result type alias for tilestore operations
pub type Result<T> = std::result::Result<T, StorageError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conflict_is_recognised() {
        let err = StorageError::write_conflict(ItemPointer::new(3, 7));
        assert!(err.is_conflict());
        assert_eq!(err.to_string(), "Write conflict on tuple (3, 7)");
        assert!(!StorageError::TileGroupNotFound(1).is_conflict());
    }

    #[test]
    fn test_display_messages() {
        assert_eq!(
            StorageError::TableNotFound("accounts".into()).to_string(),
            "Table 'accounts' doesn't exist"
        );
        assert_eq!(
            StorageError::table_full("accounts", 4).to_string(),
            "Table 'accounts' is full (4 tile groups)"
        );
    }

    #[test]
    fn test_from_io_error() {
        let err: StorageError = io::Error::new(io::ErrorKind::NotFound, "gone").into();
        assert!(matches!(err, StorageError::Io(_)));
    }
}

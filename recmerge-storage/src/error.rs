//! Error types for the storage layer.

use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur in storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Database error from SQLite.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Record not found.
    #[error("record not found: {0}")]
    NotFound(String),

    /// No schema registered for the entity type.
    #[error("unknown entity type: {0}")]
    UnknownEntityType(String),

    /// Table or column name that cannot be used as an SQL identifier.
    #[error("invalid identifier: {0}")]
    InvalidIdentifier(String),

    /// Invalid data.
    #[error("invalid data: {0}")]
    InvalidData(String),

    /// Transaction bookkeeping error (e.g. commit without begin).
    #[error("transaction error: {0}")]
    Transaction(String),

    /// The connection mutex was poisoned by a panicking writer.
    #[error("connection lock poisoned")]
    Lock,
}

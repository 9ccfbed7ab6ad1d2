//! Error types for the merge engine.

use recmerge_model::{Record, RelationKind};
use recmerge_storage::StorageError;
use thiserror::Error;

/// Result type for merge operations.
pub type MergeResult<T> = Result<T, MergeError>;

/// Errors that can occur while previewing or performing a merge.
#[derive(Debug, Error)]
pub enum MergeError {
    /// No source record was supplied.
    #[error("no source record was given for the merge")]
    NoSource,

    /// No target record was supplied.
    #[error("no target record was given for the merge")]
    NoTarget,

    /// Source and target are of different entity types.
    #[error(
        "the source record [{}] and target record [{}] are not the same entity type",
        .source_record.entity_type,
        .target_record.entity_type
    )]
    TypeMismatch {
        source_record: Box<Record>,
        target_record: Box<Record>,
    },

    /// Source and target are the same record.
    #[error(
        "the source record and the target record are the same ({}:{})",
        .source_record.entity_type,
        .source_record.key
    )]
    IdenticalRecord {
        source_record: Box<Record>,
        target_record: Box<Record>,
    },

    /// A discovered relationship kind has neither a handler nor a skip marker.
    #[error("a relationship handler for {kind} (relationship `{relationship}`) could not be found")]
    MissingHandler {
        kind: RelationKind,
        relationship: String,
    },

    /// A relationship declaration lacks a column its handler needs.
    #[error("relationship `{relationship}` cannot be handled: {reason}")]
    InvalidRelation { relationship: String, reason: String },

    /// Failure from the backing store; the merge transaction is rolled back.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// An audit logger failed; the merge transaction is rolled back.
    #[error("merge logger `{logger}` failed: {message}")]
    Logger { logger: String, message: String },

    /// The after-merge callback failed; the merge transaction is rolled back.
    #[error("after-merge callback failed: {0}")]
    Callback(String),

    /// A job for the same source/target pair is already in flight.
    #[error("a merge for {0} is already queued")]
    AlreadyQueued(String),

    /// The merge task panicked or was cancelled.
    #[error("merge task failed: {0}")]
    Task(String),

    /// Settings could not be read or parsed.
    #[error("invalid merge settings: {0}")]
    Settings(String),
}

impl MergeError {
    /// True for the errors raised by validation, before anything is written.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::NoSource | Self::NoTarget | Self::TypeMismatch { .. } | Self::IdenticalRecord { .. }
        )
    }
}

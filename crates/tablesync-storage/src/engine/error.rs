//! Storage error types.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Why a store refused one row of a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// The supplied concurrency token no longer matches the stored row.
    PreconditionFailed,
    /// An insert targeted a row that already exists.
    EntityAlreadyExists,
    /// A conditional write targeted a row that does not exist.
    EntityNotFound,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PreconditionFailed => write!(f, "precondition failed"),
            Self::EntityAlreadyExists => write!(f, "entity already exists"),
            Self::EntityNotFound => write!(f, "entity not found"),
        }
    }
}

/// Errors that can occur in storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The store could not be opened.
    #[error("failed to open store: {0}")]
    Open(String),

    /// A table does not exist and auto-creation is disabled.
    #[error("table not found: {0}")]
    TableNotFound(String),

    /// A partition key or row key cannot be stored.
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// A store transaction could not be started or finished.
    #[error("transaction error: {0}")]
    Transaction(String),

    /// A batch was refused; none of its operations were applied.
    #[error("batch rejected at operation {index} (row '{row_key}'): {reason}")]
    BatchRejected {
        /// Position of the first failing operation in the submitted batch.
        index: usize,
        /// Row key of the first failing operation.
        row_key: String,
        /// Why the row was refused.
        reason: RejectReason,
    },

    /// A batch exceeds the store's atomic batch limits.
    #[error("batch too large: {operations} operations, {bytes} bytes")]
    BatchTooLarge {
        /// Number of operations submitted.
        operations: usize,
        /// Serialized payload size submitted.
        bytes: usize,
    },

    /// The deadline expired before the store acknowledged the batch.
    ///
    /// The batch may or may not have been applied.
    #[error("store did not respond within {elapsed:?}")]
    Timeout {
        /// Time spent waiting for the store.
        elapsed: Duration,
    },

    /// The connection to the store failed mid-request.
    ///
    /// Like [`StorageError::Timeout`], the outcome of the request is unknown.
    #[error("transport error: {0}")]
    Transport(String),

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A serialization error occurred.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// An internal error occurred in the backend.
    #[error("internal storage error: {0}")]
    Internal(String),
}

impl StorageError {
    /// Returns `true` if the outcome of the failed request is unknown.
    #[must_use]
    pub const fn is_ambiguous(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Transport(_))
    }
}

/// Result type alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

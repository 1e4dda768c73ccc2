//! Error types for `tablesync`.
//!
//! This module provides the [`SessionError`] type returned by every session,
//! registry and accumulator operation.

use std::time::Duration;

use tablesync_storage::{RejectReason, StorageError};
use thiserror::Error;

use crate::operation::OperationKind;

/// Errors that can occur while coordinating a shared batch.
#[derive(Debug, Error)]
pub enum SessionError {
    /// An operation or session targets a different partition than the one the
    /// unit of work is bound to.
    #[error("partition mismatch: unit of work is bound to '{bound}', got '{requested}'")]
    PartitionMismatch {
        /// The partition the unit of work is bound to.
        bound: String,
        /// The partition that was requested.
        requested: String,
    },

    /// Two enlisted operations target the same row incompatibly.
    #[error("cannot enlist {attempted} of row '{row_key}': {pending} already pending")]
    ConflictingOperation {
        /// The contested row.
        row_key: String,
        /// Kind of the operation already in the batch.
        pending: OperationKind,
        /// Kind of the operation that was refused.
        attempted: OperationKind,
    },

    /// The batch would exceed the atomic batch bounds.
    #[error(
        "batch limit exceeded: {operations} operations / {bytes} bytes \
         (limits {max_operations} / {max_bytes})"
    )]
    BatchLimitExceeded {
        /// Operation count the batch would reach.
        operations: usize,
        /// Payload size the batch would reach.
        bytes: usize,
        /// Maximum operation count.
        max_operations: usize,
        /// Maximum payload size.
        max_bytes: usize,
    },

    /// An update, delete or replace was built without a token from a prior read.
    #[error("{kind} of row '{row_key}' requires a concurrency token from a prior read")]
    MissingConcurrencyToken {
        /// Kind of the malformed operation.
        kind: OperationKind,
        /// Row the operation targets.
        row_key: String,
    },

    /// The store refused the batch because a row changed since it was read.
    /// Nothing was written.
    #[error("optimistic concurrency conflict on row '{row_key}' (operation {index}): {reason}")]
    OptimisticConcurrencyConflict {
        /// Row key of the first failing operation.
        row_key: String,
        /// Position of the first failing operation in the batch.
        index: usize,
        /// Why the store refused the row.
        reason: RejectReason,
    },

    /// The store did not acknowledge the commit in time.
    /// The batch may or may not have been applied.
    #[error("commit timed out after {elapsed:?}; the batch may have been applied")]
    CommitTimeout {
        /// Time spent waiting for the store.
        elapsed: Duration,
    },

    /// The connection failed during commit.
    /// The batch may or may not have been applied.
    #[error("transport failure during commit; the batch may have been applied: {0}")]
    Transport(String),

    /// The session already reached `Committed` or `Aborted`.
    #[error("session already completed")]
    SessionAlreadyCompleted,

    /// The session has not been opened yet.
    #[error("session is not open")]
    SessionNotOpen,

    /// A partition key, row key or table name violates the key rules.
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// Any other storage failure.
    #[error("storage error: {0}")]
    Storage(StorageError),

    /// An internal lock was poisoned (a thread panicked while holding it).
    #[error("internal error: {0}")]
    Internal(String),
}

impl SessionError {
    /// Returns `true` if re-running the whole unit of work from scratch may
    /// succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::OptimisticConcurrencyConflict { .. })
    }

    /// Returns `true` if the outcome of a commit is unknown and the affected
    /// rows must be re-read before any retry.
    #[must_use]
    pub const fn is_ambiguous(&self) -> bool {
        matches!(self, Self::CommitTimeout { .. } | Self::Transport(_))
    }
}

impl From<StorageError> for SessionError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::BatchRejected { index, row_key, reason } => {
                Self::OptimisticConcurrencyConflict { row_key, index, reason }
            }
            StorageError::Timeout { elapsed } => Self::CommitTimeout { elapsed },
            StorageError::Transport(msg) => Self::Transport(msg),
            StorageError::InvalidKey(msg) => Self::InvalidKey(msg),
            other => Self::Storage(other),
        }
    }
}

/// Result type alias for session operations.
pub type SessionResult<T> = Result<T, SessionError>;

//! `tablesync` - Shared transactional batches over partitioned table stores
//!
//! This crate lets several independent collaborators handling one logical
//! unit of work (for example a saga step and an outbox writer processing the
//! same message) accumulate their row operations into one shared batch that
//! is committed atomically against a single partition of a table store.
//!
//! # Overview
//!
//! - A [`PartitionKeyDescriptor`] names the partition a unit of work writes to
//! - Each collaborator opens a [`SynchronizedStorageSession`] through the
//!   [`SessionManager`] and enlists [`Operation`]s
//! - Sessions of the same [`WorkId`] share one [`BatchAccumulator`]
//! - [`SynchronizedStorageSession::complete`] submits the batch; either every
//!   operation is applied or none is
//!
//! Conditional operations carry the concurrency token observed when the row
//! was read. A row that changed in the meantime makes the whole batch fail
//! with [`SessionError::OptimisticConcurrencyConflict`].
//!
//! # Error Handling
//!
//! All operations return [`SessionResult<T>`], which is an alias for
//! `Result<T, SessionError>`. Use [`SessionError::is_retryable`] and
//! [`SessionError::is_ambiguous`] to decide whether a unit of work can be
//! re-run or must first re-read its rows.
//!
//! # Modules
//!
//! - [`partition`] - Partition key descriptors
//! - [`operation`] - Row operations
//! - [`session`] - Accumulators, the registry and sessions
//! - [`error`] - Error types

#![deny(clippy::unwrap_used)]

pub mod error;
pub mod operation;
pub mod partition;
pub mod session;

pub use error::{SessionError, SessionResult};
pub use operation::{Operation, OperationKind};
pub use partition::PartitionKeyDescriptor;
pub use session::{
    BatchAccumulator, CommittedRow, SessionConfig, SessionManager, SessionState, SharedBatch,
    SharedContextRegistry, SynchronizedStorageSession, WorkId,
};

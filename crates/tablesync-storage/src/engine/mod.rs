//! Table-store traits and abstractions.
//!
//! This module defines the contract storage backends implement:
//!
//! - [`TableStore`] - point reads, partition scans and atomic single-partition batches
//! - [`BatchOp`] - one conditional row mutation inside a batch
//! - [`BatchLimits`] - the count and size bounds of one atomic batch
//!
//! # Error Handling
//!
//! All operations return [`StorageResult<T>`] which is an alias for
//! `Result<T, StorageError>`. See [`StorageError`] for the possible error variants.

pub mod batch;
mod error;
mod traits;

pub use error::{RejectReason, StorageError, StorageResult};
pub use traits::{
    BatchLimits, BatchOp, TableStore, DEFAULT_MAX_BATCH_BYTES, DEFAULT_MAX_BATCH_OPERATIONS,
};

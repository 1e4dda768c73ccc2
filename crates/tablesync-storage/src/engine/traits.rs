//! The table-store contract.
//!
//! [`TableStore`] is what the batch coordination layer talks to. It is
//! object-safe so a backend can be chosen at configuration time and shared
//! as `Arc<dyn TableStore>`.

use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use super::{StorageError, StorageResult};
use crate::types::{ConcurrencyToken, Properties, StoredEntity};

/// Default maximum number of operations in one atomic batch.
pub const DEFAULT_MAX_BATCH_OPERATIONS: usize = 100;

/// Default maximum serialized payload of one atomic batch (4 MiB).
pub const DEFAULT_MAX_BATCH_BYTES: usize = 4 * 1024 * 1024;

/// Atomic batch bounds enforced by a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchLimits {
    /// Maximum number of operations per batch.
    pub max_operations: usize,
    /// Maximum serialized payload size per batch, in bytes.
    pub max_payload_bytes: usize,
}

impl Default for BatchLimits {
    fn default() -> Self {
        Self { max_operations: DEFAULT_MAX_BATCH_OPERATIONS, max_payload_bytes: DEFAULT_MAX_BATCH_BYTES }
    }
}

impl BatchLimits {
    /// Create limits with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum operation count.
    #[must_use]
    pub const fn max_operations(mut self, count: usize) -> Self {
        self.max_operations = count;
        self
    }

    /// Set the maximum payload size.
    #[must_use]
    pub const fn max_payload_bytes(mut self, bytes: usize) -> Self {
        self.max_payload_bytes = bytes;
        self
    }

    /// The tighter of two sets of limits.
    #[must_use]
    pub fn min(self, other: Self) -> Self {
        Self {
            max_operations: self.max_operations.min(other.max_operations),
            max_payload_bytes: self.max_payload_bytes.min(other.max_payload_bytes),
        }
    }
}

/// One row mutation inside an atomic batch.
///
/// Every operation except [`BatchOp::Insert`] is conditional on `if_match`
/// equalling the row's current token.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum BatchOp {
    /// Create a row; fails if the row exists.
    Insert {
        /// Row key.
        row_key: String,
        /// Properties of the new row.
        properties: Properties,
    },
    /// Merge properties into an existing row.
    Merge {
        /// Row key.
        row_key: String,
        /// Properties to add or overwrite.
        properties: Properties,
        /// Token the row must currently carry.
        if_match: ConcurrencyToken,
    },
    /// Replace all properties of an existing row.
    Replace {
        /// Row key.
        row_key: String,
        /// The new property bag.
        properties: Properties,
        /// Token the row must currently carry.
        if_match: ConcurrencyToken,
    },
    /// Remove an existing row.
    Delete {
        /// Row key.
        row_key: String,
        /// Token the row must currently carry.
        if_match: ConcurrencyToken,
    },
}

impl BatchOp {
    /// The row this operation targets.
    #[must_use]
    pub fn row_key(&self) -> &str {
        match self {
            Self::Insert { row_key, .. }
            | Self::Merge { row_key, .. }
            | Self::Replace { row_key, .. }
            | Self::Delete { row_key, .. } => row_key,
        }
    }

    /// Short name used in logs.
    #[must_use]
    pub const fn verb(&self) -> &'static str {
        match self {
            Self::Insert { .. } => "insert",
            Self::Merge { .. } => "merge",
            Self::Replace { .. } => "replace",
            Self::Delete { .. } => "delete",
        }
    }

    /// Serialized size of this operation, counted against
    /// [`BatchLimits::max_payload_bytes`].
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Serialization`] if the operation cannot be encoded.
    pub fn payload_size(&self) -> StorageResult<usize> {
        bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map(|bytes| bytes.len())
            .map_err(|e| StorageError::Serialization(e.to_string()))
    }
}

/// A partitioned table store supporting atomic single-partition batches.
///
/// Implementations must be thread-safe (`Send + Sync`).
///
/// # Example
///
/// ```ignore
/// use tablesync_storage::{BatchOp, TableStore};
///
/// fn bump<S: TableStore + ?Sized>(store: &S) -> StorageResult<()> {
///     let row = store.read("sagas", "order-42", "saga")?.expect("saga exists");
///     let ops = [BatchOp::Merge {
///         row_key: "saga".into(),
///         properties: Properties::new(),
///         if_match: row.token,
///     }];
///     store.submit_batch("sagas", "order-42", &ops, None)?;
///     Ok(())
/// }
/// ```
pub trait TableStore: Send + Sync {
    /// Read one row and its current token.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::TableNotFound`] if the table does not exist and
    /// cannot be created.
    fn read(&self, table: &str, partition_key: &str, row_key: &str) -> StorageResult<Option<StoredEntity>>;

    /// Read every row of a partition, ordered by row key.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::TableNotFound`] if the table does not exist and
    /// cannot be created.
    fn query_partition(&self, table: &str, partition_key: &str) -> StorageResult<Vec<StoredEntity>>;

    /// Apply `ops` to one partition as a single atomic unit.
    ///
    /// Either every operation takes effect or none does. On success the result
    /// holds one entry per operation, in submission order: the row's new token,
    /// or `None` for deletes.
    ///
    /// `deadline` bounds how long the caller is prepared to wait. When it
    /// expires the store answers [`StorageError::Timeout`] and the batch may or
    /// may not have been applied.
    ///
    /// # Errors
    ///
    /// - [`StorageError::BatchRejected`] naming the first row whose condition failed
    /// - [`StorageError::BatchTooLarge`] if the batch exceeds [`TableStore::limits`]
    /// - [`StorageError::Timeout`] / [`StorageError::Transport`] on ambiguous outcomes
    fn submit_batch(
        &self,
        table: &str,
        partition_key: &str,
        ops: &[BatchOp],
        deadline: Option<Instant>,
    ) -> StorageResult<Vec<Option<ConcurrencyToken>>>;

    /// The atomic batch bounds of this store.
    fn limits(&self) -> BatchLimits;

    /// Check whether a table exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be queried.
    fn table_exists(&self, table: &str) -> StorageResult<bool>;

    /// Create a table if it does not exist yet.
    ///
    /// # Errors
    ///
    /// Returns an error if the table name is invalid or the store cannot be written.
    fn ensure_table(&self, table: &str) -> StorageResult<()>;

    /// Flush buffered data to durable storage.
    ///
    /// The default implementation does nothing, as most backends make batches
    /// durable on commit.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Io`] if the flush fails.
    fn flush(&self) -> StorageResult<()> {
        Ok(())
    }
}

// ============================================================================
// Blanket Implementations
// ============================================================================

/// Implement `TableStore` for `Arc<S>` so shared handles (including
/// `Arc<dyn TableStore>`) can be passed wherever a store is expected.
impl<S: TableStore + ?Sized> TableStore for Arc<S> {
    fn read(&self, table: &str, partition_key: &str, row_key: &str) -> StorageResult<Option<StoredEntity>> {
        (**self).read(table, partition_key, row_key)
    }

    fn query_partition(&self, table: &str, partition_key: &str) -> StorageResult<Vec<StoredEntity>> {
        (**self).query_partition(table, partition_key)
    }

    fn submit_batch(
        &self,
        table: &str,
        partition_key: &str,
        ops: &[BatchOp],
        deadline: Option<Instant>,
    ) -> StorageResult<Vec<Option<ConcurrencyToken>>> {
        (**self).submit_batch(table, partition_key, ops, deadline)
    }

    fn limits(&self) -> BatchLimits {
        (**self).limits()
    }

    fn table_exists(&self, table: &str) -> StorageResult<bool> {
        (**self).table_exists(table)
    }

    fn ensure_table(&self, table: &str) -> StorageResult<()> {
        (**self).ensure_table(table)
    }

    fn flush(&self) -> StorageResult<()> {
        (**self).flush()
    }
}

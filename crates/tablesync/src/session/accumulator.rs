//! Pending operations for one unit of work.
//!
//! A [`BatchAccumulator`] collects the operations every collaborator of a unit
//! of work enlists and submits them as one atomic store batch.
//!
//! # Duplicate rows
//!
//! The store accepts at most one operation per row in a batch. When a second
//! operation targets a row that is already pending:
//!
//! - an update following an update with the same token is merged into the
//!   pending one (later property values win, the count is unchanged);
//! - every other combination is refused with
//!   [`SessionError::ConflictingOperation`] and the batch is left unchanged.

use std::collections::HashMap;
use std::time::Instant;

use tablesync_storage::engine::batch::validate_key;
use tablesync_storage::{BatchLimits, BatchOp, ConcurrencyToken, TableStore};
use tracing::{debug, info, warn};

use crate::error::{SessionError, SessionResult};
use crate::operation::Operation;
use crate::partition::PartitionKeyDescriptor;

/// The outcome of one committed operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommittedRow {
    /// Row the operation targeted.
    pub row_key: String,
    /// Token the row carries after the commit; `None` for deletes.
    pub token: Option<ConcurrencyToken>,
}

/// Ordered, partition-bound collection of pending operations.
#[derive(Debug)]
pub struct BatchAccumulator {
    partition: PartitionKeyDescriptor,
    limits: BatchLimits,
    ops: Vec<Operation>,
    sizes: Vec<usize>,
    positions: HashMap<String, usize>,
    payload_bytes: usize,
}

impl BatchAccumulator {
    /// Create an empty accumulator bound to `partition`.
    #[must_use]
    pub fn new(partition: PartitionKeyDescriptor, limits: BatchLimits) -> Self {
        Self { partition, limits, ops: Vec::new(), sizes: Vec::new(), positions: HashMap::new(), payload_bytes: 0 }
    }

    /// The partition every operation must target.
    #[must_use]
    pub const fn partition(&self) -> &PartitionKeyDescriptor {
        &self.partition
    }

    /// The bounds this accumulator enforces.
    #[must_use]
    pub const fn limits(&self) -> BatchLimits {
        self.limits
    }

    /// Number of pending operations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// Returns `true` if nothing is pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Total serialized size of the pending operations.
    #[must_use]
    pub const fn payload_bytes(&self) -> usize {
        self.payload_bytes
    }

    /// Pending operations in registration order.
    #[must_use]
    pub fn operations(&self) -> &[Operation] {
        &self.ops
    }

    /// Add an operation to the batch.
    ///
    /// On error the accumulator is left exactly as it was.
    ///
    /// # Errors
    ///
    /// - [`SessionError::PartitionMismatch`] if the operation targets another partition
    /// - [`SessionError::InvalidKey`] if the row key is not allowed by the store
    /// - [`SessionError::ConflictingOperation`] if the row is already pending and cannot be merged
    /// - [`SessionError::BatchLimitExceeded`] if the batch would exceed its bounds
    pub fn register(&mut self, op: Operation) -> SessionResult<()> {
        if op.partition_key() != self.partition.partition_key() {
            return Err(SessionError::PartitionMismatch {
                bound: self.partition.to_string(),
                requested: format!("{}/{}", self.partition.table(), op.partition_key()),
            });
        }
        validate_key("row key", op.row_key())?;

        if let Some(&position) = self.positions.get(op.row_key()) {
            return self.merge_into(position, &op);
        }

        let size = op.payload_size()?;
        self.check_limits(self.ops.len() + 1, self.payload_bytes + size)?;

        debug!(partition = %self.partition, row_key = op.row_key(), kind = %op.kind(), "enlisted operation");
        self.positions.insert(op.row_key().to_string(), self.ops.len());
        self.ops.push(op);
        self.sizes.push(size);
        self.payload_bytes += size;
        Ok(())
    }

    fn merge_into(&mut self, position: usize, op: &Operation) -> SessionResult<()> {
        let pending = &self.ops[position];
        if !pending.can_merge(op) {
            return Err(SessionError::ConflictingOperation {
                row_key: op.row_key().to_string(),
                pending: pending.kind(),
                attempted: op.kind(),
            });
        }

        let merged = pending.merged_with(op);
        let size = merged.payload_size()?;
        let total = self.payload_bytes - self.sizes[position] + size;
        self.check_limits(self.ops.len(), total)?;

        debug!(partition = %self.partition, row_key = op.row_key(), "merged update into pending operation");
        self.ops[position] = merged;
        self.sizes[position] = size;
        self.payload_bytes = total;
        Ok(())
    }

    fn check_limits(&self, operations: usize, bytes: usize) -> SessionResult<()> {
        if operations > self.limits.max_operations || bytes > self.limits.max_payload_bytes {
            return Err(SessionError::BatchLimitExceeded {
                operations,
                bytes,
                max_operations: self.limits.max_operations,
                max_bytes: self.limits.max_payload_bytes,
            });
        }
        Ok(())
    }

    /// Submit the pending operations to `store` as one atomic batch.
    ///
    /// An empty accumulator commits trivially without calling the store. On
    /// success the accumulator is cleared and one [`CommittedRow`] is returned
    /// per operation, in registration order. On failure the pending
    /// operations are kept and nothing is retried.
    ///
    /// # Errors
    ///
    /// - [`SessionError::OptimisticConcurrencyConflict`] if the store refused a row; nothing was written
    /// - [`SessionError::CommitTimeout`] or [`SessionError::Transport`] if the outcome is unknown
    /// - [`SessionError::Storage`] for any other store failure
    /// - [`SessionError::Internal`] if the store reports a token count that does not match the batch
    pub fn commit<S: TableStore + ?Sized>(
        &mut self,
        store: &S,
        deadline: Option<Instant>,
    ) -> SessionResult<Vec<CommittedRow>> {
        if self.ops.is_empty() {
            return Ok(Vec::new());
        }

        let batch: Vec<BatchOp> = self.ops.iter().map(Operation::to_batch_op).collect();
        let tokens = store
            .submit_batch(self.partition.table(), self.partition.partition_key(), &batch, deadline)
            .map_err(|e| {
                warn!(partition = %self.partition, operations = batch.len(), error = %e, "batch commit failed");
                SessionError::from(e)
            })?;

        if tokens.len() != self.ops.len() {
            return Err(SessionError::Internal(format!(
                "store returned {} tokens for {} operations",
                tokens.len(),
                self.ops.len()
            )));
        }

        let rows = self
            .ops
            .iter()
            .zip(tokens)
            .map(|(op, token)| CommittedRow { row_key: op.row_key().to_string(), token })
            .collect();

        info!(
            partition = %self.partition,
            operations = batch.len(),
            bytes = self.payload_bytes,
            "committed batch"
        );
        self.clear();
        Ok(rows)
    }

    /// Discard every pending operation without touching the store.
    pub fn abort(&mut self) {
        if !self.ops.is_empty() {
            debug!(partition = %self.partition, operations = self.ops.len(), "discarded pending operations");
        }
        self.clear();
    }

    fn clear(&mut self) {
        self.ops.clear();
        self.sizes.clear();
        self.positions.clear();
        self.payload_bytes = 0;
    }
}

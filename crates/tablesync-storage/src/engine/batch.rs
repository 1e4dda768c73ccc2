//! Batch checks shared by all backends.
//!
//! Backends stage a batch by feeding each operation and the row it targets
//! through [`apply_op`]. The first error aborts the whole batch, so a backend
//! only writes the staged rows once every operation has passed.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use super::{BatchLimits, BatchOp, RejectReason, StorageError, StorageResult};
use crate::types::{ConcurrencyToken, Properties};

/// Maximum size of a partition or row key, in bytes.
pub const MAX_KEY_BYTES: usize = 1024;

/// A row as persisted by a backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRow {
    /// Token of the current row version.
    pub token: ConcurrencyToken,
    /// Current properties.
    pub properties: Properties,
}

impl StoredRow {
    /// Encode for a byte-oriented backend.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Serialization`] if encoding fails.
    pub fn encode(&self) -> StorageResult<Vec<u8>> {
        bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| StorageError::Serialization(e.to_string()))
    }

    /// Decode a row written by [`StoredRow::encode`].
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Serialization`] if the bytes are not a valid row.
    pub fn decode(bytes: &[u8]) -> StorageResult<Self> {
        bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .map(|(row, _)| row)
            .map_err(|e| StorageError::Serialization(e.to_string()))
    }
}

/// Check a partition or row key against the table-store key rules.
///
/// Keys must be non-empty, at most [`MAX_KEY_BYTES`] long and free of
/// `/`, `\`, `#`, `?` and control characters.
///
/// # Errors
///
/// Returns [`StorageError::InvalidKey`] describing the first violated rule.
pub fn validate_key(what: &str, key: &str) -> StorageResult<()> {
    if key.is_empty() {
        return Err(StorageError::InvalidKey(format!("{what} must not be empty")));
    }
    if key.len() > MAX_KEY_BYTES {
        return Err(StorageError::InvalidKey(format!(
            "{what} is {} bytes, maximum is {MAX_KEY_BYTES}",
            key.len()
        )));
    }
    if let Some(c) = key.chars().find(|c| matches!(c, '/' | '\\' | '#' | '?') || c.is_control()) {
        return Err(StorageError::InvalidKey(format!("{what} '{key}' contains forbidden character {c:?}")));
    }
    Ok(())
}

/// Check a table name: 3 to 63 ASCII alphanumerics, starting with a letter.
///
/// # Errors
///
/// Returns [`StorageError::InvalidKey`] if the name is not allowed.
pub fn validate_table_name(table: &str) -> StorageResult<()> {
    let starts_with_letter = table.chars().next().is_some_and(|c| c.is_ascii_alphabetic());
    let valid = (3..=63).contains(&table.len())
        && starts_with_letter
        && table.chars().all(|c| c.is_ascii_alphanumeric());
    if valid {
        Ok(())
    } else {
        Err(StorageError::InvalidKey(format!(
            "table name '{table}' must be 3-63 alphanumerics starting with a letter"
        )))
    }
}

/// Validate the shape of a batch before any row is touched.
///
/// # Errors
///
/// - [`StorageError::InvalidKey`] for a malformed key or a row listed twice
/// - [`StorageError::BatchTooLarge`] if `limits` are exceeded
pub fn check_batch(partition_key: &str, ops: &[BatchOp], limits: &BatchLimits) -> StorageResult<()> {
    validate_key("partition key", partition_key)?;

    let mut bytes = 0usize;
    let mut seen = HashSet::with_capacity(ops.len());
    for op in ops {
        validate_key("row key", op.row_key())?;
        if !seen.insert(op.row_key()) {
            return Err(StorageError::InvalidKey(format!(
                "row '{}' appears more than once in one batch",
                op.row_key()
            )));
        }
        bytes += op.payload_size()?;
    }

    if ops.len() > limits.max_operations || bytes > limits.max_payload_bytes {
        return Err(StorageError::BatchTooLarge { operations: ops.len(), bytes });
    }
    Ok(())
}

/// Stage one operation against the row it targets.
///
/// `version` is the store version to stamp on the row if it changes.
/// Returns the new row state, `None` meaning the row is deleted.
///
/// # Errors
///
/// Returns [`StorageError::BatchRejected`] if the operation's condition fails.
pub fn apply_op(
    index: usize,
    op: &BatchOp,
    existing: Option<StoredRow>,
    version: u64,
) -> StorageResult<Option<StoredRow>> {
    let reject = |reason| StorageError::BatchRejected { index, row_key: op.row_key().to_string(), reason };

    match (op, existing) {
        (BatchOp::Insert { .. }, Some(_)) => Err(reject(RejectReason::EntityAlreadyExists)),
        (BatchOp::Insert { properties, .. }, None) => {
            Ok(Some(StoredRow { token: ConcurrencyToken::from_version(version), properties: properties.clone() }))
        }
        (BatchOp::Merge { .. } | BatchOp::Replace { .. } | BatchOp::Delete { .. }, None) => {
            Err(reject(RejectReason::EntityNotFound))
        }
        (BatchOp::Merge { properties, if_match, .. }, Some(mut row)) => {
            if row.token != *if_match {
                return Err(reject(RejectReason::PreconditionFailed));
            }
            row.properties.extend(properties.iter().map(|(k, v)| (k.clone(), v.clone())));
            row.token = ConcurrencyToken::from_version(version);
            Ok(Some(row))
        }
        (BatchOp::Replace { properties, if_match, .. }, Some(row)) => {
            if row.token != *if_match {
                return Err(reject(RejectReason::PreconditionFailed));
            }
            Ok(Some(StoredRow { token: ConcurrencyToken::from_version(version), properties: properties.clone() }))
        }
        (BatchOp::Delete { if_match, .. }, Some(row)) => {
            if row.token != *if_match {
                return Err(reject(RejectReason::PreconditionFailed));
            }
            Ok(None)
        }
    }
}

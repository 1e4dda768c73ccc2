//! Partition key descriptors.
//!
//! A [`PartitionKeyDescriptor`] names the single partition a unit of work may
//! write to. Every row enlisted in one shared batch lives in that partition,
//! because the store only guarantees atomicity within one partition.

use std::fmt;

use sha2::{Digest, Sha256};
use tablesync_storage::engine::batch::{validate_key, validate_table_name};

use crate::error::SessionResult;

/// Identifies the partition and table a unit of work writes to.
///
/// Two descriptors are equal iff both the partition key and the table name
/// are equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PartitionKeyDescriptor {
    partition_key: String,
    table: String,
}

impl PartitionKeyDescriptor {
    /// Create a descriptor from an explicit partition key.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::InvalidKey`](crate::SessionError::InvalidKey) if
    /// the partition key or table name is not allowed by the store.
    pub fn new(partition_key: impl Into<String>, table: impl Into<String>) -> SessionResult<Self> {
        let partition_key = partition_key.into();
        let table = table.into();
        validate_key("partition key", &partition_key)?;
        validate_table_name(&table)?;
        Ok(Self { partition_key, table })
    }

    /// Derive a descriptor from a business correlation value.
    ///
    /// The partition key is the lowercase hex SHA-256 digest of the value, so
    /// the same correlation value always lands in the same partition and the
    /// key never contains characters the store forbids.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::InvalidKey`](crate::SessionError::InvalidKey) if
    /// the table name is not allowed.
    pub fn derive(correlation_value: impl AsRef<[u8]>, table: impl Into<String>) -> SessionResult<Self> {
        let digest = Sha256::digest(correlation_value.as_ref());
        Self::new(hex::encode(digest), table)
    }

    /// The partition key.
    #[must_use]
    pub fn partition_key(&self) -> &str {
        &self.partition_key
    }

    /// The table name.
    #[must_use]
    pub fn table(&self) -> &str {
        &self.table
    }
}

impl fmt::Display for PartitionKeyDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.table, self.partition_key)
    }
}

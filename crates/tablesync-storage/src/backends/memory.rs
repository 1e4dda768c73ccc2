//! In-process table store.
//!
//! [`MemoryStore`] keeps every table in a `BTreeMap` keyed by
//! `(partition key, row key)`. Batches are staged against a snapshot of the
//! affected rows and written only after every operation passed, so a rejected
//! batch leaves the table untouched.
//!
//! The store can simulate a slow response path with
//! [`MemoryConfig::response_latency`]: the batch is applied first and the
//! acknowledgement is delayed afterwards. A deadline that expires during the
//! delay produces a [`StorageError::Timeout`] for a batch that did take
//! effect, which is exactly the ambiguous outcome callers must handle.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};
use std::thread;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::engine::batch::{apply_op, check_batch, validate_table_name, StoredRow};
use crate::engine::{BatchLimits, BatchOp, StorageError, StorageResult, TableStore};
use crate::types::{ConcurrencyToken, EntityKey, StoredEntity, TableEntity};

type Rows = BTreeMap<(String, String), StoredRow>;

/// Configuration for [`MemoryStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Atomic batch bounds.
    pub limits: BatchLimits,
    /// Create tables on first use instead of failing with `TableNotFound`.
    pub create_table_if_missing: bool,
    /// Delay between applying a batch and acknowledging it.
    pub response_latency: Option<Duration>,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self { limits: BatchLimits::default(), create_table_if_missing: true, response_latency: None }
    }
}

impl MemoryConfig {
    /// Create a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the batch limits.
    #[must_use]
    pub const fn limits(mut self, limits: BatchLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Enable or disable table auto-creation.
    #[must_use]
    pub const fn create_table_if_missing(mut self, enabled: bool) -> Self {
        self.create_table_if_missing = enabled;
        self
    }

    /// Delay every batch acknowledgement by `latency`.
    #[must_use]
    pub const fn response_latency(mut self, latency: Duration) -> Self {
        self.response_latency = Some(latency);
        self
    }
}

/// A table store that lives entirely in process memory.
///
/// # Example
///
/// ```ignore
/// use tablesync_storage::backends::MemoryStore;
///
/// let store = MemoryStore::new();
/// store.ensure_table("Sagas")?;
/// ```
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<HashMap<String, Rows>>,
    version: AtomicU64,
    config: MemoryConfig,
}

impl MemoryStore {
    /// Create an empty store with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(MemoryConfig::default())
    }

    /// Create an empty store with custom configuration.
    #[must_use]
    pub fn with_config(config: MemoryConfig) -> Self {
        Self { tables: RwLock::new(HashMap::new()), version: AtomicU64::new(0), config }
    }

    /// The store configuration.
    #[must_use]
    pub const fn config(&self) -> &MemoryConfig {
        &self.config
    }

    /// Total number of rows across all tables.
    #[must_use]
    pub fn row_count(&self) -> usize {
        self.tables.read().unwrap_or_else(PoisonError::into_inner).values().map(BTreeMap::len).sum()
    }

    fn next_version(&self) -> u64 {
        self.version.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn missing_table(table: &str) -> StorageError {
        StorageError::TableNotFound(table.to_string())
    }
}

fn lock_error<T>(_: PoisonError<T>) -> StorageError {
    StorageError::Internal("memory store lock poisoned".to_string())
}

fn to_stored_entity(partition_key: &str, row_key: &str, row: &StoredRow) -> StoredEntity {
    StoredEntity {
        entity: TableEntity::from_parts(EntityKey::new(partition_key, row_key), row.properties.clone()),
        token: row.token.clone(),
    }
}

impl TableStore for MemoryStore {
    fn read(&self, table: &str, partition_key: &str, row_key: &str) -> StorageResult<Option<StoredEntity>> {
        let tables = self.tables.read().map_err(lock_error)?;
        match tables.get(table) {
            Some(rows) => Ok(rows
                .get(&(partition_key.to_string(), row_key.to_string()))
                .map(|row| to_stored_entity(partition_key, row_key, row))),
            None if self.config.create_table_if_missing => Ok(None),
            None => Err(Self::missing_table(table)),
        }
    }

    fn query_partition(&self, table: &str, partition_key: &str) -> StorageResult<Vec<StoredEntity>> {
        let tables = self.tables.read().map_err(lock_error)?;
        let Some(rows) = tables.get(table) else {
            return if self.config.create_table_if_missing {
                Ok(Vec::new())
            } else {
                Err(Self::missing_table(table))
            };
        };

        Ok(rows
            .range((partition_key.to_string(), String::new())..)
            .take_while(|((pk, _), _)| pk == partition_key)
            .map(|((pk, rk), row)| to_stored_entity(pk, rk, row))
            .collect())
    }

    fn submit_batch(
        &self,
        table: &str,
        partition_key: &str,
        ops: &[BatchOp],
        deadline: Option<Instant>,
    ) -> StorageResult<Vec<Option<ConcurrencyToken>>> {
        let started = Instant::now();
        validate_table_name(table)?;
        check_batch(partition_key, ops, &self.config.limits)?;

        let tokens = {
            let mut tables = self.tables.write().map_err(lock_error)?;
            if !tables.contains_key(table) {
                if !self.config.create_table_if_missing {
                    return Err(Self::missing_table(table));
                }
                tables.insert(table.to_string(), Rows::new());
            }
            let rows = tables.get_mut(table).ok_or_else(|| Self::missing_table(table))?;

            let mut staged = Vec::with_capacity(ops.len());
            for (index, op) in ops.iter().enumerate() {
                let key = (partition_key.to_string(), op.row_key().to_string());
                let existing = rows.get(&key).cloned();
                let next = apply_op(index, op, existing, self.next_version())?;
                staged.push((key, next));
            }

            let tokens = staged.iter().map(|(_, row)| row.as_ref().map(|r| r.token.clone())).collect();
            for (key, row) in staged {
                match row {
                    Some(row) => {
                        rows.insert(key, row);
                    }
                    None => {
                        rows.remove(&key);
                    }
                }
            }
            tokens
        };

        debug!(table, partition_key, operations = ops.len(), "memory store applied batch");

        if let Some(latency) = self.config.response_latency {
            thread::sleep(latency);
        }
        if deadline.is_some_and(|deadline| Instant::now() > deadline) {
            return Err(StorageError::Timeout { elapsed: started.elapsed() });
        }

        Ok(tokens)
    }

    fn limits(&self) -> BatchLimits {
        self.config.limits
    }

    fn table_exists(&self, table: &str) -> StorageResult<bool> {
        Ok(self.tables.read().map_err(lock_error)?.contains_key(table))
    }

    fn ensure_table(&self, table: &str) -> StorageResult<()> {
        validate_table_name(table)?;
        self.tables.write().map_err(lock_error)?.entry(table.to_string()).or_default();
        Ok(())
    }
}

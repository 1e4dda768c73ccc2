//! Redb table store implementation.
//!
//! This module provides the `RedbStore` type which implements the
//! `TableStore` trait on top of the Redb embedded database. Each batch runs
//! inside one Redb write transaction, which gives the all-or-nothing
//! guarantee: a rejected operation aborts the transaction.

use std::path::Path;
use std::time::Instant;

use redb::{Database, ReadTransaction, ReadableTable, WriteTransaction};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::engine::batch::{apply_op, check_batch, validate_table_name, StoredRow};
use crate::engine::{BatchLimits, BatchOp, StorageError, StorageResult, TableStore};
use crate::types::{ConcurrencyToken, EntityKey, StoredEntity, TableEntity};

use super::tables::{
    decode_key, encode_key, partition_end_key, partition_start_key, META_TABLE, ROWS_TABLE,
    TABLES_TABLE, VERSION_KEY,
};

/// Configuration options for the Redb table store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedbConfig {
    /// Cache size in bytes.
    /// If not set, uses Redb's default.
    pub cache_size: Option<usize>,

    /// Atomic batch bounds.
    pub limits: BatchLimits,

    /// Create tables on first use instead of failing with `TableNotFound`.
    pub create_table_if_missing: bool,
}

impl Default for RedbConfig {
    fn default() -> Self {
        Self { cache_size: None, limits: BatchLimits::default(), create_table_if_missing: true }
    }
}

impl RedbConfig {
    /// Create a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the cache size.
    #[must_use]
    pub const fn cache_size(mut self, size: usize) -> Self {
        self.cache_size = Some(size);
        self
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
}

/// A table store backed by Redb.
///
/// # Example
///
/// ```ignore
/// use tablesync_storage::backends::RedbStore;
///
/// let store = RedbStore::open("sagas.redb")?;
/// store.ensure_table("Sagas")?;
/// ```
pub struct RedbStore {
    /// The underlying Redb database.
    db: Database,
    config: RedbConfig,
}

fn internal(e: impl std::fmt::Display) -> StorageError {
    StorageError::Internal(e.to_string())
}

fn transaction(e: impl std::fmt::Display) -> StorageError {
    StorageError::Transaction(e.to_string())
}

impl RedbStore {
    /// Open or create a store at the given path with default configuration.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Open`] if the database cannot be opened or created.
    pub fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        Self::open_with_config(path, RedbConfig::default())
    }

    /// Open or create a store at the given path with custom configuration.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Open`] if the database cannot be opened or created.
    pub fn open_with_config(path: impl AsRef<Path>, config: RedbConfig) -> StorageResult<Self> {
        let mut builder = Database::builder();

        if let Some(cache_size) = config.cache_size {
            builder.set_cache_size(cache_size);
        }

        let db = builder.create(path.as_ref()).map_err(|e| StorageError::Open(e.to_string()))?;

        Ok(Self { db, config })
    }

    /// Create an in-memory store for testing.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Open`] if the database cannot be created.
    pub fn in_memory() -> StorageResult<Self> {
        Self::in_memory_with_config(RedbConfig::default())
    }

    /// Create an in-memory store with custom configuration.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Open`] if the database cannot be created.
    pub fn in_memory_with_config(config: RedbConfig) -> StorageResult<Self> {
        let db = Database::builder()
            .create_with_backend(redb::backends::InMemoryBackend::new())
            .map_err(|e| StorageError::Open(e.to_string()))?;

        Ok(Self { db, config })
    }

    /// The store configuration.
    #[must_use]
    pub const fn config(&self) -> &RedbConfig {
        &self.config
    }

    /// Check for a logical table inside a read transaction.
    fn table_registered(tx: &ReadTransaction, table: &str) -> StorageResult<bool> {
        match tx.open_table(TABLES_TABLE) {
            Ok(t) => Ok(t.get(table).map_err(internal)?.is_some()),
            Err(redb::TableError::TableDoesNotExist(_)) => Ok(false),
            Err(e) => Err(internal(e)),
        }
    }

    /// Fail reads of unknown tables unless auto-creation is on.
    ///
    /// Returns `false` when the table is missing but may be treated as empty.
    fn check_readable(&self, tx: &ReadTransaction, table: &str) -> StorageResult<bool> {
        if Self::table_registered(tx, table)? {
            Ok(true)
        } else if self.config.create_table_if_missing {
            Ok(false)
        } else {
            Err(StorageError::TableNotFound(table.to_string()))
        }
    }

    /// Register a logical table inside a write transaction.
    fn register_table(tx: &WriteTransaction, table: &str) -> StorageResult<()> {
        let mut tables = tx.open_table(TABLES_TABLE).map_err(internal)?;
        if tables.get(table).map_err(internal)?.is_none() {
            tables.insert(table, 0).map_err(internal)?;
        }
        Ok(())
    }

    /// Stage and write every operation. Any error leaves the transaction
    /// for the caller to abort.
    fn apply_batch(
        &self,
        tx: &WriteTransaction,
        table: &str,
        partition_key: &str,
        ops: &[BatchOp],
    ) -> StorageResult<Vec<Option<ConcurrencyToken>>> {
        let known = tx.open_table(TABLES_TABLE).map_err(internal)?.get(table).map_err(internal)?.is_some();
        if !known {
            if !self.config.create_table_if_missing {
                return Err(StorageError::TableNotFound(table.to_string()));
            }
            Self::register_table(tx, table)?;
        }

        let mut meta = tx.open_table(META_TABLE).map_err(internal)?;
        let mut version = meta.get(VERSION_KEY).map_err(internal)?.map_or(0, |v| v.value());

        let mut rows = tx.open_table(ROWS_TABLE).map_err(internal)?;
        let mut staged = Vec::with_capacity(ops.len());
        for (index, op) in ops.iter().enumerate() {
            let key = encode_key(table, partition_key, op.row_key());
            let existing = match rows.get(key.as_slice()).map_err(internal)? {
                Some(bytes) => Some(StoredRow::decode(bytes.value())?),
                None => None,
            };
            version += 1;
            staged.push((key, apply_op(index, op, existing, version)?));
        }

        let mut tokens = Vec::with_capacity(staged.len());
        for (key, row) in staged {
            match row {
                Some(row) => {
                    rows.insert(key.as_slice(), row.encode()?.as_slice()).map_err(internal)?;
                    tokens.push(Some(row.token));
                }
                None => {
                    rows.remove(key.as_slice()).map_err(internal)?;
                    tokens.push(None);
                }
            }
        }
        meta.insert(VERSION_KEY, version).map_err(internal)?;

        Ok(tokens)
    }
}

impl TableStore for RedbStore {
    fn read(&self, table: &str, partition_key: &str, row_key: &str) -> StorageResult<Option<StoredEntity>> {
        let tx = self.db.begin_read().map_err(transaction)?;
        if !self.check_readable(&tx, table)? {
            return Ok(None);
        }

        match tx.open_table(ROWS_TABLE) {
            Ok(rows) => {
                let key = encode_key(table, partition_key, row_key);
                let Some(bytes) = rows.get(key.as_slice()).map_err(internal)? else {
                    return Ok(None);
                };
                let row = StoredRow::decode(bytes.value())?;
                Ok(Some(StoredEntity {
                    entity: TableEntity::from_parts(EntityKey::new(partition_key, row_key), row.properties),
                    token: row.token,
                }))
            }
            // No rows table means no rows, which is not an error
            Err(redb::TableError::TableDoesNotExist(_)) => Ok(None),
            Err(e) => Err(internal(e)),
        }
    }

    fn query_partition(&self, table: &str, partition_key: &str) -> StorageResult<Vec<StoredEntity>> {
        let tx = self.db.begin_read().map_err(transaction)?;
        if !self.check_readable(&tx, table)? {
            return Ok(Vec::new());
        }

        let rows = match tx.open_table(ROWS_TABLE) {
            Ok(rows) => rows,
            Err(redb::TableError::TableDoesNotExist(_)) => return Ok(Vec::new()),
            Err(e) => return Err(internal(e)),
        };

        let start = partition_start_key(table, partition_key);
        let end = partition_end_key(table, partition_key);
        let mut entities = Vec::new();
        for result in rows.range(start.as_slice()..end.as_slice()).map_err(internal)? {
            let (k, v) = result.map_err(internal)?;
            let Some((_, pk, rk)) = decode_key(k.value()) else {
                warn!(table, partition_key, "skipping malformed row key");
                continue;
            };
            let row = StoredRow::decode(v.value())?;
            entities.push(StoredEntity {
                entity: TableEntity::from_parts(EntityKey::new(pk, rk), row.properties),
                token: row.token,
            });
        }
        Ok(entities)
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

        let tx = self.db.begin_write().map_err(transaction)?;
        let tokens = match self.apply_batch(&tx, table, partition_key, ops) {
            Ok(tokens) => tokens,
            Err(e) => {
                // Ignore abort result - we're rolling back anyway
                drop(tx.abort());
                return Err(e);
            }
        };

        if deadline.is_some_and(|deadline| Instant::now() > deadline) {
            drop(tx.abort());
            return Err(StorageError::Timeout { elapsed: started.elapsed() });
        }

        tx.commit().map_err(transaction)?;
        debug!(table, partition_key, operations = ops.len(), "redb store committed batch");
        Ok(tokens)
    }

    fn limits(&self) -> BatchLimits {
        self.config.limits
    }

    fn table_exists(&self, table: &str) -> StorageResult<bool> {
        let tx = self.db.begin_read().map_err(transaction)?;
        Self::table_registered(&tx, table)
    }

    fn ensure_table(&self, table: &str) -> StorageResult<()> {
        validate_table_name(table)?;
        let tx = self.db.begin_write().map_err(transaction)?;
        if let Err(e) = Self::register_table(&tx, table) {
            drop(tx.abort());
            return Err(e);
        }
        tx.commit().map_err(transaction)
    }
}

// Note: RedbStore is Send + Sync because redb::Database is Send + Sync.

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::types::Properties;

    #[test]
    fn test_config_builder() {
        let config = RedbConfig::new()
            .cache_size(1024 * 1024 * 10)
            .limits(BatchLimits::new().max_operations(10))
            .create_table_if_missing(false);

        assert_eq!(config.cache_size, Some(10 * 1024 * 1024));
        assert_eq!(config.limits.max_operations, 10);
        assert!(!config.create_table_if_missing);
    }

    #[test]
    fn test_versions_survive_between_batches() {
        let store = RedbStore::in_memory().expect("failed to create in-memory store");
        let insert = |row: &str| BatchOp::Insert { row_key: row.to_string(), properties: Properties::new() };

        let first = store.submit_batch("Sagas", "p", &[insert("a")], None).expect("submit failed");
        let second = store.submit_batch("Sagas", "p", &[insert("b")], None).expect("submit failed");

        assert_ne!(first[0], second[0]);
    }

    #[test]
    fn test_expired_deadline_aborts() {
        let store = RedbStore::in_memory().expect("failed to create in-memory store");
        let ops = [BatchOp::Insert { row_key: "a".into(), properties: Properties::new() }];
        let deadline = Instant::now().checked_sub(std::time::Duration::from_millis(1));

        let err = store.submit_batch("Sagas", "p", &ops, deadline).unwrap_err();
        assert!(err.is_ambiguous());
        assert!(store.read("Sagas", "p", "a").expect("read failed").is_none());
    }
}

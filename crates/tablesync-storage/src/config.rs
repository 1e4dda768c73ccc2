//! Backend selection.
//!
//! Hosts describe the store they want with a [`StoreConfig`] and receive a
//! shared `Arc<dyn TableStore>` from [`open_store`]. Nothing here reads
//! environment variables or files; resolving the configuration is the host's
//! job.

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::backends::{MemoryConfig, MemoryStore, RedbConfig, RedbStore};
use crate::engine::{BatchLimits, StorageResult, TableStore};

/// Which backend to open.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Backend {
    /// Process-local store; contents are lost on drop.
    #[default]
    Memory,
    /// In-memory Redb database.
    RedbInMemory,
    /// File-backed Redb database.
    Redb {
        /// Path of the database file.
        path: PathBuf,
        /// Cache size in bytes.
        cache_size: Option<usize>,
    },
}

/// Configuration for opening a table store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Backend to open.
    pub backend: Backend,
    /// Default table used when the caller does not name one.
    pub default_table: String,
    /// Create tables on first use.
    pub create_table_if_missing: bool,
    /// Atomic batch bounds enforced by the store.
    pub limits: BatchLimits,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: Backend::default(),
            default_table: "SagaData".to_string(),
            create_table_if_missing: true,
            limits: BatchLimits::default(),
        }
    }
}

impl StoreConfig {
    /// Create a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the backend.
    #[must_use]
    pub fn backend(mut self, backend: Backend) -> Self {
        self.backend = backend;
        self
    }

    /// Set the default table name.
    #[must_use]
    pub fn default_table(mut self, table: impl Into<String>) -> Self {
        self.default_table = table.into();
        self
    }

    /// Enable or disable table auto-creation.
    #[must_use]
    pub const fn create_table_if_missing(mut self, enabled: bool) -> Self {
        self.create_table_if_missing = enabled;
        self
    }

    /// Set the batch limits.
    #[must_use]
    pub const fn limits(mut self, limits: BatchLimits) -> Self {
        self.limits = limits;
        self
    }
}

/// Open the store described by `config`.
///
/// When auto-creation is enabled the default table is created up front.
///
/// # Errors
///
/// Returns an error if the backend cannot be opened or the default table
/// cannot be created.
pub fn open_store(config: &StoreConfig) -> StorageResult<Arc<dyn TableStore>> {
    let store: Arc<dyn TableStore> = match &config.backend {
        Backend::Memory => Arc::new(MemoryStore::with_config(
            MemoryConfig::new().limits(config.limits).create_table_if_missing(config.create_table_if_missing),
        )),
        Backend::RedbInMemory => Arc::new(RedbStore::in_memory_with_config(
            RedbConfig::new().limits(config.limits).create_table_if_missing(config.create_table_if_missing),
        )?),
        Backend::Redb { path, cache_size } => {
            let mut redb_config =
                RedbConfig::new().limits(config.limits).create_table_if_missing(config.create_table_if_missing);
            if let Some(size) = cache_size {
                redb_config = redb_config.cache_size(*size);
            }
            Arc::new(RedbStore::open_with_config(path, redb_config)?)
        }
    };

    if config.create_table_if_missing {
        store.ensure_table(&config.default_table)?;
    }

    info!(backend = ?config.backend, table = %config.default_table, "opened table store");
    Ok(store)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_memory_store_creates_default_table() {
        let store = open_store(&StoreConfig::new().default_table("Sagas")).expect("open failed");
        assert!(store.table_exists("Sagas").expect("table_exists failed"));
    }

    #[test]
    fn test_open_without_auto_create() {
        let config = StoreConfig::new().backend(Backend::RedbInMemory).create_table_if_missing(false);
        let store = open_store(&config).expect("open failed");
        assert!(!store.table_exists("SagaData").expect("table_exists failed"));
    }

    #[test]
    fn test_limits_reach_backend() {
        let config = StoreConfig::new().limits(BatchLimits::new().max_operations(5));
        let store = open_store(&config).expect("open failed");
        assert_eq!(store.limits().max_operations, 5);
    }
}

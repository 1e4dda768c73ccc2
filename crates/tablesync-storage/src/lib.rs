//! `tablesync` Storage
//!
//! This crate provides the partitioned table-store contract and the backend
//! implementations used by the `tablesync` batch coordination layer.
//!
//! # Overview
//!
//! A table store keeps rows addressed by `(table, partition key, row key)`.
//! Every row carries a [`ConcurrencyToken`] that changes on each write. Writes
//! go through [`TableStore::submit_batch`], which applies a list of conditional
//! operations against one partition atomically.
//!
//! # Core Types
//!
//! - [`TableStore`] - The contract backends implement
//! - [`BatchOp`] - One conditional row mutation
//! - [`TableEntity`] / [`StoredEntity`] - Rows as written and as read back
//!
//! # Error Handling
//!
//! All storage operations return [`StorageResult<T>`], which is an alias for
//! `Result<T, StorageError>`. A refused batch is reported as
//! [`StorageError::BatchRejected`] naming the first failing row.
//!
//! # Example
//!
//! ```ignore
//! use tablesync_storage::{open_store, BatchOp, StoreConfig, TableStore};
//!
//! let store = open_store(&StoreConfig::default())?;
//! let ops = [BatchOp::Insert { row_key: "saga".into(), properties: Properties::new() }];
//! let tokens = store.submit_batch("SagaData", "order-42", &ops, None)?;
//!
//! let row = store.read("SagaData", "order-42", "saga")?;
//! assert_eq!(row.map(|r| r.token), tokens[0].clone());
//! ```
//!
//! # Modules
//!
//! - [`engine`] - Store traits, batch checks and errors
//! - [`backends`] - Concrete store implementations
//! - [`config`] - Backend selection

#![deny(clippy::unwrap_used)]

pub mod backends;
pub mod config;
pub mod engine;
pub mod types;

pub use config::{open_store, Backend, StoreConfig};
pub use engine::{BatchLimits, BatchOp, RejectReason, StorageError, StorageResult, TableStore};
pub use types::{ConcurrencyToken, EntityKey, Properties, PropertyValue, StoredEntity, TableEntity};

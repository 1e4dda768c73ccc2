//! Redb storage backend.
//!
//! This module provides a table store implementation using Redb,
//! a pure-Rust embedded database. Every atomic batch runs in one Redb
//! write transaction, so rejected batches are rolled back by Redb itself.
//!
//! # Example
//!
//! ```ignore
//! use tablesync_storage::backends::RedbStore;
//! use tablesync_storage::{BatchOp, TableStore};
//!
//! // Open a store (creates if it doesn't exist)
//! let store = RedbStore::open("sagas.redb")?;
//!
//! let ops = [BatchOp::Insert { row_key: "saga".into(), properties: Properties::new() }];
//! let tokens = store.submit_batch("Sagas", "order-42", &ops, None)?;
//! ```
//!
//! # In-Memory Stores
//!
//! For testing, you can create an in-memory store that doesn't persist:
//!
//! ```ignore
//! let store = RedbStore::in_memory()?;
//! ```

mod store;
pub mod tables;

pub use store::{RedbConfig, RedbStore};

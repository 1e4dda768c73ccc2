//! Shared storage sessions for `tablesync`.
//!
//! This module provides the [`SessionManager`] and [`SynchronizedStorageSession`]
//! types that let several collaborators of one unit of work write through a
//! single atomic batch.
//!
//! # Shared Batches
//!
//! Each unit of work, identified by a [`WorkId`], owns one [`BatchAccumulator`]
//! in the [`SharedContextRegistry`]. Every session opened for that unit of work
//! enlists into the same accumulator, and the first session to call
//! `complete` submits it.
//!
//! # Example
//!
//! ```ignore
//! use tablesync::session::{SessionConfig, SessionManager, WorkId};
//! use tablesync::{Operation, PartitionKeyDescriptor};
//! use tablesync_storage::{open_store, StoreConfig, TableEntity};
//! use std::time::Duration;
//!
//! let store = open_store(&StoreConfig::default())?;
//! let manager = SessionManager::with_config(store, SessionConfig::new().commit_timeout(Duration::from_secs(5)));
//!
//! let partition = PartitionKeyDescriptor::new("order-42", "SagaData")?;
//! let mut session = manager.open(WorkId::generate(), partition)?;
//!
//! let current = session.read("saga")?.expect("saga exists");
//! let entity = TableEntity::new("order-42", "saga").with_property("status", "shipped");
//! session.enlist(Operation::update(entity, Some(current.token))?)?;
//! session.complete()?;
//! ```

mod accumulator;
mod handle;
mod manager;
mod registry;

pub use accumulator::{BatchAccumulator, CommittedRow};
pub use handle::{SessionState, SynchronizedStorageSession};
pub use manager::{SessionConfig, SessionManager};
pub use registry::{SharedBatch, SharedContextRegistry, WorkId};

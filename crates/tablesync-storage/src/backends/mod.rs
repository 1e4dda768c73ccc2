//! Concrete table store backends.
//!
//! - [`MemoryStore`] - process-local store, used by tests and ephemeral hosts
//! - [`RedbStore`] - durable embedded store on Redb

pub mod memory;
pub mod redb;

pub use memory::{MemoryConfig, MemoryStore};
pub use self::redb::{RedbConfig, RedbStore};

//! Session manager implementation.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tablesync_storage::engine::{DEFAULT_MAX_BATCH_BYTES, DEFAULT_MAX_BATCH_OPERATIONS};
use tablesync_storage::{BatchLimits, TableStore};

use super::handle::SynchronizedStorageSession;
use super::registry::{SharedContextRegistry, WorkId};
use crate::error::SessionResult;
use crate::partition::PartitionKeyDescriptor;

/// Configuration for the session manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Maximum number of operations in one shared batch.
    /// Default: 100 operations.
    pub max_batch_operations: usize,

    /// Maximum serialized size of one shared batch.
    /// Default: 4 MiB.
    pub max_batch_bytes: usize,

    /// How long a commit may wait for the store before it is reported as
    /// timed out. Default: no deadline.
    pub commit_timeout: Option<Duration>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_batch_operations: DEFAULT_MAX_BATCH_OPERATIONS,
            max_batch_bytes: DEFAULT_MAX_BATCH_BYTES,
            commit_timeout: None,
        }
    }
}

impl SessionConfig {
    /// Create a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum number of operations per batch.
    #[must_use]
    pub const fn max_batch_operations(mut self, count: usize) -> Self {
        self.max_batch_operations = count;
        self
    }

    /// Set the maximum serialized size per batch.
    #[must_use]
    pub const fn max_batch_bytes(mut self, bytes: usize) -> Self {
        self.max_batch_bytes = bytes;
        self
    }

    /// Set the commit timeout.
    #[must_use]
    pub const fn commit_timeout(mut self, timeout: Duration) -> Self {
        self.commit_timeout = Some(timeout);
        self
    }

    /// The configured bounds as [`BatchLimits`].
    #[must_use]
    pub const fn limits(&self) -> BatchLimits {
        BatchLimits { max_operations: self.max_batch_operations, max_payload_bytes: self.max_batch_bytes }
    }
}

/// Opens sessions that share one batch per unit of work.
///
/// The manager owns the [`SharedContextRegistry`] and hands every session a
/// reference to it and to the store. Accumulators enforce the tighter of the
/// configured bounds and the store's own limits.
///
/// # Thread Safety
///
/// `SessionManager` is `Send + Sync` and can be shared across threads using
/// `Arc<SessionManager>`.
///
/// # Example
///
/// ```ignore
/// use tablesync::{Operation, PartitionKeyDescriptor, SessionManager, WorkId};
/// use tablesync_storage::{open_store, StoreConfig, TableEntity};
///
/// let manager = SessionManager::new(open_store(&StoreConfig::default())?);
/// let partition = PartitionKeyDescriptor::derive("order-42", "SagaData")?;
/// let work = WorkId::new("message-17");
///
/// // Two collaborators handling the same message
/// let mut saga = manager.open(work.clone(), partition.clone())?;
/// let mut outbox = manager.open(work, partition.clone())?;
///
/// saga.enlist(Operation::insert(TableEntity::new(partition.partition_key(), "saga")))?;
/// outbox.enlist(Operation::insert(TableEntity::new(partition.partition_key(), "outbox-1")))?;
///
/// // Both rows are written in one atomic batch
/// let rows = saga.complete()?;
/// assert_eq!(rows.len(), 2);
/// ```
pub struct SessionManager {
    /// The backing store.
    store: Arc<dyn TableStore>,

    /// Shared batches of in-flight units of work.
    registry: Arc<SharedContextRegistry>,

    /// Manager configuration.
    config: SessionConfig,
}

impl SessionManager {
    /// Create a session manager with default configuration.
    pub fn new(store: Arc<dyn TableStore>) -> Self {
        Self::with_config(store, SessionConfig::default())
    }

    /// Create a session manager with custom configuration.
    pub fn with_config(store: Arc<dyn TableStore>, config: SessionConfig) -> Self {
        let limits = config.limits().min(store.limits());
        Self { store, registry: Arc::new(SharedContextRegistry::new(limits)), config }
    }

    /// Create a session in the `Idle` state without joining a batch yet.
    #[must_use]
    pub fn session(&self, work_id: WorkId, partition: PartitionKeyDescriptor) -> SynchronizedStorageSession {
        SynchronizedStorageSession::new(
            work_id,
            partition,
            Arc::clone(&self.store),
            Arc::clone(&self.registry),
            self.config.commit_timeout,
        )
    }

    /// Open a session that joins (or creates) the shared batch of `work_id`.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::PartitionMismatch`](crate::SessionError::PartitionMismatch)
    /// if the unit of work is already bound to another partition.
    pub fn open(
        &self,
        work_id: WorkId,
        partition: PartitionKeyDescriptor,
    ) -> SessionResult<SynchronizedStorageSession> {
        let mut session = self.session(work_id, partition);
        session.open()?;
        Ok(session)
    }

    /// The manager configuration.
    #[must_use]
    pub const fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// The bounds accumulators enforce.
    #[must_use]
    pub fn effective_limits(&self) -> BatchLimits {
        self.registry.limits()
    }

    /// The backing store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn TableStore> {
        &self.store
    }

    /// The registry of in-flight units of work.
    #[must_use]
    pub fn registry(&self) -> &Arc<SharedContextRegistry> {
        &self.registry
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use tablesync_storage::backends::{MemoryConfig, MemoryStore};

    use super::*;
    use crate::session::SessionState;

    #[test]
    fn test_config_default() {
        let config = SessionConfig::default();
        assert_eq!(config.max_batch_operations, 100);
        assert_eq!(config.max_batch_bytes, 4 * 1024 * 1024);
        assert!(config.commit_timeout.is_none());
    }

    #[test]
    fn test_effective_limits_take_the_minimum() {
        let store = MemoryStore::with_config(MemoryConfig::new().limits(BatchLimits::new().max_operations(10)));
        let config = SessionConfig::new().max_batch_operations(50).max_batch_bytes(1024);
        let manager = SessionManager::with_config(Arc::new(store), config);

        let limits = manager.effective_limits();
        assert_eq!(limits.max_operations, 10);
        assert_eq!(limits.max_payload_bytes, 1024);
    }

    #[test]
    fn test_open_shares_batch() {
        let manager = SessionManager::new(Arc::new(MemoryStore::new()));
        let partition = PartitionKeyDescriptor::new("order-42", "Sagas").unwrap();
        let work = WorkId::new("msg-1");

        let _a = manager.open(work.clone(), partition.clone()).unwrap();
        let _b = manager.open(work, partition).unwrap();
        assert_eq!(manager.registry().len(), 1);
    }

    #[test]
    fn test_session_starts_idle() {
        let manager = SessionManager::new(Arc::new(MemoryStore::new()));
        let partition = PartitionKeyDescriptor::new("order-42", "Sagas").unwrap();

        let session = manager.session(WorkId::generate(), partition);
        assert_eq!(session.state(), SessionState::Idle);
        assert!(manager.registry().is_empty());
    }
}

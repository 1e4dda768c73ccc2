//! Synchronized storage session handle.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tablesync_storage::{StoredEntity, TableStore};
use tracing::{debug, info, warn};

use super::accumulator::CommittedRow;
use super::registry::{SharedBatch, SharedContextRegistry, WorkId};
use crate::error::{SessionError, SessionResult};
use crate::operation::Operation;
use crate::partition::PartitionKeyDescriptor;

/// Lifecycle state of a [`SynchronizedStorageSession`].
///
/// ```text
/// Idle -> Open -> Committing -> Committed
///              \-> Aborting  -> Aborted
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Created but not yet joined to a shared batch.
    Idle,
    /// Accepting operations.
    Open,
    /// Submitting the shared batch.
    Committing,
    /// The shared batch was committed.
    Committed,
    /// Discarding the shared batch.
    Aborting,
    /// The shared batch was discarded.
    Aborted,
}

impl SessionState {
    /// Returns `true` for `Committed` and `Aborted`.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Committed | Self::Aborted)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Open => "open",
            Self::Committing => "committing",
            Self::Committed => "committed",
            Self::Aborting => "aborting",
            Self::Aborted => "aborted",
        };
        f.write_str(name)
    }
}

/// One participant's view of the shared batch of a unit of work.
///
/// Sessions are created by [`SessionManager`](super::SessionManager). All
/// sessions opened for the same [`WorkId`] enlist into the same batch, which
/// is written by whichever session calls [`complete`](Self::complete).
///
/// Once any participant commits or aborts, the shared batch is completed and
/// every other participant's calls fail with
/// [`SessionError::SessionAlreadyCompleted`].
///
/// Dropping an open session only detaches it while other participants remain
/// joined. When the last participant is dropped without completing, the
/// shared batch is aborted and released from the registry.
pub struct SynchronizedStorageSession {
    work_id: WorkId,
    partition: PartitionKeyDescriptor,
    store: Arc<dyn TableStore>,
    registry: Arc<SharedContextRegistry>,
    commit_timeout: Option<Duration>,
    batch: Option<SharedBatch>,
    state: SessionState,
}

impl SynchronizedStorageSession {
    pub(crate) fn new(
        work_id: WorkId,
        partition: PartitionKeyDescriptor,
        store: Arc<dyn TableStore>,
        registry: Arc<SharedContextRegistry>,
        commit_timeout: Option<Duration>,
    ) -> Self {
        Self { work_id, partition, store, registry, commit_timeout, batch: None, state: SessionState::Idle }
    }

    /// Join the shared batch of this unit of work, creating it if needed.
    ///
    /// # Errors
    ///
    /// - [`SessionError::PartitionMismatch`] if the unit of work is bound to another partition;
    ///   the session stays `Idle`
    /// - [`SessionError::SessionAlreadyCompleted`] if the session was already opened
    pub fn open(&mut self) -> SessionResult<()> {
        if self.state != SessionState::Idle {
            return Err(SessionError::SessionAlreadyCompleted);
        }
        let batch = self.registry.acquire(&self.work_id, &self.partition)?;
        batch.join();
        self.batch = Some(batch);
        self.state = SessionState::Open;
        debug!(work_id = %self.work_id, partition = %self.partition, "opened session");
        Ok(())
    }

    /// The unit of work this session belongs to.
    #[must_use]
    pub const fn work_id(&self) -> &WorkId {
        &self.work_id
    }

    /// The partition every enlisted operation must target.
    #[must_use]
    pub const fn partition(&self) -> &PartitionKeyDescriptor {
        &self.partition
    }

    /// The current lifecycle state.
    #[must_use]
    pub const fn state(&self) -> SessionState {
        self.state
    }

    /// Number of operations pending in the shared batch.
    #[must_use]
    pub fn pending_operations(&self) -> usize {
        self.batch.as_ref().map_or(0, SharedBatch::len)
    }

    fn ensure_open(&self) -> SessionResult<&SharedBatch> {
        match (self.state, &self.batch) {
            (SessionState::Open, Some(batch)) if !batch.is_completed() => Ok(batch),
            (SessionState::Idle, _) => Err(SessionError::SessionNotOpen),
            _ => Err(SessionError::SessionAlreadyCompleted),
        }
    }

    /// Read a row of this session's partition together with its current token.
    ///
    /// # Errors
    ///
    /// - [`SessionError::SessionNotOpen`] / [`SessionError::SessionAlreadyCompleted`] outside `Open`
    /// - [`SessionError::InvalidKey`] or [`SessionError::Storage`] if the read fails
    pub fn read(&self, row_key: &str) -> SessionResult<Option<StoredEntity>> {
        self.ensure_open()?;
        Ok(self.store.read(self.partition.table(), self.partition.partition_key(), row_key)?)
    }

    /// Add an operation to the shared batch.
    ///
    /// # Errors
    ///
    /// - [`SessionError::SessionNotOpen`] / [`SessionError::SessionAlreadyCompleted`] outside `Open`
    /// - [`SessionError::SessionAlreadyCompleted`] if another participant already completed the batch
    /// - any error of [`BatchAccumulator::register`](super::BatchAccumulator::register)
    pub fn enlist(&mut self, op: Operation) -> SessionResult<()> {
        let batch = self.ensure_open()?;
        let mut acc = batch.lock()?;
        if batch.is_completed() {
            return Err(SessionError::SessionAlreadyCompleted);
        }
        acc.register(op)
    }

    /// Commit the shared batch and release the unit of work.
    ///
    /// On failure the shared batch is discarded, the unit of work is released
    /// and the original error is returned. Timeouts and transport failures
    /// leave the outcome unknown; see [`SessionError::is_ambiguous`].
    ///
    /// # Errors
    ///
    /// - [`SessionError::SessionAlreadyCompleted`] if the session is terminal or another
    ///   participant already completed the batch
    /// - any error of [`BatchAccumulator::commit`](super::BatchAccumulator::commit)
    pub fn complete(&mut self) -> SessionResult<Vec<CommittedRow>> {
        let batch = self.ensure_open()?.clone();
        self.state = SessionState::Committing;

        let deadline = self.commit_timeout.map(|timeout| Instant::now() + timeout);
        let result = batch.lock().and_then(|mut acc| {
            if batch.is_completed() {
                return Err(SessionError::SessionAlreadyCompleted);
            }
            let result = acc.commit(&*self.store, deadline);
            if result.is_err() {
                acc.abort();
            }
            batch.mark_completed();
            result
        });

        match result {
            Ok(rows) => {
                self.state = SessionState::Committed;
                self.release();
                info!(work_id = %self.work_id, rows = rows.len(), "session committed");
                Ok(rows)
            }
            Err(SessionError::SessionAlreadyCompleted) => {
                self.state = SessionState::Open;
                Err(SessionError::SessionAlreadyCompleted)
            }
            Err(e) => {
                warn!(work_id = %self.work_id, error = %e, ambiguous = e.is_ambiguous(), "session commit failed");
                self.state = SessionState::Aborting;
                batch.discard();
                self.state = SessionState::Aborted;
                self.release();
                Err(e)
            }
        }
    }

    /// Discard the shared batch for every participant and release the unit
    /// of work.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::SessionAlreadyCompleted`] if the session is
    /// terminal or another participant already completed the batch.
    pub fn abort(&mut self) -> SessionResult<()> {
        let batch = self.ensure_open()?.clone();
        self.state = SessionState::Aborting;
        if !batch.discard() {
            self.state = SessionState::Open;
            return Err(SessionError::SessionAlreadyCompleted);
        }
        self.state = SessionState::Aborted;
        self.release();
        debug!(work_id = %self.work_id, "session aborted");
        Ok(())
    }

    fn release(&mut self) {
        if let Some(batch) = self.batch.take() {
            batch.leave();
            self.registry.release_batch(&self.work_id, &batch);
        }
    }
}

impl fmt::Debug for SynchronizedStorageSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SynchronizedStorageSession")
            .field("work_id", &self.work_id)
            .field("partition", &self.partition)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl Drop for SynchronizedStorageSession {
    fn drop(&mut self) {
        if self.state != SessionState::Open {
            return;
        }
        let Some(batch) = self.batch.take() else {
            return;
        };

        let remaining = batch.leave();
        if remaining > 0 {
            debug!(work_id = %self.work_id, remaining, "detached session from shared batch");
            return;
        }

        // Last participant gone without completing: nobody is left to commit
        if batch.discard() {
            warn!(work_id = %self.work_id, "aborting abandoned unit of work");
        }
        self.registry.release_batch(&self.work_id, &batch);
    }
}

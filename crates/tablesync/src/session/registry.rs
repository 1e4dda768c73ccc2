//! Shared batches keyed by unit of work.
//!
//! The [`SharedContextRegistry`] maps each in-flight [`WorkId`] to the one
//! [`SharedBatch`] every collaborator of that unit of work enlists into.
//!
//! # Locking
//!
//! The registry map sits behind an `RwLock` that is held only for the lookup,
//! insert or removal itself. Each shared batch has its own `Mutex`, so units
//! of work never wait on each other while registering or committing.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use tablesync_storage::BatchLimits;
use tracing::{debug, warn};
use uuid::Uuid;

use super::accumulator::BatchAccumulator;
use crate::error::{SessionError, SessionResult};
use crate::partition::PartitionKeyDescriptor;

/// Identifier of one logical unit of work, such as the handling of one
/// message.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkId(String);

impl WorkId {
    /// Wrap an identifier assigned by the host, such as a message id.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh random identifier.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// The identifier as a string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WorkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for WorkId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for WorkId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// A handle to the accumulator of one unit of work.
///
/// Clones refer to the same accumulator. Sessions count themselves in with
/// [`join`](Self::join) so the last one to go away can tell that nobody is
/// left to commit. Once the batch is committed or discarded it is marked
/// completed and accepts nothing further.
#[derive(Debug, Clone)]
pub struct SharedBatch {
    partition: PartitionKeyDescriptor,
    inner: Arc<BatchState>,
}

#[derive(Debug)]
struct BatchState {
    accumulator: Mutex<BatchAccumulator>,
    participants: AtomicUsize,
    completed: AtomicBool,
}

impl SharedBatch {
    fn new(partition: PartitionKeyDescriptor, limits: BatchLimits) -> Self {
        let inner = Arc::new(BatchState {
            accumulator: Mutex::new(BatchAccumulator::new(partition.clone(), limits)),
            participants: AtomicUsize::new(0),
            completed: AtomicBool::new(false),
        });
        Self { partition, inner }
    }

    /// The partition the accumulator is bound to.
    #[must_use]
    pub const fn partition(&self) -> &PartitionKeyDescriptor {
        &self.partition
    }

    /// Lock the accumulator.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Internal`] if a thread panicked while holding the lock.
    pub fn lock(&self) -> SessionResult<MutexGuard<'_, BatchAccumulator>> {
        self.inner
            .accumulator
            .lock()
            .map_err(|e| SessionError::Internal(format!("failed to acquire batch lock: {e}")))
    }

    fn lock_recovering(&self, during: &'static str) -> MutexGuard<'_, BatchAccumulator> {
        self.inner.accumulator.lock().unwrap_or_else(|poisoned| {
            warn!(partition = %self.partition, during, "recovering poisoned batch lock");
            poisoned.into_inner()
        })
    }

    /// Number of pending operations.
    ///
    /// A poisoned lock is logged and recovered so the count stays accurate.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock_recovering("len").len()
    }

    /// Returns `true` if nothing is pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns `true` if both handles refer to the same accumulator.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Number of sessions currently joined.
    #[must_use]
    pub fn participants(&self) -> usize {
        self.inner.participants.load(Ordering::SeqCst)
    }

    /// Returns `true` once the batch was committed or discarded.
    ///
    /// Check this while holding [`lock`](Self::lock) to rule out a concurrent
    /// commit slipping in between.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.inner.completed.load(Ordering::SeqCst)
    }

    pub(crate) fn join(&self) {
        self.inner.participants.fetch_add(1, Ordering::SeqCst);
    }

    /// Leave the batch and return how many participants remain.
    pub(crate) fn leave(&self) -> usize {
        self.inner
            .participants
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .map_or(0, |previous| previous - 1)
    }

    /// Must be called with the accumulator lock held.
    pub(crate) fn mark_completed(&self) {
        self.inner.completed.store(true, Ordering::SeqCst);
    }

    /// Discard pending operations, even if the lock was poisoned, and mark
    /// the batch completed.
    ///
    /// Returns `false` without touching anything if the batch had already
    /// completed.
    pub(crate) fn discard(&self) -> bool {
        let mut acc = self.lock_recovering("discard");
        if self.is_completed() {
            return false;
        }
        acc.abort();
        self.mark_completed();
        true
    }
}

/// Registry of the shared batches of all in-flight units of work.
#[derive(Debug)]
pub struct SharedContextRegistry {
    limits: BatchLimits,
    entries: RwLock<HashMap<WorkId, SharedBatch>>,
}

impl SharedContextRegistry {
    /// Create an empty registry whose accumulators enforce `limits`.
    #[must_use]
    pub fn new(limits: BatchLimits) -> Self {
        Self { limits, entries: RwLock::new(HashMap::new()) }
    }

    /// The bounds new accumulators enforce.
    #[must_use]
    pub const fn limits(&self) -> BatchLimits {
        self.limits
    }

    /// Get the shared batch of `work_id`, creating it if absent.
    ///
    /// Every call for the same unit of work with an equal partition returns
    /// a handle to the same accumulator.
    ///
    /// # Errors
    ///
    /// - [`SessionError::PartitionMismatch`] if the unit of work is bound to another partition
    /// - [`SessionError::Internal`] if the registry lock is poisoned
    pub fn acquire(&self, work_id: &WorkId, partition: &PartitionKeyDescriptor) -> SessionResult<SharedBatch> {
        {
            let entries = self
                .entries
                .read()
                .map_err(|e| SessionError::Internal(format!("failed to acquire registry lock: {e}")))?;
            if let Some(existing) = entries.get(work_id) {
                return Self::check_partition(existing, partition);
            }
        }

        let mut entries = self
            .entries
            .write()
            .map_err(|e| SessionError::Internal(format!("failed to acquire registry lock: {e}")))?;
        if let Some(existing) = entries.get(work_id) {
            return Self::check_partition(existing, partition);
        }

        let batch = SharedBatch::new(partition.clone(), self.limits);
        entries.insert(work_id.clone(), batch.clone());
        debug!(work_id = %work_id, partition = %partition, "registered shared batch");
        Ok(batch)
    }

    fn check_partition(existing: &SharedBatch, partition: &PartitionKeyDescriptor) -> SessionResult<SharedBatch> {
        if existing.partition() == partition {
            Ok(existing.clone())
        } else {
            Err(SessionError::PartitionMismatch {
                bound: existing.partition().to_string(),
                requested: partition.to_string(),
            })
        }
    }

    /// Remove the shared batch of `work_id`.
    ///
    /// Releasing an unknown or already released unit of work does nothing.
    pub fn release(&self, work_id: &WorkId) {
        let mut entries = self.entries.write().unwrap_or_else(|poisoned| {
            warn!(work_id = %work_id, "recovering poisoned registry lock during release");
            poisoned.into_inner()
        });
        if entries.remove(work_id).is_some() {
            debug!(work_id = %work_id, "released shared batch");
        }
    }

    /// Remove the entry of `work_id` only if it still refers to `batch`.
    ///
    /// A session outliving its unit of work must not release a newer batch
    /// registered under the same id.
    pub(crate) fn release_batch(&self, work_id: &WorkId, batch: &SharedBatch) {
        let mut entries = self.entries.write().unwrap_or_else(|poisoned| {
            warn!(work_id = %work_id, "recovering poisoned registry lock during release");
            poisoned.into_inner()
        });
        if entries.get(work_id).is_some_and(|current| current.ptr_eq(batch)) {
            entries.remove(work_id);
            debug!(work_id = %work_id, "released shared batch");
        }
    }

    /// Returns `true` if `work_id` has a registered batch.
    #[must_use]
    pub fn contains(&self, work_id: &WorkId) -> bool {
        self.entries.read().map(|entries| entries.contains_key(work_id)).unwrap_or(false)
    }

    /// Number of registered units of work.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().map(|entries| entries.len()).unwrap_or(0)
    }

    /// Returns `true` if no unit of work is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for SharedContextRegistry {
    fn default() -> Self {
        Self::new(BatchLimits::default())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::thread;

    use tablesync_storage::TableEntity;

    use super::*;
    use crate::operation::Operation;

    fn partition(key: &str) -> PartitionKeyDescriptor {
        PartitionKeyDescriptor::new(key, "Sagas").unwrap()
    }

    #[test]
    fn test_acquire_returns_same_batch() {
        let registry = SharedContextRegistry::default();
        let work = WorkId::new("msg-1");

        let a = registry.acquire(&work, &partition("p")).unwrap();
        let b = registry.acquire(&work, &partition("p")).unwrap();
        assert!(a.ptr_eq(&b));
        assert_eq!(registry.len(), 1);

        a.lock().unwrap().register(Operation::insert(TableEntity::new("p", "row"))).unwrap();
        assert_eq!(b.len(), 1);
    }

    #[test]
    fn test_acquire_partition_mismatch() {
        let registry = SharedContextRegistry::default();
        let work = WorkId::new("msg-1");
        registry.acquire(&work, &partition("p")).unwrap();

        let err = registry.acquire(&work, &partition("q")).unwrap_err();
        assert!(matches!(err, SessionError::PartitionMismatch { .. }));

        let other_table = PartitionKeyDescriptor::new("p", "Outbox").unwrap();
        assert!(registry.acquire(&work, &other_table).is_err());
    }

    #[test]
    fn test_distinct_work_ids_are_independent() {
        let registry = SharedContextRegistry::default();
        let a = registry.acquire(&WorkId::new("msg-1"), &partition("p")).unwrap();
        let b = registry.acquire(&WorkId::new("msg-2"), &partition("p")).unwrap();
        assert!(!a.ptr_eq(&b));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_release_is_idempotent() {
        let registry = SharedContextRegistry::default();
        let work = WorkId::new("msg-1");
        let first = registry.acquire(&work, &partition("p")).unwrap();

        registry.release(&work);
        registry.release(&work);
        registry.release(&WorkId::new("never-acquired"));
        assert!(!registry.contains(&work));
        assert!(registry.is_empty());

        let second = registry.acquire(&work, &partition("q")).unwrap();
        assert!(!first.ptr_eq(&second));
        assert!(second.is_empty());
    }

    #[test]
    fn test_release_batch_keeps_newer_entry() {
        let registry = SharedContextRegistry::default();
        let work = WorkId::new("msg-1");
        let old = registry.acquire(&work, &partition("p")).unwrap();
        registry.release(&work);
        let new = registry.acquire(&work, &partition("p")).unwrap();

        registry.release_batch(&work, &old);
        assert!(registry.contains(&work));

        registry.release_batch(&work, &new);
        assert!(!registry.contains(&work));
    }

    #[test]
    fn test_concurrent_acquire_yields_one_batch() {
        let registry = Arc::new(SharedContextRegistry::default());
        let work = WorkId::new("msg-1");

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                let work = work.clone();
                thread::spawn(move || registry.acquire(&work, &partition("p")).unwrap())
            })
            .collect();
        let batches: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert!(batches.windows(2).all(|pair| pair[0].ptr_eq(&pair[1])));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_participants_join_and_leave() {
        let registry = SharedContextRegistry::default();
        let batch = registry.acquire(&WorkId::new("msg-1"), &partition("p")).unwrap();
        assert_eq!(batch.participants(), 0);

        batch.join();
        batch.join();
        assert_eq!(batch.leave(), 1);
        assert_eq!(batch.leave(), 0);
        assert_eq!(batch.leave(), 0);
    }

    #[test]
    fn test_discard_marks_completed() {
        let registry = SharedContextRegistry::default();
        let batch = registry.acquire(&WorkId::new("msg-1"), &partition("p")).unwrap();
        batch.lock().unwrap().register(Operation::insert(TableEntity::new("p", "row"))).unwrap();
        assert!(!batch.is_completed());

        assert!(batch.discard());
        assert!(batch.is_completed());
        assert!(batch.is_empty());
        assert!(!batch.discard());
    }

    #[test]
    fn test_len_survives_poisoned_lock() {
        let registry = SharedContextRegistry::default();
        let batch = registry.acquire(&WorkId::new("msg-1"), &partition("p")).unwrap();
        batch.lock().unwrap().register(Operation::insert(TableEntity::new("p", "row"))).unwrap();

        let poisoner = batch.clone();
        let result = thread::spawn(move || {
            let _guard = poisoner.lock().unwrap();
            panic!("panic while holding the batch lock");
        })
        .join();
        assert!(result.is_err());

        assert!(batch.lock().is_err());
        assert_eq!(batch.len(), 1);
        assert!(!batch.is_empty());
    }

    #[test]
    fn test_generated_work_ids_are_unique() {
        assert_ne!(WorkId::generate(), WorkId::generate());
        assert_eq!(WorkId::from("msg-1").as_str(), "msg-1");
    }
}

//! Tests for the table store contract.
//!
//! These tests validate the trait contract and can be used to test
//! any table store implementation.

#![allow(dead_code)]

use tablesync_storage::{
    BatchLimits, BatchOp, ConcurrencyToken, Properties, PropertyValue, RejectReason, StorageError,
    StorageResult, TableStore,
};

/// A test harness trait for testing table store implementations.
///
/// Implementors provide a way to create and clean up test stores.
pub trait TestHarness {
    /// The store type being tested.
    type Store: TableStore;

    /// Create a new store for testing with the given limits.
    fn create_store(limits: BatchLimits) -> StorageResult<Self::Store>;

    /// Clean up after tests (remove temp files, etc.).
    fn cleanup(_store: Self::Store) {}
}

/// Run the standard test suite against a table store.
///
/// # Example
///
/// ```ignore
/// struct MemoryHarness;
///
/// impl TestHarness for MemoryHarness {
///     type Store = MemoryStore;
///
///     fn create_store(limits: BatchLimits) -> StorageResult<Self::Store> {
///         Ok(MemoryStore::with_config(MemoryConfig::new().limits(limits)))
///     }
/// }
///
/// #[test]
/// fn test_memory_compliance() {
///     run_test_suite::<MemoryHarness>();
/// }
/// ```
pub fn run_test_suite<H: TestHarness>() {
    test_insert_then_read::<H>();
    test_conditional_writes::<H>();
    test_rejected_batch_is_atomic::<H>();
    test_tokens_change_on_every_write::<H>();
    test_partitions_are_isolated::<H>();
    test_limits_are_enforced::<H>();
}

const TABLE: &str = "Compliance";

fn props(pairs: &[(&str, i64)]) -> Properties {
    pairs.iter().map(|(k, v)| ((*k).to_string(), PropertyValue::Int64(*v))).collect()
}

fn insert(row_key: &str, value: i64) -> BatchOp {
    BatchOp::Insert { row_key: row_key.to_string(), properties: props(&[("value", value)]) }
}

fn token_of<S: TableStore>(store: &S, partition_key: &str, row_key: &str) -> ConcurrencyToken {
    store.read(TABLE, partition_key, row_key).expect("read failed").expect("row missing").token
}

/// Test that inserted rows can be read back with the returned tokens.
fn test_insert_then_read<H: TestHarness>() {
    let store = H::create_store(BatchLimits::default()).expect("failed to create store");

    let tokens = store.submit_batch(TABLE, "p", &[insert("a", 1), insert("b", 2)], None).expect("submit failed");
    assert_eq!(tokens.len(), 2);

    let a = store.read(TABLE, "p", "a").expect("read failed").expect("row missing");
    assert_eq!(a.entity.get_property("value"), Some(&PropertyValue::Int64(1)));
    assert_eq!(Some(a.token), tokens[0]);

    assert!(store.read(TABLE, "p", "missing").expect("read failed").is_none());

    H::cleanup(store);
}

/// Test merge, replace and delete against current tokens.
fn test_conditional_writes<H: TestHarness>() {
    let store = H::create_store(BatchLimits::default()).expect("failed to create store");
    store.submit_batch(TABLE, "p", &[insert("a", 1), insert("b", 2)], None).expect("submit failed");

    let merge = BatchOp::Merge {
        row_key: "a".into(),
        properties: props(&[("extra", 9)]),
        if_match: token_of(&store, "p", "a"),
    };
    let replace = BatchOp::Replace {
        row_key: "b".into(),
        properties: props(&[("other", 3)]),
        if_match: token_of(&store, "p", "b"),
    };
    store.submit_batch(TABLE, "p", &[merge, replace], None).expect("submit failed");

    let a = store.read(TABLE, "p", "a").expect("read failed").expect("row missing");
    assert_eq!(a.entity.properties().len(), 2);
    let b = store.read(TABLE, "p", "b").expect("read failed").expect("row missing");
    assert_eq!(b.entity.get_property("value"), None);
    assert_eq!(b.entity.get_property("other"), Some(&PropertyValue::Int64(3)));

    let delete = BatchOp::Delete { row_key: "a".into(), if_match: a.token };
    let tokens = store.submit_batch(TABLE, "p", &[delete], None).expect("submit failed");
    assert_eq!(tokens, vec![None]);
    assert!(store.read(TABLE, "p", "a").expect("read failed").is_none());

    H::cleanup(store);
}

/// Test that a failing row in the middle of a batch leaves every row untouched.
fn test_rejected_batch_is_atomic<H: TestHarness>() {
    let store = H::create_store(BatchLimits::default()).expect("failed to create store");
    let rows: Vec<_> = (1..=5).map(|i| insert(&format!("row{i}"), i)).collect();
    store.submit_batch(TABLE, "p", &rows, None).expect("submit failed");

    let before = store.query_partition(TABLE, "p").expect("query failed");

    let ops: Vec<_> = (1..=5)
        .map(|i| {
            let row_key = format!("row{i}");
            let if_match = if i == 3 { ConcurrencyToken::new("stale") } else { token_of(&store, "p", &row_key) };
            BatchOp::Replace { row_key, properties: props(&[("value", 100 + i)]), if_match }
        })
        .collect();

    let err = store.submit_batch(TABLE, "p", &ops, None).unwrap_err();
    match err {
        StorageError::BatchRejected { index, row_key, reason } => {
            assert_eq!(index, 2);
            assert_eq!(row_key, "row3");
            assert_eq!(reason, RejectReason::PreconditionFailed);
        }
        other => panic!("unexpected error: {other}"),
    }

    let after = store.query_partition(TABLE, "p").expect("query failed");
    assert_eq!(before, after);

    H::cleanup(store);
}

/// Test that each write hands out a fresh token.
fn test_tokens_change_on_every_write<H: TestHarness>() {
    let store = H::create_store(BatchLimits::default()).expect("failed to create store");
    store.submit_batch(TABLE, "p", &[insert("a", 1)], None).expect("submit failed");

    let original = token_of(&store, "p", "a");
    let merge = BatchOp::Merge { row_key: "a".into(), properties: props(&[("value", 2)]), if_match: original.clone() };
    let tokens = store.submit_batch(TABLE, "p", &[merge], None).expect("submit failed");

    let current = token_of(&store, "p", "a");
    assert_ne!(original, current);
    assert_eq!(tokens, vec![Some(current)]);

    // Inserting the same row again is refused
    let err = store.submit_batch(TABLE, "p", &[insert("a", 1)], None).unwrap_err();
    assert!(matches!(err, StorageError::BatchRejected { reason: RejectReason::EntityAlreadyExists, .. }));

    H::cleanup(store);
}

/// Test that rows with equal row keys in different partitions are independent.
fn test_partitions_are_isolated<H: TestHarness>() {
    let store = H::create_store(BatchLimits::default()).expect("failed to create store");
    store.submit_batch(TABLE, "left", &[insert("a", 1)], None).expect("submit failed");
    store.submit_batch(TABLE, "right", &[insert("a", 2)], None).expect("submit failed");

    let left = store.query_partition(TABLE, "left").expect("query failed");
    let right = store.query_partition(TABLE, "right").expect("query failed");
    assert_eq!(left.len(), 1);
    assert_eq!(right.len(), 1);
    assert_eq!(left[0].entity.get_property("value"), Some(&PropertyValue::Int64(1)));
    assert_eq!(right[0].entity.partition_key(), "right");

    H::cleanup(store);
}

/// Test that oversized batches are refused before touching any row.
fn test_limits_are_enforced<H: TestHarness>() {
    let store = H::create_store(BatchLimits::new().max_operations(3).max_payload_bytes(10_000))
        .expect("failed to create store");

    let ops: Vec<_> = (0..4).map(|i| insert(&format!("r{i}"), i)).collect();
    let err = store.submit_batch(TABLE, "p", &ops, None).unwrap_err();
    assert!(matches!(err, StorageError::BatchTooLarge { operations: 4, .. }));
    assert!(store.query_partition(TABLE, "p").expect("query failed").is_empty());

    let mut properties = Properties::new();
    properties.insert("blob".into(), PropertyValue::Binary(vec![7; 20_000]));
    let big = BatchOp::Insert { row_key: "big".into(), properties };
    let err = store.submit_batch(TABLE, "p", &[big], None).unwrap_err();
    assert!(matches!(err, StorageError::BatchTooLarge { operations: 1, .. }));

    H::cleanup(store);
}

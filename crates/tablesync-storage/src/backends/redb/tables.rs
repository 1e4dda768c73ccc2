//! Redb table definitions and key encoding utilities.
//!
//! Redb tables are declared statically, so every logical table lives in one
//! physical table and row keys are prefixed with the logical table name and
//! partition key.

use redb::TableDefinition;

/// The physical table that stores all rows.
/// Keys are `<table><sep><partition><sep><row>`, values are encoded `StoredRow`s.
pub const ROWS_TABLE: TableDefinition<'static, &[u8], &[u8]> = TableDefinition::new("tablesync_rows");

/// Registry of logical tables that have been created, with their creation version.
pub const TABLES_TABLE: TableDefinition<'static, &str, u64> = TableDefinition::new("tablesync_tables");

/// Store-wide counters.
pub const META_TABLE: TableDefinition<'static, &str, u64> = TableDefinition::new("tablesync_meta");

/// Key in [`META_TABLE`] holding the last issued row version.
pub const VERSION_KEY: &str = "row_version";

/// Separator byte between key segments.
///
/// Key validation forbids control characters, so the separator never occurs
/// inside a segment.
pub const KEY_SEPARATOR: u8 = 0x00;

/// Encode a logical table, partition key and row key into a physical key.
pub fn encode_key(table: &str, partition_key: &str, row_key: &str) -> Vec<u8> {
    let mut encoded = partition_start_key(table, partition_key);
    encoded.extend_from_slice(row_key.as_bytes());
    encoded
}

/// Decode a physical key into its table, partition key and row key.
///
/// Returns `None` if the key is malformed.
pub fn decode_key(encoded: &[u8]) -> Option<(&str, &str, &str)> {
    let mut parts = encoded.splitn(3, |&b| b == KEY_SEPARATOR);
    let table = std::str::from_utf8(parts.next()?).ok()?;
    let partition_key = std::str::from_utf8(parts.next()?).ok()?;
    let row_key = std::str::from_utf8(parts.next()?).ok()?;
    Some((table, partition_key, row_key))
}

/// The first physical key of a partition.
pub fn partition_start_key(table: &str, partition_key: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(table.len() + partition_key.len() + 2);
    key.extend_from_slice(table.as_bytes());
    key.push(KEY_SEPARATOR);
    key.extend_from_slice(partition_key.as_bytes());
    key.push(KEY_SEPARATOR);
    key
}

/// The first physical key that does NOT belong to the partition.
pub fn partition_end_key(table: &str, partition_key: &str) -> Vec<u8> {
    let mut key = partition_start_key(table, partition_key);
    if let Some(last) = key.last_mut() {
        *last = KEY_SEPARATOR + 1;
    }
    key
}

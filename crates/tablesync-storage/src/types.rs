//! Row and entity types shared by every table store.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// An opaque version tag returned by reads and required by conditional writes.
///
/// Stores hand out a new token every time a row changes, so a token obtained
/// from a read identifies exactly one version of that row.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConcurrencyToken(String);

impl ConcurrencyToken {
    /// Wrap a token string received from a store.
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Build the token for a store-assigned row version.
    #[must_use]
    pub fn from_version(version: u64) -> Self {
        Self(format!("W/\"{version:016x}\""))
    }

    /// The raw token string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns `true` if the token carries no version information.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for ConcurrencyToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A single property value stored on a row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PropertyValue {
    /// UTF-8 string.
    String(String),
    /// 32-bit signed integer.
    Int32(i32),
    /// 64-bit signed integer.
    Int64(i64),
    /// 64-bit float.
    Double(f64),
    /// Boolean.
    Bool(bool),
    /// Raw bytes.
    Binary(Vec<u8>),
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<i32> for PropertyValue {
    fn from(value: i32) -> Self {
        Self::Int32(value)
    }
}

impl From<i64> for PropertyValue {
    fn from(value: i64) -> Self {
        Self::Int64(value)
    }
}

impl From<f64> for PropertyValue {
    fn from(value: f64) -> Self {
        Self::Double(value)
    }
}

impl From<bool> for PropertyValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<Vec<u8>> for PropertyValue {
    fn from(value: Vec<u8>) -> Self {
        Self::Binary(value)
    }
}

/// Property bag of a row, ordered by property name.
pub type Properties = BTreeMap<String, PropertyValue>;

/// Addresses one row: the partition it lives in and its key within it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityKey {
    /// Partition the row belongs to.
    pub partition_key: String,
    /// Key of the row inside its partition.
    pub row_key: String,
}

impl EntityKey {
    /// Create a key from its two parts.
    pub fn new(partition_key: impl Into<String>, row_key: impl Into<String>) -> Self {
        Self { partition_key: partition_key.into(), row_key: row_key.into() }
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.partition_key, self.row_key)
    }
}

/// A row as seen by callers: its key and its properties.
///
/// # Example
///
/// ```ignore
/// let saga = TableEntity::new("order-42", "saga")
///     .with_property("state", "AwaitingPayment")
///     .with_property("attempts", 1i32);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableEntity {
    key: EntityKey,
    properties: Properties,
}

impl TableEntity {
    /// Create an entity with no properties.
    pub fn new(partition_key: impl Into<String>, row_key: impl Into<String>) -> Self {
        Self { key: EntityKey::new(partition_key, row_key), properties: Properties::new() }
    }

    /// Create an entity from a key and an existing property bag.
    #[must_use]
    pub const fn from_parts(key: EntityKey, properties: Properties) -> Self {
        Self { key, properties }
    }

    /// Add or overwrite a property.
    #[must_use]
    pub fn with_property(mut self, name: impl Into<String>, value: impl Into<PropertyValue>) -> Self {
        self.properties.insert(name.into(), value.into());
        self
    }

    /// Set a property in place.
    pub fn set_property(&mut self, name: impl Into<String>, value: impl Into<PropertyValue>) {
        self.properties.insert(name.into(), value.into());
    }

    /// Look up a property by name.
    #[must_use]
    pub fn get_property(&self, name: &str) -> Option<&PropertyValue> {
        self.properties.get(name)
    }

    /// The row address.
    #[must_use]
    pub const fn key(&self) -> &EntityKey {
        &self.key
    }

    /// The partition key.
    #[must_use]
    pub fn partition_key(&self) -> &str {
        &self.key.partition_key
    }

    /// The row key.
    #[must_use]
    pub fn row_key(&self) -> &str {
        &self.key.row_key
    }

    /// All properties.
    #[must_use]
    pub const fn properties(&self) -> &Properties {
        &self.properties
    }

    /// Split into key and properties.
    #[must_use]
    pub fn into_parts(self) -> (EntityKey, Properties) {
        (self.key, self.properties)
    }
}

/// A row read back from a store together with its current token.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredEntity {
    /// The row contents.
    pub entity: TableEntity,
    /// Token identifying this version of the row.
    pub token: ConcurrencyToken,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_from_version_is_stable() {
        assert_eq!(ConcurrencyToken::from_version(7), ConcurrencyToken::from_version(7));
        assert_ne!(ConcurrencyToken::from_version(7), ConcurrencyToken::from_version(8));
        assert!(!ConcurrencyToken::from_version(0).is_empty());
    }

    #[test]
    fn test_blank_token_is_empty() {
        assert!(ConcurrencyToken::new("").is_empty());
        assert!(ConcurrencyToken::new("  ").is_empty());
    }

    #[test]
    fn test_entity_builder() {
        let entity = TableEntity::new("p1", "r1").with_property("name", "Alice").with_property("age", 30i64);

        assert_eq!(entity.partition_key(), "p1");
        assert_eq!(entity.row_key(), "r1");
        assert_eq!(entity.get_property("name"), Some(&PropertyValue::String("Alice".into())));
        assert_eq!(entity.get_property("age"), Some(&PropertyValue::Int64(30)));
        assert_eq!(entity.get_property("missing"), None);
    }
}

//! Row operations enlisted in a shared batch.
//!
//! An [`Operation`] is one intended mutation of a row. Updates, deletes and
//! replaces are conditional: they carry the [`ConcurrencyToken`] observed when
//! the row was read and fail at commit time if the row changed since.

use std::fmt;

use tablesync_storage::{BatchOp, ConcurrencyToken, EntityKey, Properties, TableEntity};

use crate::error::{SessionError, SessionResult};

/// The kind of an [`Operation`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    /// Create a new row; fails at commit if the row exists.
    Insert,
    /// Merge properties into an existing row.
    Update,
    /// Remove an existing row.
    Delete,
    /// Overwrite every property of an existing row.
    Replace,
}

impl OperationKind {
    /// Whether operations of this kind must carry a concurrency token.
    #[must_use]
    pub const fn requires_token(self) -> bool {
        !matches!(self, Self::Insert)
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Insert => "insert",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Replace => "replace",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Payload {
    Insert { properties: Properties },
    Update { properties: Properties, token: ConcurrencyToken },
    Delete { token: ConcurrencyToken },
    Replace { properties: Properties, token: ConcurrencyToken },
}

/// One intended row mutation.
///
/// Operations are immutable once built. Construct them with
/// [`Operation::insert`], [`Operation::update`], [`Operation::delete`] or
/// [`Operation::replace`].
#[derive(Debug, Clone, PartialEq)]
pub struct Operation {
    key: EntityKey,
    payload: Payload,
}

impl Operation {
    /// Insert a new row.
    #[must_use]
    pub fn insert(entity: TableEntity) -> Self {
        let (key, properties) = entity.into_parts();
        Self { key, payload: Payload::Insert { properties } }
    }

    /// Merge the entity's properties into the existing row.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::MissingConcurrencyToken`] if `token` is absent or empty.
    pub fn update(entity: TableEntity, token: Option<ConcurrencyToken>) -> SessionResult<Self> {
        let (key, properties) = entity.into_parts();
        let token = require_token(OperationKind::Update, &key, token)?;
        Ok(Self { key, payload: Payload::Update { properties, token } })
    }

    /// Delete the row.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::MissingConcurrencyToken`] if `token` is absent or empty.
    pub fn delete(key: EntityKey, token: Option<ConcurrencyToken>) -> SessionResult<Self> {
        let token = require_token(OperationKind::Delete, &key, token)?;
        Ok(Self { key, payload: Payload::Delete { token } })
    }

    /// Overwrite the row with the entity's properties.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::MissingConcurrencyToken`] if `token` is absent or empty.
    pub fn replace(entity: TableEntity, token: Option<ConcurrencyToken>) -> SessionResult<Self> {
        let (key, properties) = entity.into_parts();
        let token = require_token(OperationKind::Replace, &key, token)?;
        Ok(Self { key, payload: Payload::Replace { properties, token } })
    }

    /// The operation kind.
    #[must_use]
    pub const fn kind(&self) -> OperationKind {
        match self.payload {
            Payload::Insert { .. } => OperationKind::Insert,
            Payload::Update { .. } => OperationKind::Update,
            Payload::Delete { .. } => OperationKind::Delete,
            Payload::Replace { .. } => OperationKind::Replace,
        }
    }

    /// The targeted row.
    #[must_use]
    pub const fn key(&self) -> &EntityKey {
        &self.key
    }

    /// The partition key of the targeted row.
    #[must_use]
    pub fn partition_key(&self) -> &str {
        &self.key.partition_key
    }

    /// The row key of the targeted row.
    #[must_use]
    pub fn row_key(&self) -> &str {
        &self.key.row_key
    }

    /// The properties written by this operation; `None` for deletes.
    #[must_use]
    pub fn properties(&self) -> Option<&Properties> {
        match &self.payload {
            Payload::Insert { properties }
            | Payload::Update { properties, .. }
            | Payload::Replace { properties, .. } => Some(properties),
            Payload::Delete { .. } => None,
        }
    }

    /// The concurrency token; `None` for inserts.
    #[must_use]
    pub fn token(&self) -> Option<&ConcurrencyToken> {
        match &self.payload {
            Payload::Insert { .. } => None,
            Payload::Update { token, .. } | Payload::Delete { token } | Payload::Replace { token, .. } => {
                Some(token)
            }
        }
    }

    /// Serialized size of this operation as counted against the batch byte
    /// limit.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Storage`] if the operation cannot be encoded.
    pub fn payload_size(&self) -> SessionResult<usize> {
        Ok(self.to_batch_op().payload_size()?)
    }

    /// Whether `other` can be folded into this pending operation.
    ///
    /// Only two updates of the same row carrying the same token merge. Both
    /// were built from the same observed version of the row, so together they
    /// describe one conditional merge and the store still checks that token
    /// once. Any other repeat changes the precondition or the kind of write
    /// (an insert then a delete, two inserts, updates read at different
    /// versions), so it is refused as a caller error rather than guessed at.
    pub(crate) fn can_merge(&self, other: &Self) -> bool {
        match (&self.payload, &other.payload) {
            (Payload::Update { token: mine, .. }, Payload::Update { token: theirs, .. }) => {
                self.key == other.key && mine == theirs
            }
            _ => false,
        }
    }

    /// Fold the properties of a later update into this one.
    ///
    /// Later values win for properties named by both.
    pub(crate) fn merged_with(&self, other: &Self) -> Self {
        let mut merged = self.clone();
        if let (Payload::Update { properties, .. }, Some(extra)) = (&mut merged.payload, other.properties()) {
            properties.extend(extra.iter().map(|(name, value)| (name.clone(), value.clone())));
        }
        merged
    }

    /// The storage-level form of this operation.
    pub(crate) fn to_batch_op(&self) -> BatchOp {
        let row_key = self.key.row_key.clone();
        match &self.payload {
            Payload::Insert { properties } => BatchOp::Insert { row_key, properties: properties.clone() },
            Payload::Update { properties, token } => {
                BatchOp::Merge { row_key, properties: properties.clone(), if_match: token.clone() }
            }
            Payload::Delete { token } => BatchOp::Delete { row_key, if_match: token.clone() },
            Payload::Replace { properties, token } => {
                BatchOp::Replace { row_key, properties: properties.clone(), if_match: token.clone() }
            }
        }
    }
}

fn require_token(
    kind: OperationKind,
    key: &EntityKey,
    token: Option<ConcurrencyToken>,
) -> SessionResult<ConcurrencyToken> {
    match token {
        Some(token) if !token.is_empty() => Ok(token),
        _ => Err(SessionError::MissingConcurrencyToken { kind, row_key: key.row_key.clone() }),
    }
}

//! Error types for comparison and synchronization.

use thiserror::Error;

use crate::value::{Key, Value};

/// Broad classification of a [`SyncError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The caller passed arguments that can never succeed.
    InvalidInput,
    /// The caller's declared identities disagree with the stored rows.
    Consistency,
    /// The underlying store failed; the transaction was rolled back.
    Store,
}

/// Errors surfaced by [`compare`](crate::compare::compare) and [`sync`](crate::sync::sync).
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("key fields must not be empty")]
    EmptyKeyFields,

    #[error("record for table `{table}` is missing key field `{field}`")]
    MissingKeyField { table: String, field: String },

    #[error("table `{table}` has no column `{field}`")]
    UnknownField { table: String, field: String },

    #[error("`{field}` is the identity of table `{table}` and cannot be written")]
    IdentityInFields { table: String, field: String },

    #[error("table `{0}` is not part of the schema")]
    UnknownTable(String),

    #[error("cannot determine the target table: no records and no table given")]
    MissingTable,

    #[error("record belongs to table `{found}`, expected `{expected}`")]
    TableMismatch { expected: String, found: String },

    #[error("duplicate key {0:?} in desired records")]
    DuplicateKey(Key),

    #[error("record with key {0:?} does not satisfy the sync filter")]
    OutsideFilter(Key),

    #[error("invalid lock scope: {0}")]
    InvalidLockScope(String),

    #[error("record with key {key:?} declares identity {declared:?} but matches row {matched:?}")]
    IdentityMismatch {
        key: Key,
        declared: Value,
        matched: Value,
    },

    #[error("record declares identity {declared:?} which belongs to a row with a different key")]
    IdentityConflict { declared: Value },

    #[error("cannot coerce field `{field}`: {source}")]
    Coercion {
        field: String,
        #[source]
        source: CoercionError,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl SyncError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SyncError::IdentityMismatch { .. } | SyncError::IdentityConflict { .. } => {
                ErrorKind::Consistency
            }
            SyncError::Store(_) => ErrorKind::Store,
            _ => ErrorKind::InvalidInput,
        }
    }
}

impl From<rusqlite::Error> for SyncError {
    fn from(err: rusqlite::Error) -> Self {
        SyncError::Store(StoreError::Sqlite(err))
    }
}

/// Failures reported by a [`Store`](crate::store::Store) implementation.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("no database configured under alias `{0}`")]
    UnknownDatabase(String),

    #[error("unsupported value for column `{column}`: {reason}")]
    UnsupportedValue { column: String, reason: String },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// A value could not be brought into the canonical form of its column.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{value:?} is not a valid {expected}")]
pub struct CoercionError {
    pub value: Value,
    pub expected: &'static str,
}

impl CoercionError {
    pub fn new(value: &Value, expected: &'static str) -> Self {
        Self {
            value: value.clone(),
            expected,
        }
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;

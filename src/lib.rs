//! Bulk reconciliation of in-memory records against SQLite tables for the Runar ecosystem.
//!
//! # Intention
//!
//! - Make a filtered subset of a table match a collection of records with the
//!   fewest inserts, updates and deletes, inside one transaction ([`sync()`]).
//! - Classify two record collections into added, removed, unchanged and
//!   updated records ([`compare()`]).
//!
//! # Architectural Boundaries
//!
//! - Database access goes through the [`Store`] trait; [`SqliteStore`] is the
//!   rusqlite implementation.
//! - Column metadata (writability, generated columns, canonical forms) comes
//!   from explicit [`Schema`] descriptors, never from runtime introspection.
//! - No business logic or unrelated utilities.

pub mod compare;
pub mod error;
pub mod keys;
pub mod query;
pub mod record;
pub mod schema;
pub mod sqlite;
pub mod store;
pub mod sync;
pub mod value;

pub use compare::{compare, Changes, Comparison, UpdatedRecord};
pub use error::{CoercionError, ErrorKind, StoreError, SyncError};
pub use keys::{KeyField, KeyFields};
pub use query::{Query, QueryOperator, SqlQuery};
pub use record::Record;
pub use schema::{
    ColumnConstraint, ColumnDefinition, DataType, DefaultValue, ForeignKey, ForeignKeyAction,
    IndexDefinition, Schema, TableDefinition,
};
pub use sqlite::{DatabaseConfig, SqliteConfig, SqliteStore, SqliteTransaction};
pub use store::{LockScope, Store, StoreTransaction};
pub use sync::{sync, SyncOptions, SyncStats};
pub use value::{Key, Value};

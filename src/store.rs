//! The persistence collaborator a sync runs against.
//!
//! A [`Store`] opens one transaction per sync, routed to whichever database
//! holds the target table. Everything the syncer needs from the database goes
//! through the [`StoreTransaction`] it hands back. Dropping a transaction
//! without calling [`StoreTransaction::commit`] must roll it back and release
//! every lock it holds.

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::query::Query;
use crate::record::Record;
use crate::schema::TableDefinition;
use crate::value::Value;

/// Rows locked together with the filtered rows of the target table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum LockScope {
    /// Only the target table's filtered rows.
    #[default]
    SelfOnly,
    /// Additionally the rows referenced through these foreign-key columns.
    Related(Vec<String>),
}

pub trait Store {
    type Transaction<'a>: StoreTransaction
    where
        Self: 'a;

    /// Begin a write transaction on the database `table` is routed to.
    fn begin(&mut self, table: &TableDefinition) -> Result<Self::Transaction<'_>>;
}

pub trait StoreTransaction {
    /// Fetch and lock every row matching `filter`, ordered by identity.
    fn select_for_update(
        &mut self,
        table: &TableDefinition,
        filter: &Query,
        scope: &LockScope,
    ) -> Result<Vec<Record>>;

    /// Insert `records`, writing `fields` plus the identity when a record
    /// carries one. Returns the identity of every inserted row, in input order.
    fn bulk_insert(
        &mut self,
        table: &TableDefinition,
        records: &[Record],
        fields: &[String],
        batch_size: Option<usize>,
    ) -> Result<Vec<Value>>;

    /// Write `fields` of each record to the row sharing its identity.
    fn bulk_update(
        &mut self,
        table: &TableDefinition,
        records: &[Record],
        fields: &[String],
        batch_size: Option<usize>,
    ) -> Result<usize>;

    /// Delete the rows matching `filter` whose identity is in `ids`.
    fn delete(&mut self, table: &TableDefinition, filter: &Query, ids: &[Value]) -> Result<usize>;

    fn commit(self) -> Result<()>;
}

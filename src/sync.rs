//! Make a filtered slice of a table match a collection of records.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::compare::{diff, ensure_table};
use crate::error::{Result, SyncError};
use crate::keys::KeyFields;
use crate::query::Query;
use crate::record::Record;
use crate::schema::{Schema, TableDefinition};
use crate::store::{LockScope, Store, StoreTransaction};
use crate::value::{Key, Value};

/// Per-call sync configuration. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncOptions {
    /// Target table; inferred from the first desired record when unset.
    pub table: Option<String>,
    /// Maximum rows per insert or update statement.
    pub batch_size: Option<usize>,
    /// Columns written on update. Defaults to every editable, non-generated column.
    pub fields: Option<Vec<String>>,
    pub exclude_fields: Vec<String>,
    pub skip_creates: bool,
    pub skip_updates: bool,
    pub skip_deletes: bool,
    pub locking_scope: LockScope,
}

impl SyncOptions {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn with_table(mut self, table: &str) -> Self {
        self.table = Some(table.to_string());
        self
    }
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = Some(batch_size);
        self
    }
    pub fn with_fields<S: Into<String>>(mut self, fields: impl IntoIterator<Item = S>) -> Self {
        self.fields = Some(fields.into_iter().map(Into::into).collect());
        self
    }
    pub fn with_exclude_fields<S: Into<String>>(mut self, fields: impl IntoIterator<Item = S>) -> Self {
        self.exclude_fields = fields.into_iter().map(Into::into).collect();
        self
    }
    pub fn skip_creates(mut self) -> Self {
        self.skip_creates = true;
        self
    }
    pub fn skip_updates(mut self) -> Self {
        self.skip_updates = true;
        self
    }
    pub fn skip_deletes(mut self) -> Self {
        self.skip_deletes = true;
        self
    }
    pub fn with_locking_scope(mut self, scope: LockScope) -> Self {
        self.locking_scope = scope;
        self
    }
}

/// Rows touched by a sync. A skipped phase reports zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStats {
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
}

/// Reconcile the rows of a table matching `filter` with `desired`.
///
/// Inside one transaction the matching rows are locked and read in identity
/// order, then desired records are matched to them by `key_fields`:
/// unmatched records are inserted, matched records whose write fields differ
/// are updated, and rows nobody matched are deleted. Any failure rolls the
/// whole transaction back.
///
/// After a successful commit every matched or created record carries its row
/// identity.
pub fn sync<S: Store>(
    store: &mut S,
    schema: &Schema,
    desired: &mut [Record],
    key_fields: &KeyFields,
    filter: &Query,
    options: &SyncOptions,
) -> Result<SyncStats> {
    let table = resolve_table(schema, desired, options)?;
    key_fields.validate(table)?;
    let write_fields = table.write_fields(options.fields.as_deref(), &options.exclude_fields)?;
    let insert_fields = table.insert_fields();

    let mut keys = Vec::with_capacity(desired.len());
    let mut seen = HashSet::with_capacity(desired.len());
    for record in desired.iter() {
        ensure_table(table, record)?;
        let key = key_fields.key_of(table, record)?;
        if !seen.insert(key.clone()) {
            return Err(SyncError::DuplicateKey(key));
        }
        keys.push(key);
    }

    let mut tx = store.begin(table)?;
    let existing = tx.select_for_update(table, filter, &options.locking_scope)?;

    let mut by_key: HashMap<Key, usize> = HashMap::with_capacity(existing.len());
    let mut identities_in_scope: HashSet<Key> = HashSet::with_capacity(existing.len());
    for (index, row) in existing.iter().enumerate() {
        by_key.entry(key_fields.key_of(table, row)?).or_insert(index);
        identities_in_scope.insert(identity_key(table, row)?);
    }

    let mut matched = vec![false; existing.len()];
    let mut identities: Vec<Option<Value>> = vec![None; desired.len()];
    let mut created_from: Vec<usize> = Vec::new();
    let mut to_create: Vec<Record> = Vec::new();
    let mut to_update: Vec<Record> = Vec::new();

    for (index, (record, key)) in desired.iter().zip(&keys).enumerate() {
        let declared = declared_identity(table, record)?;
        match by_key.get(key) {
            Some(&row_index) => {
                let row = &existing[row_index];
                let identity = table.canonicalize(&table.primary_key, row.value_or_null(&table.primary_key))?;
                if let Some(declared) = declared {
                    if !declared.same_as(&identity) {
                        return Err(SyncError::IdentityMismatch {
                            key: key.clone(),
                            declared,
                            matched: identity,
                        });
                    }
                }
                matched[row_index] = true;
                if !diff(table, write_fields.as_slice(), row, record)?.is_empty() {
                    to_update.push(canonical_record(table, record, &write_fields, &identity)?);
                }
                identities[index] = Some(identity);
            }
            None => {
                if let Some(declared) = &declared {
                    if identities_in_scope.contains(&Key::new(vec![declared.clone()])) {
                        return Err(SyncError::IdentityConflict {
                            declared: declared.clone(),
                        });
                    }
                }
                if options.skip_creates {
                    continue;
                }
                if !filter.matches(table, record)? {
                    return Err(SyncError::OutsideFilter(key.clone()));
                }
                let identity = declared.unwrap_or(Value::Null);
                to_create.push(canonical_record(table, record, &insert_fields, &identity)?);
                created_from.push(index);
            }
        }
    }

    let stale: Vec<Value> = existing
        .iter()
        .zip(&matched)
        .filter(|(_, matched)| !**matched)
        .map(|(row, _)| row.value_or_null(&table.primary_key).clone())
        .collect();

    let mut stats = SyncStats::default();
    if !options.skip_creates && !to_create.is_empty() {
        let created = tx.bulk_insert(table, &to_create, &insert_fields, options.batch_size)?;
        for (&index, identity) in created_from.iter().zip(created) {
            identities[index] = Some(identity);
        }
        stats.created = to_create.len();
    }
    if !options.skip_updates {
        stats.updated = tx.bulk_update(table, &to_update, &write_fields, options.batch_size)?;
    }
    if !options.skip_deletes {
        stats.deleted = tx.delete(table, filter, &stale)?;
    }
    tx.commit()?;

    for (record, identity) in desired.iter_mut().zip(identities) {
        if let Some(identity) = identity {
            record.set(&table.primary_key, identity);
        }
    }

    debug!(
        table = %table.name,
        created = stats.created,
        updated = stats.updated,
        deleted = stats.deleted,
        "{}: {} created, {} updated, {} deleted.",
        table.name,
        stats.created,
        stats.updated,
        stats.deleted
    );
    Ok(stats)
}

fn resolve_table<'s>(schema: &'s Schema, desired: &[Record], options: &SyncOptions) -> Result<&'s TableDefinition> {
    let name = options
        .table
        .as_deref()
        .or_else(|| desired.first().map(|r| r.table.as_str()))
        .ok_or(SyncError::MissingTable)?;
    schema.table(name)
}

fn identity_key(table: &TableDefinition, record: &Record) -> Result<Key> {
    let identity = table.canonicalize(&table.primary_key, record.value_or_null(&table.primary_key))?;
    Ok(Key::new(vec![identity]))
}

fn declared_identity(table: &TableDefinition, record: &Record) -> Result<Option<Value>> {
    let identity = table.canonicalize(&table.primary_key, record.value_or_null(&table.primary_key))?;
    Ok((!identity.is_null()).then_some(identity))
}

/// Copy of `record` holding the canonical form of `fields` and `identity`.
/// Absent attributes take their literal column default; the rest stay absent
/// so the store applies defaults only the database can compute.
fn canonical_record(table: &TableDefinition, record: &Record, fields: &[String], identity: &Value) -> Result<Record> {
    let mut canonical = Record::new(&table.name);
    if !identity.is_null() {
        canonical.set(&table.primary_key, identity.clone());
    }
    for field in fields {
        let value = table.value_of(record, field)?;
        if record.get(field).is_some() || !value.is_null() {
            canonical.set(field, value);
        }
    }
    Ok(canonical)
}

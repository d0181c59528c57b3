//! Partition two record sets into added, removed, unchanged and updated.

use std::collections::{BTreeMap, HashMap, HashSet};

use crate::error::{Result, SyncError};
use crate::keys::KeyFields;
use crate::record::Record;
use crate::schema::TableDefinition;
use crate::value::{Key, Value};

/// Changed columns of a matched record: `column -> (old, new)`.
pub type Changes = BTreeMap<String, (Value, Value)>;

#[derive(Debug, Clone, PartialEq)]
pub struct UpdatedRecord<'a> {
    pub record: &'a Record,
    /// Identity of the old record this one matched.
    pub matched_identity: Value,
    pub changes: Changes,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Comparison<'a> {
    pub added: Vec<&'a Record>,
    pub removed: Vec<&'a Record>,
    pub unchanged: Vec<&'a Record>,
    pub updated: Vec<UpdatedRecord<'a>>,
}

impl<'a> Comparison<'a> {
    pub fn updated_records(&self) -> impl Iterator<Item = &'a Record> + '_ {
        self.updated.iter().map(|u| u.record)
    }

    pub fn is_unchanged(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.updated.is_empty()
    }
}

/// Compare `old` against `new` by `key_fields`.
///
/// Every column except the identity and `ignore_fields` is compared in its
/// canonical form. Results keep input order. A key occurring twice in `new`
/// is rejected; a key occurring twice in `old` matches its first occurrence
/// and the later ones are reported as removed.
pub fn compare<'a>(
    table: &TableDefinition,
    old: &'a [Record],
    new: &'a [Record],
    key_fields: &KeyFields,
    ignore_fields: &[String],
) -> Result<Comparison<'a>> {
    key_fields.validate(table)?;
    let compared = table.compared_fields(ignore_fields)?;

    let mut old_by_key: HashMap<Key, usize> = HashMap::with_capacity(old.len());
    for (index, record) in old.iter().enumerate() {
        ensure_table(table, record)?;
        old_by_key.entry(key_fields.key_of(table, record)?).or_insert(index);
    }

    let mut comparison = Comparison::default();
    let mut matched = vec![false; old.len()];
    let mut seen = HashSet::with_capacity(new.len());
    for record in new {
        ensure_table(table, record)?;
        let key = key_fields.key_of(table, record)?;
        if !seen.insert(key.clone()) {
            return Err(SyncError::DuplicateKey(key));
        }
        let Some(&index) = old_by_key.get(&key) else {
            comparison.added.push(record);
            continue;
        };
        matched[index] = true;
        let previous = &old[index];
        let changes = diff(table, compared.as_slice(), previous, record)?;
        if changes.is_empty() {
            comparison.unchanged.push(record);
        } else {
            comparison.updated.push(UpdatedRecord {
                record,
                matched_identity: previous.value_or_null(&table.primary_key).clone(),
                changes,
            });
        }
    }

    comparison.removed = old
        .iter()
        .zip(matched)
        .filter(|(_, matched)| !matched)
        .map(|(record, _)| record)
        .collect();
    Ok(comparison)
}

/// Canonical differences between two records over `fields`.
pub(crate) fn diff<S: AsRef<str>>(
    table: &TableDefinition,
    fields: &[S],
    old: &Record,
    new: &Record,
) -> Result<Changes> {
    let mut changes = Changes::new();
    for field in fields {
        let field = field.as_ref();
        let before = table.value_of(old, field)?;
        let after = table.value_of(new, field)?;
        if !before.same_as(&after) {
            changes.insert(field.to_string(), (before, after));
        }
    }
    Ok(changes)
}

pub(crate) fn ensure_table(table: &TableDefinition, record: &Record) -> Result<()> {
    if record.table != table.name {
        return Err(SyncError::TableMismatch {
            expected: table.name.clone(),
            found: record.table.clone(),
        });
    }
    Ok(())
}

use serde::{Deserialize, Serialize};

use crate::error::{Result, SyncError};
use crate::record::Record;
use crate::schema::TableDefinition;
use crate::value::Key;

/// One component of a matching key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeyField {
    /// The table's identity column, whatever its name.
    Identity,
    Column(String),
}

impl From<&str> for KeyField {
    fn from(name: &str) -> Self {
        KeyField::Column(name.to_string())
    }
}

/// Ordered, non-empty list of fields used to match records to rows.
///
/// Foreign keys take part through their identity column (`company_id`), so a
/// reference compares by the identity it points at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<KeyField>")]
pub struct KeyFields(Vec<KeyField>);

impl KeyFields {
    pub fn new<I, F>(fields: I) -> Result<Self>
    where
        I: IntoIterator<Item = F>,
        F: Into<KeyField>,
    {
        let fields: Vec<KeyField> = fields.into_iter().map(Into::into).collect();
        if fields.is_empty() {
            return Err(SyncError::EmptyKeyFields);
        }
        Ok(Self(fields))
    }

    pub fn identity() -> Self {
        Self(vec![KeyField::Identity])
    }

    pub fn fields(&self) -> &[KeyField] {
        &self.0
    }

    /// Check every key field names a column of `table`.
    pub fn validate(&self, table: &TableDefinition) -> Result<()> {
        for field in &self.0 {
            table.column(self.column_name(table, field))?;
        }
        Ok(())
    }

    /// Canonical key tuple of `record`.
    pub fn key_of(&self, table: &TableDefinition, record: &Record) -> Result<Key> {
        let mut values = Vec::with_capacity(self.0.len());
        for field in &self.0 {
            let name = self.column_name(table, field);
            let value = record.get(name).ok_or_else(|| SyncError::MissingKeyField {
                table: table.name.clone(),
                field: name.to_string(),
            })?;
            values.push(table.canonicalize(name, value)?);
        }
        Ok(Key::new(values))
    }

    fn column_name<'a>(&'a self, table: &'a TableDefinition, field: &'a KeyField) -> &'a str {
        match field {
            KeyField::Identity => &table.primary_key,
            KeyField::Column(name) => name,
        }
    }
}

impl TryFrom<Vec<KeyField>> for KeyFields {
    type Error = SyncError;

    fn try_from(fields: Vec<KeyField>) -> Result<Self> {
        KeyFields::new(fields)
    }
}

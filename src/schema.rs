//! Schema descriptors.
//!
//! A [`TableDefinition`] tells the comparator and the syncer everything they
//! would otherwise have to discover at runtime: which column is the identity,
//! which columns may be written, which are generated by the database, and how a
//! value is brought into its canonical comparable form.

use serde::{Deserialize, Serialize};

use crate::error::{CoercionError, Result, SyncError};
use crate::record::Record;
use crate::value::Value;

/// Per-column canonicalization hook, overriding the [`DataType`] default.
pub type Canonicalizer = fn(&Value) -> std::result::Result<Value, CoercionError>;

/// Schema definition for the SQLite database
#[derive(Debug, Clone, Default)]
pub struct Schema {
    pub tables: Vec<TableDefinition>,
}

impl Schema {
    pub fn new() -> Self {
        Self { tables: Vec::new() }
    }
    pub fn add_table(mut self, table: TableDefinition) -> Self {
        self.tables.push(table);
        self
    }
    pub fn table(&self, name: &str) -> Result<&TableDefinition> {
        self.tables
            .iter()
            .find(|t| t.name == name)
            .ok_or_else(|| SyncError::UnknownTable(name.to_string()))
    }
}

#[derive(Debug, Clone)]
pub struct TableDefinition {
    pub name: String,
    pub columns: Vec<ColumnDefinition>,
    /// Name of the single identity column.
    pub primary_key: String,
    pub foreign_keys: Vec<ForeignKey>,
    pub indexes: Vec<IndexDefinition>,
}

impl TableDefinition {
    pub fn new(name: &str, primary_key: &str) -> Self {
        Self {
            name: name.to_string(),
            columns: Vec::new(),
            primary_key: primary_key.to_string(),
            foreign_keys: Vec::new(),
            indexes: Vec::new(),
        }
    }

    pub fn add_column(mut self, column: ColumnDefinition) -> Self {
        self.columns.push(column);
        self
    }

    pub fn add_foreign_key(mut self, foreign_key: ForeignKey) -> Self {
        self.foreign_keys.push(foreign_key);
        self
    }

    pub fn add_index(mut self, index: IndexDefinition) -> Self {
        self.indexes.push(index);
        self
    }

    pub fn column(&self, name: &str) -> Result<&ColumnDefinition> {
        self.columns
            .iter()
            .find(|c| c.name == name)
            .ok_or_else(|| SyncError::UnknownField {
                table: self.name.clone(),
                field: name.to_string(),
            })
    }

    pub fn identity_column(&self) -> Result<&ColumnDefinition> {
        self.column(&self.primary_key)
    }

    /// Whether the database assigns identities to rows inserted without one.
    pub fn identity_is_generated(&self) -> bool {
        self.identity_column()
            .map(|c| c.auto_generated && c.data_type == DataType::Integer)
            .unwrap_or(false)
    }

    /// Canonical form of `value` for column `field`.
    pub fn canonicalize(&self, field: &str, value: &Value) -> Result<Value> {
        self.column(field)?
            .canonicalize(value)
            .map_err(|source| SyncError::Coercion {
                field: field.to_string(),
                source,
            })
    }

    /// Canonical value of `field` in `record`. An absent attribute takes the
    /// column's literal default, or `Null` when it has none.
    pub fn value_of(&self, record: &Record, field: &str) -> Result<Value> {
        let default;
        let value = match record.get(field) {
            Some(value) => value,
            None => {
                default = self
                    .column(field)?
                    .default_value
                    .as_ref()
                    .and_then(DefaultValue::as_value)
                    .unwrap_or(Value::Null);
                &default
            }
        };
        self.canonicalize(field, value)
    }

    /// Resolve the columns an update may write.
    ///
    /// With `fields` given, every entry must name a non-identity column.
    /// Otherwise all editable, non-generated columns except the identity are
    /// used. `exclude` is subtracted in both cases and must name real columns.
    pub fn write_fields(&self, fields: Option<&[String]>, exclude: &[String]) -> Result<Vec<String>> {
        for name in exclude {
            self.column(name)?;
        }
        let candidates: Vec<String> = match fields {
            Some(fields) => {
                for name in fields {
                    self.column(name)?;
                    if *name == self.primary_key {
                        return Err(SyncError::IdentityInFields {
                            table: self.name.clone(),
                            field: name.clone(),
                        });
                    }
                }
                fields.to_vec()
            }
            None => self
                .columns
                .iter()
                .filter(|c| c.name != self.primary_key && c.editable && !c.auto_generated)
                .map(|c| c.name.clone())
                .collect(),
        };
        Ok(candidates
            .into_iter()
            .filter(|name| !exclude.contains(name))
            .collect())
    }

    /// Columns written when a row is created: everything the database does not
    /// generate itself. The identity is written separately when supplied.
    pub fn insert_fields(&self) -> Vec<String> {
        self.columns
            .iter()
            .filter(|c| c.name != self.primary_key && !c.auto_generated)
            .map(|c| c.name.clone())
            .collect()
    }

    /// Columns taking part in record comparison: everything but the identity
    /// and the ignored columns.
    pub fn compared_fields(&self, ignore: &[String]) -> Result<Vec<&str>> {
        for name in ignore {
            self.column(name)?;
        }
        Ok(self
            .columns
            .iter()
            .filter(|c| c.name != self.primary_key && !ignore.contains(&c.name))
            .map(|c| c.name.as_str())
            .collect())
    }

    pub fn create_table_sql(&self) -> String {
        let mut parts: Vec<String> = self
            .columns
            .iter()
            .map(|c| c.definition_sql(c.name == self.primary_key))
            .collect();
        for fk in &self.foreign_keys {
            parts.push(format!(
                "FOREIGN KEY ({}) REFERENCES {} ({}) ON DELETE {} ON UPDATE {}",
                quote_ident(&fk.column),
                quote_ident(&fk.foreign_table),
                quote_ident(&fk.foreign_column),
                fk.on_delete.as_sql(),
                fk.on_update.as_sql()
            ));
        }
        format!(
            "CREATE TABLE IF NOT EXISTS {} ({});",
            quote_ident(&self.name),
            parts.join(", ")
        )
    }

    pub fn create_index_sql(&self) -> Vec<String> {
        self.indexes
            .iter()
            .map(|index| {
                let columns: Vec<String> = index.columns.iter().map(|c| quote_ident(c)).collect();
                format!(
                    "CREATE {}INDEX IF NOT EXISTS {} ON {} ({});",
                    if index.unique { "UNIQUE " } else { "" },
                    quote_ident(&index.name),
                    quote_ident(&self.name),
                    columns.join(", ")
                )
            })
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct ColumnDefinition {
    pub name: String,
    pub data_type: DataType,
    pub constraints: Vec<ColumnConstraint>,
    pub default_value: Option<DefaultValue>,
    /// Whether callers may write this column through a sync.
    pub editable: bool,
    /// Filled in by the database (row identities, timestamps).
    pub auto_generated: bool,
    pub canonicalizer: Option<Canonicalizer>,
}

impl ColumnDefinition {
    pub fn new(name: &str, data_type: DataType) -> Self {
        Self {
            name: name.to_string(),
            data_type,
            constraints: Vec::new(),
            default_value: None,
            editable: true,
            auto_generated: false,
            canonicalizer: None,
        }
    }

    pub fn not_null(mut self) -> Self {
        self.constraints.push(ColumnConstraint::NotNull);
        self
    }

    pub fn unique(mut self) -> Self {
        self.constraints.push(ColumnConstraint::Unique);
        self
    }

    pub fn with_default(mut self, default_value: DefaultValue) -> Self {
        self.default_value = Some(default_value);
        self
    }

    pub fn auto_generated(mut self) -> Self {
        self.auto_generated = true;
        self
    }

    pub fn read_only(mut self) -> Self {
        self.editable = false;
        self
    }

    pub fn with_canonicalizer(mut self, canonicalizer: Canonicalizer) -> Self {
        self.canonicalizer = Some(canonicalizer);
        self
    }

    pub fn canonicalize(&self, value: &Value) -> std::result::Result<Value, CoercionError> {
        match self.canonicalizer {
            Some(canonicalize) => canonicalize(value),
            None => self.data_type.canonicalize(value),
        }
    }

    fn definition_sql(&self, is_primary_key: bool) -> String {
        let mut sql = format!("{} {}", quote_ident(&self.name), self.data_type.sql_type());
        if is_primary_key {
            sql.push_str(" PRIMARY KEY");
        }
        for constraint in &self.constraints {
            sql.push_str(match constraint {
                ColumnConstraint::NotNull => " NOT NULL",
                ColumnConstraint::Unique => " UNIQUE",
            });
        }
        if let Some(default_value) = &self.default_value {
            sql.push_str(" DEFAULT ");
            sql.push_str(&default_value.as_sql());
        }
        sql
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataType {
    Integer,
    Text,
    Real,
    Blob,
    Boolean,
}

impl DataType {
    pub fn sql_type(&self) -> &'static str {
        match self {
            DataType::Integer | DataType::Boolean => "INTEGER",
            DataType::Text => "TEXT",
            DataType::Real => "REAL",
            DataType::Blob => "BLOB",
        }
    }

    /// Built-in coercion into the comparable form of this type. `Null` is
    /// canonical for every type.
    pub fn canonicalize(&self, value: &Value) -> std::result::Result<Value, CoercionError> {
        let fail = || CoercionError::new(value, self.name());
        match (self, value) {
            (_, Value::Null) => Ok(Value::Null),

            (DataType::Integer, Value::Integer(v)) => Ok(Value::Integer(*v)),
            (DataType::Integer, Value::Boolean(v)) => Ok(Value::Integer(i64::from(*v))),
            (DataType::Integer, Value::Real(v)) if v.fract() == 0.0 && fits_i64(*v) => {
                Ok(Value::Integer(*v as i64))
            }
            (DataType::Integer, Value::Text(v)) => {
                v.trim().parse().map(Value::Integer).map_err(|_| fail())
            }

            (DataType::Real, Value::Real(v)) => Ok(Value::Real(*v)),
            (DataType::Real, Value::Integer(v)) => Ok(Value::Real(*v as f64)),
            (DataType::Real, Value::Text(v)) => v.trim().parse().map(Value::Real).map_err(|_| fail()),

            (DataType::Text, Value::Text(v)) => Ok(Value::Text(v.clone())),
            (DataType::Text, Value::Integer(v)) => Ok(Value::Text(v.to_string())),
            (DataType::Text, Value::Real(v)) => Ok(Value::Text(v.to_string())),

            (DataType::Blob, Value::Blob(v)) => Ok(Value::Blob(v.clone())),
            (DataType::Blob, Value::Text(v)) => Ok(Value::Blob(v.clone().into_bytes())),

            (DataType::Boolean, Value::Boolean(v)) => Ok(Value::Boolean(*v)),
            (DataType::Boolean, Value::Integer(0)) => Ok(Value::Boolean(false)),
            (DataType::Boolean, Value::Integer(1)) => Ok(Value::Boolean(true)),
            (DataType::Boolean, Value::Text(v)) => match v.trim() {
                "true" | "1" => Ok(Value::Boolean(true)),
                "false" | "0" => Ok(Value::Boolean(false)),
                _ => Err(fail()),
            },

            _ => Err(fail()),
        }
    }

    fn name(&self) -> &'static str {
        match self {
            DataType::Integer => "integer",
            DataType::Text => "text",
            DataType::Real => "real",
            DataType::Blob => "blob",
            DataType::Boolean => "boolean",
        }
    }
}

/// Whole floats in `[-2^63, 2^63)` convert to `i64` exactly; `as` would saturate the rest.
fn fits_i64(v: f64) -> bool {
    (-9_223_372_036_854_775_808.0..9_223_372_036_854_775_808.0).contains(&v)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ColumnConstraint {
    NotNull,
    Unique,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DefaultValue {
    Integer(i64),
    Text(String),
    Real(f64),
    Null,
    CurrentTimestamp,
}

impl DefaultValue {
    /// The default as a value, when it does not depend on the database.
    pub fn as_value(&self) -> Option<Value> {
        match self {
            DefaultValue::Integer(v) => Some(Value::Integer(*v)),
            DefaultValue::Text(v) => Some(Value::Text(v.clone())),
            DefaultValue::Real(v) => Some(Value::Real(*v)),
            DefaultValue::Null => Some(Value::Null),
            DefaultValue::CurrentTimestamp => None,
        }
    }

    pub(crate) fn as_sql(&self) -> String {
        match self {
            DefaultValue::Integer(v) => v.to_string(),
            DefaultValue::Text(v) => format!("'{}'", v.replace('\'', "''")),
            DefaultValue::Real(v) => v.to_string(),
            DefaultValue::Null => "NULL".to_string(),
            DefaultValue::CurrentTimestamp => "CURRENT_TIMESTAMP".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForeignKey {
    pub column: String,
    pub foreign_table: String,
    pub foreign_column: String,
    pub on_delete: ForeignKeyAction,
    pub on_update: ForeignKeyAction,
}

impl ForeignKey {
    pub fn new(column: &str, foreign_table: &str, foreign_column: &str) -> Self {
        Self {
            column: column.to_string(),
            foreign_table: foreign_table.to_string(),
            foreign_column: foreign_column.to_string(),
            on_delete: ForeignKeyAction::NoAction,
            on_update: ForeignKeyAction::NoAction,
        }
    }

    pub fn on_delete(mut self, action: ForeignKeyAction) -> Self {
        self.on_delete = action;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ForeignKeyAction {
    NoAction,
    Cascade,
    SetNull,
    SetDefault,
    Restrict,
}

impl ForeignKeyAction {
    fn as_sql(&self) -> &'static str {
        match self {
            ForeignKeyAction::NoAction => "NO ACTION",
            ForeignKeyAction::Cascade => "CASCADE",
            ForeignKeyAction::SetNull => "SET NULL",
            ForeignKeyAction::SetDefault => "SET DEFAULT",
            ForeignKeyAction::Restrict => "RESTRICT",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexDefinition {
    pub name: String,
    pub columns: Vec<String>,
    pub unique: bool,
}

pub(crate) fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

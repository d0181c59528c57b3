//! SQLite implementation of the [`Store`] collaborator.

use std::collections::HashMap;
use std::time::Duration;

use rusqlite::types::{ToSqlOutput, ValueRef};
use rusqlite::{params_from_iter, Connection, ToSql, Transaction, TransactionBehavior};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::error::{Result, StoreError, SyncError};
use crate::query::{Query, SqlQuery};
use crate::record::Record;
use crate::schema::{quote_ident, ColumnDefinition, DataType, Schema, TableDefinition};
use crate::store::{LockScope, Store, StoreTransaction};
use crate::value::Value;

pub const DEFAULT_ALIAS: &str = "default";

/// SQLite's default `SQLITE_MAX_VARIABLE_NUMBER` before 3.32.
const DEFAULT_MAX_VARIABLES: usize = 999;
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub alias: String,
    /// Path to the SQLite database file, or `:memory:`
    pub db_path: String,
}

/// SQLite store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SqliteConfig {
    pub databases: Vec<DatabaseConfig>,
    /// Table name to database alias. Unrouted tables use [`DEFAULT_ALIAS`].
    #[serde(default)]
    pub routes: HashMap<String, String>,
    /// How long a transaction waits for another writer before failing.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
    /// Upper bound on bound parameters per statement.
    #[serde(default = "default_max_variables")]
    pub max_variables: usize,
    /// Schema definition for the databases
    #[serde(skip)]
    pub schema: Schema,
}

fn default_busy_timeout_ms() -> u64 {
    DEFAULT_BUSY_TIMEOUT_MS
}

fn default_max_variables() -> usize {
    DEFAULT_MAX_VARIABLES
}

impl SqliteConfig {
    /// Create a new SQLite config with a single default database and a schema
    pub fn new(db_path: impl Into<String>, schema: Schema) -> Self {
        Self {
            databases: vec![DatabaseConfig {
                alias: DEFAULT_ALIAS.to_string(),
                db_path: db_path.into(),
            }],
            routes: HashMap::new(),
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
            max_variables: DEFAULT_MAX_VARIABLES,
            schema,
        }
    }

    pub fn with_database(mut self, alias: &str, db_path: impl Into<String>) -> Self {
        self.databases.push(DatabaseConfig {
            alias: alias.to_string(),
            db_path: db_path.into(),
        });
        self
    }

    pub fn with_route(mut self, table: &str, alias: &str) -> Self {
        self.routes.insert(table.to_string(), alias.to_string());
        self
    }

    pub fn alias_for(&self, table: &str) -> &str {
        self.routes.get(table).map_or(DEFAULT_ALIAS, String::as_str)
    }
}

/// One connection per configured database, with tables routed between them.
pub struct SqliteStore {
    config: SqliteConfig,
    connections: HashMap<String, Connection>,
}

impl SqliteStore {
    /// Open every configured database and create the schema's tables.
    pub fn open(config: SqliteConfig) -> Result<Self> {
        let mut connections = HashMap::with_capacity(config.databases.len());
        for database in &config.databases {
            debug!(alias = %database.alias, path = %database.db_path, "opening sqlite database");
            let connection = Connection::open(&database.db_path)?;
            connection.busy_timeout(Duration::from_millis(config.busy_timeout_ms))?;
            connection.execute_batch("PRAGMA foreign_keys = ON;")?;
            connections.insert(database.alias.clone(), connection);
        }
        let store = Self { config, connections };
        store.initialize_schema()?;
        Ok(store)
    }

    pub fn schema(&self) -> &Schema {
        &self.config.schema
    }

    /// Connection holding `table`.
    pub fn connection(&self, table: &str) -> Result<&Connection> {
        let alias = self.config.alias_for(table);
        self.connections
            .get(alias)
            .ok_or_else(|| StoreError::UnknownDatabase(alias.to_string()).into())
    }

    fn initialize_schema(&self) -> Result<()> {
        for table in &self.config.schema.tables {
            let conn = self.connection(&table.name)?;
            conn.execute_batch(&table.create_table_sql())?;
            for sql in table.create_index_sql() {
                conn.execute_batch(&sql)?;
            }
        }
        Ok(())
    }

    /// Read the rows of `table` matching `filter` without locking them.
    pub fn fetch(&self, table: &TableDefinition, filter: &Query) -> Result<Vec<Record>> {
        select_rows(self.connection(&table.name)?, table, filter)
    }

    /// Run a raw statement against the database holding `table`.
    pub fn execute_sql(&self, table: &str, query: &SqlQuery) -> Result<usize> {
        let conn = self.connection(table)?;
        Ok(conn.execute(&query.statement, params_from_iter(query.params.iter()))?)
    }
}

impl Store for SqliteStore {
    type Transaction<'a> = SqliteTransaction<'a>;

    fn begin(&mut self, table: &TableDefinition) -> Result<SqliteTransaction<'_>> {
        let alias = self.config.alias_for(&table.name).to_string();
        let max_variables = self.config.max_variables.max(1);
        let conn = self
            .connections
            .get_mut(&alias)
            .ok_or(StoreError::UnknownDatabase(alias.clone()))?;
        trace!(table = %table.name, alias = %alias, "beginning immediate transaction");
        // IMMEDIATE takes the database write lock before the filtered rows are read.
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        Ok(SqliteTransaction { tx, max_variables })
    }
}

/// An open `BEGIN IMMEDIATE` transaction. Rolls back when dropped uncommitted.
pub struct SqliteTransaction<'conn> {
    tx: Transaction<'conn>,
    max_variables: usize,
}

impl SqliteTransaction<'_> {
    fn rows_per_statement(&self, params_per_row: usize, batch_size: Option<usize>) -> usize {
        let limit = (self.max_variables / params_per_row.max(1)).max(1);
        batch_size.map_or(limit, |size| size.clamp(1, limit))
    }

    /// Whether SQLite will hand `rows` new rowids above the current maximum.
    fn rowids_increase(&self, table: &TableDefinition, rows: usize) -> Result<bool> {
        let sql = format!(
            "SELECT MAX({}) FROM {}",
            quote_ident(&table.primary_key),
            quote_ident(&table.name)
        );
        let max: Option<i64> = self.tx.query_row(&sql, [], |row| row.get(0))?;
        let rows = i64::try_from(rows).unwrap_or(i64::MAX);
        Ok(max.map_or(true, |max| max <= i64::MAX - rows))
    }

    fn insert_with_identity(
        &self,
        table: &TableDefinition,
        records: &[&Record],
        fields: &[String],
        batch_size: Option<usize>,
    ) -> Result<()> {
        let mut columns = vec![table.primary_key.clone()];
        columns.extend(fields.iter().cloned());
        for chunk in records.chunks(self.rows_per_statement(columns.len(), batch_size)) {
            let (sql, params) = insert_statement(table, &columns, chunk, "");
            trace!(table = %table.name, rows = chunk.len(), "bulk insert");
            self.tx.execute(&sql, params_from_iter(params.iter()))?;
        }
        Ok(())
    }

    fn insert_generated(
        &self,
        table: &TableDefinition,
        records: &[&Record],
        fields: &[String],
        batch_size: Option<usize>,
    ) -> Result<Vec<Value>> {
        if !table.identity_is_generated() {
            return Err(StoreError::UnsupportedValue {
                column: table.primary_key.clone(),
                reason: "identity is not generated by the database and must be supplied".to_string(),
            }
            .into());
        }
        let returning = format!(" RETURNING {}", quote_ident(&table.primary_key));
        let mut ids = Vec::with_capacity(records.len());
        if fields.is_empty() {
            let sql = format!("INSERT INTO {} DEFAULT VALUES{returning}", quote_ident(&table.name));
            for _ in records {
                ids.push(self.tx.query_row(&sql, [], |row| row.get::<_, i64>(0))?);
            }
        } else {
            for chunk in records.chunks(self.rows_per_statement(fields.len(), batch_size)) {
                if !self.rowids_increase(table, chunk.len())? {
                    // Rowids are picked at random once the maximum is taken.
                    for record in chunk {
                        let (sql, params) = insert_statement(table, fields, &[*record], &returning);
                        let id = self
                            .tx
                            .query_row(&sql, params_from_iter(params.iter()), |row| row.get::<_, i64>(0))?;
                        ids.push(id);
                    }
                    continue;
                }
                let (sql, params) = insert_statement(table, fields, chunk, &returning);
                trace!(table = %table.name, rows = chunk.len(), "bulk insert");
                let mut stmt = self.tx.prepare(&sql)?;
                let mut batch = stmt
                    .query_map(params_from_iter(params.iter()), |row| row.get::<_, i64>(0))?
                    .collect::<rusqlite::Result<Vec<i64>>>()?;
                // RETURNING order is unspecified, but rowids within one
                // statement are allocated in increasing order.
                batch.sort_unstable();
                ids.extend(batch);
            }
        }
        Ok(ids.into_iter().map(Value::Integer).collect())
    }
}

impl StoreTransaction for SqliteTransaction<'_> {
    fn select_for_update(
        &mut self,
        table: &TableDefinition,
        filter: &Query,
        scope: &LockScope,
    ) -> Result<Vec<Record>> {
        if let LockScope::Related(columns) = scope {
            for column in columns {
                if !table.foreign_keys.iter().any(|fk| fk.column == *column) {
                    return Err(SyncError::InvalidLockScope(format!(
                        "`{column}` is not a foreign key of `{}`",
                        table.name
                    )));
                }
            }
            // The immediate transaction already holds the database-wide write
            // lock, which covers the referenced rows as well.
            trace!(table = %table.name, related = ?columns, "related rows locked with database");
        }
        select_rows(&self.tx, table, filter)
    }

    fn bulk_insert(
        &mut self,
        table: &TableDefinition,
        records: &[Record],
        fields: &[String],
        batch_size: Option<usize>,
    ) -> Result<Vec<Value>> {
        let (with_identity, generated): (Vec<(usize, &Record)>, Vec<(usize, &Record)>) = records
            .iter()
            .enumerate()
            .partition(|(_, record)| !record.value_or_null(&table.primary_key).is_null());

        let mut ids = vec![Value::Null; records.len()];
        if !with_identity.is_empty() {
            let rows: Vec<&Record> = with_identity.iter().map(|(_, r)| *r).collect();
            self.insert_with_identity(table, &rows, fields, batch_size)?;
            for (index, record) in &with_identity {
                ids[*index] = record.value_or_null(&table.primary_key).clone();
            }
        }
        if !generated.is_empty() {
            let rows: Vec<&Record> = generated.iter().map(|(_, r)| *r).collect();
            let new_ids = self.insert_generated(table, &rows, fields, batch_size)?;
            for ((index, _), id) in generated.iter().zip(new_ids) {
                ids[*index] = id;
            }
        }
        Ok(ids)
    }

    fn bulk_update(
        &mut self,
        table: &TableDefinition,
        records: &[Record],
        fields: &[String],
        batch_size: Option<usize>,
    ) -> Result<usize> {
        if records.is_empty() || fields.is_empty() {
            return Ok(0);
        }
        let pk = quote_ident(&table.primary_key);
        let mut updated = 0;
        for chunk in records.chunks(self.rows_per_statement(2 * fields.len() + 1, batch_size)) {
            let mut params = Vec::with_capacity(chunk.len() * (2 * fields.len() + 1));
            let mut assignments = Vec::with_capacity(fields.len());
            for field in fields {
                let column = quote_ident(field);
                let mut cases = String::new();
                for record in chunk {
                    cases.push_str(" WHEN ? THEN ?");
                    params.push(record.value_or_null(&table.primary_key).clone());
                    params.push(record.value_or_null(field).clone());
                }
                assignments.push(format!("{column} = CASE {pk}{cases} ELSE {column} END"));
            }
            let marks = vec!["?"; chunk.len()].join(", ");
            params.extend(chunk.iter().map(|r| r.value_or_null(&table.primary_key).clone()));
            let sql = format!(
                "UPDATE {} SET {} WHERE {pk} IN ({marks})",
                quote_ident(&table.name),
                assignments.join(", ")
            );
            trace!(table = %table.name, rows = chunk.len(), "bulk update");
            updated += self.tx.execute(&sql, params_from_iter(params.iter()))?;
        }
        Ok(updated)
    }

    fn delete(&mut self, table: &TableDefinition, filter: &Query, ids: &[Value]) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        let mut filter_params = Vec::new();
        let condition = filter.where_clause(table, &mut filter_params)?;
        let per_statement = self.max_variables.saturating_sub(filter_params.len()).max(1);
        let mut deleted = 0;
        for chunk in ids.chunks(per_statement) {
            let marks = vec!["?"; chunk.len()].join(", ");
            let sql = format!(
                "DELETE FROM {} WHERE ({condition}) AND {} IN ({marks})",
                quote_ident(&table.name),
                quote_ident(&table.primary_key)
            );
            trace!(table = %table.name, rows = chunk.len(), "bulk delete");
            let params = filter_params.iter().chain(chunk.iter());
            deleted += self.tx.execute(&sql, params_from_iter(params))?;
        }
        Ok(deleted)
    }

    fn commit(self) -> Result<()> {
        Ok(self.tx.commit()?)
    }
}

/// Multi-row `INSERT`. An attribute a record lacks is filled with the column
/// default in place of a bound `NULL`.
fn insert_statement(
    table: &TableDefinition,
    columns: &[String],
    records: &[&Record],
    suffix: &str,
) -> (String, Vec<Value>) {
    let defaults: Vec<Option<String>> = columns
        .iter()
        .map(|c| {
            table
                .columns
                .iter()
                .find(|column| column.name == *c)
                .and_then(|column| column.default_value.as_ref())
                .map(|default| default.as_sql())
        })
        .collect();
    let mut params = Vec::with_capacity(records.len() * columns.len());
    let mut rows = Vec::with_capacity(records.len());
    for record in records {
        let mut row = Vec::with_capacity(columns.len());
        for (column, default) in columns.iter().zip(&defaults) {
            match (record.get(column), default) {
                (None, Some(default)) => row.push(default.clone()),
                (value, _) => {
                    params.push(value.cloned().unwrap_or(Value::Null));
                    row.push("?".to_string());
                }
            }
        }
        rows.push(format!("({})", row.join(", ")));
    }
    let names: Vec<String> = columns.iter().map(|c| quote_ident(c)).collect();
    let sql = format!(
        "INSERT INTO {} ({}) VALUES {}{suffix}",
        quote_ident(&table.name),
        names.join(", "),
        rows.join(", ")
    );
    (sql, params)
}

fn select_rows(conn: &Connection, table: &TableDefinition, filter: &Query) -> Result<Vec<Record>> {
    let mut params = Vec::new();
    let condition = filter.where_clause(table, &mut params)?;
    let names: Vec<String> = table.columns.iter().map(|c| quote_ident(&c.name)).collect();
    let sql = format!(
        "SELECT {} FROM {} WHERE {condition} ORDER BY {}",
        names.join(", "),
        quote_ident(&table.name),
        quote_ident(&table.primary_key)
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params_from_iter(params.iter()), |row| {
        let mut record = Record::new(&table.name);
        for (index, column) in table.columns.iter().enumerate() {
            record.set(&column.name, read_value(column, row.get_ref(index)?));
        }
        Ok(record)
    })?;
    let mut result = Vec::new();
    for row in rows {
        result.push(row?);
    }
    Ok(result)
}

fn read_value(column: &ColumnDefinition, raw: ValueRef<'_>) -> Value {
    match raw {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(v) if column.data_type == DataType::Boolean => Value::Boolean(v != 0),
        ValueRef::Integer(v) => Value::Integer(v),
        ValueRef::Real(v) => Value::Real(v),
        ValueRef::Text(v) => Value::Text(String::from_utf8_lossy(v).into_owned()),
        ValueRef::Blob(v) => Value::Blob(v.to_vec()),
    }
}

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Value::Null => ToSqlOutput::Owned(rusqlite::types::Value::Null),
            Value::Integer(v) => ToSqlOutput::from(*v),
            Value::Real(v) => ToSqlOutput::from(*v),
            Value::Text(v) => ToSqlOutput::from(v.as_str()),
            Value::Blob(v) => ToSqlOutput::from(v.as_slice()),
            Value::Boolean(v) => ToSqlOutput::from(*v),
        })
    }
}

#![allow(dead_code)]

use anyhow::Result;
use rust_bulk_sync::{
    ColumnDefinition, DataType, DefaultValue, ForeignKey, ForeignKeyAction, Query, QueryOperator,
    Record, Schema, SqliteConfig, SqliteStore, Store, StoreTransaction, TableDefinition, Value,
};
use tempfile::NamedTempFile;

pub fn company_table() -> TableDefinition {
    TableDefinition::new("company", "id")
        .add_column(ColumnDefinition::new("id", DataType::Integer).auto_generated())
        .add_column(ColumnDefinition::new("name", DataType::Text).not_null())
}

fn employee_like(name: &str, primary_key: &str) -> TableDefinition {
    TableDefinition::new(name, primary_key)
        .add_column(ColumnDefinition::new(primary_key, DataType::Integer).auto_generated())
        .add_column(ColumnDefinition::new("age", DataType::Integer).not_null())
        .add_column(ColumnDefinition::new("name", DataType::Text))
        .add_column(ColumnDefinition::new("company_id", DataType::Integer).not_null())
        .add_foreign_key(
            ForeignKey::new("company_id", "company", "id").on_delete(ForeignKeyAction::Cascade),
        )
}

pub fn employee_table() -> TableDefinition {
    employee_like("employee", "id")
}

pub fn employee_different_pk_table() -> TableDefinition {
    employee_like("employee_different_pk", "employee_id")
}

pub fn office_table() -> TableDefinition {
    TableDefinition::new("office", "id").add_column(ColumnDefinition::new("id", DataType::Text))
}

pub fn employee_office_table() -> TableDefinition {
    TableDefinition::new("employee_office", "id")
        .add_column(ColumnDefinition::new("id", DataType::Integer).auto_generated())
        .add_column(ColumnDefinition::new("office_id", DataType::Text).not_null())
        .add_column(ColumnDefinition::new("employee_id", DataType::Integer))
        .add_foreign_key(
            ForeignKey::new("office_id", "office", "id").on_delete(ForeignKeyAction::Cascade),
        )
        .add_foreign_key(
            ForeignKey::new("employee_id", "employee", "id").on_delete(ForeignKeyAction::Cascade),
        )
}

/// Defaulted and read-only columns next to a unique name.
pub fn widget_table() -> TableDefinition {
    TableDefinition::new("widget", "id")
        .add_column(ColumnDefinition::new("id", DataType::Integer).auto_generated())
        .add_column(ColumnDefinition::new("name", DataType::Text).not_null().unique())
        .add_column(
            ColumnDefinition::new("rank", DataType::Integer)
                .not_null()
                .with_default(DefaultValue::Integer(7)),
        )
        .add_column(
            ColumnDefinition::new("label", DataType::Text).with_default(DefaultValue::Text("x".to_string())),
        )
        .add_column(ColumnDefinition::new("serial", DataType::Text).read_only())
}

pub fn test_schema() -> Schema {
    Schema::new()
        .add_table(company_table())
        .add_table(employee_table())
        .add_table(employee_different_pk_table())
        .add_table(office_table())
        .add_table(employee_office_table())
}

// Helper function to create an in-memory store for testing
pub fn create_test_store() -> Result<SqliteStore> {
    create_store(test_schema())
}

pub fn create_store(schema: Schema) -> Result<SqliteStore> {
    Ok(SqliteStore::open(SqliteConfig::new(":memory:", schema))?)
}

// Helper function to create a store backed by a temporary file
pub fn create_temp_store() -> Result<(SqliteStore, NamedTempFile)> {
    let temp_file = NamedTempFile::new()?;
    let store = SqliteStore::open(SqliteConfig::new(path_of(&temp_file), test_schema()))?;
    Ok((store, temp_file))
}

pub fn path_of(file: &NamedTempFile) -> String {
    file.path().to_string_lossy().into_owned()
}

pub fn company(name: &str) -> Record {
    Record::new("company").with_value("name", name)
}

pub fn widget(name: &str) -> Record {
    Record::new("widget").with_value("name", name)
}

pub fn employee(name: &str, age: i64, company_id: i64) -> Record {
    Record::new("employee")
        .with_value("name", name)
        .with_value("age", age)
        .with_value("company_id", company_id)
}

/// Insert a single record and return its identity.
pub fn create(store: &mut SqliteStore, record: Record) -> Result<i64> {
    let table = store.schema().table(&record.table)?.clone();
    let fields = table.insert_fields();
    let mut tx = store.begin(&table)?;
    let ids = tx.bulk_insert(&table, &[record], &fields, None)?;
    tx.commit()?;
    match ids.first() {
        Some(Value::Integer(id)) => Ok(*id),
        other => anyhow::bail!("unexpected identity {other:?}"),
    }
}

pub fn rows(store: &SqliteStore, table: &str, filter: &Query) -> Result<Vec<Record>> {
    let table = store.schema().table(table)?.clone();
    Ok(store.fetch(&table, filter)?)
}

pub fn by_id(store: &SqliteStore, table: &str, id: i64) -> Result<Option<Record>> {
    let primary_key = store.schema().table(table)?.primary_key.clone();
    let filter = Query::new().with_condition(&primary_key, QueryOperator::Equal(id.into()));
    Ok(rows(store, table, &filter)?.into_iter().next())
}

pub fn in_company(company_id: i64) -> Query {
    Query::new().with_condition("company_id", QueryOperator::Equal(company_id.into()))
}

pub fn count(store: &SqliteStore, table: &str, filter: &Query) -> Result<usize> {
    Ok(rows(store, table, filter)?.len())
}

pub fn names(store: &SqliteStore, table: &str) -> Result<Vec<String>> {
    Ok(rows(store, table, &Query::new())?
        .iter()
        .map(|r| match r.value_or_null("name") {
            Value::Text(name) => name.clone(),
            other => format!("{other:?}"),
        })
        .collect())
}

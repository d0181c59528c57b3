mod common;

use anyhow::Result;
use common::*;
use rust_bulk_sync::{compare, KeyFields, Record, SqliteStore, SyncError, TableDefinition, Value};

struct Fixture {
    store: SqliteStore,
    table: TableDefinition,
    c1: i64,
    e1: i64,
    e3: i64,
    new_objs: Vec<Record>,
}

fn setup(table: TableDefinition) -> Result<Fixture> {
    let mut store = create_test_store()?;
    let c1 = create(&mut store, company("Foo Products, Ltd."))?;
    let c2 = create(&mut store, company("Bar Microcontrollers, Inc."))?;
    let relabel = |mut r: Record| {
        r.table = table.name.clone();
        r
    };

    let e1 = create(&mut store, relabel(employee("Scott", 40, c1)))?;
    create(&mut store, relabel(employee("Isaac", 9, c1)))?;
    let e3 = create(&mut store, relabel(employee("Zoe", 9, c1)))?;
    create(&mut store, relabel(employee("Bob", 25, c2)))?;

    // Scott's age changes, Zoe is gone, Newguy and a second Bob are new.
    let new_objs = vec![
        employee("Scott", 41, c1),
        employee("Isaac", 9, c1),
        employee("Newguy", 10, c1),
        employee("Bob", 50, c1),
    ]
    .into_iter()
    .map(relabel)
    .collect();

    Ok(Fixture {
        store,
        table,
        c1,
        e1,
        e3,
        new_objs,
    })
}

fn old_rows(fixture: &Fixture) -> Result<Vec<Record>> {
    rows(&fixture.store, &fixture.table.name, &in_company(fixture.c1))
}

fn identity(record: &Record, table: &TableDefinition) -> Value {
    record.value_or_null(&table.primary_key).clone()
}

fn age_change() -> (Value, Value) {
    (Value::Integer(40), Value::Integer(41))
}

#[tokio::test]
async fn test_bulk_compare() {
    test_bulk_compare_impl().unwrap();
}

fn test_bulk_compare_impl() -> Result<()> {
    let fixture = setup(employee_table())?;
    let old = old_rows(&fixture)?;
    let new_objs = &fixture.new_objs;

    let ret = compare(&fixture.table, &old, new_objs, &KeyFields::new(["name"])?, &[])?;

    assert_eq!(ret.added, vec![&new_objs[2], &new_objs[3]]);
    assert_eq!(ret.removed.len(), 1);
    assert_eq!(identity(ret.removed[0], &fixture.table), Value::Integer(fixture.e3));
    assert_eq!(ret.updated_records().collect::<Vec<_>>(), vec![&new_objs[0]]);
    assert_eq!(ret.updated[0].matched_identity, Value::Integer(fixture.e1));
    assert_eq!(
        ret.updated[0].changes.iter().collect::<Vec<_>>(),
        vec![(&"age".to_string(), &age_change())]
    );
    assert_eq!(ret.unchanged, vec![&new_objs[1]]);
    assert!(!ret.is_unchanged());

    // Comparing never assigns identities.
    assert!(new_objs.iter().all(|r| r.get("id").is_none()));
    Ok(())
}

#[tokio::test]
async fn test_bulk_compare_with_ignore_int_field() {
    test_bulk_compare_with_ignore_int_field_impl().unwrap();
}

fn test_bulk_compare_with_ignore_int_field_impl() -> Result<()> {
    let fixture = setup(employee_table())?;
    let old = old_rows(&fixture)?;
    let new_objs = &fixture.new_objs;

    let ignore = ["age".to_string()];
    let ret = compare(&fixture.table, &old, new_objs, &KeyFields::new(["name"])?, &ignore)?;

    assert_eq!(ret.added, vec![&new_objs[2], &new_objs[3]]);
    assert_eq!(identity(ret.removed[0], &fixture.table), Value::Integer(fixture.e3));
    assert!(ret.updated.is_empty());
    assert_eq!(ret.unchanged, vec![&new_objs[0], &new_objs[1]]);
    Ok(())
}

#[tokio::test]
async fn test_bulk_compare_with_ignore_relation_field() {
    test_bulk_compare_with_ignore_relation_field_impl().unwrap();
}

fn test_bulk_compare_with_ignore_relation_field_impl() -> Result<()> {
    let fixture = setup(employee_table())?;
    let old = old_rows(&fixture)?;
    let new_objs = &fixture.new_objs;

    let ignore = ["company_id".to_string()];
    let ret = compare(&fixture.table, &old, new_objs, &KeyFields::new(["name"])?, &ignore)?;

    assert_eq!(ret.added, vec![&new_objs[2], &new_objs[3]]);
    assert_eq!(ret.removed.len(), 1);
    assert_eq!(ret.updated_records().collect::<Vec<_>>(), vec![&new_objs[0]]);
    assert_eq!(ret.updated[0].changes.get("age"), Some(&age_change()));
    assert_eq!(ret.unchanged, vec![&new_objs[1]]);
    Ok(())
}

#[tokio::test]
async fn test_nonstandard_pk() {
    test_nonstandard_pk_impl().unwrap();
}

fn test_nonstandard_pk_impl() -> Result<()> {
    let fixture = setup(employee_different_pk_table())?;
    let old = old_rows(&fixture)?;
    let new_objs = &fixture.new_objs;

    let ignore = ["company_id".to_string()];
    let ret = compare(&fixture.table, &old, new_objs, &KeyFields::new(["name"])?, &ignore)?;

    assert_eq!(ret.added, vec![&new_objs[2], &new_objs[3]]);
    assert_eq!(identity(ret.removed[0], &fixture.table), Value::Integer(fixture.e3));
    assert_eq!(ret.updated[0].matched_identity, Value::Integer(fixture.e1));
    assert_eq!(ret.updated[0].changes.len(), 1);
    assert_eq!(ret.unchanged, vec![&new_objs[1]]);
    Ok(())
}

#[tokio::test]
async fn test_values_are_compared_in_canonical_form() {
    test_values_are_compared_in_canonical_form_impl().unwrap();
}

fn test_values_are_compared_in_canonical_form_impl() -> Result<()> {
    let table = employee_table();
    let old = vec![employee("Scott", 40, 1)];
    let new = vec![Record::new("employee")
        .with_value("name", "Scott")
        .with_value("age", "40")
        .with_value("company_id", Value::Real(1.0))];

    let ret = compare(&table, &old, &new, &KeyFields::new(["name"])?, &[])?;
    assert!(ret.is_unchanged());
    assert_eq!(ret.unchanged, vec![&new[0]]);
    Ok(())
}

#[tokio::test]
async fn test_duplicate_keys() {
    test_duplicate_keys_impl().unwrap();
}

fn test_duplicate_keys_impl() -> Result<()> {
    let table = employee_table();
    let key_fields = KeyFields::new(["name"])?;

    let new = vec![employee("Zoe", 1, 1), employee("Zoe", 2, 1)];
    let err = compare(&table, &[], &new, &key_fields, &[]).unwrap_err();
    assert!(matches!(err, SyncError::DuplicateKey(_)), "{err}");

    // The first old record with a key is the match; later ones are removed.
    let old = vec![
        employee("Zoe", 1, 1).with_value("id", 10),
        employee("Zoe", 2, 1).with_value("id", 11),
    ];
    let new = vec![employee("Zoe", 1, 1)];
    let ret = compare(&table, &old, &new, &key_fields, &[])?;
    assert_eq!(ret.unchanged, vec![&new[0]]);
    assert_eq!(ret.removed, vec![&old[1]]);
    Ok(())
}

#[tokio::test]
async fn test_invalid_arguments() {
    test_invalid_arguments_impl().unwrap();
}

fn test_invalid_arguments_impl() -> Result<()> {
    let table = employee_table();
    let old = vec![employee("Scott", 40, 1)];

    let err = compare(&table, &old, &[], &KeyFields::new(["salary"])?, &[]).unwrap_err();
    assert!(matches!(err, SyncError::UnknownField { .. }), "{err}");

    let ignore = ["salary".to_string()];
    let err = compare(&table, &old, &[], &KeyFields::new(["name"])?, &ignore).unwrap_err();
    assert!(matches!(err, SyncError::UnknownField { .. }), "{err}");

    let nameless = vec![Record::new("employee").with_value("age", 1)];
    let err = compare(&table, &old, &nameless, &KeyFields::new(["name"])?, &[]).unwrap_err();
    assert!(matches!(err, SyncError::MissingKeyField { .. }), "{err}");

    let err = compare(&table, &old, &[company("Scott")], &KeyFields::new(["name"])?, &[])
        .unwrap_err();
    assert!(matches!(err, SyncError::TableMismatch { .. }), "{err}");
    Ok(())
}

#[tokio::test]
async fn test_compare_by_identity() {
    test_compare_by_identity_impl().unwrap();
}

fn test_compare_by_identity_impl() -> Result<()> {
    let table = employee_table();
    let old = vec![
        employee("Scott", 40, 1).with_value("id", 1),
        employee("Isaac", 9, 1).with_value("id", 2),
    ];
    let new = vec![employee("Scott Jr.", 40, 1).with_value("id", 1)];

    let ret = compare(&table, &old, &new, &KeyFields::identity(), &[])?;
    assert_eq!(ret.removed, vec![&old[1]]);
    assert_eq!(
        ret.updated[0].changes.get("name"),
        Some(&(Value::from("Scott"), Value::from("Scott Jr.")))
    );
    Ok(())
}

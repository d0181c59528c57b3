//! Filter expressions selecting the subset of a table a sync works in.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::record::Record;
use crate::schema::{quote_ident, TableDefinition};
use crate::value::Value;

/// SQL statement with positional parameters
#[derive(Debug, Clone, PartialEq)]
pub struct SqlQuery {
    pub statement: String,
    pub params: Vec<Value>,
}

impl SqlQuery {
    pub fn new(statement: &str) -> Self {
        Self {
            statement: statement.to_string(),
            params: Vec::new(),
        }
    }
    pub fn with_params(mut self, params: Vec<Value>) -> Self {
        self.params = params;
        self
    }
}

/// Query operators for building advanced queries
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum QueryOperator {
    Equal(Value),
    NotEqual(Value),
    GreaterThan(Value),
    GreaterThanOrEqual(Value),
    LessThan(Value),
    LessThanOrEqual(Value),
    Like(String),
    In(Vec<Value>),
    IsNull,
}

/// Conjunction of per-column conditions. An empty query selects the whole table.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct Query {
    pub conditions: Vec<(String, QueryOperator)>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn with_condition(mut self, field: &str, op: QueryOperator) -> Self {
        self.conditions.push((field.to_string(), op));
        self
    }

    /// Render the query as a SQL boolean expression, appending its bound
    /// values to `params`. Values are canonicalized for their column first.
    pub fn where_clause(&self, table: &TableDefinition, params: &mut Vec<Value>) -> Result<String> {
        if self.conditions.is_empty() {
            return Ok("1".to_string());
        }
        let mut clauses = Vec::with_capacity(self.conditions.len());
        for (field, op) in &self.conditions {
            let column = quote_ident(&table.column(field)?.name);
            let clause = match op {
                QueryOperator::Equal(Value::Null) | QueryOperator::IsNull => format!("{column} IS NULL"),
                QueryOperator::NotEqual(Value::Null) => format!("{column} IS NOT NULL"),
                QueryOperator::Equal(v) => format!("{column} = {}", bind(table, field, v, params)?),
                QueryOperator::NotEqual(v) => format!("{column} <> {}", bind(table, field, v, params)?),
                QueryOperator::GreaterThan(v) => format!("{column} > {}", bind(table, field, v, params)?),
                QueryOperator::GreaterThanOrEqual(v) => format!("{column} >= {}", bind(table, field, v, params)?),
                QueryOperator::LessThan(v) => format!("{column} < {}", bind(table, field, v, params)?),
                QueryOperator::LessThanOrEqual(v) => format!("{column} <= {}", bind(table, field, v, params)?),
                QueryOperator::Like(pattern) => {
                    format!("{column} LIKE {}", bind_raw(Value::Text(pattern.clone()), params))
                }
                QueryOperator::In(values) if values.is_empty() => "0".to_string(),
                QueryOperator::In(values) => {
                    let mut marks = Vec::with_capacity(values.len());
                    for v in values {
                        marks.push(bind(table, field, v, params)?);
                    }
                    format!("{column} IN ({})", marks.join(", "))
                }
            };
            clauses.push(clause);
        }
        Ok(clauses.join(" AND "))
    }

    /// Evaluate the query against an in-memory record with SQL semantics:
    /// a comparison involving `NULL` is never satisfied. Absent attributes
    /// read as their column default.
    pub fn matches(&self, table: &TableDefinition, record: &Record) -> Result<bool> {
        for (field, op) in &self.conditions {
            let actual = table.value_of(record, field)?;
            let canonical = |v: &Value| table.canonicalize(field, v);
            let satisfied = match op {
                QueryOperator::Equal(Value::Null) | QueryOperator::IsNull => actual.is_null(),
                QueryOperator::NotEqual(Value::Null) => !actual.is_null(),
                QueryOperator::Equal(v) => sql_cmp(&actual, &canonical(v)?) == Some(Ordering::Equal),
                QueryOperator::NotEqual(v) => {
                    matches!(sql_cmp(&actual, &canonical(v)?), Some(o) if o != Ordering::Equal)
                }
                QueryOperator::GreaterThan(v) => sql_cmp(&actual, &canonical(v)?) == Some(Ordering::Greater),
                QueryOperator::GreaterThanOrEqual(v) => matches!(
                    sql_cmp(&actual, &canonical(v)?),
                    Some(Ordering::Greater | Ordering::Equal)
                ),
                QueryOperator::LessThan(v) => sql_cmp(&actual, &canonical(v)?) == Some(Ordering::Less),
                QueryOperator::LessThanOrEqual(v) => matches!(
                    sql_cmp(&actual, &canonical(v)?),
                    Some(Ordering::Less | Ordering::Equal)
                ),
                QueryOperator::Like(pattern) => match like_subject(&actual) {
                    Some(subject) => like(pattern, &subject),
                    None => false,
                },
                QueryOperator::In(values) => {
                    let mut found = false;
                    for v in values {
                        if sql_cmp(&actual, &canonical(v)?) == Some(Ordering::Equal) {
                            found = true;
                            break;
                        }
                    }
                    found
                }
            };
            if !satisfied {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

fn bind(
    table: &TableDefinition,
    field: &str,
    value: &Value,
    params: &mut Vec<Value>,
) -> Result<&'static str> {
    Ok(bind_raw(table.canonicalize(field, value)?, params))
}

fn bind_raw(value: Value, params: &mut Vec<Value>) -> &'static str {
    params.push(value);
    "?"
}

/// SQLite ordering of two non-null values: numbers, then text, then blobs.
fn sql_cmp(a: &Value, b: &Value) -> Option<Ordering> {
    fn class(v: &Value) -> u8 {
        match v {
            Value::Null => 0,
            Value::Integer(_) | Value::Real(_) | Value::Boolean(_) => 1,
            Value::Text(_) => 2,
            Value::Blob(_) => 3,
        }
    }
    fn number(v: &Value) -> Option<f64> {
        match v {
            Value::Integer(i) => Some(*i as f64),
            Value::Real(r) => Some(*r),
            Value::Boolean(b) => Some(f64::from(u8::from(*b))),
            _ => None,
        }
    }

    if a.is_null() || b.is_null() {
        return None;
    }
    match (a, b) {
        (Value::Integer(x), Value::Integer(y)) => Some(x.cmp(y)),
        (Value::Text(x), Value::Text(y)) => Some(x.cmp(y)),
        (Value::Blob(x), Value::Blob(y)) => Some(x.cmp(y)),
        _ => match (number(a), number(b)) {
            (Some(x), Some(y)) => x.partial_cmp(&y),
            _ => Some(class(a).cmp(&class(b))),
        },
    }
}

fn like_subject(v: &Value) -> Option<String> {
    match v {
        Value::Null | Value::Blob(_) => None,
        Value::Text(s) => Some(s.clone()),
        Value::Integer(i) => Some(i.to_string()),
        Value::Real(r) => Some(r.to_string()),
        Value::Boolean(b) => Some(u8::from(*b).to_string()),
    }
}

/// SQLite `LIKE`: `%` matches any run, `_` a single character, ASCII letters
/// compare case-insensitively.
fn like(pattern: &str, subject: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let s: Vec<char> = subject.chars().collect();
    // matched[j]: pattern prefix consumed so far matches subject prefix of length j
    let mut matched = vec![false; s.len() + 1];
    matched[0] = true;
    for pc in p {
        let mut next = vec![false; s.len() + 1];
        match pc {
            '%' => {
                let mut any = false;
                for j in 0..=s.len() {
                    any |= matched[j];
                    next[j] = any;
                }
            }
            _ => {
                for j in 0..s.len() {
                    if matched[j] && (pc == '_' || pc.eq_ignore_ascii_case(&s[j])) {
                        next[j + 1] = true;
                    }
                }
            }
        }
        matched = next;
    }
    matched[s.len()]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ColumnDefinition, DataType};

    fn table() -> TableDefinition {
        TableDefinition::new("employee", "id")
            .add_column(ColumnDefinition::new("id", DataType::Integer).auto_generated())
            .add_column(ColumnDefinition::new("name", DataType::Text))
            .add_column(ColumnDefinition::new("age", DataType::Integer))
    }

    #[test]
    fn empty_query_selects_everything() {
        let mut params = Vec::new();
        assert_eq!(Query::new().where_clause(&table(), &mut params).unwrap(), "1");
        assert!(params.is_empty());
        assert!(Query::new().matches(&table(), &Record::new("employee")).unwrap());
    }

    #[test]
    fn renders_conditions_with_canonical_params() {
        let query = Query::new()
            .with_condition("age", QueryOperator::GreaterThanOrEqual(Value::Text("18".into())))
            .with_condition("name", QueryOperator::In(vec!["A".into(), "B".into()]))
            .with_condition("name", QueryOperator::NotEqual(Value::Null));
        let mut params = Vec::new();
        let sql = query.where_clause(&table(), &mut params).unwrap();
        assert_eq!(
            sql,
            "\"age\" >= ? AND \"name\" IN (?, ?) AND \"name\" IS NOT NULL"
        );
        assert_eq!(params, vec![Value::Integer(18), "A".into(), "B".into()]);
    }

    #[test]
    fn unknown_columns_are_rejected() {
        let query = Query::new().with_condition("salary", QueryOperator::IsNull);
        assert!(query.where_clause(&table(), &mut Vec::new()).is_err());
    }

    #[test]
    fn evaluates_like_null_semantics() {
        let bob = Record::new("employee").with_value("name", "Bob").with_value("age", 25);
        let nameless = Record::new("employee").with_value("age", 25);

        let like_b = Query::new().with_condition("name", QueryOperator::Like("b_%".into()));
        assert!(like_b.matches(&table(), &bob).unwrap());
        assert!(!like_b.matches(&table(), &nameless).unwrap());

        let not_alice = Query::new().with_condition("name", QueryOperator::NotEqual("Alice".into()));
        assert!(not_alice.matches(&table(), &bob).unwrap());
        assert!(!not_alice.matches(&table(), &nameless).unwrap());

        let adults = Query::new().with_condition("age", QueryOperator::GreaterThan(Value::Text("24".into())));
        assert!(adults.matches(&table(), &bob).unwrap());
    }

    #[test]
    fn like_handles_wildcards() {
        assert!(like("%", ""));
        assert!(like("a%c", "ABBC"));
        assert!(!like("a_c", "ac"));
        assert!(like("%b%", "abc"));
    }
}

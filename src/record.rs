use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::value::Value;

/// A row of a table, as held by the caller or read back from the store.
///
/// The identity lives under the table's primary-key column like any other
/// attribute; it is absent (or `Null`) until the row is persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub table: String,
    pub values: HashMap<String, Value>,
}

impl Record {
    pub fn new(table: &str) -> Self {
        Self {
            table: table.to_string(),
            values: HashMap::new(),
        }
    }

    /// Add a named value
    pub fn with_value(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.values.insert(name.to_string(), value.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    /// Attribute value, reading an absent attribute as `Null`.
    pub fn value_or_null(&self, name: &str) -> &Value {
        static NULL: Value = Value::Null;
        self.values.get(name).unwrap_or(&NULL)
    }

    pub fn set(&mut self, name: &str, value: impl Into<Value>) {
        self.values.insert(name.to_string(), value.into());
    }
}

//! Result rows.

use crate::value::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Column metadata shared across all rows in a result set.
#[derive(Debug, Clone)]
pub struct ColumnInfo {
    names: Vec<String>,
    name_to_index: HashMap<String, usize>,
}

impl ColumnInfo {
    pub fn new(names: Vec<String>) -> Self {
        let name_to_index = names
            .iter()
            .enumerate()
            .map(|(i, name)| (name.clone(), i))
            .collect();
        Self {
            names,
            name_to_index,
        }
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.name_to_index.get(name).copied()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }
}

/// A single row returned by [`Connection::query`](crate::Connection::query).
///
/// Column metadata is shared via `Arc` between rows of one result set.
#[derive(Debug, Clone)]
pub struct Row {
    values: Vec<Value>,
    columns: Arc<ColumnInfo>,
}

impl Row {
    /// Create a new row with the given columns and values.
    pub fn new(column_names: Vec<String>, values: Vec<Value>) -> Self {
        let columns = Arc::new(ColumnInfo::new(column_names));
        Self { values, columns }
    }

    /// Create a new row with shared column metadata.
    pub fn with_columns(columns: Arc<ColumnInfo>, values: Vec<Value>) -> Self {
        Self { values, columns }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Get a value by column index.
    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    /// Get a value by column name.
    pub fn get_by_name(&self, name: &str) -> Option<&Value> {
        self.columns.index_of(name).and_then(|i| self.values.get(i))
    }

    pub fn contains_column(&self, name: &str) -> bool {
        self.columns.index_of(name).is_some()
    }

    /// Iterate over `(column, value)` pairs in column order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.columns
            .names()
            .iter()
            .map(String::as_str)
            .zip(self.values.iter())
    }

    /// Consume the row into an owned name → value map.
    pub fn into_map(self) -> HashMap<String, Value> {
        self.columns
            .names()
            .iter()
            .cloned()
            .zip(self.values)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_and_index_access() {
        let row = Row::new(
            vec!["id".to_string(), "username".to_string()],
            vec![Value::Int(1), Value::from("JohnD")],
        );
        assert_eq!(row.len(), 2);
        assert_eq!(row.get(0), Some(&Value::Int(1)));
        assert_eq!(row.get_by_name("username"), Some(&Value::from("JohnD")));
        assert!(row.get_by_name("password").is_none());
        assert!(row.contains_column("id"));
    }

    #[test]
    fn shared_columns_and_map() {
        let columns = Arc::new(ColumnInfo::new(vec!["name".to_string()]));
        let a = Row::with_columns(Arc::clone(&columns), vec![Value::from("a")]);
        let b = Row::with_columns(columns, vec![Value::from("b")]);
        let names: Vec<_> = a.iter().chain(b.iter()).map(|(_, v)| v.clone()).collect();
        assert_eq!(names, vec![Value::from("a"), Value::from("b")]);
        assert_eq!(b.into_map().get("name"), Some(&Value::from("b")));
    }
}

//! Row mapping traits and utilities

use serde::{Deserialize, Serialize};

use crate::error::{OrmError, OrmResult};
use crate::value::{FromValue, Value};

/// One result row: ordered column names with their values.
///
/// Column order is the order the driver reported, which is the order of the
/// select list.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Row {
    columns: Vec<String>,
    values: Vec<Value>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a row from `(column, value)` pairs.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        let mut row = Row::new();
        for (k, v) in pairs {
            row.push(k, v);
        }
        row
    }

    /// Append a column; a duplicate name replaces the earlier value.
    pub fn push(&mut self, column: impl Into<String>, value: impl Into<Value>) {
        let column = column.into();
        let value = value.into();
        if let Some(pos) = self.columns.iter().position(|c| *c == column) {
            self.values[pos] = value;
        } else {
            self.columns.push(column);
            self.values.push(value);
        }
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.columns
            .iter()
            .position(|c| c == column)
            .map(|pos| &self.values[pos])
    }

    pub fn get_index(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.columns.iter().map(String::as_str).zip(self.values.iter())
    }

    /// Plain JSON object view of the row, as returned by `get_raw_many`.
    pub fn to_json_object(&self) -> serde_json::Map<String, serde_json::Value> {
        self.iter()
            .map(|(k, v)| (k.to_string(), v.to_json()))
            .collect()
    }
}

/// Trait for types that can be constructed from a result row
pub trait FromRow: Sized {
    /// Convert a result row into Self
    fn from_row(row: &Row) -> OrmResult<Self>;
}

impl FromRow for Row {
    fn from_row(row: &Row) -> OrmResult<Self> {
        Ok(row.clone())
    }
}

impl FromRow for serde_json::Map<String, serde_json::Value> {
    fn from_row(row: &Row) -> OrmResult<Self> {
        Ok(row.to_json_object())
    }
}

/// Extension trait for Row to provide typed access
pub trait RowExt {
    /// Try to get a column value, returning OrmError::Decode on failure
    fn try_get_column<T: FromValue>(&self, column: &str) -> OrmResult<T>;
}

impl RowExt for Row {
    fn try_get_column<T: FromValue>(&self, column: &str) -> OrmResult<T> {
        let value = self
            .get(column)
            .ok_or_else(|| OrmError::decode(column, "column not present in row"))?;
        T::from_value(value).ok_or_else(|| {
            OrmError::decode(
                column,
                format!(
                    "cannot convert {:?} into {}",
                    value,
                    std::any::type_name::<T>()
                ),
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_replaces_duplicate_column() {
        let mut row = Row::new();
        row.push("id", 1);
        row.push("id", 2);
        assert_eq!(row.len(), 1);
        assert_eq!(row.get("id"), Some(&Value::Int(2)));
    }

    #[test]
    fn test_try_get_column() {
        let row = Row::from_pairs([("id", Value::Int(5)), ("name", Value::Null)]);
        assert_eq!(row.try_get_column::<i64>("id").unwrap(), 5);
        assert_eq!(row.try_get_column::<Option<String>>("name").unwrap(), None);
        assert!(row.try_get_column::<i64>("missing").is_err());
        assert!(row.try_get_column::<bool>("name").is_err());
    }
}

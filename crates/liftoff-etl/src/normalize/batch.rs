//! Tabular row sets produced by the normalizer

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::error::{EtlError, Result};

/// One cell of a [`TabularBatch`]
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    /// Structured value (array or object) not yet serialized
    Json(Value),
    Timestamp(DateTime<Utc>),
}

static NULL: Cell = Cell::Null;

impl Cell {
    /// Convert a JSON leaf into a cell. Arrays and objects stay structured.
    pub fn from_json(value: &Value) -> Self {
        match value {
            Value::Null => Cell::Null,
            Value::Bool(b) => Cell::Bool(*b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => Cell::Int(i),
                None => n.as_f64().map_or(Cell::Null, Cell::Float),
            },
            Value::String(s) => Cell::Text(s.clone()),
            Value::Array(_) | Value::Object(_) => Cell::Json(value.clone()),
        }
    }

    /// JSON form of the cell, timestamps rendered as RFC 3339
    pub fn to_json(&self) -> Value {
        match self {
            Cell::Null => Value::Null,
            Cell::Bool(b) => Value::Bool(*b),
            Cell::Int(i) => Value::from(*i),
            Cell::Float(f) => serde_json::Number::from_f64(*f).map_or(Value::Null, Value::Number),
            Cell::Text(s) => Value::String(s.clone()),
            Cell::Json(v) => v.clone(),
            Cell::Timestamp(ts) => Value::String(ts.to_rfc3339()),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Cell::Null)
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Cell::Null => "null",
            Cell::Bool(_) => "boolean",
            Cell::Int(_) => "integer",
            Cell::Float(_) => "float",
            Cell::Text(_) => "text",
            Cell::Json(_) => "json",
            Cell::Timestamp(_) => "timestamp",
        }
    }

    /// Identifier form used for membership tests: text as-is, integers in decimal
    pub fn as_identifier(&self) -> Option<String> {
        match self {
            Cell::Text(s) => Some(s.clone()),
            Cell::Int(i) => Some(i.to_string()),
            _ => None,
        }
    }
}

/// Column name -> cell. A column absent from the map is null.
pub type Row = BTreeMap<String, Cell>;

/// Ordered rows plus the union of their column names in first-seen order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TabularBatch {
    columns: Vec<String>,
    rows: Vec<Row>,
}

impl TabularBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Batch with a fixed column list; cells for unlisted columns are ignored
    pub fn with_columns(columns: Vec<String>, rows: Vec<Row>) -> Self {
        let rows = rows
            .into_iter()
            .map(|mut row| {
                row.retain(|name, _| columns.contains(name));
                row
            })
            .collect();
        Self { columns, rows }
    }

    /// Append a row, registering unseen columns in the order given
    pub fn push_row<I>(&mut self, cells: I)
    where
        I: IntoIterator<Item = (String, Cell)>,
    {
        let mut row = Row::new();
        for (name, cell) in cells {
            if !self.columns.iter().any(|c| c == &name) {
                self.columns.push(name.clone());
            }
            row.insert(name, cell);
        }
        self.rows.push(row);
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn into_rows(self) -> Vec<Row> {
        self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.columns.iter().any(|c| c == column)
    }

    /// Cell at (`row`, `column`); missing cells read as null
    pub fn cell(&self, row: usize, column: &str) -> &Cell {
        self.rows
            .get(row)
            .and_then(|r| r.get(column))
            .unwrap_or(&NULL)
    }

    /// Replace every cell of `column` with `f(row_index, cell)`
    pub fn map_column<F>(&mut self, column: &str, mut f: F) -> Result<()>
    where
        F: FnMut(usize, Cell) -> Result<Cell>,
    {
        if !self.has_column(column) {
            return Err(EtlError::Schema(format!(
                "column '{}' is not present in the batch",
                column
            )));
        }

        for (idx, row) in self.rows.iter_mut().enumerate() {
            let cell = row.remove(column).unwrap_or(Cell::Null);
            row.insert(column.to_string(), f(idx, cell)?);
        }

        Ok(())
    }

    /// Keep only rows for which `keep` returns true
    pub fn retain_rows<F>(&mut self, mut keep: F)
    where
        F: FnMut(&Row) -> bool,
    {
        self.rows.retain(|row| keep(row));
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_columns_are_union_in_first_seen_order() {
        let mut batch = TabularBatch::new();
        batch.push_row([("id".to_string(), Cell::Text("a".into()))]);
        batch.push_row([
            ("name".to_string(), Cell::Text("n".into())),
            ("id".to_string(), Cell::Text("b".into())),
        ]);

        assert_eq!(batch.columns(), ["id", "name"]);
        assert_eq!(batch.len(), 2);
        assert!(batch.cell(0, "name").is_null());
        assert!(batch.cell(7, "id").is_null());
    }

    #[test]
    fn test_map_column_unknown_is_schema_error() {
        let mut batch = TabularBatch::new();
        batch.push_row([("id".to_string(), Cell::Int(1))]);
        let err = batch.map_column("crew", |_, c| Ok(c)).unwrap_err();
        assert!(matches!(err, EtlError::Schema(_)));
    }

    #[test]
    fn test_numbers_keep_integer_precision() {
        assert_eq!(Cell::from_json(&json!(1143239400)), Cell::Int(1143239400));
        assert_eq!(Cell::from_json(&json!(20.5)), Cell::Float(20.5));
        assert_eq!(Cell::from_json(&json!(["a"])), Cell::Json(json!(["a"])));
        assert_eq!(Cell::Int(7).as_identifier().as_deref(), Some("7"));
        assert_eq!(Cell::Bool(true).as_identifier(), None);
    }
}

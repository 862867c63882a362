//! Versioned table schemas
//!
//! Flattening discovers columns per document, so the set of columns can drift
//! between fetches. Every table the pipeline writes is therefore described by
//! a [`TableSchema`]: the batch is aligned to it before transforms run and
//! validated against it before it reaches the sink. The target table's shape
//! only changes when a schema version changes.

pub mod spacex;

use tracing::{debug, warn};

use crate::error::{EtlError, Result};
use crate::normalize::{Cell, TabularBatch};

pub use spacex::{launches, launchpads, payloads, registered};

/// Storage type of a column
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Text,
    Integer,
    Float,
    Boolean,
    /// Structured value stored natively (JSONB)
    Json,
    /// Structured value stored as canonical JSON text
    SerializedJson,
    Timestamp,
}

impl ColumnKind {
    /// Postgres column type
    pub fn sql_type(self) -> &'static str {
        match self {
            ColumnKind::Text | ColumnKind::SerializedJson => "TEXT",
            ColumnKind::Integer => "BIGINT",
            ColumnKind::Float => "DOUBLE PRECISION",
            ColumnKind::Boolean => "BOOLEAN",
            ColumnKind::Json => "JSONB",
            ColumnKind::Timestamp => "TIMESTAMPTZ",
        }
    }

    /// Fit `cell` to this kind, or return the offending cell's type name
    fn coerce(self, cell: Cell) -> std::result::Result<Cell, &'static str> {
        match (self, cell) {
            (_, Cell::Null) => Ok(Cell::Null),
            (ColumnKind::Text | ColumnKind::SerializedJson, cell @ Cell::Text(_)) => Ok(cell),
            (ColumnKind::Integer, cell @ Cell::Int(_)) => Ok(cell),
            (ColumnKind::Integer, Cell::Float(f))
                if f.fract() == 0.0 && f >= i64::MIN as f64 && f < i64::MAX as f64 =>
            {
                Ok(Cell::Int(f as i64))
            },
            (ColumnKind::Float, cell @ Cell::Float(_)) => Ok(cell),
            (ColumnKind::Float, Cell::Int(i)) => Ok(Cell::Float(i as f64)),
            (ColumnKind::Boolean, cell @ Cell::Bool(_)) => Ok(cell),
            (ColumnKind::Json, cell @ Cell::Json(_)) => Ok(cell),
            (ColumnKind::Json, other) => Ok(Cell::Json(other.to_json())),
            (ColumnKind::Timestamp, cell @ Cell::Timestamp(_)) => Ok(cell),
            (_, other) => Err(other.type_name()),
        }
    }
}

impl std::fmt::Display for ColumnKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ColumnKind::Text => "text",
            ColumnKind::Integer => "integer",
            ColumnKind::Float => "float",
            ColumnKind::Boolean => "boolean",
            ColumnKind::Json => "json",
            ColumnKind::SerializedJson => "serialized json",
            ColumnKind::Timestamp => "timestamp",
        };
        f.write_str(name)
    }
}

/// One column of a [`TableSchema`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSpec {
    pub name: String,
    pub kind: ColumnKind,
    /// Every row must carry a non-null value
    pub required: bool,
}

impl ColumnSpec {
    pub fn required(name: impl Into<String>, kind: ColumnKind) -> Self {
        Self {
            name: name.into(),
            kind,
            required: true,
        }
    }

    pub fn optional(name: impl Into<String>, kind: ColumnKind) -> Self {
        Self {
            name: name.into(),
            kind,
            required: false,
        }
    }
}

/// Explicit, versioned column layout of one table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
    pub name: String,
    pub version: u32,
    pub columns: Vec<ColumnSpec>,
}

impl TableSchema {
    pub fn new(name: impl Into<String>, version: u32, columns: Vec<ColumnSpec>) -> Self {
        Self {
            name: name.into(),
            version,
            columns,
        }
    }

    /// Human-readable tag stamped on written tables, e.g. "launches v1"
    pub fn tag(&self) -> String {
        format!("{} v{}", self.name, self.version)
    }

    pub fn column(&self, name: &str) -> Option<&ColumnSpec> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    /// Columns handed to `serialize_columns`
    pub fn serialized_columns(&self) -> Vec<&str> {
        self.columns_of(ColumnKind::SerializedJson)
    }

    /// Columns handed to `parse_timestamps`
    pub fn timestamp_columns(&self) -> Vec<&str> {
        self.columns_of(ColumnKind::Timestamp)
    }

    fn columns_of(&self, kind: ColumnKind) -> Vec<&str> {
        self.columns
            .iter()
            .filter(|c| c.kind == kind)
            .map(|c| c.name.as_str())
            .collect()
    }

    /// Reshape `batch` to exactly this schema's columns, in schema order
    ///
    /// Missing optional columns read as null. Columns the schema does not
    /// know are dropped; a warning names those that carried values.
    pub fn align(&self, batch: TabularBatch) -> Result<TabularBatch> {
        for spec in self.columns.iter().filter(|c| c.required) {
            if let Some(idx) = (0..batch.len()).find(|&row| batch.cell(row, &spec.name).is_null()) {
                return Err(EtlError::Schema(format!(
                    "{}: row {} lacks required column '{}'",
                    self.tag(),
                    idx,
                    spec.name
                )));
            }
        }

        let (populated, empty): (Vec<String>, Vec<String>) = batch
            .columns()
            .iter()
            .filter(|name| self.column(name).is_none())
            .cloned()
            .partition(|name| (0..batch.len()).any(|row| !batch.cell(row, name).is_null()));

        if !populated.is_empty() {
            warn!(
                schema = %self.tag(),
                columns = ?populated,
                "Dropping populated columns that are not part of the schema"
            );
        }
        if !empty.is_empty() {
            debug!(schema = %self.tag(), columns = ?empty, "Dropping empty unknown columns");
        }

        Ok(TabularBatch::with_columns(self.column_names(), batch.into_rows()))
    }

    /// Check every cell against its column kind, applying numeric widening
    pub fn validate(&self, mut batch: TabularBatch) -> Result<TabularBatch> {
        let tag = self.tag();
        for spec in &self.columns {
            batch.map_column(&spec.name, |row, cell| {
                spec.kind.coerce(cell).map_err(|found| {
                    EtlError::Schema(format!(
                        "{}: row {}, column '{}' expected {}, found {}",
                        tag, row, spec.name, spec.kind, found
                    ))
                })
            })?;
        }
        Ok(batch)
    }
}

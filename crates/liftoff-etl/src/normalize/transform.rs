//! Column-level transforms applied after flattening

use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::Value;

use super::batch::{Cell, TabularBatch};
use crate::error::{EtlError, Result};

/// Offset-less layouts accepted after RFC 3339 fails; read as UTC
const NAIVE_LAYOUTS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

/// Replace each non-null cell of `columns` with its compact JSON text
///
/// Object keys come out sorted, so the same value always serializes to the
/// same string and parses back with `serde_json::from_str`.
pub fn serialize_columns<S: AsRef<str>>(mut batch: TabularBatch, columns: &[S]) -> Result<TabularBatch> {
    for column in columns {
        batch.map_column(column.as_ref(), |_, cell| Ok(serialize_cell(cell)))?;
    }
    Ok(batch)
}

fn serialize_cell(cell: Cell) -> Cell {
    match cell {
        Cell::Null => Cell::Null,
        other => Cell::Text(canonical(other.to_json()).to_string()),
    }
}

/// Rebuild objects with keys in sorted order, whatever map type serde_json uses
fn canonical(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|(a, _), (b, _)| a.cmp(b));
            Value::Object(entries.into_iter().map(|(k, v)| (k, canonical(v))).collect())
        },
        Value::Array(items) => Value::Array(items.into_iter().map(canonical).collect()),
        other => other,
    }
}

/// Parse each text cell of `columns` into a UTC instant
///
/// Null, empty and non-text cells become null; existing timestamps are kept.
/// Any other string that is not ISO-8601 fails the whole batch with a
/// [`EtlError::Parse`] naming the row and column.
pub fn parse_timestamps<S: AsRef<str>>(mut batch: TabularBatch, columns: &[S]) -> Result<TabularBatch> {
    for column in columns {
        let column = column.as_ref();
        batch.map_column(column, |row, cell| match cell {
            Cell::Text(raw) => match parse_instant(&raw) {
                Ok(Some(instant)) => Ok(Cell::Timestamp(instant)),
                Ok(None) => Ok(Cell::Null),
                Err(reason) => Err(EtlError::Parse(format!(
                    "row {}, column '{}': {}",
                    row, column, reason
                ))),
            },
            Cell::Timestamp(instant) => Ok(Cell::Timestamp(instant)),
            _ => Ok(Cell::Null),
        })?;
    }
    Ok(batch)
}

/// Parse one ISO-8601 string. `Z` and `+00:00` denote the same instant.
pub fn parse_instant(raw: &str) -> std::result::Result<Option<DateTime<Utc>>, String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }

    if let Ok(instant) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(Some(instant.with_timezone(&Utc)));
    }

    NAIVE_LAYOUTS
        .iter()
        .find_map(|layout| NaiveDateTime::parse_from_str(trimmed, layout).ok())
        .map(|naive| Some(naive.and_utc()))
        .ok_or_else(|| format!("'{}' is not an ISO-8601 timestamp", raw))
}

//! Depth-first flattening of nested JSON documents into rows

use serde_json::{Map, Value};

use super::batch::{Cell, TabularBatch};
use crate::error::{EtlError, Result};

/// Separator placed between parent and child keys
pub const DEFAULT_SEPARATOR: &str = "_";

/// Flatten a document with the default `_` separator
pub fn flatten(record: &Value) -> Result<TabularBatch> {
    flatten_with(record, DEFAULT_SEPARATOR)
}

/// Flatten a document into a [`TabularBatch`]
///
/// A single object yields one row; a list of objects yields one row per
/// element. Nested objects become `parent<sep>child` columns, arrays are kept
/// whole as [`Cell::Json`] values. Empty nested objects contribute no column.
/// Two keys that flatten to the same name (`{"a": {"b": 1}, "a_b": 2}`) are a
/// `SchemaError`.
pub fn flatten_with(record: &Value, separator: &str) -> Result<TabularBatch> {
    let mut batch = TabularBatch::new();

    match record {
        Value::Object(map) => batch.push_row(flatten_object(map, 0, separator)?),
        Value::Array(items) => {
            for (idx, item) in items.iter().enumerate() {
                let Value::Object(map) = item else {
                    return Err(EtlError::Schema(format!(
                        "element {} of the document is {}, expected an object",
                        idx,
                        json_type(item)
                    )));
                };
                batch.push_row(flatten_object(map, idx, separator)?);
            }
        },
        other => {
            return Err(EtlError::Schema(format!(
                "document is {}, expected an object or a list of objects",
                json_type(other)
            )));
        },
    }

    Ok(batch)
}

fn flatten_object(map: &Map<String, Value>, row: usize, separator: &str) -> Result<Vec<(String, Cell)>> {
    let mut cells = Vec::with_capacity(map.len());
    walk(map, None, separator, &mut cells).map_err(|name| {
        EtlError::Schema(format!(
            "row {}: more than one key flattens to column '{}'",
            row, name
        ))
    })?;
    Ok(cells)
}

/// Collect leaves into `out`; on a name collision return the colliding name
fn walk(
    map: &Map<String, Value>,
    prefix: Option<&str>,
    separator: &str,
    out: &mut Vec<(String, Cell)>,
) -> std::result::Result<(), String> {
    for (key, value) in map {
        let name = match prefix {
            Some(parent) => format!("{}{}{}", parent, separator, key),
            None => key.clone(),
        };

        match value {
            Value::Object(child) => walk(child, Some(&name), separator, out)?,
            leaf => {
                if out.iter().any(|(existing, _)| existing == &name) {
                    return Err(name);
                }
                out.push((name, Cell::from_json(leaf)));
            },
        }
    }
    Ok(())
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

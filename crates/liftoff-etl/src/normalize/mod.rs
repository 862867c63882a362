//! JSON -> tabular normalization
//!
//! - [`flatten`]: nested documents into rows with `parent_child` column names
//! - [`serialize_columns`]: structured cells into canonical JSON text
//! - [`parse_timestamps`]: ISO-8601 strings into UTC instants

pub mod batch;
pub mod flatten;
pub mod transform;

pub use batch::{Cell, Row, TabularBatch};
pub use flatten::{flatten, flatten_with, DEFAULT_SEPARATOR};
pub use transform::{parse_instant, parse_timestamps, serialize_columns};

//! Warehouse capabilities consumed by the pipeline
//!
//! - [`QueryStore`]: run a read query and return rows (identifier lookups)
//! - [`Sink`]: write batches under a load policy, run write statements
//!
//! [`postgres::PgWarehouse`] implements both over a `sqlx` pool.

pub mod postgres;

use async_trait::async_trait;

use crate::error::{EtlError, Result};
use crate::load::TableDescriptor;
use crate::normalize::{Cell, Row};
use crate::schema::TableSchema;

pub use postgres::PgWarehouse;

/// Rows returned by a [`QueryStore`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Cell>>,
}

impl QueryResult {
    /// All cells of `column`, or `SchemaError` when the result lacks it
    pub fn column_values(&self, column: &str) -> Result<impl Iterator<Item = &Cell>> {
        let idx = self
            .columns
            .iter()
            .position(|c| c == column)
            .ok_or_else(|| {
                EtlError::Schema(format!(
                    "query result has no '{}' column (got {:?})",
                    column, self.columns
                ))
            })?;
        Ok(self.rows.iter().filter_map(move |row| row.get(idx)))
    }
}

/// Read side of the warehouse
#[async_trait]
pub trait QueryStore: Send + Sync {
    /// Execute a read query; failures surface as `SinkRead`
    async fn query(&self, sql: &str) -> Result<QueryResult>;
}

/// Rows bound for one table, already cut into insert chunks
#[derive(Debug, Clone, Copy)]
pub struct TableWrite<'a> {
    pub table: &'a TableDescriptor,
    pub schema: &'a TableSchema,
    pub chunks: &'a [&'a [Row]],
}

impl TableWrite<'_> {
    pub fn rows(&self) -> usize {
        self.chunks.iter().map(|chunk| chunk.len()).sum()
    }
}

/// Write side of the warehouse
#[async_trait]
pub trait Sink: Send + Sync {
    async fn table_exists(&self, table: &TableDescriptor) -> Result<bool>;

    /// Apply every write in `writes` as one atomic unit
    ///
    /// Each table follows its own policy. Replace: readers see either the old
    /// content or all of the new rows. Append: either every chunk lands or
    /// none does. A failure on any table leaves every table untouched.
    async fn write_many(&self, writes: &[TableWrite<'_>]) -> Result<()>;

    /// Run an arbitrary write statement (may contain several statements) atomically
    async fn execute(&self, statement: &str) -> Result<()>;
}

/// Quote a Postgres identifier, doubling embedded quotes
pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

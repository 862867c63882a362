//! Batch loading under replace / append policies
//!
//! The [`Loader`] only decides how a batch is cut into chunks and which
//! policy applies; atomicity is the sink's job (see
//! [`crate::warehouse::Sink::write_many`]). It never deduplicates.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{EtlError, Result};
use crate::normalize::{Row, TabularBatch};
use crate::schema::TableSchema;
use crate::warehouse::{quote_ident, Sink, TableWrite};

/// Reference chunk size for bulk writes
pub const DEFAULT_CHUNK_SIZE: usize = 20_000;

/// Postgres caps a single statement at 65535 bind parameters
pub const MAX_BIND_PARAMETERS: usize = 65_535;

/// How a load treats existing table content
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadPolicy {
    /// Atomically supersede the whole table
    Replace,
    /// Add rows, leave existing rows untouched
    Append,
}

impl std::fmt::Display for LoadPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoadPolicy::Replace => write!(f, "replace"),
            LoadPolicy::Append => write!(f, "append"),
        }
    }
}

/// Target table of one load call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableDescriptor {
    pub namespace: String,
    pub name: String,
    pub policy: LoadPolicy,
}

impl TableDescriptor {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>, policy: LoadPolicy) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            policy,
        }
    }

    /// `"namespace"."name"`, safe to splice into SQL
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", quote_ident(&self.namespace), quote_ident(&self.name))
    }

    pub fn with_policy(&self, policy: LoadPolicy) -> Self {
        Self {
            policy,
            ..self.clone()
        }
    }
}

impl std::fmt::Display for TableDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.namespace, self.name)
    }
}

/// Load statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LoadStats {
    pub rows_written: usize,
    pub chunks: usize,
}

/// Writes normalized batches to a [`Sink`]
pub struct Loader<'a, S: Sink + ?Sized> {
    sink: &'a S,
    chunk_size: usize,
}

impl<'a, S: Sink + ?Sized> Loader<'a, S> {
    pub fn new(sink: &'a S, chunk_size: usize) -> Self {
        Self { sink, chunk_size }
    }

    /// Rows per insert statement for a table of `column_count` columns
    pub fn effective_chunk_size(&self, column_count: usize) -> usize {
        let by_parameters = MAX_BIND_PARAMETERS / column_count.max(1);
        self.chunk_size.min(by_parameters).max(1)
    }

    /// Write `batch` to `table` under the table's policy
    ///
    /// The batch must already be aligned to `schema`.
    pub async fn load(
        &self,
        batch: &TabularBatch,
        table: &TableDescriptor,
        schema: &TableSchema,
    ) -> Result<LoadStats> {
        let stats = self.load_all(&[(batch, table, schema)]).await?;
        Ok(stats.into_iter().next().unwrap_or_default())
    }

    /// Write several batches in a single sink call, so they commit together
    ///
    /// Every batch is checked and chunked before anything reaches the sink.
    /// Stats come back in input order.
    pub async fn load_all(
        &self,
        loads: &[(&TabularBatch, &TableDescriptor, &TableSchema)],
    ) -> Result<Vec<LoadStats>> {
        let mut planned = Vec::with_capacity(loads.len());
        let mut stats = Vec::with_capacity(loads.len());

        for &(batch, table, schema) in loads {
            match self.plan(batch, table, schema)? {
                Some(chunks) => {
                    stats.push(LoadStats {
                        rows_written: batch.len(),
                        chunks: chunks.len(),
                    });
                    planned.push((table, schema, chunks));
                },
                None => stats.push(LoadStats::default()),
            }
        }

        if planned.is_empty() {
            return Ok(stats);
        }

        let writes: Vec<TableWrite<'_>> = planned
            .iter()
            .map(|&(table, schema, ref chunks)| TableWrite {
                table,
                schema,
                chunks: chunks.as_slice(),
            })
            .collect();
        self.sink.write_many(&writes).await?;

        Ok(stats)
    }

    /// Chunks for one batch, or `None` when there is nothing to write
    fn plan<'b>(
        &self,
        batch: &'b TabularBatch,
        table: &TableDescriptor,
        schema: &TableSchema,
    ) -> Result<Option<Vec<&'b [Row]>>> {
        let expected = schema.column_names();
        if batch.columns() != expected.as_slice() {
            return Err(EtlError::Schema(format!(
                "batch for {} is not aligned to {}: columns {:?}",
                table,
                schema.tag(),
                batch.columns()
            )));
        }

        if batch.is_empty() && table.policy == LoadPolicy::Append {
            debug!(table = %table, "Empty append batch, nothing to write");
            return Ok(None);
        }

        let chunk_size = self.effective_chunk_size(expected.len());
        let chunks: Vec<&[Row]> = batch.rows().chunks(chunk_size).collect();

        info!(
            table = %table,
            policy = %table.policy,
            rows = batch.len(),
            chunks = chunks.len(),
            chunk_size,
            "Loading batch"
        );

        Ok(Some(chunks))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::normalize::Cell;
    use crate::schema::{ColumnKind, ColumnSpec};
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingSink {
        /// One entry per sink call: (table, policy, chunk sizes) per table
        writes: Mutex<Vec<Vec<(String, LoadPolicy, Vec<usize>)>>>,
    }

    #[async_trait]
    impl Sink for RecordingSink {
        async fn table_exists(&self, _table: &TableDescriptor) -> Result<bool> {
            Ok(true)
        }

        async fn write_many(&self, writes: &[TableWrite<'_>]) -> Result<()> {
            let call = writes
                .iter()
                .map(|w| {
                    let sizes = w.chunks.iter().map(|c| c.len()).collect();
                    (w.table.name.clone(), w.table.policy, sizes)
                })
                .collect();
            self.writes.lock().unwrap().push(call);
            Ok(())
        }

        async fn execute(&self, _statement: &str) -> Result<()> {
            Ok(())
        }
    }

    fn schema() -> TableSchema {
        TableSchema::new(
            "things",
            1,
            vec![
                ColumnSpec::required("id", ColumnKind::Text),
                ColumnSpec::optional("n", ColumnKind::Integer),
            ],
        )
    }

    fn batch(rows: usize) -> TabularBatch {
        let rows = (0..rows)
            .map(|i| {
                Row::from([
                    ("id".to_string(), Cell::Text(format!("r{}", i))),
                    ("n".to_string(), Cell::Int(i as i64)),
                ])
            })
            .collect();
        TabularBatch::with_columns(schema().column_names(), rows)
    }

    #[tokio::test]
    async fn test_chunks_large_batches() {
        let sink = RecordingSink::default();
        let loader = Loader::new(&sink, 2);
        let table = TableDescriptor::new("public", "things", LoadPolicy::Append);

        let stats = loader.load(&batch(5), &table, &schema()).await.unwrap();

        assert_eq!(stats, LoadStats { rows_written: 5, chunks: 3 });
        assert_eq!(
            *sink.writes.lock().unwrap(),
            vec![vec![("things".to_string(), LoadPolicy::Append, vec![2, 2, 1])]]
        );
    }

    #[tokio::test]
    async fn test_empty_batches() {
        let sink = RecordingSink::default();
        let loader = Loader::new(&sink, DEFAULT_CHUNK_SIZE);

        let append = TableDescriptor::new("public", "things", LoadPolicy::Append);
        let stats = loader.load(&batch(0), &append, &schema()).await.unwrap();
        assert_eq!(stats.rows_written, 0);
        assert!(sink.writes.lock().unwrap().is_empty());

        // Replace still reaches the sink so the table ends up empty, not missing
        let replace = append.with_policy(LoadPolicy::Replace);
        loader.load(&batch(0), &replace, &schema()).await.unwrap();
        assert_eq!(
            *sink.writes.lock().unwrap(),
            vec![vec![("things".to_string(), LoadPolicy::Replace, vec![])]]
        );
    }

    #[tokio::test]
    async fn test_load_all_is_one_sink_call() {
        let sink = RecordingSink::default();
        let loader = Loader::new(&sink, 2);
        let first = TableDescriptor::new("public", "first", LoadPolicy::Replace);
        let empty = TableDescriptor::new("public", "empty", LoadPolicy::Append);
        let second = TableDescriptor::new("public", "second", LoadPolicy::Replace);
        let (three, none, one) = (batch(3), batch(0), batch(1));

        let stats = loader
            .load_all(&[
                (&three, &first, &schema()),
                (&none, &empty, &schema()),
                (&one, &second, &schema()),
            ])
            .await
            .unwrap();

        assert_eq!(
            stats,
            [
                LoadStats { rows_written: 3, chunks: 2 },
                LoadStats::default(),
                LoadStats { rows_written: 1, chunks: 1 },
            ]
        );
        assert_eq!(
            *sink.writes.lock().unwrap(),
            vec![vec![
                ("first".to_string(), LoadPolicy::Replace, vec![2, 1]),
                ("second".to_string(), LoadPolicy::Replace, vec![1]),
            ]]
        );
    }

    #[tokio::test]
    async fn test_load_all_checks_every_batch_before_writing() {
        let sink = RecordingSink::default();
        let loader = Loader::new(&sink, DEFAULT_CHUNK_SIZE);
        let mut raw = TabularBatch::new();
        raw.push_row([("id".to_string(), Cell::Text("x".into()))]);
        let good = batch(2);
        let first = TableDescriptor::new("public", "first", LoadPolicy::Replace);
        let second = TableDescriptor::new("public", "second", LoadPolicy::Replace);

        let err = loader
            .load_all(&[(&good, &first, &schema()), (&raw, &second, &schema())])
            .await
            .unwrap_err();

        assert!(matches!(err, EtlError::Schema(_)));
        assert!(sink.writes.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rejects_unaligned_batch() {
        let sink = RecordingSink::default();
        let loader = Loader::new(&sink, DEFAULT_CHUNK_SIZE);
        let mut raw = TabularBatch::new();
        raw.push_row([("id".to_string(), Cell::Text("x".into()))]);

        let table = TableDescriptor::new("public", "things", LoadPolicy::Append);
        let err = loader.load(&raw, &table, &schema()).await.unwrap_err();
        assert!(matches!(err, EtlError::Schema(_)));
    }

    #[test]
    fn test_effective_chunk_size_respects_parameter_limit() {
        let sink = RecordingSink::default();
        let loader = Loader::new(&sink, DEFAULT_CHUNK_SIZE);
        assert_eq!(loader.effective_chunk_size(2), DEFAULT_CHUNK_SIZE);
        assert_eq!(loader.effective_chunk_size(42), 65_535 / 42);
        assert_eq!(loader.effective_chunk_size(0), DEFAULT_CHUNK_SIZE);
    }

    #[test]
    fn test_qualified_name_quotes_identifiers() {
        let table = TableDescriptor::new("public", "window\"s", LoadPolicy::Replace);
        assert_eq!(table.qualified_name(), "\"public\".\"window\"\"s\"");
        assert_eq!(table.to_string(), "public.window\"s");
    }
}

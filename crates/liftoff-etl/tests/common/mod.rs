//! Shared fixtures for liftoff-etl integration tests
#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use async_trait::async_trait;
use liftoff_etl::config::{DimensionSource, EtlConfig};
use liftoff_etl::error::{EtlError, Result};
use liftoff_etl::fetch::{FetchFailure, Fetcher};
use liftoff_etl::load::{LoadPolicy, TableDescriptor};
use liftoff_etl::normalize::{Cell, Row};
use liftoff_etl::warehouse::{quote_ident, QueryResult, QueryStore, Sink, TableWrite};
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

pub const LAUNCHES_URL: &str = "http://spacex.test/v5/launches";
pub const LATEST_URL: &str = "http://spacex.test/v5/launches/latest";
pub const PAYLOADS_URL: &str = "http://spacex.test/v4/payloads";
pub const LAUNCHPADS_URL: &str = "http://spacex.test/v4/launchpads";

/// Initialize tracing for tests
pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let _ = fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,liftoff_etl=debug")),
        )
        .with_test_writer()
        .try_init();
}

/// Config pointing at the fake endpoints, with SQL assets in a temp dir
///
/// Keep the returned `TempDir` alive for as long as the config is used.
pub fn test_config() -> (EtlConfig, TempDir) {
    let dir = TempDir::new().unwrap();
    let query = dir.path().join("incremental.sql");
    let aggregation = dir.path().join("aggregated.sql");
    std::fs::write(&query, "SELECT id FROM \"{schema}\".\"{table}\"").unwrap();
    std::fs::write(
        &aggregation,
        "CREATE TABLE \"{schema}\".\"{aggregated_table}\" AS SELECT * FROM \"{schema}\".\"{primary_table}\"",
    )
    .unwrap();

    let mut config = EtlConfig::default();
    config.endpoints.launches_url = LAUNCHES_URL.to_string();
    config.endpoints.latest_url = LATEST_URL.to_string();
    config.dimensions = vec![
        DimensionSource {
            name: "payloads".into(),
            url: PAYLOADS_URL.into(),
        },
        DimensionSource {
            name: "launchpads".into(),
            url: LAUNCHPADS_URL.into(),
        },
    ];
    config.incremental_query_path = query;
    config.aggregation_sql_path = aggregation;
    config.validate().unwrap();

    (config, dir)
}

pub fn rewrite(path: &Path, contents: &str) {
    std::fs::write(path, contents).unwrap();
}

// ============================================================================
// Fetcher
// ============================================================================

/// Serves canned documents by URL; unknown URLs fail with 404
#[derive(Clone, Default)]
pub struct FakeFetcher {
    documents: Arc<Mutex<HashMap<String, Value>>>,
    requests: Arc<Mutex<Vec<String>>>,
}

impl FakeFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(self, url: &str, document: Value) -> Self {
        self.serve(url, document);
        self
    }

    pub fn serve(&self, url: &str, document: Value) {
        self.documents.lock().unwrap().insert(url.to_string(), document);
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Fetcher for FakeFetcher {
    async fn fetch_json(&self, url: &str) -> std::result::Result<Value, FetchFailure> {
        self.requests.lock().unwrap().push(url.to_string());
        self.documents
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .ok_or(FetchFailure::Status(404))
    }
}

// ============================================================================
// Warehouse
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct WriteCall {
    pub table: String,
    pub policy: LoadPolicy,
    pub rows: usize,
}

#[derive(Default)]
struct State {
    tables: HashMap<String, Vec<Row>>,
    writes: Vec<WriteCall>,
    statements: Vec<String>,
    fail_reads: bool,
    fail_writes_to: Option<String>,
}

/// In-memory query store and sink; clones share state
///
/// Queries return the `id` column of the table whose quoted name appears in
/// the SQL, and fail like a missing relation otherwise.
#[derive(Clone, Default)]
pub struct MemoryWarehouse {
    state: Arc<Mutex<State>>,
}

impl MemoryWarehouse {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed(&self, table: &str, ids: &[&str]) {
        let rows = ids
            .iter()
            .map(|id| Row::from([("id".to_string(), Cell::Text(id.to_string()))]))
            .collect();
        self.state.lock().unwrap().tables.insert(table.to_string(), rows);
    }

    pub fn rows(&self, table: &str) -> Option<Vec<Row>> {
        self.state.lock().unwrap().tables.get(table).cloned()
    }

    pub fn ids(&self, table: &str) -> Vec<String> {
        self.rows(table)
            .unwrap_or_default()
            .iter()
            .filter_map(|row| row.get("id").and_then(Cell::as_identifier))
            .collect()
    }

    pub fn writes(&self) -> Vec<WriteCall> {
        self.state.lock().unwrap().writes.clone()
    }

    pub fn statements(&self) -> Vec<String> {
        self.state.lock().unwrap().statements.clone()
    }

    pub fn fail_reads(&self) {
        self.state.lock().unwrap().fail_reads = true;
    }

    pub fn fail_writes_to(&self, table: &str) {
        self.state.lock().unwrap().fail_writes_to = Some(table.to_string());
    }
}

#[async_trait]
impl QueryStore for MemoryWarehouse {
    async fn query(&self, sql: &str) -> Result<QueryResult> {
        let state = self.state.lock().unwrap();
        if state.fail_reads {
            return Err(EtlError::SinkRead("connection refused".into()));
        }

        let (_, rows) = state
            .tables
            .iter()
            .find(|(name, _)| sql.contains(&quote_ident(name)))
            .ok_or_else(|| EtlError::SinkRead(format!("relation does not exist: {}", sql)))?;

        Ok(QueryResult {
            columns: vec!["id".into()],
            rows: rows
                .iter()
                .map(|row| vec![row.get("id").cloned().unwrap_or(Cell::Null)])
                .collect(),
        })
    }
}

#[async_trait]
impl Sink for MemoryWarehouse {
    async fn table_exists(&self, table: &TableDescriptor) -> Result<bool> {
        Ok(self.state.lock().unwrap().tables.contains_key(&table.name))
    }

    async fn write_many(&self, writes: &[TableWrite<'_>]) -> Result<()> {
        let mut state = self.state.lock().unwrap();

        // All or nothing, like one transaction
        if let Some(failing) = writes
            .iter()
            .find(|w| state.fail_writes_to.as_deref() == Some(w.table.name.as_str()))
        {
            return Err(EtlError::sink_write(failing.table.to_string(), "duplicate key value"));
        }

        for write in writes {
            let rows: Vec<Row> = write.chunks.iter().flat_map(|chunk| chunk.iter().cloned()).collect();
            state.writes.push(WriteCall {
                table: write.table.name.clone(),
                policy: write.table.policy,
                rows: rows.len(),
            });

            match write.table.policy {
                LoadPolicy::Replace => {
                    state.tables.insert(write.table.name.clone(), rows);
                },
                LoadPolicy::Append => {
                    state.tables.entry(write.table.name.clone()).or_default().extend(rows);
                },
            }
        }
        Ok(())
    }

    async fn execute(&self, statement: &str) -> Result<()> {
        self.state.lock().unwrap().statements.push(statement.to_string());
        Ok(())
    }
}

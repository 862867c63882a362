//! Pipeline orchestrator
//!
//! Runs the stages of one ETL pass in order:
//!
//! ```text
//! Bootstrap -> FetchLatest -> Transform -> IncrementalCheck -> {Load | Skip}
//!           -> DimensionEnrichment -> Aggregate
//! ```
//!
//! The first failing stage halts the run. Each stage's side effect is a
//! single sink transaction (DimensionEnrichment commits all of its tables
//! together), so a failed stage leaves no table changed.

use serde_json::Value;
use std::future::Future;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::EtlConfig;
use crate::error::{read_sql_file, EtlError, Result};
use crate::fetch::Fetcher;
use crate::incremental::IncrementalCheck;
use crate::load::{LoadPolicy, LoadStats, Loader};
use crate::normalize::{flatten, parse_timestamps, serialize_columns, TabularBatch};
use crate::schema::{self, TableSchema};
use crate::warehouse::{QueryStore, Sink};

/// Pipeline stage, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Bootstrap,
    FetchLatest,
    Transform,
    IncrementalCheck,
    Load,
    DimensionEnrichment,
    Aggregate,
}

impl Stage {
    pub const ALL: [Stage; 7] = [
        Stage::Bootstrap,
        Stage::FetchLatest,
        Stage::Transform,
        Stage::IncrementalCheck,
        Stage::Load,
        Stage::DimensionEnrichment,
        Stage::Aggregate,
    ];

    /// 1-based position in the run
    pub fn ordinal(self) -> u8 {
        match self {
            Stage::Bootstrap => 1,
            Stage::FetchLatest => 2,
            Stage::Transform => 3,
            Stage::IncrementalCheck => 4,
            Stage::Load => 5,
            Stage::DimensionEnrichment => 6,
            Stage::Aggregate => 7,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Bootstrap => "Bootstrap",
            Stage::FetchLatest => "FetchLatest",
            Stage::Transform => "Transform",
            Stage::IncrementalCheck => "IncrementalCheck",
            Stage::Load => "Load",
            Stage::DimensionEnrichment => "DimensionEnrichment",
            Stage::Aggregate => "Aggregate",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A run halted at `stage`
#[derive(Error, Debug)]
#[error("{stage} failed with {}: {source}", .source.kind())]
pub struct PipelineError {
    pub stage: Stage,
    #[source]
    pub source: EtlError,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    /// Reload the primary table even if it already exists
    pub force_bootstrap: bool,
}

/// What the incremental path did with the latest record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IncrementalOutcome {
    Loaded(LoadStats),
    /// Every fetched identifier was already loaded
    Skipped { ids: Vec<String> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DimensionReport {
    pub name: String,
    pub table: String,
    pub stats: LoadStats,
}

/// Summary of a completed run
#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: Uuid,
    /// `None` when the primary table already existed
    pub bootstrap: Option<LoadStats>,
    pub incremental: IncrementalOutcome,
    pub dimensions: Vec<DimensionReport>,
    /// Dimensions whose endpoint returned no document
    pub skipped_dimensions: Vec<String>,
    pub elapsed: Duration,
}

/// Normalize one fetched document into a batch that fits `schema`
///
/// flatten -> align -> serialize structured columns -> parse timestamps -> validate
pub fn transform(document: &Value, schema: &TableSchema) -> Result<TabularBatch> {
    let batch = schema.align(flatten(document)?)?;
    let batch = serialize_columns(batch, &schema.serialized_columns())?;
    let batch = parse_timestamps(batch, &schema.timestamp_columns())?;
    schema.validate(batch)
}

/// One ETL pass over the configured sources
pub struct Pipeline<F, Q, S> {
    config: EtlConfig,
    fetcher: F,
    query_store: Q,
    sink: S,
}

impl<F, Q, S> Pipeline<F, Q, S>
where
    F: Fetcher,
    Q: QueryStore,
    S: Sink,
{
    pub fn new(config: EtlConfig, fetcher: F, query_store: Q, sink: S) -> Self {
        Self {
            config,
            fetcher,
            query_store,
            sink,
        }
    }

    pub async fn run(&self, options: RunOptions) -> std::result::Result<RunReport, PipelineError> {
        let run_id = Uuid::new_v4();
        self.run_with_id(run_id, options).await
    }

    #[tracing::instrument(name = "pipeline_run", skip_all, fields(run_id = %run_id))]
    async fn run_with_id(&self, run_id: Uuid, options: RunOptions) -> std::result::Result<RunReport, PipelineError> {
        let started = Instant::now();
        let launches = schema::launches();
        let loader = Loader::new(&self.sink, self.config.chunk_size);

        info!(
            primary_table = %self.config.primary_table,
            force_bootstrap = options.force_bootstrap,
            "Pipeline run started"
        );

        let bootstrap = stage(Stage::Bootstrap, async {
            let table = self.config.primary_descriptor(LoadPolicy::Replace);
            if !options.force_bootstrap && self.sink.table_exists(&table).await? {
                info!(table = %table, "Primary table exists, skipping bootstrap");
                return Ok(None);
            }

            let document = self.fetch_required(&self.config.endpoints.launches_url).await?;
            let batch = transform(&document, &launches)?;
            loader.load(&batch, &table, &launches).await.map(Some)
        })
        .await?;

        let latest = stage(Stage::FetchLatest, async {
            self.fetch_required(&self.config.endpoints.latest_url).await
        })
        .await?;

        let batch = stage(Stage::Transform, async { transform(&latest, &launches) }).await?;

        let primary = self.config.primary_descriptor(LoadPolicy::Append);
        let (fresh, skipped) = stage(Stage::IncrementalCheck, async {
            let check = IncrementalCheck::new(&self.config.incremental_query_path);
            let existing = check.existing_identifiers(&self.query_store, &primary).await?;
            IncrementalCheck::select_new(batch, &existing)
        })
        .await?;

        let incremental = if fresh.is_empty() {
            info!(ids = ?skipped, "Latest record already loaded, skipping");
            IncrementalOutcome::Skipped { ids: skipped }
        } else {
            let stats = stage(Stage::Load, loader.load(&fresh, &primary, &launches)).await?;
            IncrementalOutcome::Loaded(stats)
        };

        let (dimensions, skipped_dimensions) =
            stage(Stage::DimensionEnrichment, self.enrich_dimensions(&loader)).await?;

        stage(Stage::Aggregate, self.aggregate()).await?;

        let report = RunReport {
            run_id,
            bootstrap,
            incremental,
            dimensions,
            skipped_dimensions,
            elapsed: started.elapsed(),
        };

        info!(
            elapsed_ms = report.elapsed.as_millis() as u64,
            dimensions = report.dimensions.len(),
            skipped_dimensions = report.skipped_dimensions.len(),
            "Pipeline run completed"
        );

        Ok(report)
    }

    async fn fetch_required(&self, url: &str) -> Result<Value> {
        self.fetcher
            .fetch(url)
            .await
            .ok_or_else(|| EtlError::Network(format!("no document fetched from {}", url)))
    }

    async fn aggregate(&self) -> Result<()> {
        let statement = read_sql_file(&self.config.aggregation_sql_path)?
            .replace("{schema}", &self.config.store.schema)
            .replace("{primary_table}", &self.config.primary_table)
            .replace("{aggregated_table}", &self.config.aggregated_table);
        self.sink.execute(&statement).await?;
        info!(table = %self.config.aggregated_table, "Aggregated table refreshed");
        Ok(())
    }

    /// Refresh every dimension table in one sink transaction
    ///
    /// All documents are fetched and transformed first, so a bad document
    /// fails the stage before any table is touched.
    async fn enrich_dimensions(&self, loader: &Loader<'_, S>) -> Result<(Vec<DimensionReport>, Vec<String>)> {
        let mut pending = Vec::new();
        let mut skipped = Vec::new();

        for (source, table, schema) in self.config.dimension_targets()? {
            let Some(document) = self.fetcher.fetch(&source.url).await else {
                warn!(dimension = %source.name, url = %source.url, "No document fetched, keeping previous table");
                skipped.push(source.name);
                continue;
            };

            let batch = transform(&document, &schema)?;
            pending.push((source, table, schema, batch));
        }

        let stats = {
            let loads: Vec<_> = pending
                .iter()
                .map(|(_, table, schema, batch)| (batch, table, schema))
                .collect();
            loader.load_all(&loads).await?
        };

        let loaded = pending
            .into_iter()
            .zip(stats)
            .map(|((source, table, _, _), stats)| {
                info!(dimension = %source.name, table = %table, rows = stats.rows_written, "Dimension refreshed");
                DimensionReport {
                    name: source.name,
                    table: table.name,
                    stats,
                }
            })
            .collect();

        Ok((loaded, skipped))
    }
}

/// Run one stage, logging entry and outcome, and tag any error with the stage
async fn stage<T, Fut>(stage: Stage, work: Fut) -> std::result::Result<T, PipelineError>
where
    Fut: Future<Output = Result<T>>,
{
    info!(stage = %stage, "Stage started");
    match work.await {
        Ok(value) => {
            info!(stage = %stage, "Stage completed");
            Ok(value)
        },
        Err(source) => {
            error!(stage = %stage, kind = %source.kind(), error = %source, "Stage failed");
            Err(PipelineError { stage, source })
        },
    }
}

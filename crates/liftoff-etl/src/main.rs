//! Liftoff ETL - SpaceX launch data pipeline

use clap::Parser;
use liftoff_common::logging::{init_logging, LogConfig, LogLevel};
use liftoff_etl::config::EtlConfig;
use liftoff_etl::fetch::HttpFetcher;
use liftoff_etl::pipeline::{IncrementalOutcome, Pipeline, RunOptions};
use liftoff_etl::warehouse::PgWarehouse;
use std::process::ExitCode;
use tracing::{error, info};

/// Exit code for configuration and startup failures
const EXIT_CONFIG: u8 = 2;

/// A failed stage exits with this plus the stage ordinal
const EXIT_STAGE_BASE: u8 = 10;

#[derive(Parser, Debug)]
#[command(name = "liftoff-etl")]
#[command(author, version, about = "Load SpaceX launch data into Postgres")]
struct Cli {
    /// Reload the primary table from the full launch collection
    #[arg(long)]
    full_refresh: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Environment variables take precedence over the builder defaults
    let log_config = LogConfig::builder()
        .log_file_prefix("liftoff-etl")
        .build()
        .merge_env();

    let mut log_config = match log_config {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Invalid logging configuration: {:#}", e);
            return ExitCode::from(EXIT_CONFIG);
        },
    };
    if cli.verbose {
        log_config.level = LogLevel::Debug;
    }

    let _guard = match init_logging(&log_config) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {:#}", e);
            return ExitCode::from(EXIT_CONFIG);
        },
    };

    let pipeline = match build_pipeline() {
        Ok(pipeline) => pipeline,
        Err(e) => {
            error!(error = %format!("{:#}", e), "Startup failed");
            return ExitCode::from(EXIT_CONFIG);
        },
    };

    let options = RunOptions {
        force_bootstrap: cli.full_refresh,
    };

    match pipeline.run(options).await {
        Ok(report) => {
            let incremental = match &report.incremental {
                IncrementalOutcome::Loaded(stats) => format!("appended {} rows", stats.rows_written),
                IncrementalOutcome::Skipped { ids } => format!("skipped {:?}", ids),
            };
            info!(
                run_id = %report.run_id,
                bootstrap_rows = report.bootstrap.map(|s| s.rows_written),
                incremental = %incremental,
                skipped_dimensions = ?report.skipped_dimensions,
                "Run complete"
            );
            ExitCode::SUCCESS
        },
        Err(e) => {
            error!(stage = %e.stage, kind = %e.source.kind(), "Run failed: {}", e);
            ExitCode::from(EXIT_STAGE_BASE + e.stage.ordinal())
        },
    }
}

fn build_pipeline() -> anyhow::Result<Pipeline<HttpFetcher, PgWarehouse, PgWarehouse>> {
    let config = EtlConfig::load()?;
    info!(
        schema = %config.store.schema,
        primary_table = %config.primary_table,
        dimensions = config.dimensions.len(),
        chunk_size = config.chunk_size,
        "Configuration loaded"
    );

    let fetcher = HttpFetcher::from_config(&config)?;
    let sink = PgWarehouse::connect_lazy(&config.store.url, &config.store)?;
    let query_store = match &config.store.query_url {
        Some(url) => PgWarehouse::connect_lazy(url, &config.store)?,
        None => sink.clone(),
    };

    Ok(Pipeline::new(config, fetcher, query_store, sink))
}

//! Liftoff ETL
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Extracts SpaceX launch records, normalizes the nested JSON into tables and
//! loads them into Postgres: a full replace on first run, append-only
//! incremental loads afterwards, followed by dimension refresh and
//! aggregation.
//!
//! # Modules
//!
//! - [`fetch`]: HTTP JSON fetching that absorbs failures into `None`
//! - [`normalize`]: flattening, JSON serialization and timestamp parsing
//! - [`schema`]: explicit, versioned table schemas
//! - [`load`]: replace / append loading in chunks
//! - [`incremental`]: novelty check against already loaded identifiers
//! - [`warehouse`]: query store and sink capabilities, Postgres adapter
//! - [`pipeline`]: the stage sequence of one run
//!
//! # Example
//!
//! ```no_run
//! use liftoff_etl::config::EtlConfig;
//! use liftoff_etl::fetch::HttpFetcher;
//! use liftoff_etl::pipeline::{Pipeline, RunOptions};
//! use liftoff_etl::warehouse::PgWarehouse;
//!
//! # async fn run() -> anyhow::Result<()> {
//! let config = EtlConfig::load()?;
//! let fetcher = HttpFetcher::from_config(&config)?;
//! let warehouse = PgWarehouse::connect_lazy(&config.store.url, &config.store)?;
//!
//! let pipeline = Pipeline::new(config, fetcher, warehouse.clone(), warehouse);
//! let report = pipeline.run(RunOptions::default()).await?;
//! println!("run {} finished in {:?}", report.run_id, report.elapsed);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod fetch;
pub mod incremental;
pub mod load;
pub mod normalize;
pub mod pipeline;
pub mod schema;
pub mod warehouse;

pub use error::{ErrorKind, EtlError, Result};

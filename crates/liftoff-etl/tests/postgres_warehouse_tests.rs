//! Postgres warehouse round trips
//!
//! Needs Docker; run with `cargo test -- --ignored`.

use anyhow::Result;
use liftoff_etl::error::ErrorKind;
use liftoff_etl::load::{LoadPolicy, Loader, TableDescriptor};
use liftoff_etl::normalize::Cell;
use liftoff_etl::pipeline::transform;
use liftoff_etl::schema;
use liftoff_etl::warehouse::{PgWarehouse, QueryStore, Sink};
use serde_json::json;
use serial_test::serial;
use sqlx::postgres::PgPoolOptions;
use testcontainers::{runners::AsyncRunner, ContainerAsync, ImageExt};
use testcontainers_modules::postgres::Postgres;
use tracing::info;

/// Initialize tracing for tests
fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let _ = fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,liftoff_etl=debug")),
        )
        .with_test_writer()
        .try_init();
}

async fn start_warehouse() -> Result<(ContainerAsync<Postgres>, PgWarehouse)> {
    let container = Postgres::default().with_tag("16-alpine").start().await?;

    let host = container.get_host().await?;
    let port = container.get_host_port_ipv4(5432).await?;
    let conn_string = format!("postgresql://postgres:postgres@{}:{}/postgres", host, port);

    let pool = PgPoolOptions::new().max_connections(5).connect(&conn_string).await?;
    info!("Postgres ready at {}:{}", host, port);

    Ok((container, PgWarehouse::new(pool)))
}

fn launches_document() -> serde_json::Value {
    json!([
        {
            "id": "L1",
            "name": "FalconSat",
            "flight_number": 1,
            "window": 0,
            "success": false,
            "crew": [],
            "payloads": ["P1"],
            "failures": [{"time": 33, "reason": "merlin engine failure"}],
            "date_utc": "2006-03-24T22:30:00.000Z",
            "links": {"patch": {"small": "https://images2.imgbox.com/s.png"}}
        },
        {
            "id": "L2",
            "name": "DemoSat",
            "flight_number": 2,
            "success": true,
            "crew": ["c1"],
            "date_utc": "2007-03-21T01:10:00.000Z"
        }
    ])
}

#[tokio::test]
#[serial]
#[ignore = "requires Docker"]
async fn test_replace_then_append_round_trip() -> Result<()> {
    init_tracing();
    let (_container, warehouse) = start_warehouse().await?;
    let schema = schema::launches();
    let loader = Loader::new(&warehouse, 1);

    let replace = TableDescriptor::new("spacex", "raw_level", LoadPolicy::Replace);
    assert!(!warehouse.table_exists(&replace).await?);

    let batch = transform(&launches_document(), &schema)?;
    let stats = loader.load(&batch, &replace, &schema).await?;
    assert_eq!(stats.rows_written, 2);
    assert_eq!(stats.chunks, 2);
    assert!(warehouse.table_exists(&replace).await?);

    let comment: Option<String> =
        sqlx::query_scalar("SELECT obj_description('spacex.raw_level'::regclass, 'pg_class')")
            .fetch_one(warehouse.pool())
            .await?;
    assert_eq!(comment.as_deref(), Some("launches v1"));

    let latest = transform(&json!({"id": "L3", "crew": ["x"], "date_utc": "2024-01-01T00:00:00Z"}), &schema)?;
    let append = replace.with_policy(LoadPolicy::Append);
    loader.load(&latest, &append, &schema).await?;

    let result = warehouse
        .query("SELECT id, \"window\", crew, failures, date_utc FROM spacex.raw_level ORDER BY id")
        .await?;
    assert_eq!(result.columns, ["id", "window", "crew", "failures", "date_utc"]);
    assert_eq!(result.rows.len(), 3);
    assert_eq!(result.rows[0][0], Cell::Text("L1".into()));
    assert_eq!(result.rows[0][1], Cell::Int(0));
    assert_eq!(result.rows[0][2], Cell::Text("[]".into()));
    assert_eq!(
        result.rows[0][3],
        Cell::Text("[{\"reason\":\"merlin engine failure\",\"time\":33}]".into())
    );
    assert_eq!(result.rows[1][1], Cell::Null);
    assert!(matches!(result.rows[2][4], Cell::Timestamp(_)));

    Ok(())
}

#[tokio::test]
#[serial]
#[ignore = "requires Docker"]
async fn test_empty_loads() -> Result<()> {
    init_tracing();
    let (_container, warehouse) = start_warehouse().await?;
    let schema = schema::launchpads();
    let loader = Loader::new(&warehouse, 20_000);
    let empty = transform(&json!([]), &schema)?;

    let replace = TableDescriptor::new("public", "dim_launchpads", LoadPolicy::Replace);
    loader.load(&empty, &replace, &schema).await?;

    let result = warehouse.query("SELECT id FROM public.dim_launchpads").await?;
    assert_eq!(result.columns, ["id"]);
    assert!(result.rows.is_empty());

    let pads = transform(&json!([{"id": "LP1", "name": "SLC 40"}]), &schema)?;
    loader.load(&pads, &replace, &schema).await?;
    loader.load(&empty, &replace.with_policy(LoadPolicy::Append), &schema).await?;

    let result = warehouse.query("SELECT id FROM public.dim_launchpads").await?;
    assert_eq!(result.rows, [vec![Cell::Text("LP1".into())]]);

    Ok(())
}

#[tokio::test]
#[serial]
#[ignore = "requires Docker"]
async fn test_append_rejects_drifted_table() -> Result<()> {
    init_tracing();
    let (_container, warehouse) = start_warehouse().await?;

    warehouse
        .execute("CREATE TABLE public.raw_level (id TEXT, legacy_column TEXT)")
        .await?;

    let schema = schema::launches();
    let batch = transform(&json!({"id": "L1"}), &schema)?;
    let append = TableDescriptor::new("public", "raw_level", LoadPolicy::Append);
    let err = Loader::new(&warehouse, 100)
        .load(&batch, &append, &schema)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Schema);
    assert!(err.to_string().contains("legacy_column"));

    Ok(())
}

#[tokio::test]
#[serial]
#[ignore = "requires Docker"]
async fn test_failed_statement_rolls_back() -> Result<()> {
    init_tracing();
    let (_container, warehouse) = start_warehouse().await?;

    let err = warehouse
        .execute("CREATE TABLE public.aggregated (n INT); SELECT * FROM public.missing_table;")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::SinkWrite);

    let aggregated = TableDescriptor::new("public", "aggregated", LoadPolicy::Replace);
    assert!(!warehouse.table_exists(&aggregated).await?);

    Ok(())
}

#[tokio::test]
#[serial]
#[ignore = "requires Docker"]
async fn test_load_all_rolls_back_every_table() -> Result<()> {
    init_tracing();
    let (_container, warehouse) = start_warehouse().await?;
    let loader = Loader::new(&warehouse, 100);

    let pads_schema = schema::launchpads();
    let pads = TableDescriptor::new("public", "dim_launchpads", LoadPolicy::Replace);
    loader
        .load(&transform(&json!([{"id": "LP-old"}]), &pads_schema)?, &pads, &pads_schema)
        .await?;

    warehouse
        .execute("CREATE TABLE public.raw_level (id TEXT, legacy_column TEXT)")
        .await?;

    let launches_schema = schema::launches();
    let launches = TableDescriptor::new("public", "raw_level", LoadPolicy::Append);
    let new_pads = transform(&json!([{"id": "LP-new"}]), &pads_schema)?;
    let new_launch = transform(&json!({"id": "L1"}), &launches_schema)?;

    let err = loader
        .load_all(&[
            (&new_pads, &pads, &pads_schema),
            (&new_launch, &launches, &launches_schema),
        ])
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Schema);

    let result = warehouse.query("SELECT id FROM public.dim_launchpads").await?;
    assert_eq!(result.rows, [vec![Cell::Text("LP-old".into())]]);

    Ok(())
}

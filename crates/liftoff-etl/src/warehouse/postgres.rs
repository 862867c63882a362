//! Postgres warehouse over a `sqlx` pool
//!
//! Every write runs in a single transaction. Replace loads build the new
//! content in a staging table and swap it in before commit, so readers see
//! either the previous table or the complete new one.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::Value;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::query_builder::Separated;
use sqlx::{Column, Executor, PgConnection, PgPool, Postgres, QueryBuilder, Row as _, Statement, Transaction, TypeInfo};
use std::collections::BTreeSet;
use tracing::{debug, info};

use super::{quote_ident, QueryResult, QueryStore, Sink, TableWrite};
use crate::config::StoreConfig;
use crate::error::{EtlError, Result};
use crate::load::{LoadPolicy, TableDescriptor};
use crate::normalize::{Cell, Row};
use crate::schema::{ColumnKind, TableSchema};

/// Suffix of the table a replace load fills before the swap
pub const STAGING_SUFFIX: &str = "__staging";

/// [`QueryStore`] and [`Sink`] backed by Postgres
#[derive(Clone)]
pub struct PgWarehouse {
    pool: PgPool,
}

impl PgWarehouse {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Build a lazily connecting pool
    ///
    /// No connection is opened here; an unreachable database surfaces in the
    /// first stage that touches it.
    pub fn connect_lazy(url: &str, store: &StoreConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(store.max_connections)
            .acquire_timeout(store.connect_timeout())
            .connect_lazy(url)
            .map_err(|e| EtlError::Config(format!("invalid database URL: {}", e)))?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn replace(
        tx: &mut Transaction<'_, Postgres>,
        table: &TableDescriptor,
        schema: &TableSchema,
        chunks: &[&[Row]],
    ) -> Result<()> {
        let staging = TableDescriptor::new(
            &table.namespace,
            format!("{}{}", table.name, STAGING_SUFFIX),
            LoadPolicy::Replace,
        );
        let fail = |e: sqlx::Error| EtlError::sink_write(table.to_string(), e);

        exec(tx, &format!("CREATE SCHEMA IF NOT EXISTS {}", quote_ident(&table.namespace)))
            .await
            .map_err(fail)?;
        exec(tx, &format!("DROP TABLE IF EXISTS {}", staging.qualified_name()))
            .await
            .map_err(fail)?;
        exec(tx, &create_table_sql(&staging, schema, false)).await.map_err(fail)?;

        for chunk in chunks {
            insert_chunk(tx, &staging, schema, chunk).await?;
        }

        exec(tx, &format!("DROP TABLE IF EXISTS {}", table.qualified_name()))
            .await
            .map_err(fail)?;
        exec(
            tx,
            &format!(
                "ALTER TABLE {} RENAME TO {}",
                staging.qualified_name(),
                quote_ident(&table.name)
            ),
        )
        .await
        .map_err(fail)?;
        exec(
            tx,
            &format!(
                "COMMENT ON TABLE {} IS {}",
                table.qualified_name(),
                quote_literal(&schema.tag())
            ),
        )
        .await
        .map_err(fail)?;

        Ok(())
    }

    async fn append(
        tx: &mut Transaction<'_, Postgres>,
        table: &TableDescriptor,
        schema: &TableSchema,
        chunks: &[&[Row]],
    ) -> Result<()> {
        let fail = |e: sqlx::Error| EtlError::sink_write(table.to_string(), e);

        exec(tx, &format!("CREATE SCHEMA IF NOT EXISTS {}", quote_ident(&table.namespace)))
            .await
            .map_err(fail)?;
        exec(tx, &create_table_sql(table, schema, true)).await.map_err(fail)?;

        let existing: BTreeSet<String> = sqlx::query_scalar::<_, String>(
            "SELECT column_name::text FROM information_schema.columns \
             WHERE table_schema = $1 AND table_name = $2",
        )
        .bind(&table.namespace)
        .bind(&table.name)
        .fetch_all(&mut **tx)
        .await
        .map_err(fail)?
        .into_iter()
        .collect();

        let expected: BTreeSet<String> = schema.column_names().into_iter().collect();
        if existing != expected {
            let missing: Vec<_> = expected.difference(&existing).collect();
            let extra: Vec<_> = existing.difference(&expected).collect();
            return Err(EtlError::Schema(format!(
                "{} does not match {}: missing {:?}, unexpected {:?}",
                table,
                schema.tag(),
                missing,
                extra
            )));
        }

        for chunk in chunks {
            insert_chunk(tx, table, schema, chunk).await?;
        }

        Ok(())
    }
}

#[async_trait]
impl QueryStore for PgWarehouse {
    async fn query(&self, sql: &str) -> Result<QueryResult> {
        debug!(sql, "Running read query");

        let rows = sqlx::query(sql)
            .fetch_all(&self.pool)
            .await
            .map_err(EtlError::sink_read)?;

        let columns: Vec<String> = match rows.first() {
            Some(row) => row.columns().iter().map(|c| c.name().to_string()).collect(),
            // No rows to read names from; ask the server to describe the statement
            None => self
                .pool
                .prepare(sql)
                .await
                .map_err(EtlError::sink_read)?
                .columns()
                .iter()
                .map(|c| c.name().to_string())
                .collect(),
        };

        let rows = rows
            .iter()
            .map(|row| (0..row.len()).map(|idx| decode_cell(row, idx)).collect())
            .collect::<Result<Vec<Vec<Cell>>>>()?;

        Ok(QueryResult { columns, rows })
    }
}

#[async_trait]
impl Sink for PgWarehouse {
    async fn table_exists(&self, table: &TableDescriptor) -> Result<bool> {
        sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS (SELECT 1 FROM information_schema.tables \
             WHERE table_schema = $1 AND table_name = $2)",
        )
        .bind(&table.namespace)
        .bind(&table.name)
        .fetch_one(&self.pool)
        .await
        .map_err(EtlError::sink_read)
    }

    async fn write_many(&self, writes: &[TableWrite<'_>]) -> Result<()> {
        let target = writes
            .iter()
            .map(|w| w.table.to_string())
            .collect::<Vec<_>>()
            .join(", ");

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| EtlError::sink_write(target.as_str(), e))?;

        for write in writes {
            match write.table.policy {
                LoadPolicy::Replace => Self::replace(&mut tx, write.table, write.schema, write.chunks).await?,
                LoadPolicy::Append => Self::append(&mut tx, write.table, write.schema, write.chunks).await?,
            }
        }

        tx.commit()
            .await
            .map_err(|e| EtlError::sink_write(target.as_str(), e))?;

        for write in writes {
            info!(
                table = %write.table,
                policy = %write.table.policy,
                rows = write.rows(),
                chunks = write.chunks.len(),
                "Committed load"
            );
        }
        Ok(())
    }

    async fn execute(&self, statement: &str) -> Result<()> {
        let fail = |e: sqlx::Error| EtlError::sink_write("<statement>", e);

        let mut tx = self.pool.begin().await.map_err(fail)?;
        let conn: &mut PgConnection = &mut tx;
        // Unprepared, so the file may hold several statements
        let result = conn.execute(statement).await.map_err(fail)?;
        tx.commit().await.map_err(fail)?;

        debug!(rows_affected = result.rows_affected(), "Executed write statement");
        Ok(())
    }
}

async fn exec(tx: &mut Transaction<'_, Postgres>, sql: &str) -> std::result::Result<(), sqlx::Error> {
    sqlx::query(sql).execute(&mut **tx).await.map(|_| ())
}

fn create_table_sql(table: &TableDescriptor, schema: &TableSchema, if_not_exists: bool) -> String {
    let columns = schema
        .columns
        .iter()
        .map(|c| {
            let not_null = if c.required { " NOT NULL" } else { "" };
            format!("{} {}{}", quote_ident(&c.name), c.kind.sql_type(), not_null)
        })
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        "CREATE TABLE {}{} ({})",
        if if_not_exists { "IF NOT EXISTS " } else { "" },
        table.qualified_name(),
        columns
    )
}

fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

async fn insert_chunk(
    tx: &mut Transaction<'_, Postgres>,
    table: &TableDescriptor,
    schema: &TableSchema,
    chunk: &[Row],
) -> Result<()> {
    if chunk.is_empty() {
        return Ok(());
    }

    let binds = chunk
        .iter()
        .enumerate()
        .map(|(idx, row)| {
            schema
                .columns
                .iter()
                .map(|spec| {
                    let cell = row.get(&spec.name).unwrap_or(&Cell::Null);
                    Bind::from_cell(spec.kind, cell).ok_or_else(|| {
                        EtlError::Schema(format!(
                            "{}: row {}, column '{}' cannot be stored as {}",
                            table,
                            idx,
                            spec.name,
                            spec.kind
                        ))
                    })
                })
                .collect::<Result<Vec<_>>>()
        })
        .collect::<Result<Vec<_>>>()?;

    let column_list = schema
        .columns
        .iter()
        .map(|c| quote_ident(&c.name))
        .collect::<Vec<_>>()
        .join(", ");

    let mut query_builder: QueryBuilder<Postgres> = QueryBuilder::new(format!(
        "INSERT INTO {} ({}) ",
        table.qualified_name(),
        column_list
    ));

    query_builder.push_values(binds, |mut b, row| {
        for bind in row {
            bind.push(&mut b);
        }
    });

    query_builder
        .build()
        .execute(&mut **tx)
        .await
        .map_err(|e| EtlError::sink_write(table.to_string(), e))?;

    debug!(table = %table, rows = chunk.len(), "Inserted chunk");
    Ok(())
}

/// Typed bind value; nulls carry the column type so Postgres can infer it
enum Bind {
    Text(Option<String>),
    Int(Option<i64>),
    Float(Option<f64>),
    Bool(Option<bool>),
    Json(Option<Value>),
    Timestamp(Option<DateTime<Utc>>),
}

impl Bind {
    fn from_cell(kind: ColumnKind, cell: &Cell) -> Option<Self> {
        let bind = match (kind, cell) {
            (ColumnKind::Text | ColumnKind::SerializedJson, Cell::Null) => Bind::Text(None),
            (ColumnKind::Text | ColumnKind::SerializedJson, Cell::Text(s)) => Bind::Text(Some(s.clone())),
            (ColumnKind::Integer, Cell::Null) => Bind::Int(None),
            (ColumnKind::Integer, Cell::Int(i)) => Bind::Int(Some(*i)),
            (ColumnKind::Float, Cell::Null) => Bind::Float(None),
            (ColumnKind::Float, Cell::Float(f)) => Bind::Float(Some(*f)),
            (ColumnKind::Float, Cell::Int(i)) => Bind::Float(Some(*i as f64)),
            (ColumnKind::Boolean, Cell::Null) => Bind::Bool(None),
            (ColumnKind::Boolean, Cell::Bool(b)) => Bind::Bool(Some(*b)),
            (ColumnKind::Json, Cell::Null) => Bind::Json(None),
            (ColumnKind::Json, other) => Bind::Json(Some(other.to_json())),
            (ColumnKind::Timestamp, Cell::Null) => Bind::Timestamp(None),
            (ColumnKind::Timestamp, Cell::Timestamp(ts)) => Bind::Timestamp(Some(*ts)),
            _ => return None,
        };
        Some(bind)
    }

    fn push(self, b: &mut Separated<'_, '_, Postgres, &'static str>) {
        match self {
            Bind::Text(v) => b.push_bind(v),
            Bind::Int(v) => b.push_bind(v),
            Bind::Float(v) => b.push_bind(v),
            Bind::Bool(v) => b.push_bind(v),
            Bind::Json(v) => b.push_bind(v),
            Bind::Timestamp(v) => b.push_bind(v),
        };
    }
}

fn decode_cell(row: &PgRow, idx: usize) -> Result<Cell> {
    let type_name = row.column(idx).type_info().name().to_string();

    let cell = match type_name.as_str() {
        "TEXT" | "VARCHAR" | "BPCHAR" | "NAME" => get::<String>(row, idx)?.map(Cell::Text),
        "INT2" => get::<i16>(row, idx)?.map(|v| Cell::Int(v.into())),
        "INT4" => get::<i32>(row, idx)?.map(|v| Cell::Int(v.into())),
        "INT8" => get::<i64>(row, idx)?.map(Cell::Int),
        "FLOAT4" => get::<f32>(row, idx)?.map(|v| Cell::Float(v.into())),
        "FLOAT8" => get::<f64>(row, idx)?.map(Cell::Float),
        "BOOL" => get::<bool>(row, idx)?.map(Cell::Bool),
        "JSON" | "JSONB" => get::<Value>(row, idx)?.map(Cell::Json),
        "TIMESTAMPTZ" => get::<DateTime<Utc>>(row, idx)?.map(Cell::Timestamp),
        "TIMESTAMP" => get::<NaiveDateTime>(row, idx)?.map(|ts| Cell::Timestamp(ts.and_utc())),
        "UUID" => get::<uuid::Uuid>(row, idx)?.map(|id| Cell::Text(id.to_string())),
        other => {
            return Err(EtlError::SinkRead(format!(
                "column '{}' has unsupported type {}",
                row.column(idx).name(),
                other
            )))
        },
    };

    Ok(cell.unwrap_or(Cell::Null))
}

fn get<'r, T>(row: &'r PgRow, idx: usize) -> Result<Option<T>>
where
    T: sqlx::Decode<'r, Postgres> + sqlx::Type<Postgres>,
{
    row.try_get::<Option<T>, _>(idx).map_err(EtlError::sink_read)
}

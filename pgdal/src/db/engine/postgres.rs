//! PostgreSQL engine backed by a sqlx connection pool.

use async_trait::async_trait;
use serde::Serialize;
use sqlx::postgres::{PgArguments, PgPool, PgRow};
use sqlx::query::Query;
use sqlx::{Column, Postgres, Row as _, TypeInfo};
use tokio::sync::Mutex;
use tracing::{instrument, warn};

use crate::config::DbConfig;
use crate::db::engine::{Engine, EngineTransaction, Executor};
use crate::db::errors::EngineError;
use crate::db::query::Statement;
use crate::db::value::{Row, Value};

#[derive(Debug, Clone)]
pub struct PgEngine {
    pool: PgPool,
}

impl PgEngine {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Open a pool sized and tuned from `config`.
    #[instrument(skip_all, fields(host = %config.host, database = %config.name), err)]
    pub async fn connect(config: &DbConfig) -> Result<Self, EngineError> {
        let pool = config.pool_options().connect_with(config.connect_options()).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl Executor for PgEngine {
    async fn execute(&self, stmt: &Statement) -> Result<u64, EngineError> {
        let result = build(stmt).execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    async fn fetch_all(&self, stmt: &Statement) -> Result<Vec<Row>, EngineError> {
        let rows = build(stmt).fetch_all(&self.pool).await?;
        rows.iter().map(decode_row).collect()
    }
}

#[async_trait]
impl Engine for PgEngine {
    async fn begin(&self) -> Result<Box<dyn EngineTransaction>, EngineError> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgTransaction { tx: Mutex::new(Some(tx)) }))
    }
}

/// An open sqlx transaction. Dropping it unfinished rolls it back.
pub struct PgTransaction {
    tx: Mutex<Option<sqlx::Transaction<'static, Postgres>>>,
}

fn finished() -> EngineError {
    EngineError::Other(anyhow::anyhow!("transaction already finished"))
}

#[async_trait]
impl Executor for PgTransaction {
    async fn execute(&self, stmt: &Statement) -> Result<u64, EngineError> {
        let mut guard = self.tx.lock().await;
        let tx = guard.as_mut().ok_or_else(finished)?;
        let result = build(stmt).execute(&mut **tx).await?;
        Ok(result.rows_affected())
    }

    async fn fetch_all(&self, stmt: &Statement) -> Result<Vec<Row>, EngineError> {
        let mut guard = self.tx.lock().await;
        let tx = guard.as_mut().ok_or_else(finished)?;
        let rows = build(stmt).fetch_all(&mut **tx).await?;
        rows.iter().map(decode_row).collect()
    }
}

#[async_trait]
impl EngineTransaction for PgTransaction {
    async fn commit(&self) -> Result<(), EngineError> {
        let tx = self.tx.lock().await.take().ok_or_else(finished)?;
        tx.commit().await?;
        Ok(())
    }

    async fn rollback(&self) -> Result<(), EngineError> {
        let tx = self.tx.lock().await.take().ok_or_else(finished)?;
        tx.rollback().await?;
        Ok(())
    }
}

fn build(stmt: &Statement) -> Query<'_, Postgres, PgArguments> {
    stmt.args.iter().fold(sqlx::query(&stmt.sql), |query, value| match value {
        // Statements inline NULL, but a caller-built Statement may still carry one.
        Value::Null => query.bind(None::<String>),
        Value::Bool(b) => query.bind(*b),
        Value::Int(i) => query.bind(*i),
        Value::Float(f) => query.bind(*f),
        Value::Text(s) => query.bind(s.as_str()),
        Value::Uuid(u) => query.bind(*u),
        Value::Timestamp(t) => query.bind(*t),
        Value::Json(j) => query.bind(sqlx::types::Json(j)),
    })
}

/// Convert a row into a JSON object. If a column name repeats, the first occurrence wins.
fn decode_row(row: &PgRow) -> Result<Row, EngineError> {
    let mut out = Row::new();
    for column in row.columns() {
        if out.contains_key(column.name()) {
            continue;
        }
        let value = decode_column(row, column.ordinal(), column.type_info().name())?;
        out.insert(column.name().to_string(), value);
    }
    Ok(out)
}

fn json_of<T>(row: &PgRow, idx: usize) -> Result<serde_json::Value, EngineError>
where
    T: for<'r> sqlx::Decode<'r, Postgres> + sqlx::Type<Postgres> + Serialize,
{
    match row.try_get::<Option<T>, _>(idx)? {
        Some(value) => serde_json::to_value(value).map_err(|e| EngineError::Other(e.into())),
        None => Ok(serde_json::Value::Null),
    }
}

fn decode_column(row: &PgRow, idx: usize, type_name: &str) -> Result<serde_json::Value, EngineError> {
    match type_name {
        "BOOL" => json_of::<bool>(row, idx),
        "INT2" => json_of::<i16>(row, idx),
        "INT4" => json_of::<i32>(row, idx),
        "INT8" => json_of::<i64>(row, idx),
        "FLOAT4" => json_of::<f32>(row, idx),
        "FLOAT8" => json_of::<f64>(row, idx),
        "NUMERIC" => json_of::<rust_decimal::Decimal>(row, idx),
        "TEXT" | "VARCHAR" | "BPCHAR" | "NAME" | "CITEXT" => json_of::<String>(row, idx),
        "UUID" => json_of::<uuid::Uuid>(row, idx),
        "TIMESTAMPTZ" => json_of::<chrono::DateTime<chrono::Utc>>(row, idx),
        "TIMESTAMP" => json_of::<chrono::NaiveDateTime>(row, idx),
        "DATE" => json_of::<chrono::NaiveDate>(row, idx),
        "TIME" => json_of::<chrono::NaiveTime>(row, idx),
        "JSON" | "JSONB" => json_of::<serde_json::Value>(row, idx),
        "BYTEA" => json_of::<Vec<u8>>(row, idx),
        "TEXT[]" | "VARCHAR[]" => json_of::<Vec<String>>(row, idx),
        "INT4[]" => json_of::<Vec<i32>>(row, idx),
        "INT8[]" => json_of::<Vec<i64>>(row, idx),
        "UUID[]" => json_of::<Vec<uuid::Uuid>>(row, idx),
        // Enums and other text-like types arrive as their text label.
        other => match row.try_get_unchecked::<Option<String>, _>(idx) {
            Ok(value) => Ok(value.map(serde_json::Value::String).unwrap_or_default()),
            Err(err) => {
                warn!(column = idx, type_name = other, error = %err, "Unsupported column type, returning null");
                Ok(serde_json::Value::Null)
            }
        },
    }
}

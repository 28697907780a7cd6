//! PostgreSQL executor
//!
//! Renders plans with the PostgreSQL dialect and runs them on a sqlx pool.

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use sqlx::postgres::{PgArguments, PgPool, PgRow};
use sqlx::query::Query;
use sqlx::Postgres;

use crate::error::{OrmError, OrmResult};
use crate::query::{QueryExecutor, Row, SelectPlan, WriteOp, DEFAULT_TABLE_ALIAS_LENGTH};
use crate::sql::{render_select, render_write, SqlDialect};

/// Query executor backed by a PostgreSQL connection pool
#[derive(Debug, Clone)]
pub struct PostgresExecutor {
    pool: PgPool,
}

impl PostgresExecutor {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect a new pool to `database_url`
    pub async fn connect(database_url: &str) -> OrmResult<Self> {
        let pool = PgPool::connect(database_url).await?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl QueryExecutor for PostgresExecutor {
    async fn execute_plan(&self, plan: &SelectPlan) -> OrmResult<Vec<Row>> {
        let (sql, params) = render_select(plan, SqlDialect::PostgreSQL);
        tracing::debug!("Executing {} with {} parameter(s)", sql, params.len());

        let rows = bind_all(sqlx::query(&sql), &params)?
            .fetch_all(&self.pool)
            .await
            .map_err(|e| OrmError::Database(format!("Query on {} failed: {}", plan.from.name, e)))?;

        Ok(rows.iter().map(row_to_json).collect())
    }

    async fn execute_write(&self, op: &WriteOp) -> OrmResult<u64> {
        let (sql, params) = render_write(op, SqlDialect::PostgreSQL);
        tracing::debug!("Executing {} with {} parameter(s)", sql, params.len());

        let result = bind_all(sqlx::query(&sql), &params)?
            .execute(&self.pool)
            .await
            .map_err(|e| OrmError::Database(format!("Write to {} failed: {}", op.table(), e)))?;
        Ok(result.rows_affected())
    }

    fn table_alias_length(&self) -> usize {
        DEFAULT_TABLE_ALIAS_LENGTH
    }
}

fn bind_all<'q>(
    mut query: Query<'q, Postgres, PgArguments>,
    params: &[JsonValue],
) -> OrmResult<Query<'q, Postgres, PgArguments>> {
    for param in params {
        query = match param {
            JsonValue::Null => query.bind(None::<String>),
            JsonValue::Bool(b) => query.bind(*b),
            JsonValue::Number(n) => {
                if let Some(i) = n.as_i64() {
                    query.bind(i)
                } else if let Some(f) = n.as_f64() {
                    query.bind(f)
                } else {
                    return Err(OrmError::Query(format!("Invalid number parameter {}", n)));
                }
            }
            JsonValue::String(s) => query.bind(s.clone()),
            JsonValue::Array(_) | JsonValue::Object(_) => query.bind(sqlx::types::Json(param.clone())),
        };
    }
    Ok(query)
}

/// Convert a PostgreSQL row to an ordered JSON map
fn row_to_json(row: &PgRow) -> Row {
    use sqlx::{Column, Row as _};
    let mut map = Row::new();

    for (i, column) in row.columns().iter().enumerate() {
        // Try to get the value as different PostgreSQL types
        let value = if let Ok(value) = row.try_get::<Option<String>, _>(i) {
            value.map_or(JsonValue::Null, JsonValue::String)
        } else if let Ok(value) = row.try_get::<Option<i64>, _>(i) {
            value.map_or(JsonValue::Null, |v| JsonValue::from(v))
        } else if let Ok(value) = row.try_get::<Option<i32>, _>(i) {
            value.map_or(JsonValue::Null, |v| JsonValue::from(v))
        } else if let Ok(value) = row.try_get::<Option<f64>, _>(i) {
            value.map_or(JsonValue::Null, |v| JsonValue::from(v))
        } else if let Ok(value) = row.try_get::<Option<f32>, _>(i) {
            value.map_or(JsonValue::Null, |v| JsonValue::from(v as f64))
        } else if let Ok(value) = row.try_get::<Option<bool>, _>(i) {
            value.map_or(JsonValue::Null, JsonValue::Bool)
        } else if let Ok(value) = row.try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(i) {
            value.map_or(JsonValue::Null, |v| JsonValue::String(v.to_rfc3339()))
        } else if let Ok(value) = row.try_get::<Option<uuid::Uuid>, _>(i) {
            value.map_or(JsonValue::Null, |v| JsonValue::String(v.to_string()))
        } else if let Ok(value) = row.try_get::<Option<JsonValue>, _>(i) {
            value.unwrap_or(JsonValue::Null)
        } else {
            JsonValue::Null
        };

        map.insert(column.name().to_string(), value);
    }

    map
}

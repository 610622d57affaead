//! PostgreSQL backing store.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use sqlx::PgPool;
use tracing::debug;

use super::sql::{AGGREGATE_COLUMN, SqlRenderer};
use super::store::{Aggregate, BackingStore};
use super::types::ScopeQuery;

/// Statement timeout applied to every query (default: 10s).
pub const DEFAULT_STATEMENT_TIMEOUT: &str = "10s";

/// Executes scope queries against PostgreSQL.
///
/// Each call runs inside its own transaction so `SET LOCAL statement_timeout`
/// applies to that call only.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
    statement_timeout: String,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            statement_timeout: DEFAULT_STATEMENT_TIMEOUT.to_string(),
        }
    }

    /// Override the per-statement timeout (a PostgreSQL interval such as `"2s"`).
    pub fn with_statement_timeout(mut self, timeout: impl Into<String>) -> Self {
        self.statement_timeout = timeout.into();
        self
    }

    /// Connect to `database_url` with a small pool.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .context("failed to connect to database")?;
        Ok(Self::new(pool))
    }

    async fn fetch_rows(&self, sql: &str) -> Result<Vec<Value>> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("failed to begin transaction")?;

        // SET does not accept bind parameters; keep the interval to digits and units.
        let timeout: String = self
            .statement_timeout
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect();
        sqlx::query(&format!("SET LOCAL statement_timeout = '{timeout}'"))
            .execute(&mut *tx)
            .await
            .context("failed to set statement timeout")?;

        let rows: Vec<Value> = sqlx::query_scalar(&format!("SELECT row_to_json(t) FROM ({sql}) t"))
            .fetch_all(&mut *tx)
            .await
            .context("failed to execute scope query")?;

        tx.commit()
            .await
            .context("failed to commit query transaction")?;

        Ok(rows)
    }
}

#[async_trait]
impl BackingStore for PgStore {
    async fn execute(&self, query: &ScopeQuery) -> Result<Vec<Value>> {
        let sql = SqlRenderer::new(query)
            .build()
            .with_context(|| format!("failed to render query for '{}'", query.collection))?;
        debug!(collection = %query.collection, %sql, "executing scope query");
        let mut rows = self.fetch_rows(&sql).await?;

        // json_agg yields NULL when no association row matched.
        if let Some(join) = &query.join {
            for row in &mut rows {
                if let Some(obj) = row.as_object_mut() {
                    let entry = obj.entry(join.table.clone()).or_insert(Value::Null);
                    if entry.is_null() {
                        *entry = Value::Array(Vec::new());
                    }
                }
            }
        }

        Ok(rows)
    }

    async fn calculate(
        &self,
        query: &ScopeQuery,
        attribute: &str,
        aggregate: Aggregate,
    ) -> Result<Value> {
        let sql = SqlRenderer::new(query)
            .build_aggregate(attribute, aggregate)
            .with_context(|| format!("failed to render {} of '{attribute}'", aggregate.name()))?;
        debug!(collection = %query.collection, attribute, stat = aggregate.name(), "calculating stat");
        let rows = self.fetch_rows(&sql).await?;
        Ok(rows
            .first()
            .and_then(|row| row.get(AGGREGATE_COLUMN))
            .cloned()
            .unwrap_or(Value::Null))
    }
}

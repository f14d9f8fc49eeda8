use std::time::Duration;

use chrono::{DateTime, Utc};
use parcelgate_contracts::{FilterBounds, IdentityKey, StoredFilterEntry};
use sqlx::Row;
use sqlx::postgres::PgPoolOptions;

use crate::{FilterStore, StoreError};

const CREATE_TABLE_SQL: &str = "CREATE TABLE IF NOT EXISTS parcelgate_filter_memory (\
    identity_key TEXT PRIMARY KEY, \
    filters_json JSONB NOT NULL, \
    updated_at TIMESTAMPTZ NOT NULL)";

/// Filter memory in a PostgreSQL table; row-level upserts give per-key
/// last-write-wins without any global lock.
#[derive(Clone)]
pub struct PgFilterStore {
    pool: sqlx::PgPool,
    op_timeout: Duration,
}

impl PgFilterStore {
    pub fn from_pool(pool: sqlx::PgPool, op_timeout: Duration) -> Self {
        Self { pool, op_timeout }
    }

    pub async fn connect(db_url: &str, op_timeout: Duration) -> Result<Self, StoreError> {
        let pool = tokio::time::timeout(
            Duration::from_secs(2),
            PgPoolOptions::new().max_connections(4).connect(db_url),
        )
        .await
        .map_err(|_| StoreError::Timeout)??;

        Ok(Self::from_pool(pool, op_timeout))
    }

    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        tokio::time::timeout(
            Duration::from_secs(10),
            sqlx::query(CREATE_TABLE_SQL).execute(&self.pool),
        )
        .await
        .map_err(|_| StoreError::Timeout)??;
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait::async_trait]
impl FilterStore for PgFilterStore {
    async fn load_entry(&self, key: &IdentityKey) -> Result<Option<StoredFilterEntry>, StoreError> {
        let row = tokio::time::timeout(
            self.op_timeout,
            sqlx::query(
                "SELECT filters_json, updated_at FROM parcelgate_filter_memory WHERE identity_key = $1",
            )
            .bind(key.as_str())
            .fetch_optional(&self.pool),
        )
        .await
        .map_err(|_| StoreError::Timeout)??;

        let Some(row) = row else {
            return Ok(None);
        };

        let filters_json: serde_json::Value = row.try_get("filters_json")?;
        let updated_at: DateTime<Utc> = row.try_get("updated_at")?;

        match serde_json::from_value::<FilterBounds>(filters_json) {
            Ok(filters) => Ok(Some(StoredFilterEntry {
                filters,
                updated_at,
            })),
            Err(err) => {
                tracing::warn!(error = %err, "stored filter row is malformed; ignoring");
                Ok(None)
            }
        }
    }

    async fn upsert(&self, key: &IdentityKey, entry: StoredFilterEntry) -> Result<(), StoreError> {
        let filters_json = serde_json::to_value(entry.filters)?;

        tokio::time::timeout(
            self.op_timeout,
            sqlx::query(
                "INSERT INTO parcelgate_filter_memory (identity_key, filters_json, updated_at) VALUES ($1, $2, $3) \
                 ON CONFLICT (identity_key) DO UPDATE SET filters_json = EXCLUDED.filters_json, updated_at = EXCLUDED.updated_at",
            )
            .bind(key.as_str())
            .bind(&filters_json)
            .bind(entry.updated_at)
            .execute(&self.pool),
        )
        .await
        .map_err(|_| StoreError::Timeout)??;

        Ok(())
    }
}

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::PgPool;
use tracing::info;

use waypoint_common::{Category, Location, PlaceRecord};

use super::StoredEntry;
use crate::traits::CacheStore;

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS place_cache (
    key           TEXT PRIMARY KEY,
    location_name TEXT NOT NULL,
    country       TEXT NOT NULL,
    category      TEXT NOT NULL,
    payload       JSONB NOT NULL,
    created_at    TIMESTAMPTZ NOT NULL,
    ttl_secs      BIGINT NOT NULL CHECK (ttl_secs > 0),
    access_count  BIGINT NOT NULL DEFAULT 0,
    last_accessed TIMESTAMPTZ NOT NULL
)";

#[derive(Debug, sqlx::FromRow)]
struct PlaceCacheRow {
    key: String,
    location_name: String,
    country: String,
    category: String,
    payload: Json<Vec<PlaceRecord>>,
    created_at: DateTime<Utc>,
    ttl_secs: i64,
    access_count: i64,
    last_accessed: DateTime<Utc>,
}

impl TryFrom<PlaceCacheRow> for StoredEntry {
    type Error = anyhow::Error;

    fn try_from(row: PlaceCacheRow) -> Result<Self> {
        let category: Category = row
            .category
            .parse()
            .with_context(|| format!("bad category in place_cache row {}", row.key))?;
        Ok(StoredEntry {
            key: row.key,
            location: Location::new(row.location_name, row.country),
            category,
            payload: row.payload.0,
            created_at: row.created_at,
            ttl_secs: row.ttl_secs,
            access_count: row.access_count,
            last_accessed: row.last_accessed,
        })
    }
}

/// `CacheStore` over the `place_cache` table.
pub struct PgCacheStore {
    pool: PgPool,
}

impl PgCacheStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPool::connect(database_url)
            .await
            .context("connecting to Postgres")?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create the table if it does not exist. Idempotent.
    pub async fn ensure_schema(&self) -> Result<()> {
        sqlx::query(SCHEMA).execute(&self.pool).await?;
        info!("place_cache schema ready");
        Ok(())
    }
}

#[async_trait]
impl CacheStore for PgCacheStore {
    async fn get(&self, key: &str) -> Result<Option<StoredEntry>> {
        let row = sqlx::query_as::<_, PlaceCacheRow>("SELECT * FROM place_cache WHERE key = $1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        row.map(StoredEntry::try_from).transpose()
    }

    async fn put(&self, key: &str, entry: &StoredEntry) -> Result<()> {
        sqlx::query(
            "INSERT INTO place_cache
                (key, location_name, country, category, payload, created_at, ttl_secs, access_count, last_accessed)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
             ON CONFLICT (key)
             DO UPDATE SET payload = EXCLUDED.payload,
                          created_at = EXCLUDED.created_at,
                          ttl_secs = EXCLUDED.ttl_secs,
                          access_count = EXCLUDED.access_count,
                          last_accessed = EXCLUDED.last_accessed",
        )
        .bind(key)
        .bind(&entry.location.name)
        .bind(&entry.location.country)
        .bind(entry.category.as_str())
        .bind(Json(&entry.payload))
        .bind(entry.created_at)
        .bind(entry.ttl_secs)
        .bind(entry.access_count)
        .bind(entry.last_accessed)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_by_key(&self, key: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM place_cache WHERE key = $1")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_by_prefix(&self, prefix: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM place_cache WHERE starts_with(key, $1)")
            .bind(prefix)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn list_all(&self) -> Result<Vec<StoredEntry>> {
        let rows = sqlx::query_as::<_, PlaceCacheRow>("SELECT * FROM place_cache ORDER BY key")
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(StoredEntry::try_from).collect()
    }
}

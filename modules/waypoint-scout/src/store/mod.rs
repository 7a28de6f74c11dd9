//! Durable backing for the place cache.
//!
//! `MemoryStore` keeps everything in-process; `PgCacheStore` persists to the
//! `place_cache` Postgres table.

mod postgres;

pub use postgres::PgCacheStore;

use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use waypoint_common::{Category, Location, PlaceRecord};

use crate::cache::{CacheEntry, CachedPlaces};
use crate::traits::CacheStore;

/// Serialized form of one cache entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredEntry {
    pub key: String,
    pub location: Location,
    pub category: Category,
    pub payload: Vec<PlaceRecord>,
    pub created_at: DateTime<Utc>,
    pub ttl_secs: i64,
    pub access_count: i64,
    pub last_accessed: DateTime<Utc>,
}

impl StoredEntry {
    pub fn from_cache_entry(entry: &CacheEntry<CachedPlaces>) -> Self {
        Self {
            key: entry.key.clone(),
            location: entry.payload.location.clone(),
            category: entry.payload.category,
            payload: entry.payload.records.clone(),
            created_at: entry.created_at,
            ttl_secs: entry.ttl.as_secs() as i64,
            access_count: entry.access_count as i64,
            last_accessed: entry.last_accessed,
        }
    }

    /// Rebuild the in-memory entry. `None` for rows with a non-positive TTL.
    pub fn into_cache_entry(self) -> Option<CacheEntry<CachedPlaces>> {
        if self.ttl_secs <= 0 {
            return None;
        }
        Some(CacheEntry {
            key: self.key,
            payload: CachedPlaces {
                location: self.location,
                category: self.category,
                records: self.payload,
            },
            created_at: self.created_at,
            ttl: Duration::from_secs(self.ttl_secs as u64),
            access_count: self.access_count.max(0) as u64,
            last_accessed: self.last_accessed,
        })
    }
}

// ---------------------------------------------------------------------------
// MemoryStore
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryStore {
    rows: Mutex<BTreeMap<String, StoredEntry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn rows(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, StoredEntry>> {
        self.rows.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<StoredEntry>> {
        Ok(self.rows().get(key).cloned())
    }

    async fn put(&self, key: &str, entry: &StoredEntry) -> Result<()> {
        self.rows().insert(key.to_string(), entry.clone());
        Ok(())
    }

    async fn delete_by_key(&self, key: &str) -> Result<bool> {
        Ok(self.rows().remove(key).is_some())
    }

    async fn delete_by_prefix(&self, prefix: &str) -> Result<u64> {
        let mut rows = self.rows();
        let before = rows.len();
        rows.retain(|k, _| !k.starts_with(prefix));
        Ok((before - rows.len()) as u64)
    }

    async fn list_all(&self) -> Result<Vec<StoredEntry>> {
        Ok(self.rows().values().cloned().collect())
    }
}

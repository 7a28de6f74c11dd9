//! Place cache: an in-memory `TtlCache` written through to a durable
//! `CacheStore`.
//!
//! The memory layer is authoritative during a run. Store failures are logged
//! and swallowed so a flaky database never turns a cache hit into a paid call.
//! Reads bump access bookkeeping in memory only; `persist_access_stats`
//! writes it back for the entries read since the last flush.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use waypoint_common::{cache_key, Category, Location, PlaceRecord, WaypointError};

use super::ttl::{CacheEntry, TtlCache};
use crate::store::StoredEntry;
use crate::traits::CacheStore;

/// Payload cached for one (location, category) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedPlaces {
    pub location: Location,
    pub category: Category,
    pub records: Vec<PlaceRecord>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WarmStats {
    pub loaded: usize,
    pub expired: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocationCoverage {
    pub location: Location,
    pub categories: Vec<Category>,
    pub record_count: usize,
    pub average_age_hours: f64,
}

/// Aggregate view of what the cache currently holds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoverageReport {
    pub generated_at: DateTime<Utc>,
    pub total_entries: usize,
    pub total_records: usize,
    pub average_age_hours: f64,
    pub locations: Vec<LocationCoverage>,
}

pub struct PlaceCache {
    memory: TtlCache<CachedPlaces>,
    store: Arc<dyn CacheStore>,
    /// Keys read since the last `persist_access_stats`.
    touched: Mutex<HashSet<String>>,
}

impl PlaceCache {
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        Self {
            memory: TtlCache::new(),
            store,
            touched: Mutex::new(HashSet::new()),
        }
    }

    /// Load every unexpired entry from the durable store. Expired rows are
    /// deleted from the store as they are found.
    pub async fn warm(&self) -> anyhow::Result<WarmStats> {
        self.warm_at(Utc::now()).await
    }

    pub async fn warm_at(&self, now: DateTime<Utc>) -> anyhow::Result<WarmStats> {
        let mut stats = WarmStats::default();
        for stored in self.store.list_all().await? {
            let key = stored.key.clone();
            match stored.into_cache_entry() {
                Some(entry) if !entry.is_expired(now) => {
                    self.memory.insert_entry(entry);
                    stats.loaded += 1;
                }
                _ => {
                    stats.expired += 1;
                    if let Err(e) = self.store.delete_by_key(&key).await {
                        warn!(key = key.as_str(), error = %e, "Failed to delete expired cache row");
                    }
                }
            }
        }
        info!(loaded = stats.loaded, expired = stats.expired, "Place cache warmed");
        Ok(stats)
    }

    /// Fresh entry for the pair, counted as an access.
    pub fn lookup(&self, location: &Location, category: Category) -> Option<CacheEntry<CachedPlaces>> {
        self.lookup_at(location, category, Utc::now())
    }

    pub fn lookup_at(
        &self,
        location: &Location,
        category: Category,
        now: DateTime<Utc>,
    ) -> Option<CacheEntry<CachedPlaces>> {
        let key = cache_key(location, category);
        let entry = self.memory.get_entry_at(&key, now)?;
        self.touched
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key);
        Some(entry)
    }

    /// Write access counts and last-access times of recently read entries
    /// back to the durable store. Returns how many rows were updated.
    pub async fn persist_access_stats(&self) -> usize {
        self.persist_access_stats_at(Utc::now()).await
    }

    pub async fn persist_access_stats_at(&self, now: DateTime<Utc>) -> usize {
        let keys: Vec<String> = self
            .touched
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .collect();

        let mut updated = 0;
        for key in keys {
            let Some(entry) = self.memory.peek_at(&key, now) else {
                continue;
            };
            match self.store.put(&key, &StoredEntry::from_cache_entry(&entry)).await {
                Ok(()) => updated += 1,
                Err(e) => warn!(key = key.as_str(), error = %e, "Failed to persist cache access stats"),
            }
        }
        if updated > 0 {
            debug!(updated, "Persisted cache access stats");
        }
        updated
    }

    /// Fresh entry for the pair without touching access bookkeeping.
    pub fn peek_at(
        &self,
        location: &Location,
        category: Category,
        now: DateTime<Utc>,
    ) -> Option<CacheEntry<CachedPlaces>> {
        self.memory.peek_at(&cache_key(location, category), now)
    }

    pub async fn store(
        &self,
        location: &Location,
        category: Category,
        records: Vec<PlaceRecord>,
        ttl: Duration,
    ) -> Result<(), WaypointError> {
        self.store_at(location, category, records, ttl, Utc::now()).await
    }

    pub async fn store_at(
        &self,
        location: &Location,
        category: Category,
        records: Vec<PlaceRecord>,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<(), WaypointError> {
        let key = cache_key(location, category);
        let entry = CacheEntry::new(
            key.clone(),
            CachedPlaces {
                location: location.clone(),
                category,
                records,
            },
            ttl,
            now,
        )?;
        let stored = StoredEntry::from_cache_entry(&entry);
        self.memory.insert_entry(entry);

        if let Err(e) = self.store.put(&key, &stored).await {
            warn!(key = key.as_str(), error = %e, "Durable cache write failed, keeping in-memory entry");
        } else {
            debug!(key = key.as_str(), records = stored.payload.len(), "Cached places");
        }
        Ok(())
    }

    /// Drop one pair from both layers.
    pub async fn invalidate(&self, location: &Location, category: Category) -> bool {
        let key = cache_key(location, category);
        let removed = self.memory.remove(&key);
        if let Err(e) = self.store.delete_by_key(&key).await {
            warn!(key = key.as_str(), error = %e, "Durable cache delete failed");
        }
        removed
    }

    /// Drop every category cached for `location` from both layers.
    pub async fn invalidate_location(&self, location: &Location) -> usize {
        let prefix = location.cache_prefix();
        let removed = self.memory.remove_prefix(&prefix);
        match self.store.delete_by_prefix(&prefix).await {
            Ok(n) => info!(location = %location, memory = removed, store = n, "Invalidated location"),
            Err(e) => warn!(location = %location, error = %e, "Durable prefix delete failed"),
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.memory.len()
    }

    pub fn is_empty(&self) -> bool {
        self.memory.is_empty()
    }

    pub fn coverage_report(&self) -> CoverageReport {
        self.coverage_report_at(Utc::now())
    }

    pub fn coverage_report_at(&self, now: DateTime<Utc>) -> CoverageReport {
        struct Acc {
            categories: BTreeSet<Category>,
            records: usize,
            age_hours_sum: f64,
            entries: usize,
        }

        let entries = self.memory.snapshot(now);
        let mut by_location: BTreeMap<Location, Acc> = BTreeMap::new();
        let mut total_records = 0usize;
        let mut total_age_hours = 0.0;

        for entry in &entries {
            let age_hours = age_hours(entry, now);
            total_records += entry.payload.records.len();
            total_age_hours += age_hours;

            let acc = by_location
                .entry(entry.payload.location.clone())
                .or_insert_with(|| Acc {
                    categories: BTreeSet::new(),
                    records: 0,
                    age_hours_sum: 0.0,
                    entries: 0,
                });
            acc.categories.insert(entry.payload.category);
            acc.records += entry.payload.records.len();
            acc.age_hours_sum += age_hours;
            acc.entries += 1;
        }

        let locations = by_location
            .into_iter()
            .map(|(location, acc)| LocationCoverage {
                location,
                categories: acc.categories.into_iter().collect(),
                record_count: acc.records,
                average_age_hours: acc.age_hours_sum / acc.entries as f64,
            })
            .collect();

        CoverageReport {
            generated_at: now,
            total_entries: entries.len(),
            total_records,
            average_age_hours: if entries.is_empty() {
                0.0
            } else {
                total_age_hours / entries.len() as f64
            },
            locations,
        }
    }
}

fn age_hours(entry: &CacheEntry<CachedPlaces>, now: DateTime<Utc>) -> f64 {
    entry.age(now).num_seconds().max(0) as f64 / 3600.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::testing::{records_with_ratings, rome};

    const HOUR: Duration = Duration::from_secs(3600);

    #[tokio::test]
    async fn store_writes_through_to_durable_layer() {
        let store = Arc::new(MemoryStore::new());
        let cache = PlaceCache::new(store.clone());

        cache
            .store(&rome(), Category::Restaurant, records_with_ratings(&[4.1, 4.5]), HOUR)
            .await
            .unwrap();

        let row = store.get("italy:rome:restaurant").await.unwrap().unwrap();
        assert_eq!(row.payload.len(), 2);
        assert_eq!(row.ttl_secs, 3600);
        assert!(cache.lookup(&rome(), Category::Restaurant).is_some());
    }

    #[tokio::test]
    async fn warm_skips_and_deletes_expired_rows() {
        let store = Arc::new(MemoryStore::new());
        let writer = PlaceCache::new(store.clone());
        let long_ago = Utc::now() - chrono::Duration::hours(5);
        writer
            .store_at(&rome(), Category::Hotel, records_with_ratings(&[4.0]), HOUR, long_ago)
            .await
            .unwrap();
        writer
            .store(&rome(), Category::Attraction, records_with_ratings(&[4.8]), HOUR)
            .await
            .unwrap();

        let fresh = PlaceCache::new(store.clone());
        let stats = fresh.warm().await.unwrap();
        assert_eq!(stats, WarmStats { loaded: 1, expired: 1 });
        assert!(fresh.lookup(&rome(), Category::Attraction).is_some());
        assert!(store.get("italy:rome:hotel").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn access_stats_survive_a_restart_once_persisted() {
        let store = Arc::new(MemoryStore::new());
        let cache = PlaceCache::new(store.clone());
        cache
            .store(&rome(), Category::Attraction, records_with_ratings(&[4.5]), HOUR)
            .await
            .unwrap();
        cache.lookup(&rome(), Category::Attraction);
        cache.lookup(&rome(), Category::Attraction);

        let row = store.get("italy:rome:attraction").await.unwrap().unwrap();
        assert_eq!(row.access_count, 0, "reads alone stay in memory");

        assert_eq!(cache.persist_access_stats().await, 1);
        let row = store.get("italy:rome:attraction").await.unwrap().unwrap();
        assert_eq!(row.access_count, 2);

        let restarted = PlaceCache::new(store.clone());
        restarted.warm().await.unwrap();
        let entry = restarted.peek_at(&rome(), Category::Attraction, Utc::now()).unwrap();
        assert_eq!(entry.access_count, 2);

        assert_eq!(cache.persist_access_stats().await, 0, "nothing read since last flush");
    }

    #[tokio::test]
    async fn invalidate_location_clears_every_category() {
        let store = Arc::new(MemoryStore::new());
        let cache = PlaceCache::new(store.clone());
        for category in [Category::Hotel, Category::Restaurant] {
            cache
                .store(&rome(), category, records_with_ratings(&[4.0]), HOUR)
                .await
                .unwrap();
        }

        assert_eq!(cache.invalidate_location(&rome()).await, 2);
        assert!(cache.is_empty());
        assert!(store.list_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn coverage_report_aggregates_per_location() {
        let cache = PlaceCache::new(Arc::new(MemoryStore::new()));
        let now = Utc::now();
        cache
            .store_at(
                &rome(),
                Category::Hotel,
                records_with_ratings(&[4.0, 4.2]),
                10 * HOUR,
                now - chrono::Duration::hours(2),
            )
            .await
            .unwrap();
        cache
            .store_at(
                &rome(),
                Category::Restaurant,
                records_with_ratings(&[3.9, 4.4, 4.7]),
                10 * HOUR,
                now - chrono::Duration::hours(4),
            )
            .await
            .unwrap();

        let report = cache.coverage_report_at(now);
        assert_eq!(report.total_entries, 2);
        assert_eq!(report.total_records, 5);
        assert_eq!(report.locations.len(), 1);
        let rome_cov = &report.locations[0];
        assert_eq!(rome_cov.record_count, 5);
        assert_eq!(rome_cov.categories, vec![Category::Restaurant, Category::Hotel]);
        assert!((rome_cov.average_age_hours - 3.0).abs() < 0.01);
    }
}

// Trait seams for the orchestrator's external collaborators.
//
// PlaceScraper: the paid place-data provider.
// SignalProvider: one independent source of refresh proposals.
// CacheStore: the durable store behind the place cache.
//
// Each has an in-memory implementation in `testing` (or `store`) so the
// whole run loop can be exercised without network or database.

use async_trait::async_trait;

use waypoint_common::{Category, Location, PlaceRecord, Proposal, SignalSource, WaypointError};

use crate::store::StoredEntry;

// ---------------------------------------------------------------------------
// PlaceScraper
// ---------------------------------------------------------------------------

#[async_trait]
pub trait PlaceScraper: Send + Sync {
    /// Fetch up to `max_results` places of `category` around `location`.
    async fn scrape(
        &self,
        location: &Location,
        category: Category,
        max_results: u32,
    ) -> Result<Vec<PlaceRecord>, WaypointError>;
}

// ---------------------------------------------------------------------------
// SignalProvider
// ---------------------------------------------------------------------------

#[async_trait]
pub trait SignalProvider: Send + Sync {
    /// Which signal kind this provider emits; strategies filter on it.
    fn source(&self) -> SignalSource;

    async fn proposals(&self) -> anyhow::Result<Vec<Proposal>>;
}

// ---------------------------------------------------------------------------
// CacheStore
// ---------------------------------------------------------------------------

#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> anyhow::Result<Option<StoredEntry>>;

    /// Insert or replace.
    async fn put(&self, key: &str, entry: &StoredEntry) -> anyhow::Result<()>;

    /// Returns whether a row was removed.
    async fn delete_by_key(&self, key: &str) -> anyhow::Result<bool>;

    /// Returns how many rows were removed.
    async fn delete_by_prefix(&self, prefix: &str) -> anyhow::Result<u64>;

    async fn list_all(&self) -> anyhow::Result<Vec<StoredEntry>>;
}

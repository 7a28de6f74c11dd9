//! Generic expiring key → payload store with access bookkeeping.
//!
//! Expiry is the only eviction policy: an entry read after
//! `created_at + ttl` is removed and reported as a miss.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};

use waypoint_common::WaypointError;

#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry<V> {
    pub key: String,
    pub payload: V,
    pub created_at: DateTime<Utc>,
    pub ttl: Duration,
    pub access_count: u64,
    pub last_accessed: DateTime<Utc>,
}

impl<V> CacheEntry<V> {
    /// Rejects a zero TTL.
    pub fn new(
        key: impl Into<String>,
        payload: V,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<Self, WaypointError> {
        if ttl.is_zero() {
            return Err(WaypointError::InvalidTtl);
        }
        Ok(Self {
            key: key.into(),
            payload,
            created_at: now,
            ttl,
            access_count: 0,
            last_accessed: now,
        })
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        let ttl = chrono::Duration::from_std(self.ttl)
            .unwrap_or_else(|_| chrono::Duration::days(365 * 100));
        self.created_at + ttl
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at()
    }

    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.created_at
    }

    /// Share of the TTL already used up, clamped to 0.0-1.0.
    pub fn ttl_elapsed_fraction(&self, now: DateTime<Utc>) -> f64 {
        let age_secs = self.age(now).num_milliseconds() as f64 / 1000.0;
        (age_secs / self.ttl.as_secs_f64()).clamp(0.0, 1.0)
    }
}

pub struct TtlCache<V> {
    entries: Mutex<HashMap<String, CacheEntry<V>>>,
}

impl<V: Clone> TtlCache<V> {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn get(&self, key: &str) -> Option<V> {
        self.get_at(key, Utc::now())
    }

    pub fn get_at(&self, key: &str, now: DateTime<Utc>) -> Option<V> {
        self.get_entry_at(key, now).map(|e| e.payload)
    }

    /// Read the whole entry, bumping its access bookkeeping.
    pub fn get_entry_at(&self, key: &str, now: DateTime<Utc>) -> Option<CacheEntry<V>> {
        let mut entries = self.lock();
        let expired = match entries.get_mut(key) {
            None => return None,
            Some(entry) if entry.is_expired(now) => true,
            Some(entry) => {
                entry.access_count += 1;
                entry.last_accessed = now;
                return Some(entry.clone());
            }
        };
        if expired {
            entries.remove(key);
        }
        None
    }

    /// Look at an unexpired entry without counting it as an access.
    pub fn peek_at(&self, key: &str, now: DateTime<Utc>) -> Option<CacheEntry<V>> {
        self.lock().get(key).filter(|e| !e.is_expired(now)).cloned()
    }

    /// Insert or overwrite unconditionally.
    pub fn set(&self, key: &str, value: V, ttl: Duration) -> Result<(), WaypointError> {
        self.set_at(key, value, ttl, Utc::now())
    }

    pub fn set_at(
        &self,
        key: &str,
        value: V,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<(), WaypointError> {
        let entry = CacheEntry::new(key, value, ttl, now)?;
        self.insert_entry(entry);
        Ok(())
    }

    /// Insert a pre-built entry, keeping its original timestamps.
    pub fn insert_entry(&self, entry: CacheEntry<V>) {
        self.lock().insert(entry.key.clone(), entry);
    }

    pub fn remove(&self, key: &str) -> bool {
        self.lock().remove(key).is_some()
    }

    /// Drop every key starting with `prefix`. Returns how many were removed.
    pub fn remove_prefix(&self, prefix: &str) -> usize {
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|k, _| !k.starts_with(prefix));
        before - entries.len()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|_, e| !e.is_expired(now));
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Unexpired entries, without touching access bookkeeping.
    pub fn snapshot(&self, now: DateTime<Utc>) -> Vec<CacheEntry<V>> {
        self.lock()
            .values()
            .filter(|e| !e.is_expired(now))
            .cloned()
            .collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, CacheEntry<V>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<V: Clone> Default for TtlCache<V> {
    fn default() -> Self {
        Self::new()
    }
}

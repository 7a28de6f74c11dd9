//! Built-in signal providers.
//!
//! Each one owns its own heuristic and knows nothing about the others; the
//! aggregator is the only place their scores meet. Scores are on a 0–10 scale.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use waypoint_common::{Category, Location, Proposal, SignalSource};

use crate::cache::PlaceCache;
use crate::traits::SignalProvider;

// ---------------------------------------------------------------------------
// Seasonal calendar
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeasonalRule {
    pub location: Location,
    pub category: Category,
    /// Calendar months (1–12) in which the boost applies.
    pub months: Vec<u32>,
    pub boost: f64,
}

pub struct SeasonalCalendar {
    rules: Vec<SeasonalRule>,
}

impl SeasonalCalendar {
    pub fn new(rules: Vec<SeasonalRule>) -> Self {
        Self { rules }
    }

    pub fn proposals_at(&self, now: DateTime<Utc>) -> Vec<Proposal> {
        let month = now.month();
        self.rules
            .iter()
            .filter(|r| r.months.contains(&month))
            .map(|r| {
                Proposal::new(
                    r.location.clone(),
                    r.category,
                    r.boost,
                    SignalSource::Seasonal,
                    format!("seasonal peak ({})", now.format("%B")),
                )
            })
            .collect()
    }
}

#[async_trait]
impl SignalProvider for SeasonalCalendar {
    fn source(&self) -> SignalSource {
        SignalSource::Seasonal
    }

    async fn proposals(&self) -> anyhow::Result<Vec<Proposal>> {
        Ok(self.proposals_at(Utc::now()))
    }
}

// ---------------------------------------------------------------------------
// Event calendar
// ---------------------------------------------------------------------------

pub const DEFAULT_EVENT_LOOKAHEAD_DAYS: i64 = 30;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpcomingEvent {
    pub location: Location,
    pub category: Category,
    pub name: String,
    pub starts_on: NaiveDate,
    /// Score on the day the event starts.
    pub weight: f64,
}

pub struct EventCalendar {
    events: Vec<UpcomingEvent>,
    lookahead_days: i64,
}

impl EventCalendar {
    pub fn new(events: Vec<UpcomingEvent>) -> Self {
        Self {
            events,
            lookahead_days: DEFAULT_EVENT_LOOKAHEAD_DAYS,
        }
    }

    pub fn with_lookahead_days(mut self, days: i64) -> Self {
        self.lookahead_days = days.max(1);
        self
    }

    /// Events inside the lookahead window score `weight × (1 − days_until / lookahead)`.
    pub fn proposals_at(&self, now: DateTime<Utc>) -> Vec<Proposal> {
        let today = now.date_naive();
        self.events
            .iter()
            .filter_map(|event| {
                let days_until = (event.starts_on - today).num_days();
                if days_until < 0 || days_until > self.lookahead_days {
                    return None;
                }
                let closeness = 1.0 - days_until as f64 / self.lookahead_days as f64;
                Some(Proposal::new(
                    event.location.clone(),
                    event.category,
                    event.weight * closeness,
                    SignalSource::Event,
                    format!("{} in {days_until} days", event.name),
                ))
            })
            .collect()
    }
}

#[async_trait]
impl SignalProvider for EventCalendar {
    fn source(&self) -> SignalSource {
        SignalSource::Event
    }

    async fn proposals(&self) -> anyhow::Result<Vec<Proposal>> {
        Ok(self.proposals_at(Utc::now()))
    }
}

// ---------------------------------------------------------------------------
// Cache staleness gaps
// ---------------------------------------------------------------------------

const GAP_MISSING_SCORE: f64 = 10.0;
const GAP_STALE_FRACTION: f64 = 0.75;
const GAP_STALE_MIN_SCORE: f64 = 6.0;
const GAP_STALE_MAX_SCORE: f64 = 9.0;

/// Proposes watched pairs that are missing from the cache or near expiry.
pub struct StalenessGapSignal {
    cache: Arc<PlaceCache>,
    watched: Vec<(Location, Category)>,
}

impl StalenessGapSignal {
    pub fn new(cache: Arc<PlaceCache>, watched: Vec<(Location, Category)>) -> Self {
        Self { cache, watched }
    }

    pub fn proposals_at(&self, now: DateTime<Utc>) -> Vec<Proposal> {
        self.watched
            .iter()
            .filter_map(|(location, category)| match self.cache.peek_at(location, *category, now) {
                None => Some(Proposal::new(
                    location.clone(),
                    *category,
                    GAP_MISSING_SCORE,
                    SignalSource::Gap,
                    "missing from cache",
                )),
                Some(entry) => {
                    let fraction = entry.ttl_elapsed_fraction(now);
                    if fraction < GAP_STALE_FRACTION {
                        return None;
                    }
                    let t = ((fraction - GAP_STALE_FRACTION) / (1.0 - GAP_STALE_FRACTION)).clamp(0.0, 1.0);
                    Some(Proposal::new(
                        location.clone(),
                        *category,
                        GAP_STALE_MIN_SCORE + t * (GAP_STALE_MAX_SCORE - GAP_STALE_MIN_SCORE),
                        SignalSource::Gap,
                        format!("cache {:.0}% through ttl", fraction * 100.0),
                    ))
                }
            })
            .collect()
    }
}

#[async_trait]
impl SignalProvider for StalenessGapSignal {
    fn source(&self) -> SignalSource {
        SignalSource::Gap
    }

    async fn proposals(&self) -> anyhow::Result<Vec<Proposal>> {
        Ok(self.proposals_at(Utc::now()))
    }
}

// ---------------------------------------------------------------------------
// User demand
// ---------------------------------------------------------------------------

/// Rolling log of what users asked the application for.
pub struct DemandTracker {
    window: chrono::Duration,
    requests: Mutex<Vec<(DateTime<Utc>, Location, Category)>>,
}

impl DemandTracker {
    pub fn new(window: chrono::Duration) -> Self {
        Self {
            window,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn record_request(&self, location: Location, category: Category) {
        self.record_request_at(location, category, Utc::now());
    }

    /// Requests that fell out of the window are dropped on every write.
    pub fn record_request_at(&self, location: Location, category: Category, at: DateTime<Utc>) {
        let cutoff = at - self.window;
        let mut requests = self.requests.lock().unwrap_or_else(PoisonError::into_inner);
        requests.retain(|(seen, _, _)| *seen >= cutoff);
        requests.push((at, location, category));
    }

    /// Requests currently held inside the window.
    pub fn tracked_requests(&self) -> usize {
        self.requests.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Score is `10 × count / max_count` over requests inside the window.
    /// Requests older than the window are pruned.
    pub fn proposals_at(&self, now: DateTime<Utc>) -> Vec<Proposal> {
        let cutoff = now - self.window;
        let mut requests = self.requests.lock().unwrap_or_else(PoisonError::into_inner);
        requests.retain(|(at, _, _)| *at >= cutoff);

        let mut counts: HashMap<(Location, Category), u32> = HashMap::new();
        for (at, location, category) in requests.iter() {
            if *at <= now {
                *counts.entry((location.clone(), *category)).or_default() += 1;
            }
        }
        let Some(max) = counts.values().copied().max() else {
            return Vec::new();
        };

        counts
            .into_iter()
            .map(|((location, category), count)| {
                Proposal::new(
                    location,
                    category,
                    10.0 * f64::from(count) / f64::from(max),
                    SignalSource::UserDemand,
                    format!("{count} recent requests"),
                )
            })
            .collect()
    }
}

#[async_trait]
impl SignalProvider for DemandTracker {
    fn source(&self) -> SignalSource {
        SignalSource::UserDemand
    }

    async fn proposals(&self) -> anyhow::Result<Vec<Proposal>> {
        Ok(self.proposals_at(Utc::now()))
    }
}

// ---------------------------------------------------------------------------
// Injected proposals
// ---------------------------------------------------------------------------

/// Proposals handed in from outside, e.g. an external model's
/// next-destination predictions. Replaced wholesale on each update.
pub struct FixedSignals {
    source: SignalSource,
    proposals: Mutex<Vec<Proposal>>,
}

impl FixedSignals {
    pub fn new(source: SignalSource, proposals: Vec<Proposal>) -> Self {
        Self {
            source,
            proposals: Mutex::new(proposals),
        }
    }

    pub fn replace(&self, proposals: Vec<Proposal>) {
        *self.proposals.lock().unwrap_or_else(PoisonError::into_inner) = proposals;
    }
}

#[async_trait]
impl SignalProvider for FixedSignals {
    fn source(&self) -> SignalSource {
        self.source
    }

    async fn proposals(&self) -> anyhow::Result<Vec<Proposal>> {
        Ok(self.proposals.lock().unwrap_or_else(PoisonError::into_inner).clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::testing::{records_with_ratings, rome};
    use chrono::TimeZone;
    use std::time::Duration;

    fn at(month: u32, day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, month, day, 12, 0, 0).unwrap()
    }

    #[test]
    fn seasonal_rules_apply_only_in_their_months() {
        let calendar = SeasonalCalendar::new(vec![SeasonalRule {
            location: rome(),
            category: Category::Attraction,
            months: vec![6, 7, 8],
            boost: 7.5,
        }]);
        assert_eq!(calendar.proposals_at(at(7, 1)).len(), 1);
        assert_eq!(calendar.proposals_at(at(7, 1))[0].score, 7.5);
        assert!(calendar.proposals_at(at(12, 1)).is_empty());
    }

    #[test]
    fn events_score_higher_as_they_approach() {
        let calendar = EventCalendar::new(vec![UpcomingEvent {
            location: rome(),
            category: Category::Hotel,
            name: "Rome Marathon".into(),
            starts_on: NaiveDate::from_ymd_opt(2025, 3, 31).unwrap(),
            weight: 9.0,
        }]);

        let far = calendar.proposals_at(at(3, 16));
        let near = calendar.proposals_at(at(3, 30));
        assert_eq!(far.len(), 1);
        assert!(near[0].score > far[0].score);
        assert!((far[0].score - 4.5).abs() < 1e-9);
        assert_eq!(near[0].reason, "Rome Marathon in 1 days");

        assert!(calendar.proposals_at(at(4, 2)).is_empty(), "past events are ignored");
        assert!(calendar.proposals_at(at(1, 2)).is_empty(), "outside lookahead");
    }

    #[tokio::test]
    async fn gap_signal_flags_missing_and_near_expiry() {
        let cache = Arc::new(PlaceCache::new(Arc::new(MemoryStore::new())));
        let now = Utc::now();
        let ttl = Duration::from_secs(100 * 3600);
        cache
            .store_at(&rome(), Category::Hotel, records_with_ratings(&[4.0]), ttl, now - chrono::Duration::hours(90))
            .await
            .unwrap();
        cache
            .store_at(&rome(), Category::Restaurant, records_with_ratings(&[4.0]), ttl, now - chrono::Duration::hours(10))
            .await
            .unwrap();

        let signal = StalenessGapSignal::new(
            cache,
            vec![
                (rome(), Category::Hotel),
                (rome(), Category::Restaurant),
                (rome(), Category::Nightlife),
            ],
        );
        let mut proposals = signal.proposals_at(now);
        proposals.sort_by(|a, b| a.category.cmp(&b.category));

        assert_eq!(proposals.len(), 2);
        assert_eq!(proposals[0].category, Category::Hotel);
        assert!(proposals[0].score >= 6.0 && proposals[0].score <= 9.0);
        assert_eq!(proposals[1].category, Category::Nightlife);
        assert_eq!(proposals[1].score, 10.0);
    }

    #[test]
    fn demand_scores_relative_to_busiest_pair() {
        let tracker = DemandTracker::new(chrono::Duration::days(7));
        let now = at(5, 20);
        for _ in 0..4 {
            tracker.record_request_at(rome(), Category::Restaurant, now - chrono::Duration::days(1));
        }
        tracker.record_request_at(rome(), Category::Nightlife, now);
        tracker.record_request_at(rome(), Category::Shopping, now - chrono::Duration::days(30));

        let mut proposals = tracker.proposals_at(now);
        proposals.sort_by(|a, b| b.score.total_cmp(&a.score));
        assert_eq!(proposals.len(), 2);
        assert_eq!(proposals[0].score, 10.0);
        assert_eq!(proposals[1].score, 2.5);
    }

    #[test]
    fn recording_prunes_requests_outside_the_window() {
        let tracker = DemandTracker::new(chrono::Duration::days(7));
        let start = at(5, 1);
        for day in 0..30 {
            tracker.record_request_at(rome(), Category::Hotel, start + chrono::Duration::days(day));
        }
        // Days 22..=29 are within a week of the last write.
        assert_eq!(tracker.tracked_requests(), 8);
    }

    #[tokio::test]
    async fn fixed_signals_can_be_replaced() {
        let signals = FixedSignals::new(SignalSource::Ml, Vec::new());
        assert!(signals.proposals().await.unwrap().is_empty());
        signals.replace(vec![Proposal::new(rome(), Category::Activity, 8.0, SignalSource::Ml, "predicted")]);
        assert_eq!(signals.proposals().await.unwrap().len(), 1);
    }
}

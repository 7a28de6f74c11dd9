// Test mocks and fixtures for the orchestrator.
//
// Mocks matching the trait boundaries:
// - MockScraper (PlaceScraper): per-key canned records, call log, scripted failures
// - FailingSignals (SignalProvider): always errors
// (CacheStore is covered by store::MemoryStore, SignalProvider by FixedSignals.)
//
// Plus helpers for constructing locations, records, tasks and a wired-up
// orchestrator.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::bail;
use async_trait::async_trait;
use tokio::time::Instant;

use waypoint_common::config::{BudgetConfig, OrchestratorConfig, ResilienceConfig};
use waypoint_common::{
    cache_key, Category, GeoPoint, Location, PlaceRecord, Proposal, SignalSource, Task,
    WaypointError,
};

use crate::cache::PlaceCache;
use crate::geo::GeoClusterer;
use crate::orchestrator::ScrapeOrchestrator;
use crate::resilience::{CircuitBreakerRegistry, RetryExecutor, RetryPolicy};
use crate::scheduling::{BudgetMonitor, PrioritySignalAggregator, UsageAnalytics};
use crate::store::MemoryStore;
use crate::traits::{PlaceScraper, SignalProvider};

// ---------------------------------------------------------------------------
// Test constants
// ---------------------------------------------------------------------------

/// Rome, Italy coordinates.
pub const ROME: (f64, f64) = (41.9028, 12.4964);
/// Tivoli, Italy coordinates (~26 km from Rome).
pub const TIVOLI: (f64, f64) = (41.9632, 12.7980);
/// Florence, Italy coordinates.
pub const FLORENCE: (f64, f64) = (43.7696, 11.2558);
/// Pisa, Italy coordinates (~70 km from Florence).
pub const PISA: (f64, f64) = (43.7228, 10.4017);
/// Paris, France coordinates.
pub const PARIS: (f64, f64) = (48.8566, 2.3522);

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

pub fn rome() -> Location {
    Location::new("Rome", "Italy")
}

pub fn italy_points() -> Vec<(Location, GeoPoint)> {
    vec![
        (rome(), GeoPoint::new(ROME.0, ROME.1)),
        (Location::new("Tivoli", "Italy"), GeoPoint::new(TIVOLI.0, TIVOLI.1)),
        (Location::new("Florence", "Italy"), GeoPoint::new(FLORENCE.0, FLORENCE.1)),
        (Location::new("Pisa", "Italy"), GeoPoint::new(PISA.0, PISA.1)),
    ]
}

/// A complete, valid record near Rome.
pub fn place(name: &str, rating: f64) -> PlaceRecord {
    PlaceRecord {
        name: Some(name.to_string()),
        coordinates: Some(GeoPoint::new(ROME.0, ROME.1)),
        rating: Some(rating),
        category: Some("Restaurant".to_string()),
        raw_attributes: serde_json::json!({}),
    }
}

/// One valid record per rating, named "Place 1", "Place 2", ...
pub fn records_with_ratings(ratings: &[f64]) -> Vec<PlaceRecord> {
    ratings
        .iter()
        .enumerate()
        .map(|(i, r)| place(&format!("Place {}", i + 1), *r))
        .collect()
}

/// A record set that passes the quality gate with full marks.
pub fn good_records() -> Vec<PlaceRecord> {
    records_with_ratings(&[3.8, 4.0, 4.2, 4.4, 4.6, 4.8])
}

pub fn task(name: &str, country: &str, category: Category, score: f64) -> Task {
    Task {
        location: Location::new(name, country),
        category,
        priority_score: score,
        source: SignalSource::Gap,
        reasons: BTreeSet::from(["test".to_string()]),
    }
}

pub fn proposal(location: Location, category: Category, score: f64) -> Proposal {
    Proposal::new(location, category, score, SignalSource::Gap, "test")
}

// ---------------------------------------------------------------------------
// MockScraper
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
pub enum MockFailure {
    Transient,
    Validation,
    /// Sleep past any sane attempt timeout.
    Hang,
}

/// Key-based place scraper. Unregistered keys return the default records
/// (empty unless set). Builder pattern: `.on()`, `.with_default()`,
/// `.fail_first()`, `.always_fail()`, `.with_delay()`, `.delay_on()`.
pub struct MockScraper {
    responses: HashMap<String, Vec<PlaceRecord>>,
    default: Vec<PlaceRecord>,
    fail_first: AtomicU32,
    always: Option<MockFailure>,
    delay: Option<Duration>,
    key_delays: HashMap<String, Duration>,
    calls: AtomicU32,
    created: Instant,
    call_log: Mutex<Vec<(String, Instant)>>,
}

impl MockScraper {
    pub fn new() -> Self {
        Self {
            responses: HashMap::new(),
            default: Vec::new(),
            fail_first: AtomicU32::new(0),
            always: None,
            delay: None,
            key_delays: HashMap::new(),
            calls: AtomicU32::new(0),
            created: Instant::now(),
            call_log: Mutex::new(Vec::new()),
        }
    }

    pub fn on(mut self, location: &Location, category: Category, records: Vec<PlaceRecord>) -> Self {
        self.responses.insert(cache_key(location, category), records);
        self
    }

    pub fn with_default(mut self, records: Vec<PlaceRecord>) -> Self {
        self.default = records;
        self
    }

    /// The first `n` calls fail transiently, later ones succeed.
    pub fn fail_first(self, n: u32) -> Self {
        self.fail_first.store(n, Ordering::SeqCst);
        self
    }

    pub fn always_fail(mut self, failure: MockFailure) -> Self {
        self.always = Some(failure);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Delay for one key only; overrides `with_delay` for that key.
    pub fn delay_on(mut self, location: &Location, category: Category, delay: Duration) -> Self {
        self.key_delays.insert(cache_key(location, category), delay);
        self
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Cache keys in call order.
    pub fn call_log(&self) -> Vec<String> {
        self.call_log
            .lock()
            .unwrap()
            .iter()
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// When each call started, relative to the mock's construction.
    pub fn call_starts(&self) -> Vec<(String, Duration)> {
        self.call_log
            .lock()
            .unwrap()
            .iter()
            .map(|(key, at)| (key.clone(), at.duration_since(self.created)))
            .collect()
    }
}

impl Default for MockScraper {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PlaceScraper for MockScraper {
    async fn scrape(
        &self,
        location: &Location,
        category: Category,
        _max_results: u32,
    ) -> Result<Vec<PlaceRecord>, WaypointError> {
        let key = cache_key(location, category);
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.call_log.lock().unwrap().push((key.clone(), Instant::now()));

        if let Some(delay) = self.key_delays.get(&key).copied().or(self.delay) {
            tokio::time::sleep(delay).await;
        }

        match self.always {
            Some(MockFailure::Transient) => {
                return Err(WaypointError::TransientCall(format!("mock outage for {key}")))
            }
            Some(MockFailure::Validation) => {
                return Err(WaypointError::Validation(format!("mock rejected {key}")))
            }
            Some(MockFailure::Hang) => {
                tokio::time::sleep(Duration::from_secs(24 * 3600)).await;
            }
            None => {}
        }

        let failed = self
            .fail_first
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(WaypointError::TransientCall(format!("mock blip for {key}")));
        }

        Ok(self
            .responses
            .get(&key)
            .cloned()
            .unwrap_or_else(|| self.default.clone()))
    }
}

// ---------------------------------------------------------------------------
// FailingSignals
// ---------------------------------------------------------------------------

/// Signal provider whose backend is down.
pub struct FailingSignals(pub SignalSource);

#[async_trait]
impl SignalProvider for FailingSignals {
    fn source(&self) -> SignalSource {
        self.0
    }

    async fn proposals(&self) -> anyhow::Result<Vec<Proposal>> {
        bail!("{} signal backend unavailable", self.0)
    }
}

// ---------------------------------------------------------------------------
// Orchestrator harness
// ---------------------------------------------------------------------------

/// Fast resilience settings for tests: short backoff, low breaker threshold.
pub fn test_resilience() -> ResilienceConfig {
    ResilienceConfig {
        failure_threshold: 3,
        recovery_timeout: Duration::from_secs(60),
        max_retries: 2,
        base_delay: Duration::from_millis(10),
        max_delay: Duration::from_millis(20),
        backoff_factor: 2.0,
        attempt_timeout: Duration::from_secs(5),
    }
}

/// Everything an orchestrator test needs to poke at after a run.
pub struct Harness {
    pub orchestrator: ScrapeOrchestrator,
    pub scraper: Arc<MockScraper>,
    pub cache: Arc<PlaceCache>,
    pub store: Arc<MemoryStore>,
    pub analytics: Arc<UsageAnalytics>,
}

pub struct HarnessBuilder {
    scraper: MockScraper,
    providers: Vec<Arc<dyn SignalProvider>>,
    budget: BudgetConfig,
    resilience: ResilienceConfig,
    orchestrator: OrchestratorConfig,
    points: Vec<(Location, GeoPoint)>,
}

impl HarnessBuilder {
    pub fn new(scraper: MockScraper) -> Self {
        Self {
            scraper,
            providers: Vec::new(),
            budget: BudgetConfig::default(),
            resilience: test_resilience(),
            orchestrator: OrchestratorConfig::default(),
            points: italy_points(),
        }
    }

    pub fn provider(mut self, provider: Arc<dyn SignalProvider>) -> Self {
        self.providers.push(provider);
        self
    }

    pub fn budget(mut self, budget: BudgetConfig) -> Self {
        self.budget = budget;
        self
    }

    pub fn resilience(mut self, resilience: ResilienceConfig) -> Self {
        self.resilience = resilience;
        self
    }

    pub fn orchestrator(mut self, config: OrchestratorConfig) -> Self {
        self.orchestrator = config;
        self
    }

    pub fn build(self) -> Harness {
        let scraper = Arc::new(self.scraper);
        let store = Arc::new(MemoryStore::new());
        let cache = Arc::new(PlaceCache::new(store.clone()));
        let analytics = Arc::new(UsageAnalytics::new(
            self.budget.monthly_budget,
            self.budget.cost_per_call,
        ));
        let executor = RetryExecutor::new(
            Arc::new(CircuitBreakerRegistry::from_config(&self.resilience)),
            RetryPolicy::from(&self.resilience),
        );

        let orchestrator = ScrapeOrchestrator::builder()
            .scraper(scraper.clone())
            .cache(cache.clone())
            .aggregator(PrioritySignalAggregator::new(self.providers))
            .analytics(analytics.clone())
            .run_budget(self.budget.run_budget)
            .budget(BudgetMonitor::new(self.budget))
            .executor(executor)
            .clusterer(GeoClusterer::new(self.points))
            .config(self.orchestrator)
            .build();

        Harness {
            orchestrator,
            scraper,
            cache,
            store,
            analytics,
        }
    }
}

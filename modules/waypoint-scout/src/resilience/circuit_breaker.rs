//! Per-service circuit breaker.
//!
//! Closed → Open after `failure_threshold` consecutive failures.
//! Open → HalfOpen once `recovery_timeout` has passed since the last failure,
//! admitting exactly one trial call. Trial success closes the breaker; trial
//! failure reopens it with a fresh failure timestamp.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;
use tracing::{info, warn};

use waypoint_common::config::ResilienceConfig;
use waypoint_common::WaypointError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, Serialize)]
pub struct BreakerSnapshot {
    pub service: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub seconds_since_last_failure: Option<f64>,
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    failure_count: u32,
    last_failure_time: Option<Instant>,
    trial_in_flight: bool,
}

pub struct CircuitBreaker {
    name: String,
    failure_threshold: u32,
    recovery_timeout: Duration,
    inner: Mutex<BreakerState>,
}

/// Admission ticket for one wrapped call. A trial permit dropped before its
/// outcome is recorded (the caller was cancelled) counts as a failed trial,
/// so the breaker never sticks in HalfOpen.
struct Permit<'a> {
    breaker: &'a CircuitBreaker,
    trial: bool,
    settled: bool,
}

impl Permit<'_> {
    fn succeed(mut self) {
        self.settled = true;
        self.breaker.on_success();
    }

    fn fail(mut self) {
        self.settled = true;
        self.breaker.on_failure();
    }
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        if self.trial && !self.settled {
            self.breaker.on_failure();
        }
    }
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, failure_threshold: u32, recovery_timeout: Duration) -> Self {
        Self {
            name: name.into(),
            failure_threshold: failure_threshold.max(1),
            recovery_timeout,
            inner: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                failure_count: 0,
                last_failure_time: None,
                trial_in_flight: false,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current state. An Open breaker whose recovery timeout has elapsed
    /// reports HalfOpen even before the trial call arrives.
    pub fn state(&self) -> CircuitState {
        let inner = self.lock();
        match inner.state {
            CircuitState::Open if self.recovery_elapsed(&inner) => CircuitState::HalfOpen,
            state => state,
        }
    }

    pub fn is_open(&self) -> bool {
        self.state() == CircuitState::Open
    }

    pub fn failure_count(&self) -> u32 {
        self.lock().failure_count
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let (failure_count, last_failure) = {
            let inner = self.lock();
            (inner.failure_count, inner.last_failure_time)
        };
        BreakerSnapshot {
            service: self.name.clone(),
            state: self.state(),
            failure_count,
            seconds_since_last_failure: last_failure.map(|t| t.elapsed().as_secs_f64()),
        }
    }

    /// Run `f` through the breaker. While Open the closure is never invoked
    /// and `CircuitOpen` is returned immediately.
    ///
    /// Only retryable errors (transient failures, timeouts) count against the
    /// breaker; a provider that answers with a client error is still up.
    pub async fn call<F, Fut, T>(&self, f: F) -> Result<T, WaypointError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, WaypointError>>,
    {
        let permit = self.try_acquire()?;
        match f().await {
            Ok(value) => {
                permit.succeed();
                Ok(value)
            }
            Err(e) if e.is_retryable() => {
                permit.fail();
                Err(e)
            }
            Err(e) => {
                permit.succeed();
                Err(e)
            }
        }
    }

    fn try_acquire(&self) -> Result<Permit<'_>, WaypointError> {
        let mut inner = self.lock();
        let trial = match inner.state {
            CircuitState::Closed => false,
            CircuitState::Open => {
                if !self.recovery_elapsed(&inner) {
                    return Err(self.open_error());
                }
                inner.state = CircuitState::HalfOpen;
                inner.trial_in_flight = true;
                info!(service = self.name.as_str(), "Circuit half-open, admitting trial call");
                true
            }
            CircuitState::HalfOpen => {
                if inner.trial_in_flight {
                    return Err(self.open_error());
                }
                inner.trial_in_flight = true;
                true
            }
        };
        Ok(Permit {
            breaker: self,
            trial,
            settled: false,
        })
    }

    fn on_success(&self) {
        let mut inner = self.lock();
        if inner.state != CircuitState::Closed {
            info!(service = self.name.as_str(), "Circuit closed after successful trial");
        }
        inner.state = CircuitState::Closed;
        inner.failure_count = 0;
        inner.trial_in_flight = false;
    }

    fn on_failure(&self) {
        let mut inner = self.lock();
        inner.failure_count += 1;
        inner.last_failure_time = Some(Instant::now());
        match inner.state {
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Open;
                inner.trial_in_flight = false;
                warn!(service = self.name.as_str(), "Trial call failed, circuit reopened");
            }
            CircuitState::Closed if inner.failure_count >= self.failure_threshold => {
                inner.state = CircuitState::Open;
                warn!(
                    service = self.name.as_str(),
                    failures = inner.failure_count,
                    recovery_secs = self.recovery_timeout.as_secs(),
                    "Circuit opened"
                );
            }
            _ => {}
        }
    }

    fn recovery_elapsed(&self, inner: &BreakerState) -> bool {
        inner
            .last_failure_time
            .map_or(true, |t| t.elapsed() >= self.recovery_timeout)
    }

    fn open_error(&self) -> WaypointError {
        WaypointError::CircuitOpen {
            service: self.name.clone(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BreakerState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// One shared breaker per external service name.
pub struct CircuitBreakerRegistry {
    failure_threshold: u32,
    recovery_timeout: Duration,
    breakers: Mutex<HashMap<String, Arc<CircuitBreaker>>>,
}

impl CircuitBreakerRegistry {
    pub fn new(failure_threshold: u32, recovery_timeout: Duration) -> Self {
        Self {
            failure_threshold,
            recovery_timeout,
            breakers: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_config(config: &ResilienceConfig) -> Self {
        Self::new(config.failure_threshold, config.recovery_timeout)
    }

    /// The breaker for `service`, created on first use.
    pub fn get(&self, service: &str) -> Arc<CircuitBreaker> {
        let mut breakers = self.breakers.lock().unwrap_or_else(PoisonError::into_inner);
        breakers
            .entry(service.to_string())
            .or_insert_with(|| {
                Arc::new(CircuitBreaker::new(
                    service,
                    self.failure_threshold,
                    self.recovery_timeout,
                ))
            })
            .clone()
    }

    pub fn snapshots(&self) -> Vec<BreakerSnapshot> {
        let breakers: Vec<Arc<CircuitBreaker>> = self
            .breakers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        let mut snapshots: Vec<_> = breakers.iter().map(|b| b.snapshot()).collect();
        snapshots.sort_by(|a, b| a.service.cmp(&b.service));
        snapshots
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn transient() -> WaypointError {
        WaypointError::TransientCall("503 from provider".into())
    }

    async fn failing_call(breaker: &CircuitBreaker, calls: &AtomicU32) -> Result<(), WaypointError> {
        breaker
            .call(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(transient())
            })
            .await
    }

    #[tokio::test(start_paused = true)]
    async fn opens_after_threshold_and_stops_invoking() {
        let breaker = CircuitBreaker::new("places", 3, Duration::from_secs(60));
        let calls = AtomicU32::new(0);

        for _ in 0..3 {
            let _ = failing_call(&breaker, &calls).await;
        }
        assert_eq!(breaker.state(), CircuitState::Open);
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        // Inside the open window the wrapped call never runs.
        for _ in 0..10 {
            let err = failing_call(&breaker, &calls).await.unwrap_err();
            assert!(matches!(err, WaypointError::CircuitOpen { .. }));
            tokio::time::advance(Duration::from_secs(5)).await;
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn success_resets_failure_count() {
        let breaker = CircuitBreaker::new("places", 3, Duration::from_secs(60));
        let calls = AtomicU32::new(0);

        let _ = failing_call(&breaker, &calls).await;
        let _ = failing_call(&breaker, &calls).await;
        breaker.call(|| async { Ok(()) }).await.unwrap();
        assert_eq!(breaker.failure_count(), 0);

        let _ = failing_call(&breaker, &calls).await;
        let _ = failing_call(&breaker, &calls).await;
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn half_open_trial_success_closes() {
        let breaker = CircuitBreaker::new("places", 1, Duration::from_secs(30));
        let calls = AtomicU32::new(0);
        let _ = failing_call(&breaker, &calls).await;
        assert_eq!(breaker.state(), CircuitState::Open);

        tokio::time::advance(Duration::from_secs(30)).await;
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        breaker.call(|| async { Ok(()) }).await.unwrap();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.failure_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn half_open_trial_failure_reopens_with_fresh_timer() {
        let breaker = CircuitBreaker::new("places", 1, Duration::from_secs(30));
        let calls = AtomicU32::new(0);
        let _ = failing_call(&breaker, &calls).await;

        tokio::time::advance(Duration::from_secs(31)).await;
        let _ = failing_call(&breaker, &calls).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(breaker.state(), CircuitState::Open);

        tokio::time::advance(Duration::from_secs(10)).await;
        assert!(failing_call(&breaker, &calls).await.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 2, "still inside the new open window");
    }

    #[tokio::test(start_paused = true)]
    async fn half_open_admits_exactly_one_trial() {
        let breaker = Arc::new(CircuitBreaker::new("places", 1, Duration::from_secs(30)));
        let calls = Arc::new(AtomicU32::new(0));
        let _ = failing_call(&breaker, &calls).await;
        tokio::time::advance(Duration::from_secs(30)).await;

        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
        let trial = {
            let breaker = breaker.clone();
            let calls = calls.clone();
            tokio::spawn(async move {
                breaker
                    .call(|| async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        let _ = release_rx.await;
                        Ok(())
                    })
                    .await
            })
        };
        tokio::task::yield_now().await;

        // A second caller during the trial is rejected without invoking.
        let second = failing_call(&breaker, &calls).await;
        assert!(matches!(second, Err(WaypointError::CircuitOpen { .. })));

        release_tx.send(()).unwrap();
        trial.await.unwrap().unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn client_errors_do_not_trip_the_breaker() {
        let breaker = CircuitBreaker::new("places", 2, Duration::from_secs(30));
        for _ in 0..5 {
            let _ = breaker
                .call(|| async { Err::<(), _>(WaypointError::Validation("bad query".into())) })
                .await;
        }
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[test]
    fn registry_shares_one_breaker_per_service() {
        let registry = CircuitBreakerRegistry::new(3, Duration::from_secs(60));
        let a = registry.get("places");
        let b = registry.get("places");
        let c = registry.get("geocoder");
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));

        let names: Vec<_> = registry.snapshots().into_iter().map(|s| s.service).collect();
        assert_eq!(names, vec!["geocoder", "places"]);
    }
}

//! Bounded exponential-backoff retries around breaker-protected calls.
//!
//! Every attempt runs through the service's shared `CircuitBreaker` and under
//! a per-attempt timeout. The executor never returns an error: exhausted
//! calls yield either the caller's fallback or a `FailurePayload` tagged with
//! the service name.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, warn};

use waypoint_common::config::ResilienceConfig;
use waypoint_common::WaypointError;

use super::circuit_breaker::CircuitBreakerRegistry;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub backoff_factor: f64,
    pub attempt_timeout: Duration,
}

impl From<&ResilienceConfig> for RetryPolicy {
    fn from(config: &ResilienceConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: config.base_delay,
            max_delay: config.max_delay,
            backoff_factor: config.backoff_factor,
            attempt_timeout: config.attempt_timeout,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&ResilienceConfig::default())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackReason {
    Error,
    Timeout,
    CircuitOpen,
}

/// Default failure payload produced when a call is exhausted.
#[derive(Debug, Clone, Serialize)]
pub struct FailurePayload {
    pub service: String,
    pub reason: FallbackReason,
    pub error: String,
    pub attempts: u32,
    pub at: DateTime<Utc>,
}

#[derive(Debug)]
pub enum CallOutcome<T> {
    Success(T),
    /// The call failed and the caller-supplied fallback was returned.
    Fallback { value: T, failure: FailurePayload },
    /// The call failed and no fallback was supplied.
    Unavailable(FailurePayload),
}

impl<T> CallOutcome<T> {
    pub fn is_success(&self) -> bool {
        matches!(self, CallOutcome::Success(_))
    }

    /// Success or fallback value; the failure payload otherwise.
    pub fn into_result(self) -> Result<T, FailurePayload> {
        match self {
            CallOutcome::Success(value) | CallOutcome::Fallback { value, .. } => Ok(value),
            CallOutcome::Unavailable(failure) => Err(failure),
        }
    }
}

pub struct RetryExecutor {
    breakers: Arc<CircuitBreakerRegistry>,
    policy: RetryPolicy,
}

impl RetryExecutor {
    pub fn new(breakers: Arc<CircuitBreakerRegistry>, policy: RetryPolicy) -> Self {
        Self { breakers, policy }
    }

    pub fn breakers(&self) -> &Arc<CircuitBreakerRegistry> {
        &self.breakers
    }

    /// Call `call` through the breaker for `service`, retrying transient
    /// failures with exponential backoff. Stops early when the breaker opens
    /// or the error is not retryable.
    pub async fn execute<T, F, Fut>(
        &self,
        service: &str,
        fallback: Option<T>,
        mut call: F,
    ) -> CallOutcome<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, WaypointError>>,
    {
        let breaker = self.breakers.get(service);
        let max_attempts = self.policy.max_retries.max(1);
        let backoff_factor = self.policy.backoff_factor.max(1.0);
        let attempt_timeout = self.policy.attempt_timeout;
        let mut delay = self.policy.base_delay;
        let mut attempts = 0u32;

        let last_error = loop {
            attempts += 1;
            let result = breaker
                .call(|| {
                    let attempt = call();
                    async move {
                        match tokio::time::timeout(attempt_timeout, attempt).await {
                            Ok(result) => result,
                            Err(_) => Err(WaypointError::Timeout(attempt_timeout)),
                        }
                    }
                })
                .await;

            let err = match result {
                Ok(value) => {
                    if attempts > 1 {
                        debug!(service, attempts, "Call succeeded after retry");
                    }
                    return CallOutcome::Success(value);
                }
                Err(e) => e,
            };

            let circuit_open =
                matches!(err, WaypointError::CircuitOpen { .. }) || breaker.is_open();
            if circuit_open || !err.is_retryable() || attempts >= max_attempts {
                break err;
            }

            let sleep_for = delay.min(self.policy.max_delay);
            warn!(
                service,
                attempt = attempts,
                max_attempts,
                delay_ms = sleep_for.as_millis() as u64,
                error = %err,
                "Call failed, backing off"
            );
            tokio::time::sleep(sleep_for).await;
            delay = Duration::from_secs_f64(
                (delay.as_secs_f64() * backoff_factor).min(self.policy.max_delay.as_secs_f64()),
            );
        };

        let reason = if matches!(last_error, WaypointError::CircuitOpen { .. }) || breaker.is_open() {
            FallbackReason::CircuitOpen
        } else if matches!(last_error, WaypointError::Timeout(_)) {
            FallbackReason::Timeout
        } else {
            FallbackReason::Error
        };
        let failure = FailurePayload {
            service: service.to_string(),
            reason,
            error: last_error.to_string(),
            attempts,
            at: Utc::now(),
        };
        warn!(
            service,
            attempts,
            reason = ?reason,
            error = failure.error.as_str(),
            fallback = fallback.is_some(),
            "Call exhausted"
        );

        match fallback {
            Some(value) => CallOutcome::Fallback { value, failure },
            None => CallOutcome::Unavailable(failure),
        }
    }
}

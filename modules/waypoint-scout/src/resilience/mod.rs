pub mod circuit_breaker;
pub mod retry;

pub use circuit_breaker::{BreakerSnapshot, CircuitBreaker, CircuitBreakerRegistry, CircuitState};
pub use retry::{CallOutcome, FailurePayload, FallbackReason, RetryExecutor, RetryPolicy};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum WaypointError {
    #[error("Circuit open for service {service}: provider currently unavailable")]
    CircuitOpen { service: String },

    #[error("Transient call error: {0}")]
    TransientCall(String),

    #[error("Call timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Budget exceeded: {0}")]
    BudgetExceeded(String),

    #[error("Invalid TTL: cache entries must live longer than zero")]
    InvalidTtl,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl WaypointError {
    /// Only provider hiccups are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, WaypointError::TransientCall(_) | WaypointError::Timeout(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_and_budget_errors_are_terminal() {
        assert!(WaypointError::TransientCall("reset".into()).is_retryable());
        assert!(!WaypointError::Validation("empty".into()).is_retryable());
        assert!(!WaypointError::BudgetExceeded("over".into()).is_retryable());
        assert!(!WaypointError::CircuitOpen { service: "places".into() }.is_retryable());
    }
}

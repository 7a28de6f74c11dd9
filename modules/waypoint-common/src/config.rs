use std::env;
use std::str::FromStr;
use std::time::Duration;

use tracing::info;

use crate::error::WaypointError;
use crate::quality::{
    DEFAULT_MAX_PLACES_PER_LOCATION, DEFAULT_MIN_PLACES_PER_LOCATION, QUALITY_PASS_SCORE,
};

/// Circuit breaker and retry tuning for calls to the place provider.
#[derive(Debug, Clone)]
pub struct ResilienceConfig {
    pub failure_threshold: u32,
    pub recovery_timeout: Duration,
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub backoff_factor: f64,
    /// Upper bound on a single provider attempt.
    pub attempt_timeout: Duration,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(60),
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_factor: 2.0,
            attempt_timeout: Duration::from_secs(180),
        }
    }
}

/// Spend limits, in USD.
#[derive(Debug, Clone)]
pub struct BudgetConfig {
    pub monthly_budget: f64,
    /// Ceiling for a single run. 0 = unlimited.
    pub run_budget: f64,
    pub cost_per_call: f64,
    /// Throttle when fewer days of spend remain than this.
    pub min_runway_days: f64,
    pub warning_percent: f64,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            monthly_budget: 100.0,
            run_budget: 0.0,
            cost_per_call: 0.05,
            min_runway_days: 3.0,
            warning_percent: 80.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct QualityConfig {
    pub min_places_per_location: usize,
    pub max_places_per_location: usize,
    pub pass_score: f64,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            min_places_per_location: DEFAULT_MIN_PLACES_PER_LOCATION,
            max_places_per_location: DEFAULT_MAX_PLACES_PER_LOCATION,
            pass_score: QUALITY_PASS_SCORE,
        }
    }
}

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub max_tasks_per_run: usize,
    pub worker_count: usize,
    pub max_results_per_call: u32,
    pub cluster_radius_km: f64,
    /// Breaker/registry name for the place provider.
    pub service_name: String,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_tasks_per_run: 20,
            worker_count: 4,
            max_results_per_call: 20,
            cluster_radius_km: 50.0,
            service_name: "places".to_string(),
        }
    }
}

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    // Place provider
    pub places_api_key: String,
    pub places_base_url: Option<String>,

    // Persistence
    pub database_url: Option<String>,

    // Location universe (JSON)
    pub universe_path: String,

    // Spend ledger (JSON), kept between invocations when set
    pub ledger_path: Option<String>,

    pub resilience: ResilienceConfig,
    pub budget: BudgetConfig,
    pub quality: QualityConfig,
    pub orchestrator: OrchestratorConfig,
}

impl Config {
    /// Load configuration from environment variables. Only the provider key
    /// is required; everything else falls back to defaults.
    pub fn from_env() -> Result<Self, WaypointError> {
        let resilience_defaults = ResilienceConfig::default();
        let budget_defaults = BudgetConfig::default();
        let quality_defaults = QualityConfig::default();
        let orchestrator_defaults = OrchestratorConfig::default();

        Ok(Self {
            places_api_key: required_env("PLACES_API_KEY")?,
            places_base_url: optional_env("PLACES_BASE_URL"),
            database_url: optional_env("DATABASE_URL"),
            universe_path: optional_env("UNIVERSE_PATH")
                .unwrap_or_else(|| "universe.json".to_string()),
            ledger_path: optional_env("LEDGER_PATH"),
            resilience: ResilienceConfig {
                failure_threshold: parsed_env(
                    "FAILURE_THRESHOLD",
                    resilience_defaults.failure_threshold,
                )?,
                recovery_timeout: Duration::from_secs(parsed_env(
                    "RECOVERY_TIMEOUT_SECS",
                    resilience_defaults.recovery_timeout.as_secs(),
                )?),
                max_retries: parsed_env("MAX_RETRIES", resilience_defaults.max_retries)?,
                base_delay: Duration::from_millis(parsed_env(
                    "RETRY_BASE_DELAY_MS",
                    resilience_defaults.base_delay.as_millis() as u64,
                )?),
                max_delay: Duration::from_millis(parsed_env(
                    "RETRY_MAX_DELAY_MS",
                    resilience_defaults.max_delay.as_millis() as u64,
                )?),
                backoff_factor: parsed_env("BACKOFF_FACTOR", resilience_defaults.backoff_factor)?,
                attempt_timeout: Duration::from_secs(parsed_env(
                    "ATTEMPT_TIMEOUT_SECS",
                    resilience_defaults.attempt_timeout.as_secs(),
                )?),
            },
            budget: BudgetConfig {
                monthly_budget: parsed_env("MONTHLY_BUDGET_USD", budget_defaults.monthly_budget)?,
                run_budget: parsed_env("RUN_BUDGET_USD", budget_defaults.run_budget)?,
                cost_per_call: parsed_env("COST_PER_CALL_USD", budget_defaults.cost_per_call)?,
                ..budget_defaults
            },
            quality: QualityConfig {
                min_places_per_location: parsed_env(
                    "MIN_PLACES_PER_LOCATION",
                    quality_defaults.min_places_per_location,
                )?,
                max_places_per_location: parsed_env(
                    "MAX_PLACES_PER_LOCATION",
                    quality_defaults.max_places_per_location,
                )?,
                ..quality_defaults
            },
            orchestrator: OrchestratorConfig {
                max_tasks_per_run: parsed_env(
                    "MAX_TASKS_PER_RUN",
                    orchestrator_defaults.max_tasks_per_run,
                )?,
                worker_count: parsed_env("WORKER_COUNT", orchestrator_defaults.worker_count)?,
                max_results_per_call: parsed_env(
                    "MAX_RESULTS_PER_CALL",
                    orchestrator_defaults.max_results_per_call,
                )?,
                cluster_radius_km: parsed_env(
                    "CLUSTER_RADIUS_KM",
                    orchestrator_defaults.cluster_radius_km,
                )?,
                ..orchestrator_defaults
            },
        })
    }

    /// Log the effective configuration without secrets.
    pub fn log_redacted(&self) {
        info!(
            places_api_key = %redact(&self.places_api_key),
            places_base_url = self.places_base_url.as_deref().unwrap_or("default"),
            database = self.database_url.is_some(),
            universe_path = self.universe_path.as_str(),
            ledger_path = self.ledger_path.as_deref().unwrap_or("none"),
            monthly_budget = self.budget.monthly_budget,
            run_budget = self.budget.run_budget,
            cost_per_call = self.budget.cost_per_call,
            max_tasks_per_run = self.orchestrator.max_tasks_per_run,
            worker_count = self.orchestrator.worker_count,
            failure_threshold = self.resilience.failure_threshold,
            max_retries = self.resilience.max_retries,
            "Loaded config"
        );
    }
}

fn required_env(key: &str) -> Result<String, WaypointError> {
    env::var(key)
        .ok()
        .filter(|v| !v.is_empty())
        .ok_or_else(|| WaypointError::Config(format!("{key} environment variable is required")))
}

fn optional_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.is_empty())
}

fn parsed_env<T: FromStr>(key: &str, default: T) -> Result<T, WaypointError> {
    match optional_env(key) {
        Some(raw) => raw
            .parse()
            .map_err(|_| WaypointError::Config(format!("{key} must be a number, got {raw:?}"))),
        None => Ok(default),
    }
}

fn redact(secret: &str) -> String {
    if secret.chars().count() <= 4 {
        "****".to_string()
    } else {
        format!("{}****", secret.chars().take(4).collect::<String>())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redact_keeps_only_a_short_prefix() {
        assert_eq!(redact("apify_api_abcdef"), "apif****");
        assert_eq!(redact("abc"), "****");
    }

    #[test]
    fn parsed_env_falls_back_to_default() {
        let v: u32 = parsed_env("WAYPOINT_TEST_UNSET_VARIABLE", 7).unwrap();
        assert_eq!(v, 7);
    }

    #[test]
    fn defaults_match_documented_limits() {
        let o = OrchestratorConfig::default();
        assert_eq!(o.max_tasks_per_run, 20);
        assert_eq!(BudgetConfig::default().min_runway_days, 3.0);
        assert_eq!(QualityConfig::default().pass_score, 60.0);
    }
}

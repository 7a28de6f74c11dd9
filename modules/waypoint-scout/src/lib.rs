pub mod cache;
pub mod geo;
pub mod infra;
pub mod orchestrator;
pub mod quality;
pub mod resilience;
pub mod scheduling;
pub mod scraper;
pub mod stats;
pub mod store;
#[cfg(any(test, feature = "test-support"))]
pub mod testing;
pub mod traits;
pub mod universe;

pub use orchestrator::ScrapeOrchestrator;
pub use stats::{RunStatus, RunSummary, TaskError, TaskErrorKind};

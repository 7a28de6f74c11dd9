use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use waypoint_common::{Category, Location, Strategy};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Every planned task was attempted and none failed.
    Completed,
    /// Every planned task was attempted; some failed.
    Partial,
    /// The budget gate refused the run before any call.
    Throttled,
    /// The budget tripped mid-run and remaining tasks were abandoned.
    BudgetExhausted,
    /// Another run held the lock.
    AlreadyRunning,
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RunStatus::Completed => "completed",
            RunStatus::Partial => "partial",
            RunStatus::Throttled => "throttled",
            RunStatus::BudgetExhausted => "budget_exhausted",
            RunStatus::AlreadyRunning => "already_running",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskErrorKind {
    CircuitOpen,
    Transient,
    Timeout,
    LowQuality,
    Store,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskError {
    pub location: Location,
    pub category: Category,
    pub kind: TaskErrorKind,
    pub message: String,
}

/// Outcome of one orchestrator run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub strategy: Strategy,
    pub status: RunStatus,
    pub tasks_planned: u32,
    pub tasks_attempted: u32,
    pub tasks_succeeded: u32,
    pub cache_hits: u32,
    pub paid_calls: u32,
    pub tasks_abandoned: u32,
    /// USD.
    pub cost_incurred: f64,
    pub errors: Vec<TaskError>,
    pub duration_seconds: f64,
    pub started_at: DateTime<Utc>,
}

impl RunSummary {
    /// A summary for a run that did no work.
    pub fn empty(strategy: Strategy, status: RunStatus) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            strategy,
            status,
            tasks_planned: 0,
            tasks_attempted: 0,
            tasks_succeeded: 0,
            cache_hits: 0,
            paid_calls: 0,
            tasks_abandoned: 0,
            cost_incurred: 0.0,
            errors: Vec::new(),
            duration_seconds: 0.0,
            started_at: Utc::now(),
        }
    }
}

impl std::fmt::Display for RunSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "\n=== Waypoint Run {} ===", self.status)?;
        writeln!(f, "Run:             {}", self.run_id)?;
        writeln!(f, "Strategy:        {}", self.strategy)?;
        writeln!(f, "Tasks planned:   {}", self.tasks_planned)?;
        writeln!(f, "Tasks attempted: {}", self.tasks_attempted)?;
        writeln!(f, "Tasks succeeded: {}", self.tasks_succeeded)?;
        writeln!(f, "Cache hits:      {}", self.cache_hits)?;
        writeln!(f, "Paid calls:      {}", self.paid_calls)?;
        if self.tasks_abandoned > 0 {
            writeln!(f, "Abandoned:       {}", self.tasks_abandoned)?;
        }
        writeln!(f, "Cost:            ${:.2}", self.cost_incurred)?;
        writeln!(f, "Duration:        {:.1}s", self.duration_seconds)?;
        if !self.errors.is_empty() {
            writeln!(f, "\nErrors:")?;
            for e in &self.errors {
                writeln!(f, "  {} / {}: {:?} {}", e.location, e.category, e.kind, e.message)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_serializes_snake_case() {
        let json = serde_json::to_string(&RunStatus::BudgetExhausted).unwrap();
        assert_eq!(json, "\"budget_exhausted\"");
        assert_eq!(RunStatus::AlreadyRunning.to_string(), "already_running");
    }

    #[test]
    fn display_lists_errors() {
        let mut summary = RunSummary::empty(Strategy::Emergency, RunStatus::Partial);
        summary.errors.push(TaskError {
            location: Location::new("Rome", "Italy"),
            category: Category::Hotel,
            kind: TaskErrorKind::LowQuality,
            message: "score 45".into(),
        });
        let text = summary.to_string();
        assert!(text.contains("Rome, Italy / hotel: LowQuality score 45"));
        assert!(!text.contains("Abandoned"));
    }
}

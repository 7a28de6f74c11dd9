//! Run log: a timeline of every action taken during one orchestrator run.
//!
//! Each run produces a single row in the `waypoint_runs` Postgres table
//! containing JSONB columns for the summary and events.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tracing::info;
use uuid::Uuid;

use crate::stats::{RunSummary, TaskErrorKind};

pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS waypoint_runs (
    run_id      UUID PRIMARY KEY,
    strategy    TEXT NOT NULL,
    status      TEXT NOT NULL,
    started_at  TIMESTAMPTZ NOT NULL,
    finished_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    summary     JSONB NOT NULL,
    events      JSONB NOT NULL
)
"#;

pub struct RunLog {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    events: Vec<RunEvent>,
    seq: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunEvent {
    pub seq: u32,
    pub ts: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: EventKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    TaskDispatched {
        key: String,
        priority: f64,
    },
    CacheHit {
        key: String,
        records: usize,
    },
    PaidCall {
        key: String,
        records: usize,
        cost: f64,
        quality_score: f64,
    },
    TaskFailed {
        key: String,
        kind: TaskErrorKind,
        message: String,
    },
    TaskAbandoned {
        key: String,
    },
    BudgetCheckpoint {
        spent: f64,
        remaining: f64,
    },
}

impl RunLog {
    pub fn new(run_id: Uuid) -> Self {
        Self {
            run_id,
            started_at: Utc::now(),
            events: Vec::new(),
            seq: 0,
        }
    }

    pub fn log(&mut self, kind: EventKind) {
        self.events.push(RunEvent {
            seq: self.seq,
            ts: Utc::now(),
            kind,
        });
        self.seq += 1;
    }

    pub fn events(&self) -> &[RunEvent] {
        &self.events
    }

    /// Serialize the run log and write to Postgres.
    pub async fn save(&self, pool: &PgPool, summary: &RunSummary) -> Result<()> {
        let summary_json = serde_json::to_value(summary)?;
        let events_json = serde_json::to_value(&self.events)?;

        sqlx::query(
            r#"
            INSERT INTO waypoint_runs (run_id, strategy, status, started_at, finished_at, summary, events)
            VALUES ($1, $2, $3, $4, now(), $5, $6)
            "#,
        )
        .bind(self.run_id)
        .bind(summary.strategy.as_str())
        .bind(summary.status.to_string())
        .bind(self.started_at)
        .bind(&summary_json)
        .bind(&events_json)
        .execute(pool)
        .await?;

        info!(run_id = %self.run_id, events = self.events.len(), "Run log saved to Postgres");
        Ok(())
    }
}

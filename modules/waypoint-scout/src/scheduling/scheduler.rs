use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::{info, warn};

use waypoint_common::Strategy;

use crate::stats::{RunStatus, RunSummary};

/// Anything that can run the orchestrator for a strategy on demand.
#[async_trait]
pub trait RunTrigger: Send + Sync {
    async fn trigger(&self, strategy: Strategy) -> RunSummary;
}

/// The clock that decides when runs happen.
#[async_trait]
pub trait Scheduler: Send + Sync {
    /// Drive `target` until `cancel` is set.
    async fn run(&self, target: Arc<dyn RunTrigger>, cancel: Arc<AtomicBool>);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cadence {
    pub strategy: Strategy,
    pub every: Duration,
}

impl Cadence {
    pub fn new(strategy: Strategy, every: Duration) -> Self {
        Self { strategy, every }
    }
}

/// Frequent gap-filling plus a daily clustered batch.
pub fn default_cadences() -> Vec<Cadence> {
    vec![
        Cadence::new(Strategy::Emergency, Duration::from_secs(15 * 60)),
        Cadence::new(Strategy::CostOptimized, Duration::from_secs(24 * 3600)),
    ]
}

/// One tokio loop per cadence. Each loop triggers immediately, then every
/// `every` after that. A trigger that lands on another cadence's run comes
/// back `already_running` and is retried after `busy_retry` instead of
/// waiting out the full interval.
pub struct IntervalScheduler {
    cadences: Vec<Cadence>,
    /// How often sleeping loops look at the cancel flag.
    poll: Duration,
    busy_retry: Duration,
}

impl IntervalScheduler {
    pub fn new(cadences: Vec<Cadence>) -> Self {
        Self {
            cadences,
            poll: Duration::from_secs(1),
            busy_retry: Duration::from_secs(30),
        }
    }

    pub fn with_busy_retry(mut self, busy_retry: Duration) -> Self {
        self.busy_retry = busy_retry;
        self
    }

    pub fn cadences(&self) -> &[Cadence] {
        &self.cadences
    }
}

impl Default for IntervalScheduler {
    fn default() -> Self {
        Self::new(default_cadences())
    }
}

async fn sleep_unless_cancelled(total: Duration, poll: Duration, cancel: &AtomicBool) -> bool {
    let deadline = Instant::now() + total;
    loop {
        if cancel.load(Ordering::Relaxed) {
            return false;
        }
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        tokio::time::sleep((deadline - now).min(poll)).await;
    }
}

#[async_trait]
impl Scheduler for IntervalScheduler {
    async fn run(&self, target: Arc<dyn RunTrigger>, cancel: Arc<AtomicBool>) {
        let mut handles = Vec::with_capacity(self.cadences.len());

        for cadence in self.cadences.iter().copied() {
            let target = target.clone();
            let cancel = cancel.clone();
            let poll = self.poll.min(cadence.every).max(Duration::from_millis(1));
            let busy_retry = self.busy_retry.min(cadence.every);
            info!(
                strategy = %cadence.strategy,
                every_minutes = cadence.every.as_secs() / 60,
                "Starting scheduler loop"
            );

            handles.push(tokio::spawn(async move {
                loop {
                    if cancel.load(Ordering::Relaxed) {
                        break;
                    }
                    let summary = target.trigger(cadence.strategy).await;
                    let wait = if summary.status == RunStatus::AlreadyRunning {
                        info!(
                            strategy = %cadence.strategy,
                            retry_secs = busy_retry.as_secs(),
                            "Another run in progress, retrying shortly"
                        );
                        busy_retry
                    } else {
                        info!(strategy = %cadence.strategy, status = %summary.status, "Scheduled run finished");
                        cadence.every
                    };
                    if !sleep_unless_cancelled(wait, poll, &cancel).await {
                        break;
                    }
                }
                info!(strategy = %cadence.strategy, "Scheduler loop stopped");
            }));
        }

        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "Scheduler loop panicked");
            }
        }
    }
}

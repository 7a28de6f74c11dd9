//! ScrapeOrchestrator: one run is gate → plan → optimize → execute → summarize.
//!
//! Runs are serialized by an in-process lock. Within a run, tasks are
//! dispatched in plan order onto a bounded pool whose slots refill as soon as
//! any task finishes. The budget is re-checked before each dispatch, and a
//! paid call reserves its cost against the run ceiling before it is made.
//! Once the budget trips, everything not yet dispatched is abandoned. Cache
//! writes that already happened stay.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use async_trait::async_trait;
use chrono::Utc;
use futures::stream::{self, StreamExt};
use sqlx::PgPool;
use tracing::{debug, info, warn};
use typed_builder::TypedBuilder;

use waypoint_common::config::OrchestratorConfig;
use waypoint_common::{Strategy, Task};

use crate::cache::{CoverageReport, PlaceCache};
use crate::geo::GeoClusterer;
use crate::infra::run_log::{EventKind, RunLog};
use crate::quality::QualityValidator;
use crate::resilience::{BreakerSnapshot, FallbackReason, RetryExecutor};
use crate::scheduling::{
    BudgetMonitor, BudgetStatus, BudgetTracker, CostSummary, PrioritySignalAggregator,
    RunTrigger, UsageAnalytics,
};
use crate::stats::{RunStatus, RunSummary, TaskError, TaskErrorKind};
use crate::traits::PlaceScraper;

#[derive(TypedBuilder)]
pub struct ScrapeOrchestrator {
    scraper: Arc<dyn PlaceScraper>,
    cache: Arc<PlaceCache>,
    aggregator: PrioritySignalAggregator,
    analytics: Arc<UsageAnalytics>,
    budget: BudgetMonitor,
    executor: RetryExecutor,
    #[builder(default)]
    validator: QualityValidator,
    #[builder(default = GeoClusterer::new(Vec::new()))]
    clusterer: GeoClusterer,
    #[builder(default)]
    config: OrchestratorConfig,
    /// Per-run spend ceiling in USD. 0 = unlimited.
    #[builder(default)]
    run_budget: f64,
    /// When set, every run's log is written to `waypoint_runs`.
    #[builder(default)]
    pool: Option<PgPool>,
    #[builder(default, setter(skip))]
    running: AtomicBool,
}

/// Releases the run lock on drop, including when the run future is cancelled.
struct RunGuard<'a>(&'a AtomicBool);

impl<'a> RunGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| RunGuard(flag))
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

#[derive(Debug)]
enum TaskOutcome {
    CacheHit,
    Fetched { cost: f64 },
    Failed { error: TaskError, cost: f64 },
    Abandoned,
    /// Same key already in flight this run.
    Duplicate,
}

/// Shared state for one run's workers.
struct RunContext {
    tracker: BudgetTracker,
    tripped: AtomicBool,
    in_flight: Mutex<HashSet<String>>,
    log: Mutex<RunLog>,
}

impl RunContext {
    fn log(&self, kind: EventKind) {
        self.log.lock().unwrap_or_else(PoisonError::into_inner).log(kind);
    }
}

impl ScrapeOrchestrator {
    pub fn analytics(&self) -> &Arc<UsageAnalytics> {
        &self.analytics
    }

    pub fn cache(&self) -> &Arc<PlaceCache> {
        &self.cache
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn budget_status(&self) -> BudgetStatus {
        self.budget.check_budget_status(&self.analytics, Utc::now())
    }

    pub fn cost_summary(&self, lookback_days: u32) -> CostSummary {
        self.analytics.cost_summary(lookback_days)
    }

    pub fn coverage_stats(&self) -> CoverageReport {
        self.cache.coverage_report()
    }

    pub fn breaker_states(&self) -> Vec<BreakerSnapshot> {
        self.executor.breakers().snapshots()
    }

    pub async fn trigger(&self, strategy: Strategy) -> RunSummary {
        self.run(strategy).await
    }

    pub async fn run(&self, strategy: Strategy) -> RunSummary {
        let Some(_guard) = RunGuard::acquire(&self.running) else {
            info!(strategy = %strategy, "Run already in progress, skipping trigger");
            return RunSummary::empty(strategy, RunStatus::AlreadyRunning);
        };

        let started = Instant::now();
        let mut summary = RunSummary::empty(strategy, RunStatus::Completed);
        info!(run_id = %summary.run_id, strategy = %strategy, "Run starting");

        let ctx = RunContext {
            tracker: BudgetTracker::new(self.run_budget),
            tripped: AtomicBool::new(false),
            in_flight: Mutex::new(HashSet::new()),
            log: Mutex::new(RunLog::new(summary.run_id)),
        };

        // Gate
        let status = self.budget.check_budget_status(&self.analytics, Utc::now());
        if status.should_throttle {
            warn!(
                spend = status.current_spend,
                budget = status.monthly_budget,
                alert = %status.alert_level,
                "Budget gate closed, run throttled"
            );
            ctx.log(EventKind::BudgetCheckpoint {
                spent: 0.0,
                remaining: status.remaining,
            });
            summary.status = RunStatus::Throttled;
            return self.finish(summary, ctx, started).await;
        }

        // Plan
        let mut tasks = self
            .aggregator
            .plan(strategy, self.config.max_tasks_per_run)
            .await;

        // Optimize
        if strategy == Strategy::CostOptimized {
            tasks = self
                .clusterer
                .order_tasks(tasks, self.config.cluster_radius_km);
        }
        summary.tasks_planned = tasks.len() as u32;

        // Execute
        let workers = self.config.worker_count.max(1);
        let outcomes: Vec<TaskOutcome> = stream::iter(tasks)
            .map(|task| self.dispatch(task, &ctx))
            .buffer_unordered(workers)
            .collect()
            .await;

        for outcome in outcomes {
            match outcome {
                TaskOutcome::CacheHit => {
                    summary.tasks_attempted += 1;
                    summary.tasks_succeeded += 1;
                    summary.cache_hits += 1;
                }
                TaskOutcome::Fetched { cost } => {
                    summary.tasks_attempted += 1;
                    summary.tasks_succeeded += 1;
                    summary.paid_calls += 1;
                    summary.cost_incurred += cost;
                }
                TaskOutcome::Failed { error, cost } => {
                    summary.tasks_attempted += 1;
                    if cost > 0.0 {
                        summary.paid_calls += 1;
                        summary.cost_incurred += cost;
                    }
                    summary.errors.push(error);
                }
                TaskOutcome::Abandoned => summary.tasks_abandoned += 1,
                TaskOutcome::Duplicate => {}
            }
        }

        summary.status = if summary.tasks_abandoned > 0 {
            RunStatus::BudgetExhausted
        } else if !summary.errors.is_empty() {
            RunStatus::Partial
        } else {
            RunStatus::Completed
        };

        let end_status = self.budget.check_budget_status(&self.analytics, Utc::now());
        ctx.log(EventKind::BudgetCheckpoint {
            spent: ctx.tracker.total_spent(),
            remaining: end_status.remaining,
        });
        ctx.tracker.log_status();
        self.cache.persist_access_stats().await;

        self.finish(summary, ctx, started).await
    }

    async fn finish(&self, mut summary: RunSummary, ctx: RunContext, started: Instant) -> RunSummary {
        summary.duration_seconds = started.elapsed().as_secs_f64();
        info!(
            run_id = %summary.run_id,
            status = %summary.status,
            attempted = summary.tasks_attempted,
            succeeded = summary.tasks_succeeded,
            cost = summary.cost_incurred,
            "{summary}"
        );

        if let Some(pool) = &self.pool {
            let log = ctx.log.into_inner().unwrap_or_else(PoisonError::into_inner);
            if let Err(e) = log.save(pool, &summary).await {
                warn!(run_id = %summary.run_id, error = %e, "Failed to save run log");
            }
        }
        summary
    }

    /// Admission check, then the task itself.
    async fn dispatch(&self, task: Task, ctx: &RunContext) -> TaskOutcome {
        let key = task.key();

        if !ctx.tripped.load(Ordering::Acquire) {
            let cost = self.analytics.cost_per_call();
            let status = self.budget.check_budget_status(&self.analytics, Utc::now());
            if status.should_throttle || !ctx.tracker.has_budget(cost) {
                warn!(
                    key = key.as_str(),
                    monthly_alert = %status.alert_level,
                    run_spent = ctx.tracker.total_spent(),
                    "Budget tripped mid-run, abandoning remaining tasks"
                );
                ctx.tripped.store(true, Ordering::Release);
            }
        }
        if ctx.tripped.load(Ordering::Acquire) {
            ctx.log(EventKind::TaskAbandoned { key });
            return TaskOutcome::Abandoned;
        }

        let claimed = ctx
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.clone());
        if !claimed {
            debug!(key = key.as_str(), "Key already in flight, skipping");
            return TaskOutcome::Duplicate;
        }

        ctx.log(EventKind::TaskDispatched {
            key: key.clone(),
            priority: task.priority_score,
        });
        let outcome = self.execute_task(&task, &key, ctx).await;

        ctx.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&key);
        outcome
    }

    async fn execute_task(&self, task: &Task, key: &str, ctx: &RunContext) -> TaskOutcome {
        let location = &task.location;
        let category = task.category;

        if let Some(entry) = self.cache.lookup(location, category) {
            let coverage = self
                .validator
                .validate_coverage(location, &entry.payload.records);
            if coverage.passed {
                self.analytics.record_cache_hit();
                ctx.log(EventKind::CacheHit {
                    key: key.to_string(),
                    records: entry.payload.records.len(),
                });
                debug!(key, "Cache hit");
                return TaskOutcome::CacheHit;
            }
            info!(
                key,
                quality_score = coverage.quality_score,
                "Cached entry fails quality gate, refetching"
            );
        }
        let cost = self.analytics.cost_per_call();
        if !ctx.tracker.try_reserve(cost) {
            warn!(
                key,
                run_spent = ctx.tracker.total_spent(),
                "Run budget fully reserved, abandoning remaining tasks"
            );
            ctx.tripped.store(true, Ordering::Release);
            ctx.log(EventKind::TaskAbandoned {
                key: key.to_string(),
            });
            return TaskOutcome::Abandoned;
        }
        self.analytics.record_cache_miss();

        let scraper = &self.scraper;
        let max_results = self.config.max_results_per_call;
        let outcome = self
            .executor
            .execute(&self.config.service_name, None, move || {
                scraper.scrape(location, category, max_results)
            })
            .await;

        let records = match outcome.into_result() {
            Ok(records) => records,
            Err(failure) => {
                let kind = match failure.reason {
                    FallbackReason::CircuitOpen => TaskErrorKind::CircuitOpen,
                    FallbackReason::Timeout => TaskErrorKind::Timeout,
                    FallbackReason::Error => TaskErrorKind::Transient,
                };
                ctx.tracker.release(cost);
                return self.fail(task, key, ctx, kind, failure.error, 0.0);
            }
        };

        self.analytics.record_paid_call(cost);

        let coverage = self.validator.validate_coverage(location, &records);
        if !coverage.passed {
            let message = format!(
                "quality score {:.0}: {}",
                coverage.quality_score,
                coverage.issues.join("; ")
            );
            return self.fail(task, key, ctx, TaskErrorKind::LowQuality, message, cost);
        }

        let record_count = records.len();
        if let Err(e) = self
            .cache
            .store(location, category, records, category.default_ttl())
            .await
        {
            return self.fail(task, key, ctx, TaskErrorKind::Store, e.to_string(), cost);
        }

        ctx.log(EventKind::PaidCall {
            key: key.to_string(),
            records: record_count,
            cost,
            quality_score: coverage.quality_score,
        });
        info!(key, records = record_count, cost, "Fetched and cached");
        TaskOutcome::Fetched { cost }
    }

    fn fail(
        &self,
        task: &Task,
        key: &str,
        ctx: &RunContext,
        kind: TaskErrorKind,
        message: String,
        cost: f64,
    ) -> TaskOutcome {
        warn!(key, kind = ?kind, error = message.as_str(), "Task failed");
        ctx.log(EventKind::TaskFailed {
            key: key.to_string(),
            kind,
            message: message.clone(),
        });
        TaskOutcome::Failed {
            error: TaskError {
                location: task.location.clone(),
                category: task.category,
                kind,
                message,
            },
            cost,
        }
    }
}

#[async_trait]
impl RunTrigger for ScrapeOrchestrator {
    async fn trigger(&self, strategy: Strategy) -> RunSummary {
        self.run(strategy).await
    }
}

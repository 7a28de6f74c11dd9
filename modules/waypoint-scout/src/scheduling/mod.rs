pub mod aggregator;
pub mod analytics;
pub mod budget;
pub mod scheduler;
pub mod signals;

pub use aggregator::PrioritySignalAggregator;
pub use analytics::{BudgetLedger, CostSummary, HourlyUsage, LedgerEntry, UsageAnalytics};
pub use budget::{AlertLevel, BudgetMonitor, BudgetStatus, BudgetTracker};
pub use scheduler::{default_cadences, Cadence, IntervalScheduler, RunTrigger, Scheduler};
pub use signals::{
    DemandTracker, EventCalendar, FixedSignals, SeasonalCalendar, SeasonalRule, StalenessGapSignal,
    UpcomingEvent,
};

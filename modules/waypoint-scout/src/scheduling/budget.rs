use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use waypoint_common::config::BudgetConfig;

use super::analytics::UsageAnalytics;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertLevel {
    Ok,
    Watch,
    Warning,
    Critical,
}

impl std::fmt::Display for AlertLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AlertLevel::Ok => write!(f, "ok"),
            AlertLevel::Watch => write!(f, "watch"),
            AlertLevel::Warning => write!(f, "warning"),
            AlertLevel::Critical => write!(f, "critical"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BudgetStatus {
    pub monthly_budget: f64,
    pub current_spend: f64,
    pub remaining: f64,
    pub budget_used_percent: f64,
    pub projected_budget_percent: f64,
    /// Days of spend left at the month-to-date daily rate. `None` when
    /// nothing has been spent yet.
    pub days_until_exceeded: Option<f64>,
    pub alert_level: AlertLevel,
    pub should_throttle: bool,
}

/// Month-level admission control over paid calls.
pub struct BudgetMonitor {
    config: BudgetConfig,
}

impl BudgetMonitor {
    pub fn new(config: BudgetConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &BudgetConfig {
        &self.config
    }

    pub fn check_budget_status(&self, analytics: &UsageAnalytics, now: DateTime<Utc>) -> BudgetStatus {
        let budget = self.config.monthly_budget;
        let current_spend = analytics.month_to_date_spend(now);
        let remaining = budget - current_spend;

        // A zero budget admits nothing.
        let used_percent = if budget > 0.0 {
            current_spend / budget * 100.0
        } else {
            100.0
        };

        // Less than a day into the month counts as one day.
        let elapsed_days = UsageAnalytics::days_into_month(now).max(1.0);
        let daily_avg = current_spend / elapsed_days;
        let projection = daily_avg * f64::from(UsageAnalytics::days_in_month(now));
        let projected_percent = if budget > 0.0 {
            projection / budget * 100.0
        } else {
            used_percent
        };

        let days_until_exceeded = if remaining <= 0.0 {
            Some(0.0)
        } else if daily_avg > 0.0 {
            Some(remaining / daily_avg)
        } else {
            None
        };

        let alert_level = if used_percent >= 100.0 {
            AlertLevel::Critical
        } else if used_percent >= self.config.warning_percent {
            AlertLevel::Warning
        } else if projected_percent > 100.0 {
            AlertLevel::Watch
        } else {
            AlertLevel::Ok
        };

        let should_throttle = alert_level == AlertLevel::Critical
            || days_until_exceeded.is_some_and(|d| d < self.config.min_runway_days);

        BudgetStatus {
            monthly_budget: budget,
            current_spend,
            remaining: remaining.max(0.0),
            budget_used_percent: used_percent,
            projected_budget_percent: projected_percent,
            days_until_exceeded,
            alert_level,
            should_throttle,
        }
    }

    pub fn should_throttle(&self, analytics: &UsageAnalytics, now: DateTime<Utc>) -> bool {
        let status = self.check_budget_status(analytics, now);
        if status.should_throttle {
            warn!(
                spend = status.current_spend,
                budget = status.monthly_budget,
                alert = %status.alert_level,
                days_left = ?status.days_until_exceeded,
                "Budget throttle engaged"
            );
        }
        status.should_throttle
    }
}

/// Tracks spend against a single run's ceiling.
/// Workers reserve the cost of a call before making it, so in-flight calls
/// count against the limit. A reservation is released if no paid result
/// comes back.
pub struct BudgetTracker {
    /// Run limit in USD. 0 = unlimited.
    limit: f64,
    spent: Mutex<f64>,
}

impl BudgetTracker {
    pub fn new(limit: f64) -> Self {
        Self {
            limit: limit.max(0.0),
            spent: Mutex::new(0.0),
        }
    }

    fn spent_guard(&self) -> std::sync::MutexGuard<'_, f64> {
        self.spent.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Check if there's budget remaining for an operation.
    pub fn has_budget(&self, cost: f64) -> bool {
        if self.limit == 0.0 {
            return true; // Unlimited
        }
        *self.spent_guard() + cost <= self.limit + f64::EPSILON
    }

    /// Check and reserve `cost` in one step. Returns false, reserving
    /// nothing, when it would take the run over its limit.
    pub fn try_reserve(&self, cost: f64) -> bool {
        let mut spent = self.spent_guard();
        if self.limit > 0.0 && *spent + cost > self.limit + f64::EPSILON {
            debug!(spent = *spent, cost, limit = self.limit, "Run budget reservation refused");
            return false;
        }
        *spent += cost;
        true
    }

    /// Give back a reservation whose call produced nothing billable.
    pub fn release(&self, cost: f64) {
        let mut spent = self.spent_guard();
        *spent = (*spent - cost).max(0.0);
    }

    pub fn total_spent(&self) -> f64 {
        *self.spent_guard()
    }

    /// Budget remaining (infinite if unlimited).
    pub fn remaining(&self) -> f64 {
        if self.limit == 0.0 {
            return f64::INFINITY;
        }
        (self.limit - self.total_spent()).max(0.0)
    }

    /// Whether budget tracking is active (limit > 0).
    pub fn is_active(&self) -> bool {
        self.limit > 0.0
    }

    pub fn log_status(&self) {
        if self.is_active() {
            info!(
                spent = self.total_spent(),
                remaining = self.remaining(),
                limit = self.limit,
                "Run budget status"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn monitor(monthly_budget: f64) -> BudgetMonitor {
        BudgetMonitor::new(BudgetConfig {
            monthly_budget,
            ..BudgetConfig::default()
        })
    }

    fn june(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, day, 0, 0, 0).unwrap()
    }

    #[test]
    fn no_spend_is_ok_without_runway() {
        let status = monitor(100.0).check_budget_status(&UsageAnalytics::new(100.0, 0.05), june(10));
        assert_eq!(status.alert_level, AlertLevel::Ok);
        assert_eq!(status.days_until_exceeded, None);
        assert!(!status.should_throttle);
    }

    #[test]
    fn spend_equal_to_budget_is_critical_and_throttles() {
        let analytics = UsageAnalytics::new(100.0, 0.05);
        analytics.record_paid_call_at(100.0, june(2));
        let m = monitor(100.0);
        let status = m.check_budget_status(&analytics, june(3));
        assert_eq!(status.alert_level, AlertLevel::Critical);
        assert_eq!(status.budget_used_percent, 100.0);
        assert_eq!(status.days_until_exceeded, Some(0.0));
        assert!(status.should_throttle);
        assert!(m.should_throttle(&analytics, june(3)));
    }

    #[test]
    fn eighty_percent_is_a_warning() {
        let analytics = UsageAnalytics::new(100.0, 0.05);
        // 82 over 29 days: 2.83/day leaves ~6 days of runway.
        analytics.record_paid_call_at(82.0, june(5));
        let status = monitor(100.0).check_budget_status(&analytics, june(30));
        assert_eq!(status.alert_level, AlertLevel::Warning);
        assert!(!status.should_throttle);
    }

    #[test]
    fn fast_burn_is_watch_when_projection_exceeds_budget() {
        let analytics = UsageAnalytics::new(100.0, 0.05);
        // 40 in 10 days projects to 120 over June.
        analytics.record_paid_call_at(40.0, june(5));
        let status = monitor(100.0).check_budget_status(&analytics, june(11));
        assert_eq!(status.alert_level, AlertLevel::Watch);
        assert!((status.projected_budget_percent - 120.0).abs() < 1e-9);
        assert_eq!(status.days_until_exceeded, Some(15.0));
        assert!(!status.should_throttle);
    }

    #[test]
    fn short_runway_throttles_below_critical() {
        let analytics = UsageAnalytics::new(100.0, 0.05);
        // 75 in 5 days: 15/day, 25 remaining lasts under 2 days.
        analytics.record_paid_call_at(75.0, june(2));
        let status = monitor(100.0).check_budget_status(&analytics, june(6));
        assert!(status.alert_level < AlertLevel::Critical);
        assert!(status.days_until_exceeded.unwrap() < 3.0);
        assert!(status.should_throttle);
    }

    #[test]
    fn zero_budget_admits_nothing() {
        let status = monitor(0.0).check_budget_status(&UsageAnalytics::new(0.0, 0.05), june(10));
        assert_eq!(status.alert_level, AlertLevel::Critical);
        assert!(status.should_throttle);
    }

    #[test]
    fn unlimited_tracker_always_has_budget() {
        let tracker = BudgetTracker::new(0.0);
        assert!(tracker.has_budget(1000.0));
        assert!(tracker.try_reserve(1000.0));
        assert!(!tracker.is_active());
    }

    #[test]
    fn tracker_tracks_reservations() {
        let tracker = BudgetTracker::new(1.0);
        assert!(tracker.has_budget(0.5));
        assert!(tracker.try_reserve(0.5));
        assert_eq!(tracker.total_spent(), 0.5);
        assert_eq!(tracker.remaining(), 0.5);
    }

    #[test]
    fn reservation_past_the_limit_is_refused_and_not_recorded() {
        let tracker = BudgetTracker::new(1.0);
        assert!(tracker.try_reserve(0.8));
        assert!(!tracker.has_budget(0.3));
        assert!(!tracker.try_reserve(0.3));
        assert!((tracker.total_spent() - 0.8).abs() < 1e-9);
    }

    #[test]
    fn released_reservation_frees_room() {
        let tracker = BudgetTracker::new(0.10);
        assert!(tracker.try_reserve(0.05));
        assert!(tracker.try_reserve(0.05));
        assert!(!tracker.try_reserve(0.05));

        tracker.release(0.05);
        assert!(tracker.try_reserve(0.05));
        assert!((tracker.total_spent() - 0.10).abs() < 1e-9);
    }

    #[test]
    fn concurrent_reservations_never_exceed_the_limit() {
        let tracker = std::sync::Arc::new(BudgetTracker::new(0.10));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let tracker = tracker.clone();
                std::thread::spawn(move || tracker.try_reserve(0.05))
            })
            .collect();
        let granted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();
        assert_eq!(granted, 2);
        assert!(tracker.total_spent() <= 0.10 + 1e-9);
    }
}

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Datelike, Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Counters for one wall-clock hour.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct HourlyUsage {
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub paid_calls: u64,
    pub cost: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub at: DateTime<Utc>,
    pub cost: f64,
}

/// Append-only record of paid spend. Serializable so callers can persist it
/// between process restarts and hand it back via `UsageAnalytics::from_ledger`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetLedger {
    pub monthly_budget: f64,
    pub entries: Vec<LedgerEntry>,
}

impl BudgetLedger {
    pub fn new(monthly_budget: f64) -> Self {
        Self {
            monthly_budget,
            entries: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CostSummary {
    pub lookback_days: u32,
    pub call_count: u64,
    pub actual_cost: f64,
    pub daily_avg: f64,
    /// `daily_avg` × 30.
    pub monthly_projection: f64,
    /// What the cache hits in the window would have cost as paid calls.
    pub cache_savings: f64,
    pub hit_rate_percent: f64,
    /// `cache_savings / actual_cost` × 100; 0 when nothing was spent.
    pub roi_percent: f64,
}

struct Inner {
    hourly: BTreeMap<i64, HourlyUsage>,
    ledger: BudgetLedger,
}

/// Hour-bucketed usage counters plus the spend ledger.
pub struct UsageAnalytics {
    cost_per_call: f64,
    inner: Mutex<Inner>,
}

fn hour_bucket(at: DateTime<Utc>) -> i64 {
    at.timestamp().div_euclid(3600)
}

fn month_start(now: DateTime<Utc>) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(now.year(), now.month(), 1, 0, 0, 0)
        .single()
        .unwrap_or(now)
}

impl UsageAnalytics {
    pub fn new(monthly_budget: f64, cost_per_call: f64) -> Self {
        Self::from_ledger(BudgetLedger::new(monthly_budget), cost_per_call)
    }

    /// Restore from a persisted ledger. Hourly counters start empty except
    /// for the paid calls the ledger itself records.
    pub fn from_ledger(ledger: BudgetLedger, cost_per_call: f64) -> Self {
        let mut hourly: BTreeMap<i64, HourlyUsage> = BTreeMap::new();
        for entry in &ledger.entries {
            let bucket = hourly.entry(hour_bucket(entry.at)).or_default();
            bucket.paid_calls += 1;
            bucket.cost += entry.cost;
        }
        Self {
            cost_per_call,
            inner: Mutex::new(Inner { hourly, ledger }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn cost_per_call(&self) -> f64 {
        self.cost_per_call
    }

    pub fn monthly_budget(&self) -> f64 {
        self.lock().ledger.monthly_budget
    }

    pub fn record_cache_hit(&self) {
        self.record_cache_hit_at(Utc::now());
    }

    pub fn record_cache_hit_at(&self, now: DateTime<Utc>) {
        self.lock().hourly.entry(hour_bucket(now)).or_default().cache_hits += 1;
    }

    pub fn record_cache_miss(&self) {
        self.record_cache_miss_at(Utc::now());
    }

    pub fn record_cache_miss_at(&self, now: DateTime<Utc>) {
        self.lock().hourly.entry(hour_bucket(now)).or_default().cache_misses += 1;
    }

    pub fn record_paid_call(&self, cost: f64) {
        self.record_paid_call_at(cost, Utc::now());
    }

    pub fn record_paid_call_at(&self, cost: f64, now: DateTime<Utc>) {
        let cost = if cost.is_finite() { cost.max(0.0) } else { 0.0 };
        let mut inner = self.lock();
        let bucket = inner.hourly.entry(hour_bucket(now)).or_default();
        bucket.paid_calls += 1;
        bucket.cost += cost;
        inner.ledger.entries.push(LedgerEntry { at: now, cost });
        debug!(cost, "Recorded paid call");
    }

    /// Summed counters over the buckets covering the last `hours` hours,
    /// including the current one.
    fn window(&self, hours: i64, now: DateTime<Utc>) -> HourlyUsage {
        let end = hour_bucket(now);
        let start = end - hours.max(1) + 1;
        self.lock()
            .hourly
            .range(start..=end)
            .fold(HourlyUsage::default(), |mut acc, (_, u)| {
                acc.cache_hits += u.cache_hits;
                acc.cache_misses += u.cache_misses;
                acc.paid_calls += u.paid_calls;
                acc.cost += u.cost;
                acc
            })
    }

    /// Cache hits over lookups in the window, 0–1. 0 when nothing was looked up.
    pub fn hit_rate(&self, lookback_hours: u32) -> f64 {
        self.hit_rate_at(lookback_hours, Utc::now())
    }

    pub fn hit_rate_at(&self, lookback_hours: u32, now: DateTime<Utc>) -> f64 {
        let usage = self.window(i64::from(lookback_hours), now);
        let lookups = usage.cache_hits + usage.cache_misses;
        if lookups == 0 {
            0.0
        } else {
            usage.cache_hits as f64 / lookups as f64
        }
    }

    pub fn cost_summary(&self, lookback_days: u32) -> CostSummary {
        self.cost_summary_at(lookback_days, Utc::now())
    }

    pub fn cost_summary_at(&self, lookback_days: u32, now: DateTime<Utc>) -> CostSummary {
        let days = lookback_days.max(1);
        let usage = self.window(i64::from(days) * 24, now);
        let lookups = usage.cache_hits + usage.cache_misses;
        let daily_avg = usage.cost / f64::from(days);
        let cache_savings = usage.cache_hits as f64 * self.cost_per_call;

        CostSummary {
            lookback_days: days,
            call_count: usage.paid_calls,
            actual_cost: usage.cost,
            daily_avg,
            monthly_projection: daily_avg * 30.0,
            cache_savings,
            hit_rate_percent: if lookups == 0 {
                0.0
            } else {
                usage.cache_hits as f64 / lookups as f64 * 100.0
            },
            roi_percent: if usage.cost > 0.0 {
                cache_savings / usage.cost * 100.0
            } else {
                0.0
            },
        }
    }

    /// Spend recorded since the first instant of `now`'s calendar month (UTC).
    pub fn month_to_date_spend(&self, now: DateTime<Utc>) -> f64 {
        let start = month_start(now);
        self.lock()
            .ledger
            .entries
            .iter()
            .filter(|e| e.at >= start && e.at <= now)
            .map(|e| e.cost)
            .sum()
    }

    /// Time elapsed in the current month, in fractional days.
    pub fn days_into_month(now: DateTime<Utc>) -> f64 {
        (now - month_start(now)).num_seconds().max(0) as f64 / Duration::days(1).num_seconds() as f64
    }

    pub fn days_in_month(now: DateTime<Utc>) -> u32 {
        let start = month_start(now);
        let (y, m) = if now.month() == 12 {
            (now.year() + 1, 1)
        } else {
            (now.year(), now.month() + 1)
        };
        Utc.with_ymd_and_hms(y, m, 1, 0, 0, 0)
            .single()
            .map(|next| (next - start).num_days() as u32)
            .unwrap_or(30)
    }

    pub fn ledger(&self) -> BudgetLedger {
        self.lock().ledger.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, day, hour, 15, 0).unwrap()
    }

    #[test]
    fn hit_rate_counts_only_the_lookback_window() {
        let analytics = UsageAnalytics::new(100.0, 0.05);
        let now = at(10, 12);
        for _ in 0..3 {
            analytics.record_cache_hit_at(now);
        }
        analytics.record_cache_miss_at(now);
        // Outside a 2h window.
        for _ in 0..4 {
            analytics.record_cache_miss_at(now - Duration::hours(5));
        }

        assert_eq!(analytics.hit_rate_at(2, now), 0.75);
        assert_eq!(analytics.hit_rate_at(24, now), 3.0 / 8.0);
    }

    #[test]
    fn hit_rate_is_zero_without_lookups() {
        let analytics = UsageAnalytics::new(100.0, 0.05);
        assert_eq!(analytics.hit_rate_at(24, at(1, 0)), 0.0);
    }

    #[test]
    fn cost_summary_projects_and_computes_roi() {
        let analytics = UsageAnalytics::new(100.0, 0.5);
        let now = at(10, 12);
        analytics.record_paid_call_at(1.0, now);
        analytics.record_paid_call_at(1.0, now - Duration::days(1));
        for _ in 0..8 {
            analytics.record_cache_hit_at(now);
        }
        analytics.record_cache_miss_at(now);
        analytics.record_cache_miss_at(now);

        let summary = analytics.cost_summary_at(2, now);
        assert_eq!(summary.call_count, 2);
        assert_eq!(summary.actual_cost, 2.0);
        assert_eq!(summary.daily_avg, 1.0);
        assert_eq!(summary.monthly_projection, 30.0);
        assert_eq!(summary.cache_savings, 4.0);
        assert_eq!(summary.hit_rate_percent, 80.0);
        assert_eq!(summary.roi_percent, 200.0);
    }

    #[test]
    fn roi_is_zero_when_nothing_spent() {
        let analytics = UsageAnalytics::new(100.0, 0.5);
        analytics.record_cache_hit_at(at(3, 3));
        assert_eq!(analytics.cost_summary_at(7, at(3, 4)).roi_percent, 0.0);
    }

    #[test]
    fn month_to_date_ignores_previous_month() {
        let analytics = UsageAnalytics::new(100.0, 0.05);
        let may = Utc.with_ymd_and_hms(2025, 5, 31, 23, 0, 0).unwrap();
        analytics.record_paid_call_at(5.0, may);
        analytics.record_paid_call_at(2.5, at(1, 1));
        analytics.record_paid_call_at(2.5, at(2, 1));
        assert_eq!(analytics.month_to_date_spend(at(2, 6)), 5.0);
    }

    #[test]
    fn ledger_round_trips_through_restore() {
        let analytics = UsageAnalytics::new(40.0, 0.05);
        analytics.record_paid_call_at(1.25, at(4, 9));
        analytics.record_paid_call_at(0.75, at(5, 9));

        let json = serde_json::to_string(&analytics.ledger()).unwrap();
        let ledger: BudgetLedger = serde_json::from_str(&json).unwrap();
        let restored = UsageAnalytics::from_ledger(ledger, 0.05);

        assert_eq!(restored.monthly_budget(), 40.0);
        assert_eq!(restored.month_to_date_spend(at(6, 0)), 2.0);
        assert_eq!(restored.cost_summary_at(7, at(6, 0)).call_count, 2);
    }

    #[test]
    fn days_in_month_handles_december_and_february() {
        assert_eq!(UsageAnalytics::days_in_month(Utc.with_ymd_and_hms(2025, 12, 5, 0, 0, 0).unwrap()), 31);
        assert_eq!(UsageAnalytics::days_in_month(Utc.with_ymd_and_hms(2024, 2, 5, 0, 0, 0).unwrap()), 29);
        assert_eq!(UsageAnalytics::days_in_month(at(5, 0)), 30);
    }
}

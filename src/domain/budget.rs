//! Budget Monitor
//!
//! Daily compute-unit budget shared by every provider adapter. Tracks spend,
//! fires threshold alerts once per level per UTC day, and switches the scout
//! into degraded mode once the budget is exhausted.
//!
//! Degraded-mode admission:
//! - `Low` priority: cache only, no network calls
//! - `Normal` priority: batch calls only, drawn from the reserve
//! - `High` priority: any call, drawn from the reserve

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::{Mutex, MutexGuard};

use super::request::{CallKind, Priority};

/// Default daily budget in compute units
pub const DEFAULT_DAILY_BUDGET: u64 = 100_000;

/// Default alert levels in percent of the daily budget
pub const DEFAULT_ALERT_LEVELS: [u8; 3] = [80, 95, 100];

/// Default reserve for high-priority calls past the budget, in percent
pub const DEFAULT_RESERVE_PCT: f64 = 5.0;

/// Budget configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetConfig {
    pub daily_budget: u64,
    pub alert_levels: Vec<u8>,
    pub reserve_pct: f64,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            daily_budget: DEFAULT_DAILY_BUDGET,
            alert_levels: DEFAULT_ALERT_LEVELS.to_vec(),
            reserve_pct: DEFAULT_RESERVE_PCT,
        }
    }
}

/// Mutable budget counters, reset on UTC day rollover
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BudgetState {
    pub used_cost: u64,
    pub budget_cost: u64,
    pub alert_levels_fired: BTreeSet<u8>,
    pub day: NaiveDate,
    /// Never reset; used for per-cycle cost deltas
    pub lifetime_cost: u64,
}

/// Snapshot for logging and the cycle summary
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BudgetStatus {
    pub used_cost: u64,
    pub budget_cost: u64,
    pub used_pct: f64,
    pub degraded: bool,
    pub reserve_remaining: u64,
    pub alert_levels_fired: Vec<u8>,
    pub day: NaiveDate,
}

/// Thread-safe daily budget tracker
#[derive(Debug)]
pub struct BudgetMonitor {
    levels: Vec<u8>,
    reserve: u64,
    state: Mutex<BudgetState>,
}

impl BudgetMonitor {
    pub fn new(config: BudgetConfig) -> Self {
        Self::starting_at(config, Utc::now())
    }

    /// Create a monitor whose budget day starts at `now`
    pub fn starting_at(config: BudgetConfig, now: DateTime<Utc>) -> Self {
        let mut levels = config.alert_levels;
        levels.sort_unstable();
        levels.dedup();

        let reserve = (config.daily_budget as f64 * config.reserve_pct.max(0.0) / 100.0).floor() as u64;

        Self {
            levels,
            reserve,
            state: Mutex::new(BudgetState {
                used_cost: 0,
                budget_cost: config.daily_budget,
                alert_levels_fired: BTreeSet::new(),
                day: now.date_naive(),
                lifetime_cost: 0,
            }),
        }
    }

    fn lock_at(&self, now: DateTime<Utc>) -> MutexGuard<'_, BudgetState> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let today = now.date_naive();
        if today != state.day {
            tracing::info!(
                "Budget day rollover {} -> {} (spent {} of {})",
                state.day,
                today,
                state.used_cost,
                state.budget_cost
            );
            state.day = today;
            state.used_cost = 0;
            state.alert_levels_fired.clear();
        }
        state
    }

    /// Add billed cost to today's spend
    pub fn record_cost(&self, amount: u64) {
        self.record_cost_at(amount, Utc::now());
    }

    pub fn record_cost_at(&self, amount: u64, now: DateTime<Utc>) {
        let mut state = self.lock_at(now);
        state.used_cost = state.used_cost.saturating_add(amount);
        state.lifetime_cost = state.lifetime_cost.saturating_add(amount);
        tracing::debug!("Budget: +{} units ({} / {})", amount, state.used_cost, state.budget_cost);
    }

    /// Newly crossed alert levels; each level fires at most once per day
    pub fn check_thresholds(&self) -> Vec<u8> {
        self.check_thresholds_at(Utc::now())
    }

    pub fn check_thresholds_at(&self, now: DateTime<Utc>) -> Vec<u8> {
        let mut state = self.lock_at(now);
        let used = state.used_cost as u128 * 100;
        let budget = state.budget_cost as u128;

        let mut crossed = Vec::new();
        for &level in &self.levels {
            if used >= budget * level as u128 && state.alert_levels_fired.insert(level) {
                crossed.push(level);
            }
        }

        for level in &crossed {
            if *level >= 100 {
                tracing::error!(
                    "BUDGET EXHAUSTED: {}% of daily budget used ({} / {}) - degraded mode",
                    level,
                    state.used_cost,
                    state.budget_cost
                );
            } else {
                tracing::warn!(
                    "Budget alert: {}% of daily budget used ({} / {})",
                    level,
                    state.used_cost,
                    state.budget_cost
                );
            }
        }
        crossed
    }

    /// True once today's spend reaches the budget
    pub fn is_degraded(&self) -> bool {
        self.is_degraded_at(Utc::now())
    }

    pub fn is_degraded_at(&self, now: DateTime<Utc>) -> bool {
        let state = self.lock_at(now);
        state.used_cost >= state.budget_cost
    }

    /// Whether a network call of `kind` costing `cost` may be made now
    pub fn admit(&self, priority: Priority, kind: CallKind, cost: u64) -> bool {
        self.admit_at(priority, kind, cost, Utc::now())
    }

    pub fn admit_at(&self, priority: Priority, kind: CallKind, cost: u64, now: DateTime<Utc>) -> bool {
        let state = self.lock_at(now);
        if state.used_cost < state.budget_cost {
            return true;
        }

        let within_reserve =
            state.used_cost.saturating_add(cost) <= state.budget_cost.saturating_add(self.reserve);
        match priority {
            Priority::Low => false,
            Priority::Normal => kind == CallKind::Batch && within_reserve,
            Priority::High => within_reserve,
        }
    }

    /// Total cost recorded since process start
    pub fn lifetime_cost(&self) -> u64 {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).lifetime_cost
    }

    pub fn status(&self) -> BudgetStatus {
        self.status_at(Utc::now())
    }

    pub fn status_at(&self, now: DateTime<Utc>) -> BudgetStatus {
        let state = self.lock_at(now);
        let used_pct = if state.budget_cost == 0 {
            100.0
        } else {
            state.used_cost as f64 / state.budget_cost as f64 * 100.0
        };
        let ceiling = state.budget_cost.saturating_add(self.reserve);

        BudgetStatus {
            used_cost: state.used_cost,
            budget_cost: state.budget_cost,
            used_pct,
            degraded: state.used_cost >= state.budget_cost,
            reserve_remaining: ceiling.saturating_sub(state.used_cost.max(state.budget_cost)),
            alert_levels_fired: state.alert_levels_fired.iter().copied().collect(),
            day: state.day,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn monitor(budget: u64) -> (BudgetMonitor, DateTime<Utc>) {
        let start = Utc.with_ymd_and_hms(2026, 3, 14, 9, 0, 0).unwrap();
        let config = BudgetConfig {
            daily_budget: budget,
            ..Default::default()
        };
        (BudgetMonitor::starting_at(config, start), start)
    }

    #[test]
    fn test_threshold_fires_once() {
        let (budget, now) = monitor(1000);
        budget.record_cost_at(500, now);
        budget.record_cost_at(301, now);
        assert_eq!(budget.check_thresholds_at(now), vec![80]);

        budget.record_cost_at(49, now);
        assert!(budget.check_thresholds_at(now).is_empty());
    }

    #[test]
    fn test_multiple_levels_cross_at_once() {
        let (budget, now) = monitor(1000);
        budget.record_cost_at(1200, now);
        assert_eq!(budget.check_thresholds_at(now), vec![80, 95, 100]);
        assert!(budget.check_thresholds_at(now).is_empty());
        assert!(budget.is_degraded_at(now));
    }

    #[test]
    fn test_day_rollover_resets() {
        let (budget, now) = monitor(1000);
        budget.record_cost_at(1000, now);
        assert_eq!(budget.check_thresholds_at(now), vec![80, 95, 100]);

        let tomorrow = now + Duration::days(1);
        assert!(!budget.is_degraded_at(tomorrow));
        budget.record_cost_at(850, tomorrow);
        assert_eq!(budget.check_thresholds_at(tomorrow), vec![80]);
        assert_eq!(budget.lifetime_cost(), 1850);
    }

    #[test]
    fn test_degraded_admission() {
        let (budget, now) = monitor(1000);
        // Reserve is 5% = 50 units
        assert!(budget.admit_at(Priority::Low, CallKind::Individual, 10, now));

        budget.record_cost_at(1000, now);
        assert!(!budget.admit_at(Priority::Low, CallKind::Individual, 10, now));
        assert!(!budget.admit_at(Priority::Low, CallKind::Batch, 10, now));
        assert!(!budget.admit_at(Priority::Normal, CallKind::Individual, 10, now));
        assert!(budget.admit_at(Priority::Normal, CallKind::Batch, 10, now));
        assert!(budget.admit_at(Priority::High, CallKind::Individual, 50, now));
        assert!(!budget.admit_at(Priority::High, CallKind::Individual, 51, now));

        budget.record_cost_at(45, now);
        assert!(!budget.admit_at(Priority::High, CallKind::Individual, 10, now));
        assert_eq!(budget.status_at(now).reserve_remaining, 5);
    }

    #[test]
    fn test_status_snapshot() {
        let (budget, now) = monitor(2000);
        budget.record_cost_at(500, now);
        let status = budget.status_at(now);
        assert_eq!(status.used_cost, 500);
        assert_eq!(status.used_pct, 25.0);
        assert!(!status.degraded);
        assert_eq!(status.reserve_remaining, 100);
    }

    #[tokio::test]
    async fn test_concurrent_recording() {
        let budget = std::sync::Arc::new(BudgetMonitor::new(BudgetConfig::default()));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let b = budget.clone();
            handles.push(tokio::spawn(async move {
                for _ in 0..100 {
                    b.record_cost(1);
                }
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(budget.lifetime_cost(), 800);
    }
}

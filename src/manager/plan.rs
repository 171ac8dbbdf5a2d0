//! Cellular data plan snapshots
//!
//! Plans arrive from the carrier as immutable records; all derived values
//! (remaining time, remaining bytes, warning level) are pure functions over a
//! snapshot and an explicit `now`, so they stay consistent however often the
//! owning service mutates around them.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CellularDataPlanType {
    Unlimited,
    MeteredPaid,
    MeteredBase,
}

impl CellularDataPlanType {
    fn as_str(self) -> &'static str {
        match self {
            CellularDataPlanType::Unlimited => "unlimited",
            CellularDataPlanType::MeteredPaid => "metered-paid",
            CellularDataPlanType::MeteredBase => "metered-base",
        }
    }
}

/// How much of a plan is left, for warning badges.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataLeft {
    #[default]
    Unknown,
    Normal,
    Low,
    VeryLow,
    None,
}

/// Warning thresholds for remaining plan usage. Fixed defaults, overridable
/// by the embedding application.
#[derive(Debug, Clone)]
pub struct PlanThresholds {
    pub low_time: Duration,
    pub very_low_time: Duration,
    pub low_bytes: u64,
    pub very_low_bytes: u64,
}

impl Default for PlanThresholds {
    fn default() -> Self {
        Self {
            low_time: Duration::hours(1),
            very_low_time: Duration::minutes(30),
            low_bytes: 100 * 1024 * 1024,
            very_low_bytes: 50 * 1024 * 1024,
        }
    }
}

/// Immutable snapshot of one carrier data plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellularDataPlan {
    pub plan_name: String,
    pub plan_type: CellularDataPlanType,
    pub update_time: DateTime<Utc>,
    pub plan_start_time: DateTime<Utc>,
    pub plan_end_time: DateTime<Utc>,
    pub plan_data_bytes: u64,
    pub data_bytes_used: u64,
}

impl CellularDataPlan {
    /// Time until the plan expires, clamped at zero.
    pub fn remaining_time(&self, now: DateTime<Utc>) -> Duration {
        let remaining = self.plan_end_time - now;
        if remaining < Duration::zero() {
            Duration::zero()
        } else {
            remaining
        }
    }

    /// Bytes left on the plan, clamped at zero.
    pub fn remaining_data(&self) -> u64 {
        self.plan_data_bytes.saturating_sub(self.data_bytes_used)
    }

    /// Deduplication key: a plan is uniquely described by the union of name,
    /// type, start, end and quota.
    pub fn unique_identifier(&self) -> String {
        format!(
            "{}|{}|{}|{}|{}",
            self.plan_name,
            self.plan_type.as_str(),
            self.plan_start_time.timestamp(),
            self.plan_end_time.timestamp(),
            self.plan_data_bytes
        )
    }

    /// Classify remaining usage against the warning thresholds. Time-based
    /// plans are judged on remaining time, metered plans on remaining bytes.
    pub fn data_left(&self, now: DateTime<Utc>, thresholds: &PlanThresholds) -> DataLeft {
        match self.plan_type {
            CellularDataPlanType::Unlimited => {
                let remaining = self.remaining_time(now);
                if remaining <= Duration::zero() {
                    DataLeft::None
                } else if remaining <= thresholds.very_low_time {
                    DataLeft::VeryLow
                } else if remaining <= thresholds.low_time {
                    DataLeft::Low
                } else {
                    DataLeft::Normal
                }
            }
            CellularDataPlanType::MeteredPaid | CellularDataPlanType::MeteredBase => {
                let remaining = self.remaining_data();
                if remaining == 0 {
                    DataLeft::None
                } else if remaining <= thresholds.very_low_bytes {
                    DataLeft::VeryLow
                } else if remaining <= thresholds.low_bytes {
                    DataLeft::Low
                } else {
                    DataLeft::Normal
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metered(quota: u64, used: u64) -> CellularDataPlan {
        let now = Utc::now();
        CellularDataPlan {
            plan_name: "Day Pass".to_string(),
            plan_type: CellularDataPlanType::MeteredPaid,
            update_time: now,
            plan_start_time: now - Duration::days(1),
            plan_end_time: now + Duration::days(29),
            plan_data_bytes: quota,
            data_bytes_used: used,
        }
    }

    #[test]
    fn test_remaining_data_clamps_at_zero() {
        assert_eq!(metered(1000, 1200).remaining_data(), 0);
        assert_eq!(metered(1000, 400).remaining_data(), 600);
    }

    #[test]
    fn test_remaining_time_clamps_at_zero() {
        let now = Utc::now();
        let mut plan = metered(1000, 0);
        plan.plan_end_time = now - Duration::hours(2);
        assert_eq!(plan.remaining_time(now), Duration::zero());
    }

    #[test]
    fn test_data_left_metered_levels() {
        let now = Utc::now();
        let thresholds = PlanThresholds::default();
        assert_eq!(
            metered(1024 * 1024 * 1024, 0).data_left(now, &thresholds),
            DataLeft::Normal
        );
        assert_eq!(
            metered(1024 * 1024 * 1024, 950 * 1024 * 1024).data_left(now, &thresholds),
            DataLeft::Low
        );
        assert_eq!(
            metered(1024 * 1024 * 1024, 1000 * 1024 * 1024).data_left(now, &thresholds),
            DataLeft::VeryLow
        );
        assert_eq!(
            metered(1000, 1000).data_left(now, &thresholds),
            DataLeft::None
        );
    }

    #[test]
    fn test_data_left_time_based_levels() {
        let now = Utc::now();
        let thresholds = PlanThresholds::default();
        let mut plan = metered(0, 0);
        plan.plan_type = CellularDataPlanType::Unlimited;

        plan.plan_end_time = now + Duration::days(3);
        assert_eq!(plan.data_left(now, &thresholds), DataLeft::Normal);

        plan.plan_end_time = now + Duration::minutes(45);
        assert_eq!(plan.data_left(now, &thresholds), DataLeft::Low);

        plan.plan_end_time = now + Duration::minutes(10);
        assert_eq!(plan.data_left(now, &thresholds), DataLeft::VeryLow);

        plan.plan_end_time = now - Duration::minutes(1);
        assert_eq!(plan.data_left(now, &thresholds), DataLeft::None);
    }

    #[test]
    fn test_unique_identifier_distinguishes_quota() {
        let a = metered(1000, 0);
        let mut b = a.clone();
        b.data_bytes_used = 500;
        assert_eq!(a.unique_identifier(), b.unique_identifier());
        b.plan_data_bytes = 2000;
        assert_ne!(a.unique_identifier(), b.unique_identifier());
    }
}

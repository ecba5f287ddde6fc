//! Independent expense anomaly detectors and the aggregator that fans out over them.
//!
//! Every detector reads the same immutable [`DetectionInput`] and reports zero or more
//! findings. A detector that fails is isolated by the aggregator; the others still report.

pub mod aggregator;
pub mod amount;
pub mod category;
pub mod duplicate;
pub mod frequency;
pub mod geographic;
pub mod policy;
pub mod receipt;
pub mod vendor;

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::anomaly::{AnomalyFinding, AnomalyType};
use crate::domain::expense::Expense;
use crate::domain::policy::CompanyPolicy;
use crate::errors::DetectorError;

pub use aggregator::{AggregateReport, AnomalyAggregator, DetectorFailure};

pub trait AnomalyDetector: Send + Sync {
    fn kind(&self) -> AnomalyType;

    fn name(&self) -> &'static str {
        self.kind().as_str()
    }

    fn detect(&self, input: &DetectionInput) -> Result<Vec<AnomalyFinding>, DetectorError>;
}

/// Everything a detector may look at. History never contains the target expense.
#[derive(Clone, Debug)]
pub struct DetectionInput {
    pub expense: Expense,
    /// Submitter's prior expenses inside the widest detector look-back.
    pub history: Vec<Expense>,
    /// Submitter's prior expenses with the same vendor.
    pub vendor_history: Vec<Expense>,
    pub policy: CompanyPolicy,
    pub now: DateTime<Utc>,
}

impl DetectionInput {
    pub fn new(expense: Expense, policy: CompanyPolicy, now: DateTime<Utc>) -> Self {
        Self { expense, history: Vec::new(), vendor_history: Vec::new(), policy, now }
    }

    pub fn with_history(mut self, history: Vec<Expense>) -> Self {
        self.history = history;
        self
    }

    pub fn with_vendor_history(mut self, vendor_history: Vec<Expense>) -> Self {
        self.vendor_history = vendor_history;
        self
    }

    /// Prior expenses incurred within `days` before `now`.
    pub fn recent_history(&self, days: u32) -> impl Iterator<Item = &Expense> {
        let since = self.now - Duration::days(i64::from(days));
        let now = self.now;
        self.prior().filter(move |other| other.incurred_at >= since && other.incurred_at <= now)
    }

    pub fn prior(&self) -> impl Iterator<Item = &Expense> {
        self.history.iter().filter(move |other| other.id != self.expense.id)
    }
}

/// Detector thresholds. Defaults are the reference values; all are overridable from the
/// `[detection]` config section.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorSettings {
    pub history_lookback_days: u32,
    pub vendor_lookback_days: u32,

    pub duplicate_window_hours: u32,
    pub duplicate_amount_tolerance_pct: f64,
    pub duplicate_exact_window_hours: u32,

    pub amount_absolute_high: Decimal,
    pub amount_absolute_low: Decimal,
    pub amount_window_days: u32,
    pub amount_min_samples: usize,
    pub amount_z_flag: f64,
    pub amount_z_high: f64,
    pub amount_relative_deviation_pct: f64,

    pub vendor_blacklist: Vec<String>,
    pub vendor_min_length: usize,

    pub daily_submission_cap: usize,
    pub weekly_submission_cap: usize,

    pub geo_window_days: u32,
    pub geo_min_points: usize,
    pub geo_flag_km: f64,
    pub geo_high_km: f64,

    pub receipt_amount_tolerance: Decimal,
    pub receipt_date_tolerance_days: i64,
    pub receipt_vendor_similarity_floor: f64,
    pub receipt_ocr_confidence_floor: f64,

    pub category_dominance_ratio: f64,
    pub category_min_samples: usize,
}

impl Default for DetectorSettings {
    fn default() -> Self {
        Self {
            history_lookback_days: 30,
            vendor_lookback_days: 180,
            duplicate_window_hours: 24,
            duplicate_amount_tolerance_pct: 10.0,
            duplicate_exact_window_hours: 12,
            amount_absolute_high: Decimal::new(10_000, 0),
            amount_absolute_low: Decimal::new(1, 2),
            amount_window_days: 30,
            amount_min_samples: 5,
            amount_z_flag: 3.0,
            amount_z_high: 4.0,
            amount_relative_deviation_pct: 200.0,
            vendor_blacklist: vec!["cash".to_string(), "personal".to_string(), "unknown".to_string()],
            vendor_min_length: 3,
            daily_submission_cap: 10,
            weekly_submission_cap: 30,
            geo_window_days: 30,
            geo_min_points: 3,
            geo_flag_km: 100.0,
            geo_high_km: 500.0,
            receipt_amount_tolerance: Decimal::new(1, 2),
            receipt_date_tolerance_days: 1,
            receipt_vendor_similarity_floor: 0.6,
            receipt_ocr_confidence_floor: 50.0,
            category_dominance_ratio: 0.7,
            category_min_samples: 2,
        }
    }
}

impl DetectorSettings {
    /// Widest window any history-based detector reads, in days.
    pub fn max_history_days(&self) -> u32 {
        let duplicate_days = self.duplicate_window_hours.div_ceil(24);
        self.history_lookback_days
            .max(self.amount_window_days)
            .max(self.geo_window_days)
            .max(7)
            .max(duplicate_days)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.amount_absolute_low > self.amount_absolute_high {
            return Err("detection.amount_absolute_low must not exceed amount_absolute_high".into());
        }
        if self.duplicate_exact_window_hours > self.duplicate_window_hours {
            return Err(
                "detection.duplicate_exact_window_hours must not exceed duplicate_window_hours"
                    .into(),
            );
        }
        if self.amount_z_high < self.amount_z_flag {
            return Err("detection.amount_z_high must be at least amount_z_flag".into());
        }
        if self.geo_high_km < self.geo_flag_km {
            return Err("detection.geo_high_km must be at least geo_flag_km".into());
        }
        if !(0.0..=1.0).contains(&self.receipt_vendor_similarity_floor) {
            return Err("detection.receipt_vendor_similarity_floor must be between 0 and 1".into());
        }
        if !(0.0..=1.0).contains(&self.category_dominance_ratio) {
            return Err("detection.category_dominance_ratio must be between 0 and 1".into());
        }
        if self.amount_min_samples < 2 {
            return Err("detection.amount_min_samples must be at least 2".into());
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use rust_decimal::Decimal;

    use crate::domain::expense::{Expense, ExpenseId, ExpenseStatus};
    use crate::domain::policy::CompanyPolicy;
    use crate::domain::user::{CompanyId, UserId};

    use super::DetectionInput;

    pub fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 4, 15, 0, 0).single().expect("valid timestamp")
    }

    pub fn expense(id: &str, cents: i64, vendor: &str, incurred_at: DateTime<Utc>) -> Expense {
        let mut expense = Expense::draft(
            ExpenseId(id.to_string()),
            CompanyId("acme".to_string()),
            UserId("emp-1".to_string()),
            Decimal::new(cents, 2),
            "Meals",
            vendor,
            incurred_at,
            incurred_at,
        );
        expense.status = ExpenseStatus::Submitted;
        expense.submitted_at = Some(incurred_at);
        expense
    }

    pub fn days_ago(days: i64) -> DateTime<Utc> {
        now() - Duration::days(days)
    }

    pub fn input(expense: Expense, history: Vec<Expense>) -> DetectionInput {
        DetectionInput::new(expense, CompanyPolicy::new(CompanyId("acme".to_string())), now())
            .with_history(history)
    }
}

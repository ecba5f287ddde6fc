use chrono::Duration;
use rust_decimal::Decimal;
use serde_json::json;

use super::{AnomalyDetector, DetectionInput, DetectorSettings};
use crate::domain::anomaly::{AnomalyFinding, AnomalyType, Severity};
use crate::domain::expense::Expense;
use crate::errors::DetectorError;
use crate::stats::normalize_text;

/// Flags prior expenses near the same date that look like the same charge.
#[derive(Clone, Debug)]
pub struct DuplicateDetector {
    window: Duration,
    exact_window: Duration,
    amount_tolerance_pct: Decimal,
}

impl DuplicateDetector {
    pub fn new(settings: &DetectorSettings) -> Self {
        Self {
            window: Duration::hours(i64::from(settings.duplicate_window_hours)),
            exact_window: Duration::hours(i64::from(settings.duplicate_exact_window_hours)),
            amount_tolerance_pct: Decimal::try_from(settings.duplicate_amount_tolerance_pct)
                .unwrap_or(Decimal::TEN),
        }
    }

    fn is_candidate(&self, target: &Expense, other: &Expense) -> bool {
        if time_gap(target, other) > self.window {
            return false;
        }

        let same_amount = other.amount == target.amount;
        let same_vendor = normalize_text(&other.vendor) == normalize_text(&target.vendor);
        let same_day = other.incurred_at.date_naive() == target.incurred_at.date_naive();
        let same_category = other.category.trim().eq_ignore_ascii_case(target.category.trim());

        same_amount
            || (same_vendor && self.within_tolerance(target.amount, other.amount))
            || (same_category && same_amount && same_day)
    }

    /// Same amount and vendor within the exact window, measured as elapsed time.
    fn is_exact(&self, target: &Expense, other: &Expense) -> bool {
        other.amount == target.amount
            && normalize_text(&other.vendor) == normalize_text(&target.vendor)
            && time_gap(target, other) <= self.exact_window
    }

    fn within_tolerance(&self, base: Decimal, other: Decimal) -> bool {
        if base.is_zero() {
            return other.is_zero();
        }
        let deviation = ((other - base) / base).abs() * Decimal::ONE_HUNDRED;
        deviation <= self.amount_tolerance_pct
    }
}

fn time_gap(left: &Expense, right: &Expense) -> Duration {
    if left.incurred_at >= right.incurred_at {
        left.incurred_at - right.incurred_at
    } else {
        right.incurred_at - left.incurred_at
    }
}

impl AnomalyDetector for DuplicateDetector {
    fn kind(&self) -> AnomalyType {
        AnomalyType::Duplicate
    }

    fn detect(&self, input: &DetectionInput) -> Result<Vec<AnomalyFinding>, DetectorError> {
        let target = &input.expense;
        let matches: Vec<&Expense> =
            input.prior().filter(|other| self.is_candidate(target, other)).collect();
        if matches.is_empty() {
            return Ok(Vec::new());
        }

        let exact: Vec<&Expense> =
            matches.iter().copied().filter(|other| self.is_exact(target, other)).collect();
        let (severity, confidence) =
            if exact.is_empty() { (Severity::Medium, 70.0) } else { (Severity::High, 95.0) };

        let description = if exact.is_empty() {
            format!("{} similar expense(s) within 24 hours of this one", matches.len())
        } else {
            format!(
                "expense matches {} prior charge(s) with the same amount and vendor",
                exact.len()
            )
        };

        let match_ids: Vec<&str> = matches.iter().map(|other| other.id.0.as_str()).collect();
        Ok(vec![AnomalyFinding::new(
            AnomalyType::Duplicate,
            severity,
            confidence,
            description,
            input.now,
        )
        .with_metadata("matching_expense_ids", json!(match_ids))
        .with_metadata("exact_match", !exact.is_empty())
        .with_metadata("match_count", matches.len())])
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};

    use super::DuplicateDetector;
    use crate::anomaly::testing::{days_ago, expense, input};
    use crate::anomaly::{AnomalyDetector, DetectorSettings};
    use crate::domain::anomaly::{AnomalyType, Severity};

    fn detector() -> DuplicateDetector {
        DuplicateDetector::new(&DetectorSettings::default())
    }

    #[test]
    fn same_charge_two_hours_apart_is_one_high_finding() {
        let at = days_ago(1);
        let target = expense("EXP-2", 4_250, "Blue Bottle Coffee", at + Duration::hours(2));
        let earlier = expense("EXP-1", 4_250, "Blue Bottle Coffee", at);

        let findings = detector().detect(&input(target, vec![earlier])).expect("detect");

        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].anomaly_type, AnomalyType::Duplicate);
        assert_eq!(findings[0].severity, Severity::High);
    }

    #[test]
    fn same_charge_across_midnight_is_still_high() {
        let before_midnight =
            Utc.with_ymd_and_hms(2026, 3, 3, 23, 0, 0).single().expect("valid timestamp");
        let target =
            expense("EXP-2", 4_250, "Blue Bottle Coffee", before_midnight + Duration::hours(2));
        let earlier = expense("EXP-1", 4_250, "Blue Bottle Coffee", before_midnight);

        let findings = detector().detect(&input(target, vec![earlier])).expect("detect");

        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].severity, Severity::High);
    }

    #[test]
    fn same_charge_beyond_exact_window_is_medium() {
        let at = days_ago(2);
        let target = expense("EXP-2", 4_250, "Blue Bottle Coffee", at + Duration::hours(13));
        let earlier = expense("EXP-1", 4_250, "Blue Bottle Coffee", at);

        let findings = detector().detect(&input(target, vec![earlier])).expect("detect");

        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].severity, Severity::Medium);
    }

    #[test]
    fn similar_vendor_amount_is_medium() {
        let at = days_ago(1);
        let target = expense("EXP-2", 10_500, "Uber", at + Duration::hours(5));
        let earlier = expense("EXP-1", 10_000, "uber", at);

        let findings = detector().detect(&input(target, vec![earlier])).expect("detect");

        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].severity, Severity::Medium);
        assert_eq!(findings[0].metadata_f64("match_count"), Some(1.0));
    }

    #[test]
    fn charges_outside_window_are_ignored() {
        let target = expense("EXP-2", 4_250, "Blue Bottle Coffee", days_ago(1));
        let earlier = expense("EXP-1", 4_250, "Blue Bottle Coffee", days_ago(3));

        let findings = detector().detect(&input(target, vec![earlier])).expect("detect");

        assert!(findings.is_empty());
    }

    #[test]
    fn different_vendor_and_amount_is_not_a_duplicate() {
        let at = days_ago(1);
        let target = expense("EXP-2", 4_250, "Blue Bottle Coffee", at);
        let earlier = expense("EXP-1", 9_000, "Hertz", at + Duration::hours(1));

        assert!(detector().detect(&input(target, vec![earlier])).expect("detect").is_empty());
    }
}

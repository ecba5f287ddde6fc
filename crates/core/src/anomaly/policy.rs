use chrono::{Datelike, Weekday};

use super::{AnomalyDetector, DetectionInput};
use crate::domain::anomaly::{AnomalyFinding, AnomalyType, Severity};
use crate::domain::policy::WeekendPolicy;
use crate::errors::DetectorError;
use crate::stats::decimal_to_f64;

/// Checks the expense against company policy; each broken rule is its own finding.
#[derive(Clone, Debug, Default)]
pub struct PolicyViolationDetector;

impl PolicyViolationDetector {
    fn violation(
        input: &DetectionInput,
        kind: &'static str,
        severity: Severity,
        description: String,
    ) -> AnomalyFinding {
        AnomalyFinding::new(AnomalyType::PolicyViolation, severity, 100.0, description, input.now)
            .with_metadata("violation", kind)
    }
}

impl AnomalyDetector for PolicyViolationDetector {
    fn kind(&self) -> AnomalyType {
        AnomalyType::PolicyViolation
    }

    fn detect(&self, input: &DetectionInput) -> Result<Vec<AnomalyFinding>, DetectorError> {
        let expense = &input.expense;
        let policy = &input.policy;
        let mut findings = Vec::new();

        let age_days = (input.now - expense.incurred_at).num_days();
        if age_days > i64::from(policy.late_submission_days) {
            findings.push(
                Self::violation(
                    input,
                    "late_submission",
                    Severity::Medium,
                    format!(
                        "submitted {age_days} days after the expense date (window {} days)",
                        policy.late_submission_days
                    ),
                )
                .with_metadata("age_days", age_days),
            );
        }

        let weekday = expense.incurred_at.weekday();
        if policy.weekend_policy == WeekendPolicy::Flag
            && !expense.is_personal
            && matches!(weekday, Weekday::Sat | Weekday::Sun)
        {
            findings.push(
                Self::violation(
                    input,
                    "weekend_submission",
                    Severity::Low,
                    format!("business expense incurred on a {weekday}"),
                )
                .with_metadata("weekday", weekday.to_string()),
            );
        }

        if let Some(category) = policy.category(&expense.category) {
            if category.receipt_required && expense.receipts.is_empty() {
                findings.push(Self::violation(
                    input,
                    "missing_receipt",
                    Severity::Medium,
                    format!("category `{}` requires a receipt", category.name),
                ));
            }

            if let Some(max_amount) = category.max_amount {
                if expense.amount > max_amount {
                    findings.push(
                        Self::violation(
                            input,
                            "category_max_exceeded",
                            Severity::High,
                            format!(
                                "amount {} exceeds the `{}` limit of {max_amount}",
                                expense.amount, category.name
                            ),
                        )
                        .with_metadata("max_amount", decimal_to_f64(max_amount)),
                    );
                }
            }
        }

        Ok(findings)
    }
}

use rust_decimal::Decimal;

use super::{AnomalyDetector, DetectionInput, DetectorSettings};
use crate::domain::anomaly::{AnomalyFinding, AnomalyType, Severity};
use crate::errors::DetectorError;
use crate::stats::{decimal_to_f64, DistributionStats};

/// Absolute bounds plus a z-score test against the submitter's recent spending.
///
/// The absolute and statistical checks are independent; an amount can raise both.
#[derive(Clone, Debug)]
pub struct UnusualAmountDetector {
    absolute_high: Decimal,
    absolute_low: Decimal,
    window_days: u32,
    min_samples: usize,
    z_flag: f64,
    z_high: f64,
    relative_deviation_pct: f64,
}

impl UnusualAmountDetector {
    pub fn new(settings: &DetectorSettings) -> Self {
        Self {
            absolute_high: settings.amount_absolute_high,
            absolute_low: settings.amount_absolute_low,
            window_days: settings.amount_window_days,
            min_samples: settings.amount_min_samples,
            z_flag: settings.amount_z_flag,
            z_high: settings.amount_z_high,
            relative_deviation_pct: settings.amount_relative_deviation_pct,
        }
    }

    fn absolute_finding(&self, input: &DetectionInput) -> Option<AnomalyFinding> {
        let amount = input.expense.amount;
        let (description, bound, confidence) = if amount > self.absolute_high {
            (format!("amount {amount} exceeds the absolute ceiling {}", self.absolute_high), "high", 70.0)
        } else if amount < self.absolute_low {
            (format!("amount {amount} is below the absolute floor {}", self.absolute_low), "low", 90.0)
        } else {
            return None;
        };

        Some(
            AnomalyFinding::new(
                AnomalyType::UnusualAmount,
                Severity::Medium,
                confidence,
                description,
                input.now,
            )
            .with_metadata("check", "absolute")
            .with_metadata("bound", bound)
            .with_metadata("amount", decimal_to_f64(amount)),
        )
    }

    fn statistical_finding(&self, input: &DetectionInput) -> Option<AnomalyFinding> {
        let samples: Vec<f64> = input
            .recent_history(self.window_days)
            .map(|other| decimal_to_f64(other.amount))
            .collect();
        if samples.len() < self.min_samples {
            return None;
        }

        let stats = DistributionStats::from_samples(&samples)?;
        let amount = decimal_to_f64(input.expense.amount);
        let z_score = stats.z_score(amount);
        let relative = stats.relative_deviation_pct(amount);

        let z_flagged = z_score.is_some_and(|z| z > self.z_flag);
        let relative_flagged = relative.is_some_and(|pct| pct > self.relative_deviation_pct);
        if !z_flagged && !relative_flagged {
            return None;
        }

        let (severity, confidence) = match z_score {
            Some(z) => {
                let severity = if z > self.z_high { Severity::High } else { Severity::Medium };
                (severity, (50.0 + z * 10.0).min(95.0))
            }
            // Zero spread: every prior amount was identical.
            None => {
                let doubled = relative.is_some_and(|pct| pct > self.relative_deviation_pct * 2.0);
                (if doubled { Severity::High } else { Severity::Medium }, 90.0)
            }
        };

        let mut finding = AnomalyFinding::new(
            AnomalyType::UnusualAmount,
            severity,
            confidence,
            format!(
                "amount {:.2} deviates from the {}-day average of {:.2}",
                amount, self.window_days, stats.mean
            ),
            input.now,
        )
        .with_metadata("check", "statistical")
        .with_metadata("mean", stats.mean)
        .with_metadata("std_dev", stats.std_dev)
        .with_metadata("sample_count", stats.sample_count);
        if let Some(z) = z_score {
            finding = finding.with_metadata("z_score", z);
        }
        if let Some(pct) = relative {
            finding = finding.with_metadata("relative_deviation_pct", pct);
        }
        Some(finding)
    }
}

impl AnomalyDetector for UnusualAmountDetector {
    fn kind(&self) -> AnomalyType {
        AnomalyType::UnusualAmount
    }

    fn detect(&self, input: &DetectionInput) -> Result<Vec<AnomalyFinding>, DetectorError> {
        Ok(self
            .absolute_finding(input)
            .into_iter()
            .chain(self.statistical_finding(input))
            .collect())
    }
}

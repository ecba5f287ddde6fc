use chrono::Duration;

use super::{AnomalyDetector, DetectionInput, DetectorSettings};
use crate::domain::anomaly::{AnomalyFinding, AnomalyType, Severity};
use crate::errors::DetectorError;

/// Submission velocity over the trailing day and week, counting the expense being submitted.
#[derive(Clone, Debug)]
pub struct FrequentSubmissionDetector {
    daily_cap: usize,
    weekly_cap: usize,
}

impl FrequentSubmissionDetector {
    pub fn new(settings: &DetectorSettings) -> Self {
        Self { daily_cap: settings.daily_submission_cap, weekly_cap: settings.weekly_submission_cap }
    }

    fn submitted_within(input: &DetectionInput, window: Duration) -> usize {
        let since = input.now - window;
        let prior = input
            .prior()
            .filter(|other| {
                let submitted = other.submission_time();
                submitted > since && submitted <= input.now
            })
            .count();
        prior + 1
    }
}

impl AnomalyDetector for FrequentSubmissionDetector {
    fn kind(&self) -> AnomalyType {
        AnomalyType::FrequentSubmission
    }

    fn detect(&self, input: &DetectionInput) -> Result<Vec<AnomalyFinding>, DetectorError> {
        let mut findings = Vec::new();

        let daily = Self::submitted_within(input, Duration::hours(24));
        if daily > self.daily_cap {
            findings.push(
                AnomalyFinding::new(
                    AnomalyType::FrequentSubmission,
                    Severity::Medium,
                    (60.0 + (daily - self.daily_cap) as f64 * 5.0).min(95.0),
                    format!("{daily} expenses submitted in the last 24 hours (cap {})", self.daily_cap),
                    input.now,
                )
                .with_metadata("window", "daily")
                .with_metadata("count", daily)
                .with_metadata("cap", self.daily_cap),
            );
        }

        let weekly = Self::submitted_within(input, Duration::days(7));
        if weekly > self.weekly_cap {
            findings.push(
                AnomalyFinding::new(
                    AnomalyType::FrequentSubmission,
                    Severity::High,
                    (60.0 + (weekly - self.weekly_cap) as f64 * 2.0).min(95.0),
                    format!("{weekly} expenses submitted in the last 7 days (cap {})", self.weekly_cap),
                    input.now,
                )
                .with_metadata("window", "weekly")
                .with_metadata("count", weekly)
                .with_metadata("cap", self.weekly_cap),
            );
        }

        Ok(findings)
    }
}

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::amount::UnusualAmountDetector;
use super::category::CategoryConsistencyDetector;
use super::duplicate::DuplicateDetector;
use super::frequency::FrequentSubmissionDetector;
use super::geographic::GeographicDetector;
use super::policy::PolicyViolationDetector;
use super::receipt::ReceiptAnomalyDetector;
use super::vendor::SuspiciousVendorDetector;
use super::{AnomalyDetector, DetectionInput, DetectorSettings};
use crate::domain::anomaly::{max_severity, risk_score, sort_by_severity, AnomalyFinding, Severity};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectorFailure {
    pub detector: String,
    pub message: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregateReport {
    /// Most severe first; ties keep detector registration order.
    pub findings: Vec<AnomalyFinding>,
    pub failures: Vec<DetectorFailure>,
}

impl AggregateReport {
    pub fn max_severity(&self) -> Option<Severity> {
        max_severity(&self.findings)
    }

    /// 0 to 100, higher means riskier.
    pub fn risk_score(&self) -> u8 {
        risk_score(&self.findings)
    }

    pub fn requires_escalation(&self) -> bool {
        self.max_severity().is_some_and(|severity| severity.requires_escalation())
    }
}

/// Runs every registered detector as its own task and merges what comes back.
#[derive(Clone)]
pub struct AnomalyAggregator {
    detectors: Vec<Arc<dyn AnomalyDetector>>,
}

impl AnomalyAggregator {
    pub fn new(detectors: Vec<Arc<dyn AnomalyDetector>>) -> Self {
        Self { detectors }
    }

    /// All eight built-in detectors.
    pub fn standard(settings: &DetectorSettings) -> Self {
        Self::new(vec![
            Arc::new(DuplicateDetector::new(settings)),
            Arc::new(UnusualAmountDetector::new(settings)),
            Arc::new(SuspiciousVendorDetector::new(settings)),
            Arc::new(FrequentSubmissionDetector::new(settings)),
            Arc::new(PolicyViolationDetector),
            Arc::new(GeographicDetector::new(settings)),
            Arc::new(ReceiptAnomalyDetector::new(settings)),
            Arc::new(CategoryConsistencyDetector::new(settings)),
        ])
    }

    pub fn detector_names(&self) -> Vec<&'static str> {
        self.detectors.iter().map(|detector| detector.name()).collect()
    }

    pub async fn run(&self, input: DetectionInput) -> AggregateReport {
        let input = Arc::new(input);
        let handles: Vec<_> = self
            .detectors
            .iter()
            .map(|detector| {
                let detector = Arc::clone(detector);
                let input = Arc::clone(&input);
                let name = detector.name();
                (name, tokio::spawn(async move { detector.detect(&input) }))
            })
            .collect();

        let mut report = AggregateReport::default();
        for (name, handle) in handles {
            let message = match handle.await {
                Ok(Ok(findings)) => {
                    debug!(
                        event_name = "anomaly.detector.completed",
                        expense_id = %input.expense.id,
                        detector = name,
                        finding_count = findings.len(),
                        "detector completed"
                    );
                    report.findings.extend(findings);
                    continue;
                }
                Ok(Err(error)) => error.to_string(),
                Err(join_error) if join_error.is_panic() => "detector panicked".to_string(),
                Err(join_error) => join_error.to_string(),
            };

            warn!(
                event_name = "anomaly.detector.failed",
                expense_id = %input.expense.id,
                detector = name,
                error = %message,
                "detector failed; its findings are excluded"
            );
            report.failures.push(DetectorFailure { detector: name.to_string(), message });
        }

        // Stable: equal severities keep detector order.
        sort_by_severity(&mut report.findings);
        report
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Duration;

    use super::AnomalyAggregator;
    use crate::anomaly::testing::{days_ago, expense, input, now};
    use crate::anomaly::{AnomalyDetector, DetectionInput, DetectorSettings};
    use crate::domain::anomaly::{AnomalyFinding, AnomalyType, Severity};
    use crate::errors::DetectorError;

    struct Broken;

    impl AnomalyDetector for Broken {
        fn kind(&self) -> AnomalyType {
            AnomalyType::ReceiptAnomaly
        }

        fn detect(&self, _input: &DetectionInput) -> Result<Vec<AnomalyFinding>, DetectorError> {
            Err(DetectorError::Failed("ocr payload unreadable".to_string()))
        }
    }

    struct Panicking;

    impl AnomalyDetector for Panicking {
        fn kind(&self) -> AnomalyType {
            AnomalyType::GeographicAnomaly
        }

        fn detect(&self, _input: &DetectionInput) -> Result<Vec<AnomalyFinding>, DetectorError> {
            panic!("boom")
        }
    }

    struct Fixed(Severity);

    impl AnomalyDetector for Fixed {
        fn kind(&self) -> AnomalyType {
            AnomalyType::PolicyViolation
        }

        fn detect(&self, input: &DetectionInput) -> Result<Vec<AnomalyFinding>, DetectorError> {
            Ok(vec![AnomalyFinding::new(self.kind(), self.0, 80.0, "fixed", input.now)])
        }
    }

    #[tokio::test]
    async fn failing_detectors_are_isolated() {
        let aggregator = AnomalyAggregator::new(vec![
            Arc::new(Fixed(Severity::Low)),
            Arc::new(Broken),
            Arc::new(Panicking),
            Arc::new(Fixed(Severity::Critical)),
        ]);

        let report = aggregator.run(input(expense("EXP-1", 2_000, "Cafe", now()), Vec::new())).await;

        assert_eq!(report.findings.len(), 2);
        assert_eq!(report.findings[0].severity, Severity::Critical);
        assert_eq!(report.findings[1].severity, Severity::Low);
        assert_eq!(report.failures.len(), 2);
        assert_eq!(report.failures[0].detector, "receipt_anomaly");
        assert!(report.failures[0].message.contains("ocr payload unreadable"));
        assert_eq!(report.failures[1].detector, "geographic_anomaly");
        assert!(report.requires_escalation());
        assert_eq!(report.risk_score(), 72);
    }

    #[tokio::test]
    async fn standard_set_sorts_combined_findings_by_severity() {
        let at = days_ago(1);
        let target = expense("EXP-2", 4_250, "unknown", at + Duration::hours(2));
        let earlier = expense("EXP-1", 4_250, "unknown", at);
        let aggregator = AnomalyAggregator::standard(&DetectorSettings::default());
        assert_eq!(aggregator.detector_names().len(), 8);

        let report = aggregator.run(input(target, vec![earlier])).await;

        let kinds: Vec<_> = report.findings.iter().map(|finding| finding.anomaly_type).collect();
        assert_eq!(kinds, vec![AnomalyType::Duplicate, AnomalyType::SuspiciousVendor]);
        assert_eq!(report.max_severity(), Some(Severity::High));
        assert!(report.failures.is_empty());
    }
}

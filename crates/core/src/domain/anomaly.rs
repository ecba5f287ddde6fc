use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::domain::user::UserId;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FindingId(pub String);

impl fmt::Display for FindingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyType {
    Duplicate,
    UnusualAmount,
    SuspiciousVendor,
    FrequentSubmission,
    PolicyViolation,
    GeographicAnomaly,
    ReceiptAnomaly,
    CategoryInconsistency,
}

impl AnomalyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Duplicate => "duplicate",
            Self::UnusualAmount => "unusual_amount",
            Self::SuspiciousVendor => "suspicious_vendor",
            Self::FrequentSubmission => "frequent_submission",
            Self::PolicyViolation => "policy_violation",
            Self::GeographicAnomaly => "geographic_anomaly",
            Self::ReceiptAnomaly => "receipt_anomaly",
            Self::CategoryInconsistency => "category_inconsistency",
        }
    }
}

/// Ordered so that `Critical` compares greatest.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }

    /// High and critical findings pull admins into the approval flow.
    pub fn requires_escalation(&self) -> bool {
        *self >= Self::High
    }

    /// Points a fully confident finding adds to the risk score.
    pub fn risk_weight(&self) -> f64 {
        match self {
            Self::Low => 10.0,
            Self::Medium => 25.0,
            Self::High => 50.0,
            Self::Critical => 80.0,
        }
    }
}

/// One detector output. Immutable once attached to an expense.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AnomalyFinding {
    pub id: FindingId,
    pub anomaly_type: AnomalyType,
    pub severity: Severity,
    pub confidence: u8,
    pub description: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
    pub detected_at: DateTime<Utc>,
}

impl AnomalyFinding {
    pub fn new(
        anomaly_type: AnomalyType,
        severity: Severity,
        confidence: f64,
        description: impl Into<String>,
        detected_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: FindingId(Uuid::new_v4().to_string()),
            anomaly_type,
            severity,
            confidence: clamp_confidence(confidence),
            description: description.into(),
            metadata: BTreeMap::new(),
            detected_at,
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn metadata_f64(&self, key: &str) -> Option<f64> {
        self.metadata.get(key).and_then(Value::as_f64)
    }

    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(Value::as_str)
    }
}

/// Reviewer verdict attached next to a finding; the finding itself is never edited.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FindingResolution {
    pub finding_id: FindingId,
    pub resolved_by: UserId,
    pub note: String,
    pub dismissed: bool,
    pub resolved_at: DateTime<Utc>,
}

/// Stable sort, most severe first.
pub fn sort_by_severity(findings: &mut [AnomalyFinding]) {
    findings.sort_by(|left, right| right.severity.cmp(&left.severity));
}

pub fn max_severity(findings: &[AnomalyFinding]) -> Option<Severity> {
    findings.iter().map(|finding| finding.severity).max()
}

/// Sum of severity weights scaled by confidence, clamped to 0..=100.
pub fn risk_score(findings: &[AnomalyFinding]) -> u8 {
    let total: f64 = findings
        .iter()
        .map(|finding| finding.severity.risk_weight() * f64::from(finding.confidence) / 100.0)
        .sum();
    clamp_confidence(total)
}

fn clamp_confidence(confidence: f64) -> u8 {
    if confidence.is_nan() {
        return 0;
    }
    confidence.round().clamp(0.0, 100.0) as u8
}

use serde_json::json;

use super::{AnomalyDetector, DetectionInput, DetectorSettings};
use crate::domain::anomaly::{AnomalyFinding, AnomalyType, Severity};
use crate::errors::DetectorError;

#[derive(Clone, Debug)]
pub struct SuspiciousVendorDetector {
    blacklist: Vec<String>,
    min_length: usize,
}

impl SuspiciousVendorDetector {
    pub fn new(settings: &DetectorSettings) -> Self {
        Self {
            blacklist: settings
                .vendor_blacklist
                .iter()
                .map(|term| term.trim().to_lowercase())
                .filter(|term| !term.is_empty())
                .collect(),
            min_length: settings.vendor_min_length,
        }
    }
}

impl AnomalyDetector for SuspiciousVendorDetector {
    fn kind(&self) -> AnomalyType {
        AnomalyType::SuspiciousVendor
    }

    fn detect(&self, input: &DetectionInput) -> Result<Vec<AnomalyFinding>, DetectorError> {
        let vendor = input.expense.vendor.trim();
        let lowered = vendor.to_lowercase();
        let mut reasons = Vec::new();
        let mut severity = Severity::Low;

        let matched: Vec<&str> = self
            .blacklist
            .iter()
            .filter(|term| lowered.contains(term.as_str()))
            .map(String::as_str)
            .collect();
        if !matched.is_empty() {
            reasons.push("blacklisted_term");
            severity = Severity::Medium;
        }
        if vendor.chars().count() < self.min_length {
            reasons.push("too_short");
        }
        if !vendor.chars().any(char::is_alphabetic) {
            reasons.push("no_alphabetic_characters");
            severity = Severity::Medium;
        }

        if reasons.is_empty() {
            return Ok(Vec::new());
        }

        let confidence = 50.0 + 15.0 * reasons.len() as f64;
        Ok(vec![AnomalyFinding::new(
            AnomalyType::SuspiciousVendor,
            severity,
            confidence,
            format!("vendor `{vendor}` looks suspicious ({})", reasons.join(", ")),
            input.now,
        )
        .with_metadata("reasons", json!(reasons))
        .with_metadata("matched_terms", json!(matched))])
    }
}

use std::collections::BTreeMap;

use super::{AnomalyDetector, DetectionInput, DetectorSettings};
use crate::domain::anomaly::{AnomalyFinding, AnomalyType, Severity};
use crate::errors::DetectorError;
use crate::stats::normalize_text;

/// Flags a category that breaks from how this submitter usually files the same vendor.
#[derive(Clone, Debug)]
pub struct CategoryConsistencyDetector {
    dominance_ratio: f64,
    min_samples: usize,
}

impl CategoryConsistencyDetector {
    pub fn new(settings: &DetectorSettings) -> Self {
        Self {
            dominance_ratio: settings.category_dominance_ratio,
            min_samples: settings.category_min_samples,
        }
    }
}

impl AnomalyDetector for CategoryConsistencyDetector {
    fn kind(&self) -> AnomalyType {
        AnomalyType::CategoryInconsistency
    }

    fn detect(&self, input: &DetectionInput) -> Result<Vec<AnomalyFinding>, DetectorError> {
        let target = &input.expense;
        let vendor = normalize_text(&target.vendor);

        let mut tally: BTreeMap<String, (usize, &str)> = BTreeMap::new();
        let mut total = 0usize;
        for other in input
            .vendor_history
            .iter()
            .filter(|other| other.id != target.id && normalize_text(&other.vendor) == vendor)
        {
            let entry = tally
                .entry(normalize_text(&other.category))
                .or_insert((0, other.category.as_str()));
            entry.0 += 1;
            total += 1;
        }
        if total < self.min_samples {
            return Ok(Vec::new());
        }

        // Ties resolve to the alphabetically first category.
        let Some((dominant_key, (count, dominant_label))) = tally
            .iter()
            .max_by(|left, right| left.1 .0.cmp(&right.1 .0).then_with(|| right.0.cmp(left.0)))
        else {
            return Ok(Vec::new());
        };

        let share = *count as f64 / total as f64;
        if share <= self.dominance_ratio || *dominant_key == normalize_text(&target.category) {
            return Ok(Vec::new());
        }

        Ok(vec![AnomalyFinding::new(
            AnomalyType::CategoryInconsistency,
            Severity::Low,
            share * 100.0,
            format!(
                "`{}` is usually filed as `{dominant_label}` ({count} of {total}), not `{}`",
                target.vendor, target.category
            ),
            input.now,
        )
        .with_metadata("dominant_category", *dominant_label)
        .with_metadata("dominant_share", share)
        .with_metadata("sample_count", total)])
    }
}

use rust_decimal::Decimal;

use super::{AnomalyDetector, DetectionInput, DetectorSettings};
use crate::domain::anomaly::{AnomalyFinding, AnomalyType, Severity};
use crate::domain::expense::{OcrExtraction, Receipt};
use crate::errors::DetectorError;
use crate::stats::{decimal_to_f64, similarity};

/// Compares what OCR read off each receipt against what the submitter typed in.
#[derive(Clone, Debug)]
pub struct ReceiptAnomalyDetector {
    amount_tolerance: Decimal,
    date_tolerance_days: i64,
    vendor_similarity_floor: f64,
    ocr_confidence_floor: f64,
}

impl ReceiptAnomalyDetector {
    pub fn new(settings: &DetectorSettings) -> Self {
        Self {
            amount_tolerance: settings.receipt_amount_tolerance,
            date_tolerance_days: settings.receipt_date_tolerance_days,
            vendor_similarity_floor: settings.receipt_vendor_similarity_floor,
            ocr_confidence_floor: settings.receipt_ocr_confidence_floor,
        }
    }

    fn check_receipt(
        &self,
        input: &DetectionInput,
        receipt: &Receipt,
        ocr: &OcrExtraction,
    ) -> Vec<AnomalyFinding> {
        let expense = &input.expense;
        let confidence = ocr.confidence.unwrap_or(75.0);
        let finding = |severity: Severity, check: &'static str, description: String| {
            AnomalyFinding::new(AnomalyType::ReceiptAnomaly, severity, confidence, description, input.now)
                .with_metadata("check", check)
                .with_metadata("receipt_id", receipt.id.clone())
        };
        let mut findings = Vec::new();

        if let Some(extracted) = ocr.amount {
            let difference = (extracted - expense.amount).abs();
            if difference > self.amount_tolerance {
                let discrepancy_pct = if expense.amount.is_zero() {
                    100.0
                } else {
                    decimal_to_f64(difference / expense.amount.abs() * Decimal::ONE_HUNDRED)
                };
                findings.push(
                    finding(
                        discrepancy_severity(discrepancy_pct),
                        "amount_mismatch",
                        format!(
                            "receipt shows {extracted} but {} was entered ({discrepancy_pct:.1}% apart)",
                            expense.amount
                        ),
                    )
                    .with_metadata("extracted_amount", decimal_to_f64(extracted))
                    .with_metadata("discrepancy_pct", discrepancy_pct),
                );
            }
        }

        if let Some(extracted) = ocr.date {
            let days_apart = (extracted - expense.incurred_at.date_naive()).num_days().abs();
            if days_apart > self.date_tolerance_days {
                findings.push(
                    finding(
                        Severity::Medium,
                        "date_mismatch",
                        format!("receipt is dated {extracted}, {days_apart} days from the entered date"),
                    )
                    .with_metadata("extracted_date", extracted.to_string())
                    .with_metadata("days_apart", days_apart),
                );
            }
        }

        if let Some(extracted) = ocr.vendor.as_deref().filter(|vendor| !vendor.trim().is_empty()) {
            let score = similarity(extracted, &expense.vendor);
            if score < self.vendor_similarity_floor {
                findings.push(
                    finding(
                        Severity::Medium,
                        "vendor_mismatch",
                        format!("receipt vendor `{extracted}` does not match `{}`", expense.vendor),
                    )
                    .with_metadata("extracted_vendor", extracted)
                    .with_metadata("similarity", score),
                );
            }
        }

        if let Some(ocr_confidence) = ocr.confidence {
            if ocr_confidence < self.ocr_confidence_floor {
                findings.push(
                    finding(
                        Severity::Low,
                        "low_ocr_confidence",
                        format!("receipt text was read with low confidence ({ocr_confidence:.0}%)"),
                    )
                    .with_metadata("ocr_confidence", ocr_confidence),
                );
            }
        }

        findings
    }
}

fn discrepancy_severity(discrepancy_pct: f64) -> Severity {
    if discrepancy_pct > 100.0 {
        Severity::Critical
    } else if discrepancy_pct > 25.0 {
        Severity::High
    } else if discrepancy_pct > 10.0 {
        Severity::Medium
    } else {
        Severity::Low
    }
}

impl AnomalyDetector for ReceiptAnomalyDetector {
    fn kind(&self) -> AnomalyType {
        AnomalyType::ReceiptAnomaly
    }

    fn detect(&self, input: &DetectionInput) -> Result<Vec<AnomalyFinding>, DetectorError> {
        Ok(input
            .expense
            .receipts
            .iter()
            .filter_map(|receipt| receipt.ocr.as_ref().map(|ocr| (receipt, ocr)))
            .flat_map(|(receipt, ocr)| self.check_receipt(input, receipt, ocr))
            .collect())
    }
}

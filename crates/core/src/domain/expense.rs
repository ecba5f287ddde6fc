use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::anomaly::{AnomalyFinding, FindingId, FindingResolution};
use crate::domain::approval::ApprovalFlow;
use crate::domain::user::{CompanyId, UserId};
use crate::errors::DomainError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExpenseId(pub String);

impl fmt::Display for ExpenseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpenseStatus {
    Draft,
    Submitted,
    Approved,
    Rejected,
    Reimbursed,
    Cancelled,
}

impl ExpenseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Submitted => "submitted",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Reimbursed => "reimbursed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "draft" => Some(Self::Draft),
            "submitted" => Some(Self::Submitted),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            "reimbursed" => Some(Self::Reimbursed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPoint {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self { latitude, longitude }
    }

    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }
}

/// Best-effort structured guess handed over by the OCR collaborator.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct OcrExtraction {
    #[serde(default)]
    pub raw_text: String,
    #[serde(default)]
    pub amount: Option<Decimal>,
    #[serde(default)]
    pub date: Option<NaiveDate>,
    #[serde(default)]
    pub vendor: Option<String>,
    /// 0-100.
    #[serde(default)]
    pub confidence: Option<f64>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Receipt {
    pub id: String,
    pub file_name: String,
    #[serde(default)]
    pub ocr: Option<OcrExtraction>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Expense {
    pub id: ExpenseId,
    pub company_id: CompanyId,
    pub submitter_id: UserId,
    pub amount: Decimal,
    pub currency: String,
    pub category: String,
    #[serde(default)]
    pub subcategory: Option<String>,
    pub vendor: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub is_personal: bool,
    pub incurred_at: DateTime<Utc>,
    #[serde(default)]
    pub location: Option<GeoPoint>,
    #[serde(default)]
    pub receipts: Vec<Receipt>,
    pub status: ExpenseStatus,
    #[serde(default)]
    pub anomalies: Vec<AnomalyFinding>,
    /// 0 to 100, derived from the findings at submission.
    #[serde(default)]
    pub risk_score: u8,
    #[serde(default)]
    pub finding_resolutions: Vec<FindingResolution>,
    #[serde(default)]
    pub approval_flow: ApprovalFlow,
    #[serde(default)]
    pub submitted_at: Option<DateTime<Utc>>,
    /// Optimistic concurrency token, bumped by every successful store write.
    #[serde(default)]
    pub version: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Expense {
    #[allow(clippy::too_many_arguments)]
    pub fn draft(
        id: ExpenseId,
        company_id: CompanyId,
        submitter_id: UserId,
        amount: Decimal,
        category: impl Into<String>,
        vendor: impl Into<String>,
        incurred_at: DateTime<Utc>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            company_id,
            submitter_id,
            amount,
            currency: "USD".to_string(),
            category: category.into(),
            subcategory: None,
            vendor: vendor.into(),
            description: String::new(),
            is_personal: false,
            incurred_at,
            location: None,
            receipts: Vec::new(),
            status: ExpenseStatus::Draft,
            anomalies: Vec::new(),
            risk_score: 0,
            finding_resolutions: Vec::new(),
            approval_flow: ApprovalFlow::default(),
            submitted_at: None,
            version: 0,
            created_at,
            updated_at: created_at,
        }
    }

    pub fn with_location(mut self, latitude: f64, longitude: f64) -> Self {
        self.location = Some(GeoPoint::new(latitude, longitude));
        self
    }

    pub fn with_receipt(mut self, receipt: Receipt) -> Self {
        self.receipts.push(receipt);
        self
    }

    /// When the expense entered the approval pipeline; drafts fall back to creation time.
    pub fn submission_time(&self) -> DateTime<Utc> {
        self.submitted_at.unwrap_or(self.created_at)
    }

    pub fn can_transition_to(&self, next: ExpenseStatus) -> bool {
        matches!(
            (self.status, next),
            (ExpenseStatus::Draft, ExpenseStatus::Submitted)
                | (ExpenseStatus::Draft, ExpenseStatus::Cancelled)
                | (ExpenseStatus::Submitted, ExpenseStatus::Approved)
                | (ExpenseStatus::Submitted, ExpenseStatus::Rejected)
                | (ExpenseStatus::Approved, ExpenseStatus::Reimbursed)
                | (ExpenseStatus::Approved, ExpenseStatus::Cancelled)
                | (ExpenseStatus::Rejected, ExpenseStatus::Cancelled)
        )
    }

    pub fn transition_to(&mut self, next: ExpenseStatus) -> Result<(), DomainError> {
        if self.can_transition_to(next) {
            self.status = next;
            return Ok(());
        }

        Err(DomainError::InvalidExpenseTransition { from: self.status, to: next })
    }

    /// Admin override path: the only way out of an approved/rejected outcome other than the
    /// forward lifecycle.
    pub fn apply_override(&mut self, next: ExpenseStatus) -> Result<(), DomainError> {
        let allowed = matches!(
            (self.status, next),
            (
                ExpenseStatus::Submitted | ExpenseStatus::Approved | ExpenseStatus::Rejected,
                ExpenseStatus::Approved | ExpenseStatus::Rejected
            )
        );
        if !allowed {
            return Err(DomainError::InvalidExpenseTransition { from: self.status, to: next });
        }

        self.status = next;
        Ok(())
    }

    pub fn finding(&self, id: &FindingId) -> Option<&AnomalyFinding> {
        self.anomalies.iter().find(|finding| &finding.id == id)
    }

    pub fn resolution_for(&self, id: &FindingId) -> Option<&FindingResolution> {
        self.finding_resolutions.iter().find(|resolution| &resolution.finding_id == id)
    }

    pub fn resolve_finding(&mut self, resolution: FindingResolution) -> Result<(), DomainError> {
        if self.finding(&resolution.finding_id).is_none() {
            return Err(DomainError::UnknownFinding(resolution.finding_id));
        }
        if self.resolution_for(&resolution.finding_id).is_some() {
            return Err(DomainError::FindingAlreadyResolved(resolution.finding_id));
        }

        self.finding_resolutions.push(resolution);
        Ok(())
    }
}

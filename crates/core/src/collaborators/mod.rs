//! Narrow contracts for everything the workflow reads from or writes to outside this crate.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::expense::{Expense, ExpenseId, ExpenseStatus};
use crate::domain::policy::CompanyPolicy;
use crate::domain::user::{CompanyId, DirectoryUser, Role, UserId};
use crate::errors::{LookupError, StoreError};
use crate::stats::normalize_text;

pub mod memory;

pub use memory::{InMemoryExpenseStore, InMemoryUserDirectory, StaticPolicyProvider};

#[async_trait]
pub trait PolicyProvider: Send + Sync {
    async fn policy_for(&self, company_id: &CompanyId) -> Result<CompanyPolicy, LookupError>;
}

#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn find_user(
        &self,
        company_id: &CompanyId,
        user_id: &UserId,
    ) -> Result<Option<DirectoryUser>, LookupError>;

    async fn manager_of(
        &self,
        company_id: &CompanyId,
        user_id: &UserId,
    ) -> Result<Option<DirectoryUser>, LookupError>;

    async fn active_users_with_role(
        &self,
        company_id: &CompanyId,
        role: Role,
    ) -> Result<Vec<DirectoryUser>, LookupError>;
}

/// Submitter expenses whose incurred or submitted time falls inside `[from, to]`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryQuery {
    pub company_id: CompanyId,
    pub submitter_id: UserId,
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    pub exclude: ExpenseId,
}

impl HistoryQuery {
    pub fn matches(&self, expense: &Expense) -> bool {
        let in_range = |at: DateTime<Utc>| at >= self.from && at <= self.to;
        is_history_candidate(expense, &self.company_id, &self.submitter_id, &self.exclude)
            && (in_range(expense.incurred_at) || expense.submitted_at.is_some_and(in_range))
    }
}

/// Submitter expenses at the same vendor incurred on or after `since`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VendorHistoryQuery {
    pub company_id: CompanyId,
    pub submitter_id: UserId,
    pub vendor: String,
    pub since: DateTime<Utc>,
    pub exclude: ExpenseId,
}

impl VendorHistoryQuery {
    pub fn vendor_key(&self) -> String {
        normalize_text(&self.vendor)
    }

    pub fn matches(&self, expense: &Expense) -> bool {
        is_history_candidate(expense, &self.company_id, &self.submitter_id, &self.exclude)
            && expense.incurred_at >= self.since
            && normalize_text(&expense.vendor) == self.vendor_key()
    }
}

/// Drafts never count as history; neither does the expense under evaluation.
fn is_history_candidate(
    expense: &Expense,
    company_id: &CompanyId,
    submitter_id: &UserId,
    exclude: &ExpenseId,
) -> bool {
    &expense.company_id == company_id
        && &expense.submitter_id == submitter_id
        && &expense.id != exclude
        && expense.status != ExpenseStatus::Draft
}

#[async_trait]
pub trait ExpenseHistoryReader: Send + Sync {
    async fn submitter_history(&self, query: &HistoryQuery) -> Result<Vec<Expense>, LookupError>;

    async fn vendor_history(&self, query: &VendorHistoryQuery)
        -> Result<Vec<Expense>, LookupError>;
}

#[async_trait]
pub trait ExpenseStore: Send + Sync {
    async fn find(&self, id: &ExpenseId) -> Result<Option<Expense>, StoreError>;

    async fn load(&self, id: &ExpenseId) -> Result<Expense, StoreError> {
        self.find(id).await?.ok_or_else(|| StoreError::NotFound(id.clone()))
    }

    /// Compare-and-swap write. Succeeds only while the stored version equals `expected_version`
    /// (0 for an expense that was never stored) and returns the new version.
    async fn save(&self, expense: &Expense, expected_version: u32) -> Result<u32, StoreError>;
}

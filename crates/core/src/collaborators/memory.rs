use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{
    ExpenseHistoryReader, ExpenseStore, HistoryQuery, PolicyProvider, UserDirectory,
    VendorHistoryQuery,
};
use crate::domain::expense::{Expense, ExpenseId};
use crate::domain::policy::CompanyPolicy;
use crate::domain::user::{CompanyId, DirectoryUser, Role, UserId};
use crate::errors::{LookupError, StoreError};

#[derive(Default)]
pub struct StaticPolicyProvider {
    policies: RwLock<HashMap<String, CompanyPolicy>>,
}

impl StaticPolicyProvider {
    pub fn new(policies: impl IntoIterator<Item = CompanyPolicy>) -> Self {
        let policies =
            policies.into_iter().map(|policy| (policy.company_id.0.clone(), policy)).collect();
        Self { policies: RwLock::new(policies) }
    }

    pub async fn insert(&self, policy: CompanyPolicy) {
        let mut policies = self.policies.write().await;
        policies.insert(policy.company_id.0.clone(), policy);
    }
}

#[async_trait]
impl PolicyProvider for StaticPolicyProvider {
    async fn policy_for(&self, company_id: &CompanyId) -> Result<CompanyPolicy, LookupError> {
        let policies = self.policies.read().await;
        policies
            .get(&company_id.0)
            .cloned()
            .ok_or_else(|| LookupError::Policy(format!("no policy for company `{}`", company_id.0)))
    }
}

#[derive(Default)]
pub struct InMemoryUserDirectory {
    users: RwLock<HashMap<UserId, DirectoryUser>>,
}

impl InMemoryUserDirectory {
    pub fn new(users: impl IntoIterator<Item = DirectoryUser>) -> Self {
        let users = users.into_iter().map(|user| (user.id.clone(), user)).collect();
        Self { users: RwLock::new(users) }
    }

    pub async fn insert(&self, user: DirectoryUser) {
        let mut users = self.users.write().await;
        users.insert(user.id.clone(), user);
    }
}

#[async_trait]
impl UserDirectory for InMemoryUserDirectory {
    async fn find_user(
        &self,
        company_id: &CompanyId,
        user_id: &UserId,
    ) -> Result<Option<DirectoryUser>, LookupError> {
        let users = self.users.read().await;
        Ok(users.get(user_id).filter(|user| &user.company_id == company_id).cloned())
    }

    async fn manager_of(
        &self,
        company_id: &CompanyId,
        user_id: &UserId,
    ) -> Result<Option<DirectoryUser>, LookupError> {
        let users = self.users.read().await;
        let manager = users
            .get(user_id)
            .filter(|user| &user.company_id == company_id)
            .and_then(|user| user.manager_id.as_ref())
            .and_then(|manager_id| users.get(manager_id))
            .filter(|manager| &manager.company_id == company_id)
            .cloned();
        Ok(manager)
    }

    async fn active_users_with_role(
        &self,
        company_id: &CompanyId,
        role: Role,
    ) -> Result<Vec<DirectoryUser>, LookupError> {
        let users = self.users.read().await;
        let mut matching: Vec<DirectoryUser> = users
            .values()
            .filter(|user| &user.company_id == company_id && user.role == role && user.active)
            .cloned()
            .collect();
        matching.sort_by(|left, right| left.id.cmp(&right.id));
        Ok(matching)
    }
}

/// Expense store and history reader over one map, with the same version semantics as the
/// SQL store.
#[derive(Default)]
pub struct InMemoryExpenseStore {
    expenses: RwLock<HashMap<String, Expense>>,
}

impl InMemoryExpenseStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds an expense as-is, bypassing the version check.
    pub async fn insert(&self, expense: Expense) {
        let mut expenses = self.expenses.write().await;
        expenses.insert(expense.id.0.clone(), expense);
    }

    async fn select(&self, predicate: impl Fn(&Expense) -> bool) -> Vec<Expense> {
        let expenses = self.expenses.read().await;
        let mut selected: Vec<Expense> =
            expenses.values().filter(|expense| predicate(*expense)).cloned().collect();
        selected.sort_by(|left, right| {
            left.incurred_at.cmp(&right.incurred_at).then_with(|| left.id.0.cmp(&right.id.0))
        });
        selected
    }
}

#[async_trait]
impl ExpenseHistoryReader for InMemoryExpenseStore {
    async fn submitter_history(&self, query: &HistoryQuery) -> Result<Vec<Expense>, LookupError> {
        Ok(self.select(|expense| query.matches(expense)).await)
    }

    async fn vendor_history(
        &self,
        query: &VendorHistoryQuery,
    ) -> Result<Vec<Expense>, LookupError> {
        Ok(self.select(|expense| query.matches(expense)).await)
    }
}

#[async_trait]
impl ExpenseStore for InMemoryExpenseStore {
    async fn find(&self, id: &ExpenseId) -> Result<Option<Expense>, StoreError> {
        let expenses = self.expenses.read().await;
        Ok(expenses.get(&id.0).cloned())
    }

    async fn save(&self, expense: &Expense, expected_version: u32) -> Result<u32, StoreError> {
        let mut expenses = self.expenses.write().await;
        let found = expenses.get(&expense.id.0).map_or(0, |stored| stored.version);
        if found != expected_version {
            return Err(StoreError::VersionConflict {
                id: expense.id.clone(),
                expected: expected_version,
                found,
            });
        }

        let version = expected_version + 1;
        let mut stored = expense.clone();
        stored.version = version;
        expenses.insert(stored.id.0.clone(), stored);
        Ok(version)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};
    use rust_decimal::Decimal;

    use crate::collaborators::{
        ExpenseHistoryReader, ExpenseStore, HistoryQuery, InMemoryExpenseStore,
        InMemoryUserDirectory, UserDirectory, VendorHistoryQuery,
    };
    use crate::domain::expense::{Expense, ExpenseId, ExpenseStatus};
    use crate::domain::user::{CompanyId, DirectoryUser, Role, UserId};
    use crate::errors::StoreError;

    fn acme() -> CompanyId {
        CompanyId("acme".to_string())
    }

    fn expense(id: &str, vendor: &str, days_ago: i64) -> Expense {
        let now = Utc.with_ymd_and_hms(2026, 3, 4, 12, 0, 0).single().expect("valid timestamp");
        let at = now - Duration::days(days_ago);
        let mut expense = Expense::draft(
            ExpenseId(id.to_string()),
            acme(),
            UserId("emp-1".to_string()),
            Decimal::new(2_000, 2),
            "Meals",
            vendor,
            at,
            at,
        );
        expense.status = ExpenseStatus::Submitted;
        expense
    }

    fn user(id: &str, role: Role, manager: Option<&str>) -> DirectoryUser {
        DirectoryUser {
            id: UserId(id.to_string()),
            company_id: acme(),
            display_name: id.to_string(),
            role,
            active: true,
            manager_id: manager.map(|id| UserId(id.to_string())),
        }
    }

    #[tokio::test]
    async fn save_enforces_expected_version() {
        let store = InMemoryExpenseStore::new();
        let draft = expense("EXP-1", "Cafe", 0);

        assert_eq!(store.save(&draft, 0).await, Ok(1));
        let conflict = store.save(&draft, 0).await;
        assert_eq!(
            conflict,
            Err(StoreError::VersionConflict { id: draft.id.clone(), expected: 0, found: 1 })
        );

        let loaded = store.load(&draft.id).await.expect("stored");
        assert_eq!(loaded.version, 1);
        assert_eq!(store.save(&loaded, loaded.version).await, Ok(2));
        assert!(matches!(
            store.load(&ExpenseId("EXP-404".to_string())).await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn history_excludes_target_drafts_and_out_of_range() {
        let store = InMemoryExpenseStore::new();
        store.insert(expense("EXP-1", "Cafe", 2)).await;
        store.insert(expense("EXP-2", "Cafe", 45)).await;
        let mut draft = expense("EXP-3", "Cafe", 1);
        draft.status = ExpenseStatus::Draft;
        store.insert(draft).await;
        let target = expense("EXP-4", "Cafe", 0);
        store.insert(target.clone()).await;

        let history = store
            .submitter_history(&HistoryQuery {
                company_id: acme(),
                submitter_id: target.submitter_id.clone(),
                from: target.incurred_at - Duration::days(30),
                to: target.incurred_at,
                exclude: target.id.clone(),
            })
            .await
            .expect("history");

        let ids: Vec<_> = history.iter().map(|expense| expense.id.0.as_str()).collect();
        assert_eq!(ids, vec!["EXP-1"]);
    }

    #[tokio::test]
    async fn vendor_history_matches_normalized_vendor() {
        let store = InMemoryExpenseStore::new();
        store.insert(expense("EXP-1", "STAPLES #221", 10)).await;
        store.insert(expense("EXP-2", "staples 221", 20)).await;
        store.insert(expense("EXP-3", "Office Depot", 5)).await;
        let target = expense("EXP-4", "Staples #221", 0);

        let history = store
            .vendor_history(&VendorHistoryQuery {
                company_id: acme(),
                submitter_id: target.submitter_id.clone(),
                vendor: target.vendor.clone(),
                since: target.incurred_at - Duration::days(90),
                exclude: target.id.clone(),
            })
            .await
            .expect("vendor history");

        let ids: Vec<_> = history.iter().map(|expense| expense.id.0.as_str()).collect();
        assert_eq!(ids, vec!["EXP-2", "EXP-1"]);
    }

    #[tokio::test]
    async fn directory_resolves_manager_and_active_role_holders() {
        let mut retired = user("fin-0", Role::Finance, None);
        retired.active = false;
        let directory = InMemoryUserDirectory::new(vec![
            user("emp-1", Role::Employee, Some("mgr-1")),
            user("mgr-1", Role::Manager, None),
            user("fin-2", Role::Finance, None),
            user("fin-1", Role::Finance, None),
            retired,
        ]);

        let manager = directory
            .manager_of(&acme(), &UserId("emp-1".to_string()))
            .await
            .expect("lookup")
            .expect("manager");
        assert_eq!(manager.id.0, "mgr-1");

        let finance =
            directory.active_users_with_role(&acme(), Role::Finance).await.expect("lookup");
        let ids: Vec<_> = finance.iter().map(|user| user.id.0.as_str()).collect();
        assert_eq!(ids, vec!["fin-1", "fin-2"]);
    }
}

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use tracing::debug;

use expensa_core::collaborators::{
    ExpenseHistoryReader, ExpenseStore, HistoryQuery, VendorHistoryQuery,
};
use expensa_core::domain::expense::{Expense, ExpenseId, ExpenseStatus};
use expensa_core::errors::{LookupError, StoreError};
use expensa_core::stats::normalize_text;

use super::RepositoryError;
use crate::DbPool;

const SELECT_COLUMNS: &str = "SELECT version, status, document_json FROM expense";

/// Expense documents in SQLite. Scalar columns exist for filtering; `document_json` is the
/// source of truth apart from `version`.
#[derive(Clone)]
pub struct SqlExpenseRepository {
    pool: DbPool,
}

impl SqlExpenseRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn find_by_id(&self, id: &ExpenseId) -> Result<Option<Expense>, RepositoryError> {
        let row = sqlx::query(&format!("{SELECT_COLUMNS} WHERE id = ?"))
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_expense).transpose()
    }

    pub async fn current_version(&self, id: &ExpenseId) -> Result<u32, RepositoryError> {
        let row = sqlx::query("SELECT version FROM expense WHERE id = ?")
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => decode_version(&row),
            None => Ok(0),
        }
    }

    /// Returns `false` when the row already existed (insert) or moved past `expected_version`
    /// (update); the caller turns that into a conflict.
    async fn write(
        &self,
        expense: &Expense,
        expected_version: u32,
        next_version: u32,
    ) -> Result<bool, RepositoryError> {
        let mut document = expense.clone();
        document.version = next_version;
        let document_json =
            serde_json::to_string(&document).map_err(|e| RepositoryError::Encode(e.to_string()))?;
        let submitted_at = expense.submitted_at.map(encode_time);

        let result = if expected_version == 0 {
            sqlx::query(
                "INSERT INTO expense (id, company_id, submitter_id, vendor_key, category, amount,
                                      status, incurred_at, submitted_at, version, document_json,
                                      created_at, updated_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT(id) DO NOTHING",
            )
            .bind(&expense.id.0)
            .bind(&expense.company_id.0)
            .bind(&expense.submitter_id.0)
            .bind(normalize_text(&expense.vendor))
            .bind(&expense.category)
            .bind(expense.amount.to_string())
            .bind(expense.status.as_str())
            .bind(encode_time(expense.incurred_at))
            .bind(&submitted_at)
            .bind(i64::from(next_version))
            .bind(&document_json)
            .bind(encode_time(expense.created_at))
            .bind(encode_time(expense.updated_at))
            .execute(&self.pool)
            .await?
        } else {
            sqlx::query(
                "UPDATE expense SET
                     vendor_key = ?,
                     category = ?,
                     amount = ?,
                     status = ?,
                     incurred_at = ?,
                     submitted_at = ?,
                     version = ?,
                     document_json = ?,
                     updated_at = ?
                 WHERE id = ? AND version = ?",
            )
            .bind(normalize_text(&expense.vendor))
            .bind(&expense.category)
            .bind(expense.amount.to_string())
            .bind(expense.status.as_str())
            .bind(encode_time(expense.incurred_at))
            .bind(&submitted_at)
            .bind(i64::from(next_version))
            .bind(&document_json)
            .bind(encode_time(expense.updated_at))
            .bind(&expense.id.0)
            .bind(i64::from(expected_version))
            .execute(&self.pool)
            .await?
        };

        Ok(result.rows_affected() == 1)
    }
}

#[async_trait]
impl ExpenseStore for SqlExpenseRepository {
    async fn find(&self, id: &ExpenseId) -> Result<Option<Expense>, StoreError> {
        Ok(self.find_by_id(id).await?)
    }

    async fn save(&self, expense: &Expense, expected_version: u32) -> Result<u32, StoreError> {
        let next_version = expected_version.checked_add(1).ok_or_else(|| {
            StoreError::Backend(format!("expense `{}` version overflow", expense.id))
        })?;

        if self.write(expense, expected_version, next_version).await? {
            debug!(
                event_name = "db.expense.saved",
                expense_id = %expense.id,
                version = next_version,
                "expense saved"
            );
            return Ok(next_version);
        }

        let found = self.current_version(&expense.id).await?;
        Err(StoreError::VersionConflict { id: expense.id.clone(), expected: expected_version, found })
    }
}

#[async_trait]
impl ExpenseHistoryReader for SqlExpenseRepository {
    async fn submitter_history(&self, query: &HistoryQuery) -> Result<Vec<Expense>, LookupError> {
        let from = encode_time(query.from);
        let to = encode_time(query.to);
        let statement = format!(
            "{SELECT_COLUMNS}
             WHERE company_id = ? AND submitter_id = ? AND id <> ? AND status <> 'draft'
               AND ((incurred_at >= ? AND incurred_at <= ?)
                    OR (submitted_at IS NOT NULL AND submitted_at >= ? AND submitted_at <= ?))
             ORDER BY incurred_at ASC, id ASC"
        );

        let rows = sqlx::query(&statement)
            .bind(&query.company_id.0)
            .bind(&query.submitter_id.0)
            .bind(&query.exclude.0)
            .bind(&from)
            .bind(&to)
            .bind(&from)
            .bind(&to)
            .fetch_all(&self.pool)
            .await
            .map_err(RepositoryError::from)?;

        Ok(rows_to_expenses(&rows)?)
    }

    async fn vendor_history(
        &self,
        query: &VendorHistoryQuery,
    ) -> Result<Vec<Expense>, LookupError> {
        let statement = format!(
            "{SELECT_COLUMNS}
             WHERE company_id = ? AND submitter_id = ? AND id <> ? AND status <> 'draft'
               AND vendor_key = ? AND incurred_at >= ?
             ORDER BY incurred_at ASC, id ASC"
        );

        let rows = sqlx::query(&statement)
            .bind(&query.company_id.0)
            .bind(&query.submitter_id.0)
            .bind(&query.exclude.0)
            .bind(query.vendor_key())
            .bind(encode_time(query.since))
            .fetch_all(&self.pool)
            .await
            .map_err(RepositoryError::from)?;

        Ok(rows_to_expenses(&rows)?)
    }
}

/// Fixed-width UTC so that text comparison in SQL orders like time.
fn encode_time(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn decode_version(row: &SqliteRow) -> Result<u32, RepositoryError> {
    let version: i64 = row.try_get("version").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    u32::try_from(version)
        .map_err(|_| RepositoryError::Decode(format!("version {version} is out of range")))
}

fn row_to_expense(row: &SqliteRow) -> Result<Expense, RepositoryError> {
    let document: String =
        row.try_get("document_json").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let mut expense: Expense =
        serde_json::from_str(&document).map_err(|e| RepositoryError::Decode(e.to_string()))?;
    expense.version = decode_version(row)?;

    let status: String = row.try_get("status").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    if ExpenseStatus::parse(&status) != Some(expense.status) {
        return Err(RepositoryError::Decode(format!(
            "expense `{}` has status column `{status}` but document status `{}`",
            expense.id,
            expense.status.as_str()
        )));
    }
    Ok(expense)
}

fn rows_to_expenses(rows: &[SqliteRow]) -> Result<Vec<Expense>, RepositoryError> {
    rows.iter().map(row_to_expense).collect()
}

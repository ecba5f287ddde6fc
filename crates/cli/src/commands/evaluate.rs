use std::fs;
use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::commands::CommandResult;
use expensa_core::anomaly::DetectorSettings;
use expensa_core::approvals::{DecisionOutcome, StepDecision};
use expensa_core::collaborators::{
    ExpenseStore, InMemoryExpenseStore, InMemoryUserDirectory, StaticPolicyProvider,
};
use expensa_core::config::{AppConfig, LoadOptions};
use expensa_core::domain::approval::FlowSummary;
use expensa_core::domain::expense::{Expense, ExpenseStatus};
use expensa_core::domain::policy::CompanyPolicy;
use expensa_core::domain::user::DirectoryUser;
use expensa_core::errors::{ApplicationError, InterfaceError};
use expensa_core::notifications::{InMemoryNotificationChannel, NotificationEvent};
use expensa_core::workflow::{ExpenseWorkflow, SubmissionReport};

/// Everything needed to replay one submission offline.
#[derive(Debug, Deserialize)]
pub struct Scenario {
    pub policy: CompanyPolicy,
    pub users: Vec<DirectoryUser>,
    #[serde(default)]
    pub history: Vec<Expense>,
    pub expense: Expense,
    /// Submission clock; defaults to the wall clock.
    #[serde(default)]
    pub now: Option<DateTime<Utc>>,
    /// Applied in order after submission.
    #[serde(default)]
    pub decisions: Vec<StepDecision>,
}

#[derive(Debug, Serialize)]
pub struct EvaluationReport {
    pub submission: SubmissionReport,
    pub decisions: Vec<DecisionOutcome>,
    pub expense: Expense,
    pub summary: FlowSummary,
    pub notifications: Vec<NotificationEvent>,
}

pub fn run(options: &LoadOptions, scenario_path: &Path) -> CommandResult {
    let config = match AppConfig::load(options.clone()) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                "evaluate",
                "config_validation",
                format!("configuration issue: {error}"),
                2,
            );
        }
    };

    let scenario = match load_scenario(scenario_path) {
        Ok(scenario) => scenario,
        Err(error) => {
            return CommandResult::failure("evaluate", "scenario_invalid", format!("{error:#}"), 2);
        }
    };

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return CommandResult::failure(
                "evaluate",
                "runtime_init",
                format!("failed to initialize async runtime: {error}"),
                3,
            );
        }
    };

    let correlation_id = format!("evaluate-{}", scenario.expense.id);
    match runtime.block_on(evaluate(scenario, config.detection, &correlation_id)) {
        Ok(report) => {
            let message = format!(
                "expense {} is {} with {} finding(s), risk score {} and {} pending approver(s)",
                report.expense.id,
                report.expense.status.as_str(),
                report.expense.anomalies.len(),
                report.expense.risk_score,
                report.summary.pending_count
            );
            CommandResult::report("evaluate", message, report)
        }
        Err(error) => {
            let interface = error.into_interface(correlation_id);
            CommandResult::failure("evaluate", error_class(&interface), interface.to_string(), 3)
        }
    }
}

pub fn load_scenario(path: &Path) -> Result<Scenario> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("could not read scenario `{}`", path.display()))?;
    let scenario: Scenario = serde_json::from_str(&raw)
        .with_context(|| format!("could not parse scenario `{}`", path.display()))?;

    if scenario.expense.status != ExpenseStatus::Draft {
        bail!(
            "scenario expense `{}` must be a draft, found {}",
            scenario.expense.id,
            scenario.expense.status.as_str()
        );
    }
    if scenario.policy.company_id != scenario.expense.company_id {
        bail!("scenario policy and expense belong to different companies");
    }

    Ok(scenario)
}

async fn evaluate(
    scenario: Scenario,
    settings: DetectorSettings,
    correlation_id: &str,
) -> Result<EvaluationReport, ApplicationError> {
    let store = Arc::new(InMemoryExpenseStore::new());
    for expense in scenario.history {
        store.insert(expense).await;
    }
    let expense_id = scenario.expense.id.clone();
    store.save(&scenario.expense, 0).await?;

    let channel = InMemoryNotificationChannel::default();
    let workflow = ExpenseWorkflow::new(
        store.clone(),
        store,
        Arc::new(StaticPolicyProvider::new(vec![scenario.policy])),
        Arc::new(InMemoryUserDirectory::new(scenario.users)),
        Arc::new(channel.clone()),
        settings,
    );

    let now = scenario.now.unwrap_or_else(Utc::now);
    let submission = workflow.submit(&expense_id, now, correlation_id).await?;

    let mut expense = submission.expense.clone();
    let mut decisions = Vec::with_capacity(scenario.decisions.len());
    for decision in scenario.decisions {
        let report = workflow.decide(&expense_id, decision, correlation_id).await?;
        decisions.push(report.outcome);
        expense = report.expense;
    }

    workflow.drain_notifications().await;
    info!(
        event_name = "cli.evaluate.completed",
        expense_id = %expense.id,
        correlation_id = %correlation_id,
        status = expense.status.as_str(),
        "scenario evaluated"
    );

    Ok(EvaluationReport {
        submission,
        decisions,
        summary: expense.approval_flow.summary(),
        expense,
        notifications: channel.events(),
    })
}

fn error_class(error: &InterfaceError) -> &'static str {
    match error {
        InterfaceError::BadRequest { .. } => "bad_request",
        InterfaceError::NotFound { .. } => "not_found",
        InterfaceError::Conflict { .. } => "conflict",
        InterfaceError::ServiceUnavailable { .. } => "service_unavailable",
        InterfaceError::Internal { .. } => "internal",
    }
}

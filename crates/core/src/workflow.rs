//! Submission and decision orchestration over the collaborator contracts.

use std::mem;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::anomaly::{AnomalyAggregator, DetectionInput, DetectorFailure, DetectorSettings};
use crate::approvals::{
    resolve_rules, ApprovalFlowBuilder, ApprovalStateMachine, ApproverRoster, ConfigurationGap,
    DecisionOutcome, FlowBuildInput, OverrideRequest, RuleResolution, StepDecision, Verdict,
};
use crate::collaborators::{
    ExpenseHistoryReader, ExpenseStore, HistoryQuery, PolicyProvider, UserDirectory,
    VendorHistoryQuery,
};
use crate::domain::anomaly::{AnomalyFinding, FindingResolution};
use crate::domain::expense::{Expense, ExpenseId, ExpenseStatus};
use crate::domain::policy::CompanyPolicy;
use crate::domain::user::UserId;
use crate::errors::{ApplicationError, DecisionError, LookupError};
use crate::notifications::{NotificationChannel, NotificationEvent, NotificationKind};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SubmissionReport {
    pub expense: Expense,
    pub rule_resolution: RuleResolution,
    pub warnings: Vec<ConfigurationGap>,
    pub detector_failures: Vec<DetectorFailure>,
    pub risk_score: u8,
    pub auto_approved: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DecisionReport {
    pub expense: Expense,
    pub outcome: DecisionOutcome,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverrideCommand {
    pub admin_id: UserId,
    pub verdict: Verdict,
    #[serde(default)]
    pub comments: Option<String>,
    pub decided_at: DateTime<Utc>,
}

pub struct ExpenseWorkflow {
    store: Arc<dyn ExpenseStore>,
    history: Arc<dyn ExpenseHistoryReader>,
    policies: Arc<dyn PolicyProvider>,
    directory: Arc<dyn UserDirectory>,
    notifications: Arc<dyn NotificationChannel>,
    aggregator: AnomalyAggregator,
    settings: DetectorSettings,
    builder: ApprovalFlowBuilder,
    machine: ApprovalStateMachine,
    deliveries: Mutex<Vec<JoinHandle<()>>>,
}

impl ExpenseWorkflow {
    pub fn new(
        store: Arc<dyn ExpenseStore>,
        history: Arc<dyn ExpenseHistoryReader>,
        policies: Arc<dyn PolicyProvider>,
        directory: Arc<dyn UserDirectory>,
        notifications: Arc<dyn NotificationChannel>,
        settings: DetectorSettings,
    ) -> Self {
        Self {
            store,
            history,
            policies,
            directory,
            notifications,
            aggregator: AnomalyAggregator::standard(&settings),
            settings,
            builder: ApprovalFlowBuilder,
            machine: ApprovalStateMachine,
            deliveries: Mutex::new(Vec::new()),
        }
    }

    pub fn with_aggregator(mut self, aggregator: AnomalyAggregator) -> Self {
        self.aggregator = aggregator;
        self
    }

    /// Runs detection, builds the approval flow, and persists the submitted expense. Any lookup
    /// failure aborts before the store is touched.
    pub async fn submit(
        &self,
        expense_id: &ExpenseId,
        now: DateTime<Utc>,
        correlation_id: &str,
    ) -> Result<SubmissionReport, ApplicationError> {
        info!(
            event_name = "workflow.submit.started",
            expense_id = %expense_id,
            correlation_id = %correlation_id,
            "submitting expense"
        );

        let mut expense = self.store.load(expense_id).await?;
        let expected_version = expense.version;
        expense.transition_to(ExpenseStatus::Submitted)?;
        expense.submitted_at = Some(now);
        expense.updated_at = now;

        let policy = self.policies.policy_for(&expense.company_id).await?;
        policy.validate().map_err(|error| LookupError::Policy(error.to_string()))?;

        let (history, vendor_history) = self.fetch_history(&expense, now).await?;
        let detection = self
            .aggregator
            .run(
                DetectionInput::new(expense.clone(), policy.clone(), now)
                    .with_history(history)
                    .with_vendor_history(vendor_history),
            )
            .await;

        let resolution = resolve_rules(expense.amount, &expense.category, &policy);
        let roster = self.fetch_roster(&expense, &policy, &resolution, &detection.findings).await?;
        let built = self.builder.build(FlowBuildInput {
            expense: &expense,
            policy: &policy,
            resolution: &resolution,
            findings: &detection.findings,
            roster: &roster,
        });

        let risk_score = detection.risk_score();
        expense.anomalies = detection.findings;
        expense.risk_score = risk_score;
        expense.approval_flow = built.flow;
        if !built.warnings.is_empty() && expense.approval_flow.is_empty() {
            warn!(
                event_name = "workflow.submit.unroutable",
                expense_id = %expense.id,
                correlation_id = %correlation_id,
                gap_count = built.warnings.len(),
                "expense has no approvers because required roles are unstaffed"
            );
        } else {
            self.machine.settle(&mut expense)?;
        }
        let auto_approved = expense.status == ExpenseStatus::Approved;

        expense.version = self.store.save(&expense, expected_version).await?;

        info!(
            event_name = "workflow.submit.completed",
            expense_id = %expense.id,
            correlation_id = %correlation_id,
            status = expense.status.as_str(),
            finding_count = expense.anomalies.len(),
            risk_score,
            step_count = expense.approval_flow.steps.len(),
            pending_count = expense.approval_flow.pending_count(),
            gap_count = built.warnings.len(),
            "expense submitted"
        );

        let mut events = self.pending_step_events(&expense, correlation_id, now);
        events.extend(built.warnings.iter().map(|gap| {
            NotificationEvent::new(
                NotificationKind::ConfigurationGap,
                expense.id.clone(),
                expense.company_id.clone(),
                correlation_id,
                gap.message.clone(),
                now,
            )
            .with_metadata("role", gap.role.as_str())
            .with_metadata("reason", gap.reason.as_str())
        }));
        if auto_approved {
            events.push(self.status_event(&expense, correlation_id, now));
        }
        self.dispatch(events);

        Ok(SubmissionReport {
            expense,
            rule_resolution: resolution,
            warnings: built.warnings,
            detector_failures: detection.failures,
            risk_score,
            auto_approved,
        })
    }

    pub async fn decide(
        &self,
        expense_id: &ExpenseId,
        decision: StepDecision,
        correlation_id: &str,
    ) -> Result<DecisionReport, ApplicationError> {
        let mut expense = self.store.load(expense_id).await?;
        let expected_version = expense.version;

        let outcome = match self.machine.decide(&mut expense, &decision) {
            Ok(outcome) => outcome,
            Err(error) => {
                warn!(
                    event_name = "workflow.decision.refused",
                    expense_id = %expense_id,
                    correlation_id = %correlation_id,
                    approver_id = %decision.approver_id,
                    error = %error,
                    "decision refused"
                );
                return Err(error.into());
            }
        };
        expense.version = self.store.save(&expense, expected_version).await?;

        info!(
            event_name = "workflow.decision.applied",
            expense_id = %expense.id,
            correlation_id = %correlation_id,
            approver_id = %decision.approver_id,
            sequence = outcome.sequence,
            verdict = outcome.verdict.as_str(),
            skipped = outcome.skipped.len(),
            status = expense.status.as_str(),
            "decision applied"
        );

        if outcome.status_changed() {
            let event = self.status_event(&expense, correlation_id, decision.decided_at);
            self.dispatch(vec![event]);
        }

        Ok(DecisionReport { expense, outcome })
    }

    /// Admin override; the caller's identity is checked against the directory first.
    pub async fn override_decision(
        &self,
        expense_id: &ExpenseId,
        command: OverrideCommand,
        correlation_id: &str,
    ) -> Result<DecisionReport, ApplicationError> {
        let mut expense = self.store.load(expense_id).await?;
        let expected_version = expense.version;

        let admin = self
            .directory
            .find_user(&expense.company_id, &command.admin_id)
            .await?
            .ok_or_else(|| DecisionError::OverrideNotPermitted {
                actor_id: command.admin_id.0.clone(),
            })?;
        let outcome = self.machine.override_decision(
            &mut expense,
            &OverrideRequest {
                admin,
                verdict: command.verdict,
                comments: command.comments,
                decided_at: command.decided_at,
            },
        )?;
        expense.version = self.store.save(&expense, expected_version).await?;

        info!(
            event_name = "workflow.override.applied",
            expense_id = %expense.id,
            correlation_id = %correlation_id,
            admin_id = %command.admin_id,
            verdict = outcome.verdict.as_str(),
            overridden = outcome.overridden.len(),
            status = expense.status.as_str(),
            "admin override applied"
        );

        let event = NotificationEvent::new(
            NotificationKind::ExpenseOverridden,
            expense.id.clone(),
            expense.company_id.clone(),
            correlation_id,
            format!("expense {} was overridden to {}", expense.id, expense.status.as_str()),
            command.decided_at,
        )
        .with_metadata("admin_id", command.admin_id.0.clone())
        .with_metadata("status", expense.status.as_str());
        self.dispatch(vec![event]);

        Ok(DecisionReport { expense, outcome })
    }

    pub async fn resolve_finding(
        &self,
        expense_id: &ExpenseId,
        resolution: FindingResolution,
        correlation_id: &str,
    ) -> Result<Expense, ApplicationError> {
        let mut expense = self.store.load(expense_id).await?;
        let expected_version = expense.version;
        let finding_id = resolution.finding_id.clone();
        let resolved_at = resolution.resolved_at;

        expense.resolve_finding(resolution)?;
        expense.updated_at = resolved_at;
        expense.version = self.store.save(&expense, expected_version).await?;

        info!(
            event_name = "workflow.finding.resolved",
            expense_id = %expense.id,
            correlation_id = %correlation_id,
            finding_id = %finding_id,
            "finding resolved"
        );
        Ok(expense)
    }

    async fn fetch_history(
        &self,
        expense: &Expense,
        now: DateTime<Utc>,
    ) -> Result<(Vec<Expense>, Vec<Expense>), LookupError> {
        let lookback = Duration::days(i64::from(self.settings.max_history_days()));
        let duplicate_window = Duration::hours(i64::from(self.settings.duplicate_window_hours));
        let history = self
            .history
            .submitter_history(&HistoryQuery {
                company_id: expense.company_id.clone(),
                submitter_id: expense.submitter_id.clone(),
                from: now.min(expense.incurred_at) - lookback,
                to: now.max(expense.incurred_at + duplicate_window),
                exclude: expense.id.clone(),
            })
            .await?;

        let vendor_history = self
            .history
            .vendor_history(&VendorHistoryQuery {
                company_id: expense.company_id.clone(),
                submitter_id: expense.submitter_id.clone(),
                vendor: expense.vendor.clone(),
                since: now - Duration::days(i64::from(self.settings.vendor_lookback_days)),
                exclude: expense.id.clone(),
            })
            .await?;

        Ok((history, vendor_history))
    }

    async fn fetch_roster(
        &self,
        expense: &Expense,
        policy: &CompanyPolicy,
        resolution: &RuleResolution,
        findings: &[AnomalyFinding],
    ) -> Result<ApproverRoster, LookupError> {
        let manager = if resolution.manager_required {
            self.directory.manager_of(&expense.company_id, &expense.submitter_id).await?
        } else {
            None
        };

        let mut roster = ApproverRoster::new(manager);
        for role in self.builder.roles_to_resolve(expense, policy, resolution, findings) {
            let users = self.directory.active_users_with_role(&expense.company_id, role).await?;
            roster.insert_role(role, users);
        }
        Ok(roster)
    }

    fn pending_step_events(
        &self,
        expense: &Expense,
        correlation_id: &str,
        now: DateTime<Utc>,
    ) -> Vec<NotificationEvent> {
        expense
            .approval_flow
            .steps
            .iter()
            .filter(|step| step.outcome.is_pending())
            .map(|step| {
                NotificationEvent::new(
                    NotificationKind::ApprovalRequired,
                    expense.id.clone(),
                    expense.company_id.clone(),
                    correlation_id,
                    format!("approval required for step {} of expense {}", step.sequence, expense.id),
                    now,
                )
                .for_recipient(step.approver_id.clone())
                .at_step(step.sequence)
                .with_metadata("role", step.required_role.as_str())
                .with_metadata("reason", step.reason.as_str())
            })
            .collect()
    }

    fn status_event(
        &self,
        expense: &Expense,
        correlation_id: &str,
        at: DateTime<Utc>,
    ) -> NotificationEvent {
        let kind = if expense.status == ExpenseStatus::Rejected {
            NotificationKind::ExpenseRejected
        } else {
            NotificationKind::ExpenseApproved
        };
        NotificationEvent::new(
            kind,
            expense.id.clone(),
            expense.company_id.clone(),
            correlation_id,
            format!("expense {} is {}", expense.id, expense.status.as_str()),
            at,
        )
        .for_recipient(expense.submitter_id.clone())
    }

    /// Hands the events to a background task so the caller never waits on delivery.
    fn dispatch(&self, events: Vec<NotificationEvent>) {
        if events.is_empty() {
            return;
        }

        let channel = Arc::clone(&self.notifications);
        let handle = tokio::spawn(async move {
            for event in events {
                if let Err(error) = channel.notify(&event).await {
                    warn!(
                        event_name = "workflow.notification.failed",
                        expense_id = %event.expense_id,
                        correlation_id = %event.correlation_id,
                        notification = event.kind.as_str(),
                        error = %error,
                        "notification delivery failed; state change is kept"
                    );
                }
            }
        });

        let mut deliveries = match self.deliveries.lock() {
            Ok(deliveries) => deliveries,
            Err(poisoned) => poisoned.into_inner(),
        };
        deliveries.retain(|delivery| !delivery.is_finished());
        deliveries.push(handle);
    }

    /// Waits for every delivery started so far.
    pub async fn drain_notifications(&self) {
        let pending = {
            let mut deliveries = match self.deliveries.lock() {
                Ok(deliveries) => deliveries,
                Err(poisoned) => poisoned.into_inner(),
            };
            mem::take(&mut *deliveries)
        };

        for delivery in pending {
            if let Err(error) = delivery.await {
                warn!(
                    event_name = "workflow.notification.aborted",
                    error = %error,
                    "notification delivery task did not finish"
                );
            }
        }
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::approval::{FlowStatus, StepOutcome, StepReason};
use crate::domain::expense::{Expense, ExpenseStatus};
use crate::domain::user::{DirectoryUser, Role, UserId};
use crate::errors::DecisionError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Approve,
    Reject,
}

impl Verdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Approve => "approve",
            Self::Reject => "reject",
        }
    }

    fn outcome(&self) -> StepOutcome {
        match self {
            Self::Approve => StepOutcome::Approved,
            Self::Reject => StepOutcome::Rejected,
        }
    }

    fn status(&self) -> ExpenseStatus {
        match self {
            Self::Approve => ExpenseStatus::Approved,
            Self::Reject => ExpenseStatus::Rejected,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepDecision {
    pub approver_id: UserId,
    /// Targets the approver's earliest pending step when absent.
    #[serde(default)]
    pub sequence: Option<usize>,
    pub verdict: Verdict,
    #[serde(default)]
    pub comments: Option<String>,
    pub decided_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OverrideRequest {
    pub admin: DirectoryUser,
    pub verdict: Verdict,
    pub comments: Option<String>,
    pub decided_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionOutcome {
    pub sequence: usize,
    pub verdict: Verdict,
    /// Quorum members closed as skipped by this decision.
    pub skipped: Vec<usize>,
    /// Pending steps closed as overridden by this decision.
    pub overridden: Vec<usize>,
    pub previous_status: ExpenseStatus,
    pub status: ExpenseStatus,
}

impl DecisionOutcome {
    pub fn status_changed(&self) -> bool {
        self.previous_status != self.status
    }
}

/// Applies decisions to an expense's flow in place. Callers serialize access per expense through
/// the store's version check.
#[derive(Clone, Debug, Default)]
pub struct ApprovalStateMachine;

impl ApprovalStateMachine {
    pub fn decide(
        &self,
        expense: &mut Expense,
        decision: &StepDecision,
    ) -> Result<DecisionOutcome, DecisionError> {
        if expense.status != ExpenseStatus::Submitted {
            return Err(DecisionError::ExpenseNotOpen { status: expense.status });
        }

        let index = self.locate_step(expense, decision)?;
        let previous_status = expense.status;
        let flow = &mut expense.approval_flow;

        let step = &mut flow.steps[index];
        step.outcome = decision.verdict.outcome();
        step.comments = decision.comments.clone();
        step.decided_at = Some(decision.decided_at);
        let sequence = step.sequence;
        let group_id = step.quorum_group.clone();

        let mut skipped = Vec::new();
        if decision.verdict == Verdict::Approve {
            let satisfied = group_id
                .as_ref()
                .and_then(|id| flow.group(id))
                .filter(|group| group.is_satisfied(&flow.steps))
                .map(|group| group.members.clone());
            if let Some(members) = satisfied {
                for step in flow.steps.iter_mut().filter(|step| {
                    step.outcome.is_pending() && members.contains(&step.sequence)
                }) {
                    step.outcome = StepOutcome::Skipped;
                    step.decided_at = Some(decision.decided_at);
                    skipped.push(step.sequence);
                }
            }
        }

        match flow.derive_status() {
            FlowStatus::Rejected => expense.transition_to(ExpenseStatus::Rejected)?,
            FlowStatus::Approved => expense.transition_to(ExpenseStatus::Approved)?,
            FlowStatus::Pending => {}
        }
        expense.updated_at = decision.decided_at;

        Ok(DecisionOutcome {
            sequence,
            verdict: decision.verdict,
            skipped,
            overridden: Vec::new(),
            previous_status,
            status: expense.status,
        })
    }

    /// Closes every pending step as overridden and appends the admin's terminal step.
    pub fn override_decision(
        &self,
        expense: &mut Expense,
        request: &OverrideRequest,
    ) -> Result<DecisionOutcome, DecisionError> {
        if request.admin.role != Role::Admin || !request.admin.active {
            return Err(DecisionError::OverrideNotPermitted {
                actor_id: request.admin.id.0.clone(),
            });
        }
        if !matches!(
            expense.status,
            ExpenseStatus::Submitted | ExpenseStatus::Approved | ExpenseStatus::Rejected
        ) {
            return Err(DecisionError::ExpenseNotOpen { status: expense.status });
        }

        let previous_status = expense.status;
        let flow = &mut expense.approval_flow;
        let mut overridden = Vec::new();
        for step in flow.steps.iter_mut().filter(|step| step.outcome.is_pending()) {
            step.outcome = StepOutcome::Overridden;
            step.decided_at = Some(request.decided_at);
            overridden.push(step.sequence);
        }

        let sequence =
            flow.push_step(request.admin.id.clone(), Role::Admin, StepReason::AdminOverride);
        if let Some(step) = flow.steps.last_mut() {
            step.outcome = request.verdict.outcome();
            step.comments = request.comments.clone();
            step.decided_at = Some(request.decided_at);
        }

        expense.apply_override(request.verdict.status())?;
        expense.updated_at = request.decided_at;

        Ok(DecisionOutcome {
            sequence,
            verdict: request.verdict,
            skipped: Vec::new(),
            overridden,
            previous_status,
            status: expense.status,
        })
    }

    /// Moves a freshly submitted expense to its terminal status when its flow needs nobody.
    pub fn settle(&self, expense: &mut Expense) -> Result<ExpenseStatus, DecisionError> {
        if expense.status == ExpenseStatus::Submitted
            && expense.approval_flow.derive_status() == FlowStatus::Approved
        {
            expense.transition_to(ExpenseStatus::Approved)?;
        }
        Ok(expense.status)
    }

    fn locate_step(&self, expense: &Expense, decision: &StepDecision) -> Result<usize, DecisionError> {
        let steps = &expense.approval_flow.steps;
        let Some(sequence) = decision.sequence else {
            return steps
                .iter()
                .position(|step| {
                    step.outcome.is_pending() && step.approver_id == decision.approver_id
                })
                .ok_or_else(|| DecisionError::NoPendingStep {
                    approver_id: decision.approver_id.0.clone(),
                });
        };

        let index = steps
            .iter()
            .position(|step| step.sequence == sequence)
            .ok_or(DecisionError::StepNotFound { sequence })?;
        let step = &steps[index];
        if step.approver_id != decision.approver_id {
            return Err(DecisionError::ApproverNotBound {
                approver_id: decision.approver_id.0.clone(),
                sequence,
            });
        }
        if !step.outcome.is_pending() {
            return Err(DecisionError::StepNotPending {
                sequence,
                outcome: step.outcome.as_str().to_string(),
            });
        }
        Ok(index)
    }
}

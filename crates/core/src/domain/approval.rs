use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::policy::QuorumRule;
use crate::domain::user::{Role, UserId};

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QuorumGroupId(pub String);

/// Terminal vocabulary for a step. `Skipped` means a quorum was met without this member,
/// `Overridden` means an admin decided the expense while this step was still open.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepOutcome {
    Pending,
    Approved,
    Rejected,
    Skipped,
    Overridden,
}

impl StepOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Skipped => "skipped",
            Self::Overridden => "overridden",
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending)
    }
}

/// Why a step exists in the flow.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepReason {
    Manager,
    AmountThreshold,
    CategoryRule,
    HighValue,
    AnomalyEscalation,
    AdminOverride,
}

impl StepReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Manager => "manager",
            Self::AmountThreshold => "amount_threshold",
            Self::CategoryRule => "category_rule",
            Self::HighValue => "high_value",
            Self::AnomalyEscalation => "anomaly_escalation",
            Self::AdminOverride => "admin_override",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalStep {
    pub sequence: usize,
    pub approver_id: UserId,
    pub required_role: Role,
    pub reason: StepReason,
    pub outcome: StepOutcome,
    #[serde(default)]
    pub comments: Option<String>,
    #[serde(default)]
    pub decided_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub quorum_group: Option<QuorumGroupId>,
}

impl ApprovalStep {
    pub fn pending(
        sequence: usize,
        approver_id: UserId,
        required_role: Role,
        reason: StepReason,
    ) -> Self {
        Self {
            sequence,
            approver_id,
            required_role,
            reason,
            outcome: StepOutcome::Pending,
            comments: None,
            decided_at: None,
            quorum_group: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuorumGroup {
    pub id: QuorumGroupId,
    pub role: Role,
    pub rule: QuorumRule,
    #[serde(default)]
    pub percentage: Option<Decimal>,
    pub required_count: usize,
    /// Sequences of the member steps.
    pub members: Vec<usize>,
}

impl QuorumGroup {
    pub fn approved_count(&self, steps: &[ApprovalStep]) -> usize {
        self.member_steps(steps).filter(|step| step.outcome == StepOutcome::Approved).count()
    }

    pub fn is_satisfied(&self, steps: &[ApprovalStep]) -> bool {
        self.approved_count(steps) >= self.required_count
    }

    fn member_steps<'a>(
        &'a self,
        steps: &'a [ApprovalStep],
    ) -> impl Iterator<Item = &'a ApprovalStep> + 'a {
        steps.iter().filter(move |step| self.members.contains(&step.sequence))
    }
}

/// `ceil(members * pct / 100)` for percentage quorums, clamped to `1..=members`.
pub fn required_count(rule: QuorumRule, percentage: Option<Decimal>, member_count: usize) -> usize {
    if member_count == 0 {
        return 0;
    }

    let required = match rule {
        QuorumRule::All => member_count,
        QuorumRule::Any => 1,
        QuorumRule::Percentage => {
            let percentage = percentage.unwrap_or(Decimal::ONE_HUNDRED);
            (Decimal::from(member_count) * percentage / Decimal::ONE_HUNDRED)
                .ceil()
                .to_usize()
                .unwrap_or(member_count)
        }
    };

    required.clamp(1, member_count)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowStatus {
    Pending,
    Approved,
    Rejected,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuorumProgress {
    pub group_id: QuorumGroupId,
    pub role: Role,
    pub rule: QuorumRule,
    pub required_count: usize,
    pub approved_count: usize,
    pub pending_count: usize,
    pub satisfied: bool,
}

/// Who still has to act, per step and per quorum group.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowSummary {
    pub pending_count: usize,
    pub pending_approvers: Vec<UserId>,
    pub quorum_progress: Vec<QuorumProgress>,
}

/// Ordered, append-only list of approval steps plus the quorum groups binding some of them.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalFlow {
    pub steps: Vec<ApprovalStep>,
    #[serde(default)]
    pub quorum_groups: Vec<QuorumGroup>,
}

impl ApprovalFlow {
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn group(&self, id: &QuorumGroupId) -> Option<&QuorumGroup> {
        self.quorum_groups.iter().find(|group| &group.id == id)
    }

    pub fn pending_count(&self) -> usize {
        self.steps.iter().filter(|step| step.outcome.is_pending()).count()
    }

    pub fn has_pending(&self) -> bool {
        self.steps.iter().any(|step| step.outcome.is_pending())
    }

    pub fn pending_approvers(&self) -> Vec<&UserId> {
        self.steps
            .iter()
            .filter(|step| step.outcome.is_pending())
            .map(|step| &step.approver_id)
            .collect()
    }

    pub fn next_sequence(&self) -> usize {
        self.steps.iter().map(|step| step.sequence + 1).max().unwrap_or(0)
    }

    /// Appends a pending step and returns its sequence.
    pub fn push_step(&mut self, approver_id: UserId, required_role: Role, reason: StepReason) -> usize {
        let sequence = self.next_sequence();
        self.steps.push(ApprovalStep::pending(sequence, approver_id, required_role, reason));
        sequence
    }

    pub fn quorum_progress(&self) -> Vec<QuorumProgress> {
        self.quorum_groups
            .iter()
            .map(|group| {
                let pending_count = group
                    .member_steps(&self.steps)
                    .filter(|step| step.outcome.is_pending())
                    .count();
                let approved_count = group.approved_count(&self.steps);
                QuorumProgress {
                    group_id: group.id.clone(),
                    role: group.role,
                    rule: group.rule,
                    required_count: group.required_count,
                    approved_count,
                    pending_count,
                    satisfied: approved_count >= group.required_count,
                }
            })
            .collect()
    }

    pub fn summary(&self) -> FlowSummary {
        FlowSummary {
            pending_count: self.pending_count(),
            pending_approvers: self.pending_approvers().into_iter().cloned().collect(),
            quorum_progress: self.quorum_progress(),
        }
    }

    /// The latest admin override wins; otherwise any rejection rejects, any pending step keeps
    /// the flow open, and a fully resolved flow is approved. Skipped and overridden steps never
    /// count as rejections.
    pub fn derive_status(&self) -> FlowStatus {
        if let Some(decision) =
            self.steps.iter().rev().find(|step| step.reason == StepReason::AdminOverride)
        {
            return match decision.outcome {
                StepOutcome::Rejected => FlowStatus::Rejected,
                _ => FlowStatus::Approved,
            };
        }

        if self.steps.iter().any(|step| step.outcome == StepOutcome::Rejected) {
            return FlowStatus::Rejected;
        }

        if self.has_pending() {
            return FlowStatus::Pending;
        }

        FlowStatus::Approved
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use super::{
        required_count, ApprovalFlow, FlowStatus, QuorumGroup, QuorumGroupId, StepOutcome,
        StepReason,
    };
    use crate::domain::policy::QuorumRule;
    use crate::domain::user::{Role, UserId};

    fn user(id: &str) -> UserId {
        UserId(id.to_string())
    }

    #[test]
    fn percentage_quorum_rounds_up() {
        assert_eq!(required_count(QuorumRule::Percentage, Some(Decimal::new(50, 0)), 3), 2);
        assert_eq!(required_count(QuorumRule::Percentage, Some(Decimal::new(60, 0)), 5), 3);
        assert_eq!(required_count(QuorumRule::Percentage, Some(Decimal::new(1, 0)), 4), 1);
        assert_eq!(required_count(QuorumRule::Percentage, Some(Decimal::ONE_HUNDRED), 4), 4);
    }

    #[test]
    fn any_and_all_quorums_use_member_bounds() {
        assert_eq!(required_count(QuorumRule::Any, None, 4), 1);
        assert_eq!(required_count(QuorumRule::All, None, 4), 4);
        assert_eq!(required_count(QuorumRule::All, None, 0), 0);
    }

    #[test]
    fn empty_flow_derives_approved() {
        assert_eq!(ApprovalFlow::default().derive_status(), FlowStatus::Approved);
    }

    #[test]
    fn rejection_dominates_later_approvals() {
        let mut flow = ApprovalFlow::default();
        flow.push_step(user("m"), Role::Manager, StepReason::Manager);
        flow.push_step(user("f"), Role::Finance, StepReason::AmountThreshold);
        flow.steps[0].outcome = StepOutcome::Rejected;
        assert_eq!(flow.derive_status(), FlowStatus::Rejected);

        flow.steps[1].outcome = StepOutcome::Approved;
        assert_eq!(flow.derive_status(), FlowStatus::Rejected);
    }

    #[test]
    fn latest_override_decides_status() {
        let mut flow = ApprovalFlow::default();
        flow.push_step(user("m"), Role::Manager, StepReason::Manager);
        flow.steps[0].outcome = StepOutcome::Rejected;
        let seq = flow.push_step(user("root"), Role::Admin, StepReason::AdminOverride);
        flow.steps[seq].outcome = StepOutcome::Approved;

        assert_eq!(flow.derive_status(), FlowStatus::Approved);
    }

    #[test]
    fn quorum_progress_reports_group_counts() {
        let mut flow = ApprovalFlow::default();
        let a = flow.push_step(user("f1"), Role::Finance, StepReason::AmountThreshold);
        let b = flow.push_step(user("f2"), Role::Finance, StepReason::AmountThreshold);
        flow.quorum_groups.push(QuorumGroup {
            id: QuorumGroupId("qg-finance".to_string()),
            role: Role::Finance,
            rule: QuorumRule::Any,
            percentage: None,
            required_count: 1,
            members: vec![a, b],
        });
        flow.steps[a].outcome = StepOutcome::Approved;

        let progress = flow.quorum_progress();
        assert_eq!(progress.len(), 1);
        assert_eq!(progress[0].approved_count, 1);
        assert_eq!(progress[0].pending_count, 1);
        assert!(progress[0].satisfied);

        let summary = flow.summary();
        assert_eq!(summary.pending_count, 1);
        assert_eq!(summary.pending_approvers, vec![user("f2")]);
        assert_eq!(summary.quorum_progress, progress);
    }
}

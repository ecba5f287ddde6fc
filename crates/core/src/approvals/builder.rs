use std::collections::{BTreeSet, HashMap, HashSet};

use serde::{Deserialize, Serialize};
use tracing::warn;

use super::rules::{RuleHit, RuleResolution};
use crate::domain::anomaly::AnomalyFinding;
use crate::domain::approval::{
    required_count, ApprovalFlow, QuorumGroup, QuorumGroupId, StepReason,
};
use crate::domain::expense::Expense;
use crate::domain::policy::{CompanyPolicy, QuorumRule};
use crate::domain::user::{DirectoryUser, Role, UserId};

/// Directory snapshot the builder routes against. Fetched up front so building stays pure.
#[derive(Clone, Debug, Default)]
pub struct ApproverRoster {
    pub manager: Option<DirectoryUser>,
    by_role: HashMap<Role, Vec<DirectoryUser>>,
}

impl ApproverRoster {
    pub fn new(manager: Option<DirectoryUser>) -> Self {
        Self { manager, by_role: HashMap::new() }
    }

    pub fn with_role(mut self, role: Role, users: Vec<DirectoryUser>) -> Self {
        self.insert_role(role, users);
        self
    }

    pub fn insert_role(&mut self, role: Role, users: Vec<DirectoryUser>) {
        self.by_role.insert(role, users);
    }

    /// Active holders of `role`, ordered by id so the flow is stable across directory reads.
    pub fn active(&self, role: Role) -> Vec<&DirectoryUser> {
        let mut users: Vec<&DirectoryUser> = self
            .by_role
            .get(&role)
            .map(|users| users.iter().filter(|user| user.active && user.role == role).collect())
            .unwrap_or_default();
        users.sort_by(|left, right| left.id.cmp(&right.id));
        users
    }
}

/// A required role that resolved to nobody who can approve. Surfaced as a warning, never as an
/// error.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigurationGap {
    pub role: Role,
    pub reason: StepReason,
    pub message: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowBuildOutcome {
    pub flow: ApprovalFlow,
    pub warnings: Vec<ConfigurationGap>,
}

impl FlowBuildOutcome {
    pub fn has_gaps(&self) -> bool {
        !self.warnings.is_empty()
    }
}

pub struct FlowBuildInput<'a> {
    pub expense: &'a Expense,
    pub policy: &'a CompanyPolicy,
    pub resolution: &'a RuleResolution,
    pub findings: &'a [AnomalyFinding],
    pub roster: &'a ApproverRoster,
}

#[derive(Clone, Debug, Default)]
pub struct ApprovalFlowBuilder;

impl ApprovalFlowBuilder {
    /// Roles whose active holders must be fetched before `build` can route the expense.
    pub fn roles_to_resolve(
        &self,
        expense: &Expense,
        policy: &CompanyPolicy,
        resolution: &RuleResolution,
        findings: &[AnomalyFinding],
    ) -> BTreeSet<Role> {
        let mut roles = resolution.required_roles();
        if expense.amount >= policy.high_value_threshold {
            roles.insert(Role::Director);
        }
        if escalation_required(findings) {
            roles.insert(Role::Admin);
        }
        roles
    }

    pub fn build(&self, input: FlowBuildInput<'_>) -> FlowBuildOutcome {
        let mut draft = FlowDraft::new(input.expense.submitter_id.clone());

        if input.resolution.manager_required {
            if let Some(manager) = input.roster.manager.as_ref().filter(|manager| manager.active) {
                draft.append(&manager.id, Role::Manager, StepReason::Manager);
            }
        }

        if let Some(hit) = input.resolution.threshold_hit() {
            draft.append_rule_hit(hit, input.roster);
        }

        if let Some(hit) = input.resolution.category_hit() {
            draft.append_rule_hit(hit, input.roster);
        }

        if input.expense.amount >= input.policy.high_value_threshold {
            draft.append_role(Role::Director, StepReason::HighValue, input.roster);
        }

        if escalation_required(input.findings) {
            draft.append_role(Role::Admin, StepReason::AnomalyEscalation, input.roster);
        }

        for gap in &draft.warnings {
            warn!(
                event_name = "approvals.flow.configuration_gap",
                expense_id = %input.expense.id,
                role = gap.role.as_str(),
                reason = gap.reason.as_str(),
                "{}",
                gap.message
            );
        }

        FlowBuildOutcome { flow: draft.flow, warnings: draft.warnings }
    }
}

fn escalation_required(findings: &[AnomalyFinding]) -> bool {
    findings.iter().any(|finding| finding.severity.requires_escalation())
}

struct FlowDraft {
    flow: ApprovalFlow,
    seen: HashSet<UserId>,
    submitter: UserId,
    warnings: Vec<ConfigurationGap>,
}

impl FlowDraft {
    fn new(submitter: UserId) -> Self {
        Self { flow: ApprovalFlow::default(), seen: HashSet::new(), submitter, warnings: Vec::new() }
    }

    /// First occurrence of an approver wins; the submitter is never routed to themselves.
    fn append(&mut self, approver: &UserId, role: Role, reason: StepReason) -> Option<usize> {
        if approver == &self.submitter || !self.seen.insert(approver.clone()) {
            return None;
        }
        Some(self.flow.push_step(approver.clone(), role, reason))
    }

    fn append_role(&mut self, role: Role, reason: StepReason, roster: &ApproverRoster) -> Vec<usize> {
        let candidates: Vec<UserId> = roster
            .active(role)
            .into_iter()
            .filter(|user| user.id != self.submitter)
            .map(|user| user.id.clone())
            .collect();

        if candidates.is_empty() {
            self.warnings.push(ConfigurationGap {
                role,
                reason,
                message: format!(
                    "no active {} is available to approve ({} step omitted)",
                    role.as_str(),
                    reason.as_str()
                ),
            });
            return Vec::new();
        }

        candidates.iter().filter_map(|id| self.append(id, role, reason)).collect()
    }

    fn append_rule_hit(&mut self, hit: &RuleHit, roster: &ApproverRoster) {
        let reason = hit.step_reason();
        for role in &hit.roles {
            let members = self.append_role(*role, reason, roster);
            if hit.quorum == QuorumRule::All || members.is_empty() {
                continue;
            }

            let id = QuorumGroupId(format!(
                "qg-{}-{}",
                role.as_str(),
                self.flow.quorum_groups.len() + 1
            ));
            for step in self.flow.steps.iter_mut().filter(|step| members.contains(&step.sequence)) {
                step.quorum_group = Some(id.clone());
            }
            self.flow.quorum_groups.push(QuorumGroup {
                id,
                role: *role,
                rule: hit.quorum,
                percentage: hit.percentage,
                required_count: required_count(hit.quorum, hit.percentage, members.len()),
                members,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use rust_decimal::Decimal;

    use super::{ApprovalFlowBuilder, ApproverRoster, FlowBuildInput};
    use crate::approvals::rules::resolve_rules;
    use crate::domain::anomaly::{AnomalyFinding, AnomalyType, Severity};
    use crate::domain::approval::StepReason;
    use crate::domain::expense::{Expense, ExpenseId};
    use crate::domain::policy::{CategoryPolicy, CompanyPolicy, QuorumRule, ThresholdRule};
    use crate::domain::user::{CompanyId, DirectoryUser, Role, UserId};

    fn user(id: &str, role: Role) -> DirectoryUser {
        DirectoryUser {
            id: UserId(id.to_string()),
            company_id: CompanyId("acme".to_string()),
            display_name: id.to_string(),
            role,
            active: true,
            manager_id: None,
        }
    }

    fn expense(amount: i64, category: &str) -> Expense {
        let at = Utc.with_ymd_and_hms(2026, 3, 2, 12, 0, 0).single().expect("valid timestamp");
        Expense::draft(
            ExpenseId("EXP-1".to_string()),
            CompanyId("acme".to_string()),
            UserId("emp-1".to_string()),
            Decimal::new(amount, 0),
            category,
            "Delta Air Lines",
            at,
            at,
        )
    }

    fn policy() -> CompanyPolicy {
        let mut policy = CompanyPolicy::new(CompanyId("acme".to_string()));
        policy.threshold_rules = vec![ThresholdRule {
            threshold: Decimal::new(1_000, 0),
            required_roles: vec![Role::Finance],
            quorum: QuorumRule::All,
            percentage: None,
        }];
        policy.categories = vec![CategoryPolicy {
            name: "Travel".to_string(),
            max_amount: None,
            receipt_required: false,
            required_roles: vec![Role::Director],
        }];
        policy
    }

    fn roster() -> ApproverRoster {
        ApproverRoster::new(Some(user("mgr-1", Role::Manager)))
            .with_role(Role::Finance, vec![user("fin-2", Role::Finance), user("fin-1", Role::Finance)])
            .with_role(Role::Director, vec![user("dir-1", Role::Director), user("dir-2", Role::Director)])
            .with_role(Role::Admin, vec![user("adm-1", Role::Admin)])
    }

    fn approvers(outcome: &super::FlowBuildOutcome) -> Vec<&str> {
        outcome.flow.steps.iter().map(|step| step.approver_id.0.as_str()).collect()
    }

    #[test]
    fn travel_expense_routes_manager_then_finance_then_directors() {
        let expense = expense(6_000, "Travel");
        let policy = policy();
        let resolution = resolve_rules(expense.amount, &expense.category, &policy);
        let roster = roster();

        let outcome = ApprovalFlowBuilder.build(FlowBuildInput {
            expense: &expense,
            policy: &policy,
            resolution: &resolution,
            findings: &[],
            roster: &roster,
        });

        assert_eq!(approvers(&outcome), vec!["mgr-1", "fin-1", "fin-2", "dir-1", "dir-2"]);
        assert_eq!(outcome.flow.steps[0].reason, StepReason::Manager);
        assert!(outcome.flow.quorum_groups.is_empty());
        assert!(outcome.warnings.is_empty());
    }

    #[test]
    fn percentage_rule_binds_role_members_into_one_group() {
        let expense = expense(2_000, "Meals");
        let mut policy = policy();
        policy.threshold_rules[0].quorum = QuorumRule::Percentage;
        policy.threshold_rules[0].percentage = Some(Decimal::new(50, 0));
        let resolution = resolve_rules(expense.amount, &expense.category, &policy);
        let roster = roster().with_role(
            Role::Finance,
            vec![user("fin-1", Role::Finance), user("fin-2", Role::Finance), user("fin-3", Role::Finance)],
        );

        let outcome = ApprovalFlowBuilder.build(FlowBuildInput {
            expense: &expense,
            policy: &policy,
            resolution: &resolution,
            findings: &[],
            roster: &roster,
        });

        assert_eq!(outcome.flow.quorum_groups.len(), 1);
        let group = &outcome.flow.quorum_groups[0];
        assert_eq!(group.members, vec![1, 2, 3]);
        assert_eq!(group.required_count, 2);
        assert!(outcome.flow.steps[1..].iter().all(|step| step.quorum_group.as_ref() == Some(&group.id)));
        assert!(outcome.flow.steps[0].quorum_group.is_none());
    }

    #[test]
    fn duplicate_approvers_keep_their_first_step() {
        let expense = expense(12_000, "Travel");
        let policy = policy();
        let resolution = resolve_rules(expense.amount, &expense.category, &policy);
        let roster = roster();

        let outcome = ApprovalFlowBuilder.build(FlowBuildInput {
            expense: &expense,
            policy: &policy,
            resolution: &resolution,
            findings: &[],
            roster: &roster,
        });

        assert_eq!(approvers(&outcome), vec!["mgr-1", "fin-1", "fin-2", "dir-1", "dir-2"]);
        assert!(outcome
            .flow
            .steps
            .iter()
            .filter(|step| step.required_role == Role::Director)
            .all(|step| step.reason == StepReason::CategoryRule));
    }

    #[test]
    fn high_severity_finding_escalates_to_admins_last() {
        let expense = expense(6_000, "Travel");
        let policy = policy();
        let resolution = resolve_rules(expense.amount, &expense.category, &policy);
        let roster = roster();
        let finding =
            AnomalyFinding::new(AnomalyType::Duplicate, Severity::High, 90.0, "dup", expense.created_at);

        let outcome = ApprovalFlowBuilder.build(FlowBuildInput {
            expense: &expense,
            policy: &policy,
            resolution: &resolution,
            findings: &[finding],
            roster: &roster,
        });

        let last = outcome.flow.steps.last().expect("escalation step");
        assert_eq!(last.approver_id.0, "adm-1");
        assert_eq!(last.reason, StepReason::AnomalyEscalation);
    }

    #[test]
    fn empty_role_is_reported_as_configuration_gap() {
        let expense = expense(6_000, "Travel");
        let policy = policy();
        let resolution = resolve_rules(expense.amount, &expense.category, &policy);
        let mut inactive = user("dir-1", Role::Director);
        inactive.active = false;
        let roster = ApproverRoster::new(Some(user("mgr-1", Role::Manager)))
            .with_role(Role::Finance, vec![user("fin-1", Role::Finance)])
            .with_role(Role::Director, vec![inactive]);

        let outcome = ApprovalFlowBuilder.build(FlowBuildInput {
            expense: &expense,
            policy: &policy,
            resolution: &resolution,
            findings: &[],
            roster: &roster,
        });

        assert_eq!(approvers(&outcome), vec!["mgr-1", "fin-1"]);
        assert_eq!(outcome.warnings.len(), 1);
        assert_eq!(outcome.warnings[0].role, Role::Director);
        assert_eq!(outcome.warnings[0].reason, StepReason::CategoryRule);
    }

    #[test]
    fn submitter_is_never_routed_to_themselves() {
        let mut expense = expense(2_000, "Meals");
        expense.submitter_id = UserId("fin-1".to_string());
        let policy = policy();
        let resolution = resolve_rules(expense.amount, &expense.category, &policy);
        let roster = roster();

        let outcome = ApprovalFlowBuilder.build(FlowBuildInput {
            expense: &expense,
            policy: &policy,
            resolution: &resolution,
            findings: &[],
            roster: &roster,
        });

        assert_eq!(approvers(&outcome), vec!["mgr-1", "fin-2"]);
    }

    #[test]
    fn trivial_amount_builds_empty_flow() {
        let expense = expense(5, "Meals");
        let policy = policy();
        let resolution = resolve_rules(expense.amount, &expense.category, &policy);
        let roster = roster();

        let outcome = ApprovalFlowBuilder.build(FlowBuildInput {
            expense: &expense,
            policy: &policy,
            resolution: &resolution,
            findings: &[],
            roster: &roster,
        });

        assert!(outcome.flow.is_empty());
        assert!(!outcome.has_gaps());
    }

    #[test]
    fn roles_to_resolve_include_escalation_and_high_value() {
        let expense = expense(15_000, "Meals");
        let policy = policy();
        let resolution = resolve_rules(expense.amount, &expense.category, &policy);
        let finding =
            AnomalyFinding::new(AnomalyType::UnusualAmount, Severity::Critical, 80.0, "big", expense.created_at);

        let roles = ApprovalFlowBuilder.roles_to_resolve(&expense, &policy, &resolution, &[finding]);

        assert_eq!(roles.into_iter().collect::<Vec<_>>(), vec![Role::Finance, Role::Director, Role::Admin]);
    }
}

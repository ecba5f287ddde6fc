use std::collections::BTreeSet;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::approval::StepReason;
use crate::domain::policy::{CompanyPolicy, QuorumRule};
use crate::domain::user::Role;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RuleSource {
    AmountThreshold { threshold: Decimal },
    Category { category: String },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleHit {
    pub source: RuleSource,
    pub roles: Vec<Role>,
    pub quorum: QuorumRule,
    pub percentage: Option<Decimal>,
}

impl RuleHit {
    pub fn step_reason(&self) -> StepReason {
        match self.source {
            RuleSource::AmountThreshold { .. } => StepReason::AmountThreshold,
            RuleSource::Category { .. } => StepReason::CategoryRule,
        }
    }
}

/// Output of the rule resolver: at most one threshold hit followed by at most one category hit.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleResolution {
    pub manager_required: bool,
    pub hits: Vec<RuleHit>,
}

impl RuleResolution {
    pub fn threshold_hit(&self) -> Option<&RuleHit> {
        self.hits.iter().find(|hit| matches!(hit.source, RuleSource::AmountThreshold { .. }))
    }

    pub fn category_hit(&self) -> Option<&RuleHit> {
        self.hits.iter().find(|hit| matches!(hit.source, RuleSource::Category { .. }))
    }

    pub fn required_roles(&self) -> BTreeSet<Role> {
        self.hits.iter().flat_map(|hit| hit.roles.iter().copied()).collect()
    }
}

/// Pure rule resolution for one expense. Thresholds never stack: only the highest threshold
/// not above `amount` applies.
pub fn resolve_rules(amount: Decimal, category: &str, policy: &CompanyPolicy) -> RuleResolution {
    let mut hits = Vec::new();

    let mut thresholds: Vec<_> = policy.threshold_rules.iter().collect();
    thresholds.sort_by(|left, right| left.threshold.cmp(&right.threshold));
    if let Some(rule) = thresholds.into_iter().filter(|rule| rule.threshold <= amount).last() {
        hits.push(RuleHit {
            source: RuleSource::AmountThreshold { threshold: rule.threshold },
            roles: dedup_roles(&rule.required_roles),
            quorum: rule.quorum,
            percentage: rule.percentage,
        });
    }

    if let Some(category_policy) = policy.category(category) {
        if !category_policy.required_roles.is_empty() {
            hits.push(RuleHit {
                source: RuleSource::Category { category: category_policy.name.clone() },
                roles: dedup_roles(&category_policy.required_roles),
                quorum: QuorumRule::All,
                percentage: None,
            });
        }
    }

    RuleResolution { manager_required: amount >= policy.manager_approval_floor, hits }
}

fn dedup_roles(roles: &[Role]) -> Vec<Role> {
    let mut seen = BTreeSet::new();
    roles.iter().copied().filter(|role| seen.insert(*role)).collect()
}

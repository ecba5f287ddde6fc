use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::user::{CompanyId, Role};
use crate::errors::DomainError;

/// How many members of a role group must approve before the group is satisfied.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuorumRule {
    #[default]
    All,
    Any,
    Percentage,
}

impl QuorumRule {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::All => "all",
            Self::Any => "any",
            Self::Percentage => "percentage",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThresholdRule {
    pub threshold: Decimal,
    pub required_roles: Vec<Role>,
    #[serde(default)]
    pub quorum: QuorumRule,
    #[serde(default)]
    pub percentage: Option<Decimal>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryPolicy {
    pub name: String,
    #[serde(default)]
    pub max_amount: Option<Decimal>,
    #[serde(default)]
    pub receipt_required: bool,
    #[serde(default)]
    pub required_roles: Vec<Role>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WeekendPolicy {
    #[default]
    Allow,
    Flag,
}

/// Company policy as handed over by the policy provider. Read-only for this core.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompanyPolicy {
    pub company_id: CompanyId,
    #[serde(default)]
    pub categories: Vec<CategoryPolicy>,
    #[serde(default)]
    pub threshold_rules: Vec<ThresholdRule>,
    #[serde(default = "default_manager_floor")]
    pub manager_approval_floor: Decimal,
    #[serde(default = "default_high_value_threshold")]
    pub high_value_threshold: Decimal,
    #[serde(default = "default_late_submission_days")]
    pub late_submission_days: u32,
    #[serde(default)]
    pub weekend_policy: WeekendPolicy,
}

fn default_manager_floor() -> Decimal {
    Decimal::new(2_500, 2)
}

fn default_high_value_threshold() -> Decimal {
    Decimal::new(10_000, 0)
}

fn default_late_submission_days() -> u32 {
    30
}

impl CompanyPolicy {
    pub fn new(company_id: CompanyId) -> Self {
        Self {
            company_id,
            categories: Vec::new(),
            threshold_rules: Vec::new(),
            manager_approval_floor: default_manager_floor(),
            high_value_threshold: default_high_value_threshold(),
            late_submission_days: default_late_submission_days(),
            weekend_policy: WeekendPolicy::default(),
        }
    }

    pub fn category(&self, name: &str) -> Option<&CategoryPolicy> {
        let key = normalize_key(name);
        self.categories.iter().find(|category| normalize_key(&category.name) == key)
    }

    pub fn validate(&self) -> Result<(), DomainError> {
        for rule in &self.threshold_rules {
            if rule.threshold < Decimal::ZERO {
                return Err(DomainError::InvariantViolation(format!(
                    "threshold rule amount {} must not be negative",
                    rule.threshold
                )));
            }
            if rule.quorum == QuorumRule::Percentage {
                let Some(percentage) = rule.percentage else {
                    return Err(DomainError::InvariantViolation(format!(
                        "threshold rule {} uses a percentage quorum without a percentage",
                        rule.threshold
                    )));
                };
                if percentage <= Decimal::ZERO || percentage > Decimal::ONE_HUNDRED {
                    return Err(DomainError::InvariantViolation(format!(
                        "threshold rule {} percentage {percentage} must be in (0, 100]",
                        rule.threshold
                    )));
                }
            }
        }

        if self.manager_approval_floor < Decimal::ZERO {
            return Err(DomainError::InvariantViolation(
                "manager_approval_floor must not be negative".to_string(),
            ));
        }

        Ok(())
    }
}

pub(crate) fn normalize_key(raw: &str) -> String {
    raw.trim().to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use super::{CategoryPolicy, CompanyPolicy, QuorumRule, ThresholdRule};
    use crate::domain::user::{CompanyId, Role};

    #[test]
    fn category_lookup_ignores_case_and_padding() {
        let mut policy = CompanyPolicy::new(CompanyId("acme".to_string()));
        policy.categories.push(CategoryPolicy {
            name: "Travel".to_string(),
            max_amount: None,
            receipt_required: true,
            required_roles: vec![Role::Director],
        });

        assert!(policy.category(" travel ").is_some());
        assert!(policy.category("meals").is_none());
    }

    #[test]
    fn percentage_rule_without_percentage_is_rejected() {
        let mut policy = CompanyPolicy::new(CompanyId("acme".to_string()));
        policy.threshold_rules.push(ThresholdRule {
            threshold: Decimal::new(1_000, 0),
            required_roles: vec![Role::Finance],
            quorum: QuorumRule::Percentage,
            percentage: None,
        });

        assert!(policy.validate().is_err());
    }

    #[test]
    fn policy_defaults_apply_when_deserializing_sparse_document() {
        let policy: CompanyPolicy =
            serde_json::from_str(r#"{"company_id":"acme"}"#).expect("sparse policy parses");

        assert_eq!(policy.manager_approval_floor, Decimal::new(2_500, 2));
        assert_eq!(policy.high_value_threshold, Decimal::new(10_000, 0));
        assert_eq!(policy.late_submission_days, 30);
        assert!(policy.validate().is_ok());
    }
}

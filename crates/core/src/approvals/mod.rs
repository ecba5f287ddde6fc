//! Approval routing: rule resolution, flow construction, and decision handling.

pub mod builder;
pub mod machine;
pub mod rules;

pub use builder::{
    ApprovalFlowBuilder, ApproverRoster, ConfigurationGap, FlowBuildInput, FlowBuildOutcome,
};
pub use machine::{ApprovalStateMachine, DecisionOutcome, OverrideRequest, StepDecision, Verdict};
pub use rules::{resolve_rules, RuleHit, RuleResolution, RuleSource};

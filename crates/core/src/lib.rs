pub mod anomaly;
pub mod approvals;
pub mod collaborators;
pub mod config;
pub mod domain;
pub mod errors;
pub mod notifications;
pub mod stats;
pub mod workflow;

pub use anomaly::{AggregateReport, AnomalyAggregator, AnomalyDetector, DetectionInput, DetectorSettings};
pub use approvals::{
    resolve_rules, ApprovalFlowBuilder, ApprovalStateMachine, ConfigurationGap, StepDecision,
    Verdict,
};
pub use collaborators::{
    ExpenseHistoryReader, ExpenseStore, InMemoryExpenseStore, InMemoryUserDirectory,
    PolicyProvider, StaticPolicyProvider, UserDirectory,
};
pub use domain::anomaly::{AnomalyFinding, AnomalyType, Severity};
pub use domain::approval::{ApprovalFlow, ApprovalStep, StepOutcome};
pub use domain::expense::{Expense, ExpenseId, ExpenseStatus};
pub use domain::policy::CompanyPolicy;
pub use domain::user::{CompanyId, DirectoryUser, Role, UserId};
pub use errors::{ApplicationError, DomainError, InterfaceError};
pub use notifications::{NotificationChannel, NotificationEvent, NotificationKind};
pub use workflow::{ExpenseWorkflow, OverrideCommand, SubmissionReport};

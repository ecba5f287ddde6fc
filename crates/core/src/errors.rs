use thiserror::Error;

use crate::domain::anomaly::FindingId;
use crate::domain::expense::{ExpenseId, ExpenseStatus};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("invalid expense transition from {from:?} to {to:?}")]
    InvalidExpenseTransition { from: ExpenseStatus, to: ExpenseStatus },
    #[error("unknown finding `{0}`")]
    UnknownFinding(FindingId),
    #[error("finding `{0}` already has a resolution")]
    FindingAlreadyResolved(FindingId),
    #[error("domain invariant violation: {0}")]
    InvariantViolation(String),
}

/// Decisions the caller may not make; never retried.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DecisionError {
    #[error("expense is {status:?} and no longer accepts step decisions")]
    ExpenseNotOpen { status: ExpenseStatus },
    #[error("approval step {sequence} does not exist")]
    StepNotFound { sequence: usize },
    #[error("approval step {sequence} is already {outcome}")]
    StepNotPending { sequence: usize, outcome: String },
    #[error("approver `{approver_id}` is not bound to step {sequence}")]
    ApproverNotBound { approver_id: String, sequence: usize },
    #[error("approver `{approver_id}` has no pending approval step")]
    NoPendingStep { approver_id: String },
    #[error("`{actor_id}` is not an active admin and cannot override decisions")]
    OverrideNotPermitted { actor_id: String },
    #[error(transparent)]
    Domain(#[from] DomainError),
}

/// One detector could not evaluate an expense. Logged and excluded; never fails a submission.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DetectorError {
    #[error("detector input is unusable: {0}")]
    InvalidInput(String),
    #[error("detector failed: {0}")]
    Failed(String),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum NotificationError {
    #[error("notification transport failed: {0}")]
    Transport(String),
    #[error("notification endpoint rejected the event with status {status}")]
    Rejected { status: u16 },
    #[error("notification channel is misconfigured: {0}")]
    Configuration(String),
}

/// Failure reading one of the external collaborators the flow cannot be built without.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum LookupError {
    #[error("policy lookup failed: {0}")]
    Policy(String),
    #[error("user directory lookup failed: {0}")]
    Directory(String),
    #[error("expense history lookup failed: {0}")]
    History(String),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("expense `{0}` not found")]
    NotFound(ExpenseId),
    #[error("expense `{id}` changed concurrently (expected version {expected}, found {found})")]
    VersionConflict { id: ExpenseId, expected: u32, found: u32 },
    #[error("store failure: {0}")]
    Backend(String),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApplicationError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error(transparent)]
    Decision(#[from] DecisionError),
    #[error(transparent)]
    Lookup(#[from] LookupError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("configuration failure: {0}")]
    Configuration(String),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("bad request: {message}")]
    BadRequest { message: String, correlation_id: String },
    #[error("not found: {message}")]
    NotFound { message: String, correlation_id: String },
    #[error("conflict: {message}")]
    Conflict { message: String, correlation_id: String },
    #[error("service unavailable: {message}")]
    ServiceUnavailable { message: String, correlation_id: String },
    #[error("internal error: {message}")]
    Internal { message: String, correlation_id: String },
}

impl InterfaceError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::BadRequest { .. } => {
                "The request could not be processed. Check inputs and try again."
            }
            Self::NotFound { .. } => "The requested expense does not exist.",
            Self::Conflict { .. } => {
                "The expense was updated by someone else. Reload it and try again."
            }
            Self::ServiceUnavailable { .. } => {
                "The service is temporarily unavailable. Please retry shortly."
            }
            Self::Internal { .. } => "An unexpected internal error occurred.",
        }
    }
}

impl ApplicationError {
    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        let correlation_id = correlation_id.into();
        let mut mapped = InterfaceError::from(self);
        match &mut mapped {
            InterfaceError::BadRequest { correlation_id: id, .. }
            | InterfaceError::NotFound { correlation_id: id, .. }
            | InterfaceError::Conflict { correlation_id: id, .. }
            | InterfaceError::ServiceUnavailable { correlation_id: id, .. }
            | InterfaceError::Internal { correlation_id: id, .. } => *id = correlation_id,
        }
        mapped
    }
}

impl From<ApplicationError> for InterfaceError {
    fn from(value: ApplicationError) -> Self {
        let unassigned = || "unassigned".to_owned();
        match value {
            ApplicationError::Domain(error) => {
                Self::BadRequest { message: error.to_string(), correlation_id: unassigned() }
            }
            ApplicationError::Decision(error) => {
                Self::BadRequest { message: error.to_string(), correlation_id: unassigned() }
            }
            ApplicationError::Store(error @ StoreError::NotFound(_)) => {
                Self::NotFound { message: error.to_string(), correlation_id: unassigned() }
            }
            ApplicationError::Store(error @ StoreError::VersionConflict { .. }) => {
                Self::Conflict { message: error.to_string(), correlation_id: unassigned() }
            }
            ApplicationError::Store(StoreError::Backend(message)) => {
                Self::ServiceUnavailable { message, correlation_id: unassigned() }
            }
            ApplicationError::Lookup(error) => {
                Self::ServiceUnavailable { message: error.to_string(), correlation_id: unassigned() }
            }
            ApplicationError::Configuration(message) => {
                Self::Internal { message, correlation_id: unassigned() }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::domain::expense::{ExpenseId, ExpenseStatus};
    use crate::errors::{
        ApplicationError, DecisionError, DomainError, InterfaceError, LookupError, StoreError,
    };

    #[test]
    fn decision_error_maps_to_bad_request_interface_error() {
        let interface = ApplicationError::from(DecisionError::StepNotPending {
            sequence: 2,
            outcome: "approved".to_owned(),
        })
        .into_interface("req-1");

        assert!(matches!(
            interface,
            InterfaceError::BadRequest {
                ref correlation_id,
                ..
            } if correlation_id == "req-1"
        ));
        assert_eq!(
            interface.user_message(),
            "The request could not be processed. Check inputs and try again."
        );
    }

    #[test]
    fn version_conflict_maps_to_conflict() {
        let interface = ApplicationError::from(StoreError::VersionConflict {
            id: ExpenseId("EXP-1".to_owned()),
            expected: 3,
            found: 4,
        })
        .into_interface("req-2");

        assert!(matches!(interface, InterfaceError::Conflict { .. }));
        assert!(interface.to_string().contains("expected version 3"));
    }

    #[test]
    fn lookup_failure_maps_to_service_unavailable() {
        let interface = ApplicationError::from(LookupError::Directory("timeout".to_owned()))
            .into_interface("req-3");

        assert!(matches!(interface, InterfaceError::ServiceUnavailable { .. }));
        assert_eq!(
            interface.user_message(),
            "The service is temporarily unavailable. Please retry shortly."
        );
    }

    #[test]
    fn domain_transition_error_maps_to_bad_request() {
        let interface = ApplicationError::from(DomainError::InvalidExpenseTransition {
            from: ExpenseStatus::Approved,
            to: ExpenseStatus::Submitted,
        })
        .into_interface("req-4");

        assert!(matches!(interface, InterfaceError::BadRequest { .. }));
    }

    #[test]
    fn missing_expense_maps_to_not_found() {
        let interface =
            ApplicationError::from(StoreError::NotFound(ExpenseId("EXP-404".to_owned())))
                .into_interface("req-5");

        assert!(matches!(interface, InterfaceError::NotFound { .. }));
        assert_eq!(interface.user_message(), "The requested expense does not exist.");
    }
}

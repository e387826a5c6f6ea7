use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::{approvals::ApprovalError, guard::GuardError, store::StoreError};

/// Refusals produced by the kernel itself. The display text is the reason
/// reported to callers and written to the audit trail.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum GovernanceError {
    #[error("{reason}")]
    PolicyBlocked { reason: String },
    #[error("{reason}")]
    PolicyRequiresApproval { reason: String },
    #[error("{reason}")]
    BudgetExceeded { reason: String },
    #[error("{reason}")]
    RateLimited { reason: String, reset_time: DateTime<Utc> },
    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: String },
    #[error("{id} is in state {status}")]
    InvalidState { id: String, status: String },
    #[error("role '{role}' is not authorized to {action}")]
    Unauthorized { role: String, action: String },
}

impl GovernanceError {
    /// Only rate limiting clears on its own; everything else needs a human.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApplicationError {
    #[error(transparent)]
    Governance(#[from] GovernanceError),
    #[error(transparent)]
    Guard(#[from] GuardError),
    #[error(transparent)]
    Approval(#[from] ApprovalError),
    #[error("persistence failure: {0}")]
    Store(#[from] StoreError),
    #[error("configuration failure: {0}")]
    Configuration(String),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("bad request: {message}")]
    BadRequest { message: String, correlation_id: String },
    #[error("forbidden: {message}")]
    Forbidden { message: String, correlation_id: String },
    #[error("conflict: {message}")]
    Conflict { message: String, correlation_id: String },
    #[error("too many requests: {message}")]
    TooManyRequests { message: String, correlation_id: String },
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
            Self::Forbidden { .. } => "The action is not permitted by governance policy.",
            Self::Conflict { .. } => "The request conflicts with the current state of the resource.",
            Self::TooManyRequests { .. } => "Too many requests. Wait for the window to reset.",
            Self::ServiceUnavailable { .. } => {
                "The service is temporarily unavailable. Please retry shortly."
            }
            Self::Internal { .. } => "An unexpected internal error occurred.",
        }
    }

    pub fn correlation_id(&self) -> &str {
        match self {
            Self::BadRequest { correlation_id, .. }
            | Self::Forbidden { correlation_id, .. }
            | Self::Conflict { correlation_id, .. }
            | Self::TooManyRequests { correlation_id, .. }
            | Self::ServiceUnavailable { correlation_id, .. }
            | Self::Internal { correlation_id, .. } => correlation_id,
        }
    }
}

impl ApplicationError {
    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        let correlation_id = correlation_id.into();
        let mut mapped = InterfaceError::from(self);
        match &mut mapped {
            InterfaceError::BadRequest { correlation_id: id, .. }
            | InterfaceError::Forbidden { correlation_id: id, .. }
            | InterfaceError::Conflict { correlation_id: id, .. }
            | InterfaceError::TooManyRequests { correlation_id: id, .. }
            | InterfaceError::ServiceUnavailable { correlation_id: id, .. }
            | InterfaceError::Internal { correlation_id: id, .. } => *id = correlation_id,
        }
        mapped
    }
}

fn unassigned() -> String {
    "unassigned".to_owned()
}

impl From<ApplicationError> for InterfaceError {
    fn from(value: ApplicationError) -> Self {
        let message = value.to_string();
        match value {
            ApplicationError::Governance(GovernanceError::RateLimited { .. }) => {
                Self::TooManyRequests { message, correlation_id: unassigned() }
            }
            ApplicationError::Governance(GovernanceError::InvalidState { .. })
            | ApplicationError::Approval(ApprovalError::InvalidState { .. }) => {
                Self::Conflict { message, correlation_id: unassigned() }
            }
            ApplicationError::Governance(GovernanceError::NotFound { .. })
            | ApplicationError::Guard(GuardError::SnapshotNotFound { .. })
            | ApplicationError::Approval(ApprovalError::NotFound { .. }) => {
                Self::BadRequest { message, correlation_id: unassigned() }
            }
            ApplicationError::Governance(_)
            | ApplicationError::Approval(ApprovalError::Unauthorized { .. }) => {
                Self::Forbidden { message, correlation_id: unassigned() }
            }
            ApplicationError::Store(_) | ApplicationError::Approval(ApprovalError::Store(_)) => {
                Self::ServiceUnavailable { message, correlation_id: unassigned() }
            }
            ApplicationError::Configuration(_) => {
                Self::Internal { message, correlation_id: unassigned() }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use crate::approvals::ApprovalError;
    use crate::domain::{ApprovalId, ApprovalStatus};
    use crate::errors::{ApplicationError, GovernanceError, InterfaceError};
    use crate::store::StoreError;

    #[test]
    fn policy_block_maps_to_forbidden_with_correlation_id() {
        let interface = ApplicationError::from(GovernanceError::PolicyBlocked {
            reason: "Production writes require admin role or approver review".to_owned(),
        })
        .into_interface("req-1");

        assert!(matches!(
            interface,
            InterfaceError::Forbidden {
                ref correlation_id,
                ..
            } if correlation_id == "req-1"
        ));
        assert_eq!(interface.user_message(), "The action is not permitted by governance policy.");
    }

    #[test]
    fn rate_limit_is_the_only_retryable_refusal() {
        let limited = GovernanceError::RateLimited {
            reason: "Rate limit exceeded. Max 10 requests per 60s".to_owned(),
            reset_time: Utc::now(),
        };
        assert!(limited.is_retryable());
        assert!(!GovernanceError::BudgetExceeded { reason: "over".to_owned() }.is_retryable());

        let interface = ApplicationError::from(limited).into_interface("req-2");
        assert!(matches!(interface, InterfaceError::TooManyRequests { .. }));
        assert_eq!(interface.correlation_id(), "req-2");
    }

    #[test]
    fn approval_state_conflict_names_current_status() {
        let error = ApprovalError::InvalidState {
            id: ApprovalId("apr-1".to_owned()),
            status: ApprovalStatus::Approved,
        };
        let interface = ApplicationError::from(error).into_interface("req-3");

        assert!(matches!(interface, InterfaceError::Conflict { ref message, .. }
            if message.contains("APPROVED")));
    }

    #[test]
    fn store_error_maps_to_service_unavailable() {
        let interface = ApplicationError::from(StoreError::Backend("database is locked".to_owned()))
            .into_interface("req-4");

        assert!(matches!(interface, InterfaceError::ServiceUnavailable { .. }));
        assert_eq!(
            interface.user_message(),
            "The service is temporarily unavailable. Please retry shortly."
        );
    }

    #[test]
    fn configuration_error_maps_to_internal() {
        let interface =
            ApplicationError::Configuration("missing signing key".to_owned()).into_interface("req-5");

        assert!(matches!(interface, InterfaceError::Internal { .. }));
        assert_eq!(interface.user_message(), "An unexpected internal error occurred.");
    }
}

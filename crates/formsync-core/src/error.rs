//! Request processing errors and their client-visible form

use crate::dispatch::DispatchError;
use crate::response::{Response, ResponseKind};
use formsync_control::ControlError;
use formsync_diff::DiffError;
use formsync_session::{LifecycleError, StoreError};

/// Errors surfaced at the orchestrator boundary
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    /// Document lookup, lock or sequence check failed
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    /// Comparator or full-update renderer failed
    #[error(transparent)]
    Diff(#[from] DiffError),

    /// Event dispatch failed outside a recoverable context
    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    /// Snapshot construction failed
    #[error(transparent)]
    Control(#[from] ControlError),

    /// Persisted state could not be encoded
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Response body could not be encoded
    #[error("cannot encode response: {0}")]
    Encode(#[from] serde_json::Error),
}

impl ProcessError {
    /// Response kind the client receives
    #[must_use]
    pub fn response_kind(&self) -> ResponseKind {
        match self {
            Self::Lifecycle(LifecycleError::SessionExpired(_)) => ResponseKind::SessionExpired,
            Self::Lifecycle(LifecycleError::LockTimeout { .. } | LifecycleError::Evicted(_)) => ResponseKind::Retry,
            _ => ResponseKind::Error,
        }
    }

    /// HTTP-equivalent status
    #[must_use]
    pub fn status(&self) -> u16 {
        match self {
            Self::Lifecycle(LifecycleError::SequenceViolation { .. }) => 400,
            other => other.response_kind().default_status(),
        }
    }

    /// Application-level error code
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Lifecycle(LifecycleError::SessionExpired(_)) => "session-expired",
            Self::Lifecycle(LifecycleError::LockTimeout { .. } | LifecycleError::Evicted(_)) => "retry",
            Self::Lifecycle(LifecycleError::SequenceViolation { .. }) => "sequence-violation",
            _ if self.is_contract_violation() => "contract-violation",
            _ => "processing-error",
        }
    }

    /// Whether the client can continue without a server fix
    #[inline]
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Lifecycle(err) => err.is_recoverable(),
            Self::Dispatch(err) => err.is_recoverable(),
            _ => false,
        }
    }

    /// Whether the snapshots or marks broke the comparator's contract
    #[inline]
    #[must_use]
    pub fn is_contract_violation(&self) -> bool {
        matches!(
            self,
            Self::Diff(
                DiffError::LengthMismatch { .. }
                    | DiffError::IdMismatch { .. }
                    | DiffError::KindMismatch { .. }
                    | DiffError::MissingMark(_)
            )
        )
    }

    /// Client-visible response; details stay in the logs
    #[must_use]
    pub fn to_response(&self) -> Response {
        let message = match self.response_kind() {
            ResponseKind::SessionExpired => "Your session has expired.",
            ResponseKind::Retry => "The form is busy. Please retry.",
            _ => "The request could not be processed.",
        };
        Response::error(self.response_kind(), self.status(), self.code(), message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_errors_map_to_distinguished_responses() {
        let expired = ProcessError::from(LifecycleError::SessionExpired("s/x".to_string()));
        assert_eq!(expired.response_kind(), ResponseKind::SessionExpired);
        assert!(expired.is_recoverable());
        assert_eq!(expired.to_response().error_document().unwrap().code, "session-expired");

        let busy = ProcessError::from(LifecycleError::LockTimeout {
            key: "s/x".to_string(),
            waited_ms: 0,
        });
        assert_eq!(busy.status(), 503);
        assert_eq!(busy.to_response().kind(), ResponseKind::Retry);

        let evicted = ProcessError::from(LifecycleError::Evicted("s/x".to_string()));
        assert_eq!(evicted.status(), 503);
        assert_eq!(evicted.code(), "retry");

        let desync = ProcessError::from(LifecycleError::SequenceViolation {
            expected: 3,
            received: 8,
        });
        assert_eq!(desync.status(), 400);
        assert_eq!(desync.response_kind(), ResponseKind::Error);
        assert!(!desync.is_recoverable());
    }

    #[test]
    fn contract_violations_are_generic_errors() {
        let err = ProcessError::from(DiffError::MissingMark("d".to_string()));
        assert!(err.is_contract_violation());
        assert_eq!(err.status(), 500);
        let document = err.to_response().error_document().unwrap();
        assert_eq!(document.code, "contract-violation");
        assert_eq!(document.message, "The request could not be processed.");
    }
}

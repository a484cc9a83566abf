//! Error types for detection and recovery.

use std::time::Duration;

use fleetwatch_core::IssueId;
use thiserror::Error;

use crate::action::ActionType;
use crate::phase::RecoveryPhase;

/// A result type using `RecoveryError`.
pub type Result<T> = std::result::Result<T, RecoveryError>;

/// Errors that can occur while detecting issues or executing recovery.
#[derive(Debug, Error)]
pub enum RecoveryError {
    /// Storage layer error.
    #[error("storage error: {0}")]
    Store(#[from] fleetwatch_store::StoreError),

    /// The agent controller rejected or failed a request.
    #[error("agent controller error: {0}")]
    Controller(String),

    /// The named subsystem is not registered.
    #[error("unknown subsystem: {0}")]
    UnknownSubsystem(String),

    /// The action needs a target agent but the issue has none.
    #[error("{0} requires a target agent")]
    MissingTarget(ActionType),

    /// The action did not finish in time.
    #[error("{action} timed out after {after:?}")]
    Timeout {
        /// The action that was cancelled.
        action: ActionType,
        /// The configured limit.
        after: Duration,
    },

    /// The requested phase transition is not valid.
    #[error("invalid recovery phase transition for issue {issue_id}: {from:?} to {to:?}")]
    InvalidPhase {
        /// The issue being recovered.
        issue_id: IssueId,
        /// The current phase.
        from: RecoveryPhase,
        /// The requested phase.
        to: RecoveryPhase,
    },

    /// The recovery policy could not be loaded.
    #[error("invalid recovery policy: {0}")]
    Policy(String),

    /// Subsystem definitions could not be loaded.
    #[error("invalid subsystem definitions: {0}")]
    Subsystems(String),
}

impl RecoveryError {
    /// Returns true if this error might be resolved by retrying.
    #[must_use]
    pub fn is_retriable(&self) -> bool {
        match self {
            Self::Store(e) => e.is_retriable(),
            Self::Controller(_) | Self::Timeout { .. } => true,
            Self::UnknownSubsystem(_)
            | Self::MissingTarget(_)
            | Self::InvalidPhase { .. }
            | Self::Policy(_)
            | Self::Subsystems(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleetwatch_store::StoreError;

    #[test]
    fn retriable_errors() {
        assert!(RecoveryError::Store(StoreError::PoolTimeout).is_retriable());
        assert!(!RecoveryError::Store(StoreError::Init("bad url".into())).is_retriable());
        assert!(RecoveryError::Timeout {
            action: ActionType::RestartAgent,
            after: Duration::from_secs(1),
        }
        .is_retriable());
        assert!(!RecoveryError::MissingTarget(ActionType::ResetHeartbeat).is_retriable());
    }

    #[test]
    fn messages_name_the_action() {
        let err = RecoveryError::MissingTarget(ActionType::RestartAgent);
        assert_eq!(err.to_string(), "restart_agent requires a target agent");
    }
}

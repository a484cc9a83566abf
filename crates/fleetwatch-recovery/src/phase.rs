//! Recovery phase state machine.
//!
//! ```text
//! Detected ──▶ Planned ──▶ Executing ──▶ Succeeded
//!                 │             │
//!                 │             └──────▶ Exhausted
//!                 └─────────────────────▶ Exhausted   (empty plan)
//! ```

use fleetwatch_core::IssueId;
use serde::{Deserialize, Serialize};

use crate::error::{RecoveryError, Result};

/// Where an issue is in its recovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryPhase {
    /// Raised by the detector.
    Detected,
    /// Plan built.
    Planned,
    /// Actions running.
    Executing,
    /// An action succeeded.
    Succeeded,
    /// Every action failed, or there was nothing to try.
    Exhausted,
}

impl RecoveryPhase {
    /// Returns true for `Succeeded` and `Exhausted`.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Exhausted)
    }
}

/// Check if a phase transition is valid.
#[must_use]
pub const fn is_valid_transition(from: RecoveryPhase, to: RecoveryPhase) -> bool {
    use RecoveryPhase::{Detected, Executing, Exhausted, Planned, Succeeded};

    matches!(
        (from, to),
        (Detected, Planned) | (Planned, Executing | Exhausted) | (Executing, Succeeded | Exhausted)
    )
}

/// Validates a phase transition and returns the target phase if valid.
///
/// # Errors
///
/// Returns `RecoveryError::InvalidPhase` if the transition is not allowed.
pub fn advance(issue_id: IssueId, from: RecoveryPhase, to: RecoveryPhase) -> Result<RecoveryPhase> {
    if is_valid_transition(from, to) {
        Ok(to)
    } else {
        Err(RecoveryError::InvalidPhase { issue_id, from, to })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use RecoveryPhase::{Detected, Executing, Exhausted, Planned, Succeeded};

    #[test]
    fn happy_path() {
        assert!(is_valid_transition(Detected, Planned));
        assert!(is_valid_transition(Planned, Executing));
        assert!(is_valid_transition(Executing, Succeeded));
        assert!(is_valid_transition(Executing, Exhausted));
        assert!(is_valid_transition(Planned, Exhausted));
    }

    #[test]
    fn no_skipping_or_leaving_terminal() {
        assert!(!is_valid_transition(Detected, Executing));
        assert!(!is_valid_transition(Planned, Succeeded));
        assert!(!is_valid_transition(Succeeded, Executing));
        assert!(!is_valid_transition(Exhausted, Planned));
        assert!(Succeeded.is_terminal() && Exhausted.is_terminal());
    }

    #[test]
    fn advance_reports_invalid() {
        let id = IssueId::generate();
        assert_eq!(advance(id, Detected, Planned).unwrap(), Planned);
        assert!(matches!(
            advance(id, Succeeded, Executing),
            Err(RecoveryError::InvalidPhase { .. })
        ));
    }
}

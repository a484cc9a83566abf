//! Recovery actions and their results.

use std::fmt;
use std::time::Duration;

use fleetwatch_core::{ActionId, IssueId};
use serde::{Deserialize, Serialize};

/// Concrete recovery handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    /// Signal the agent to restart, wait, then look for fresh heartbeats.
    RestartAgent,
    /// Recreate the store's connection pool and re-check health.
    ReconnectDatabase,
    /// Drop the agent's or subsystem's cached state.
    ClearCache,
    /// Reconcile agents' `active` flags with heartbeat presence.
    SyncState,
    /// Ask the agent to restart its heartbeat loop.
    ResetHeartbeat,
    /// Scale a subsystem's tunable parameters down.
    TuneParameters,
    /// Purge a subsystem's stateful store and rebuild it.
    PurgeStateStore,
}

impl ActionType {
    /// The canonical label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::RestartAgent => "restart_agent",
            Self::ReconnectDatabase => "reconnect_database",
            Self::ClearCache => "clear_cache",
            Self::SyncState => "sync_state",
            Self::ResetHeartbeat => "reset_heartbeat",
            Self::TuneParameters => "tune_parameters",
            Self::PurgeStateStore => "purge_state_store",
        }
    }

    /// Returns true if the handler needs `SystemIssue::agent_id`.
    #[must_use]
    pub const fn requires_agent(self) -> bool {
        matches!(self, Self::RestartAgent | Self::ResetHeartbeat)
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One step of a recovery plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryAction {
    /// Unique per planned step.
    pub action_id: ActionId,
    /// The issue this step addresses.
    pub issue_id: IssueId,
    /// Handler to run.
    pub action_type: ActionType,
    /// Human-readable summary.
    pub description: String,
    /// Expected run time.
    pub estimated_duration: Duration,
    /// Empirical chance of fixing the issue, in `[0, 1]`.
    pub success_probability: f64,
    /// The executor can undo this step if it fails.
    pub rollback_available: bool,
}

/// Outcome of running one action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryResult {
    /// The action that ran.
    pub action_id: ActionId,
    /// Its handler.
    pub action_type: ActionType,
    /// Whether the issue is considered fixed.
    pub success: bool,
    /// Wall-clock time spent.
    pub execution_time: Duration,
    /// Failure description.
    pub error_message: Option<String>,
    /// Policy value times success probability; 0 on failure.
    pub business_value_preserved: f64,
}

//! Recovery plan table and business-value heuristics.
//!
//! The numbers here are operator-tunable placeholders: success probabilities
//! are empirical guesses and business values are relative units, not money.
//! [`RecoveryPolicy::from_file`] loads a JSON replacement so they can be
//! retuned without a rebuild.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use fleetwatch_core::ActionId;
use serde::{Deserialize, Serialize};

use crate::action::{ActionType, RecoveryAction};
use crate::error::{RecoveryError, Result};
use crate::issue::{IssueType, SystemIssue};

/// One row of a plan template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedAction {
    /// Handler to run.
    pub action_type: ActionType,
    /// Expected run time in seconds.
    pub estimated_duration_secs: u64,
    /// Chance of fixing the issue, in `[0, 1]`.
    pub success_probability: f64,
    /// The executor can undo this step.
    #[serde(default)]
    pub rollback_available: bool,
}

impl PlannedAction {
    const fn new(action_type: ActionType, estimated_duration_secs: u64, success_probability: f64) -> Self {
        Self {
            action_type,
            estimated_duration_secs,
            success_probability,
            rollback_available: matches!(action_type, ActionType::TuneParameters),
        }
    }
}

/// Plan templates per issue type plus business value per action type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryPolicy {
    /// Ordered actions per issue type, most general first.
    pub plans: BTreeMap<IssueType, Vec<PlannedAction>>,
    /// Value preserved by a successful action, before probability weighting.
    pub business_value: BTreeMap<ActionType, f64>,
}

impl Default for RecoveryPolicy {
    fn default() -> Self {
        use ActionType::{
            ClearCache, PurgeStateStore, ReconnectDatabase, ResetHeartbeat, RestartAgent,
            SyncState, TuneParameters,
        };

        let plans = BTreeMap::from([
            (
                IssueType::AgentUnresponsive,
                vec![
                    PlannedAction::new(RestartAgent, 45, 0.80),
                    PlannedAction::new(ResetHeartbeat, 10, 0.60),
                    PlannedAction::new(ClearCache, 15, 0.50),
                ],
            ),
            (
                IssueType::HeartbeatIrregular,
                vec![
                    PlannedAction::new(ResetHeartbeat, 10, 0.70),
                    PlannedAction::new(RestartAgent, 45, 0.80),
                ],
            ),
            (
                IssueType::DatabaseConnectivity,
                vec![
                    PlannedAction::new(ReconnectDatabase, 20, 0.85),
                    PlannedAction::new(ClearCache, 15, 0.40),
                ],
            ),
            (
                IssueType::PerformanceDegradation,
                vec![
                    PlannedAction::new(ClearCache, 15, 0.60),
                    PlannedAction::new(TuneParameters, 30, 0.65),
                    PlannedAction::new(RestartAgent, 45, 0.70),
                ],
            ),
            (
                IssueType::HighErrorRate,
                vec![
                    PlannedAction::new(ClearCache, 15, 0.50),
                    PlannedAction::new(SyncState, 20, 0.55),
                ],
            ),
            (
                IssueType::MemoryLeak,
                vec![
                    PlannedAction::new(ClearCache, 15, 0.60),
                    PlannedAction::new(RestartAgent, 45, 0.90),
                ],
            ),
            (
                IssueType::StateInconsistency,
                vec![
                    PlannedAction::new(SyncState, 20, 0.95),
                    PlannedAction::new(ResetHeartbeat, 10, 0.60),
                ],
            ),
            (
                IssueType::SubsystemFallback,
                vec![
                    PlannedAction::new(TuneParameters, 30, 0.70),
                    PlannedAction::new(PurgeStateStore, 60, 0.60),
                    PlannedAction::new(ClearCache, 15, 0.40),
                ],
            ),
        ]);

        let business_value = BTreeMap::from([
            (RestartAgent, 500.0),
            (ReconnectDatabase, 2000.0),
            (ClearCache, 200.0),
            (SyncState, 300.0),
            (ResetHeartbeat, 150.0),
            (TuneParameters, 800.0),
            (PurgeStateStore, 600.0),
        ]);

        Self {
            plans,
            business_value,
        }
    }
}

impl RecoveryPolicy {
    /// Load a policy from a JSON file. Missing sections keep their defaults.
    ///
    /// # Errors
    ///
    /// Returns `RecoveryError::Policy` if the file cannot be read or parsed,
    /// or a probability lies outside `[0, 1]`.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| RecoveryError::Policy(format!("{}: {e}", path.display())))?;
        Self::from_json(&text)
    }

    /// Parse a policy from JSON. Missing sections keep their defaults.
    ///
    /// # Errors
    ///
    /// Returns `RecoveryError::Policy` if the text cannot be parsed or a
    /// probability lies outside `[0, 1]`.
    pub fn from_json(text: &str) -> Result<Self> {
        let policy: Self =
            serde_json::from_str(text).map_err(|e| RecoveryError::Policy(e.to_string()))?;
        policy.validate()?;
        Ok(policy)
    }

    fn validate(&self) -> Result<()> {
        for (issue_type, steps) in &self.plans {
            for step in steps {
                if !(0.0..=1.0).contains(&step.success_probability) {
                    return Err(RecoveryError::Policy(format!(
                        "{issue_type}/{}: success probability {} outside [0, 1]",
                        step.action_type, step.success_probability
                    )));
                }
            }
        }
        Ok(())
    }

    /// Value preserved by a successful action of this type.
    #[must_use]
    pub fn business_value(&self, action_type: ActionType) -> f64 {
        self.business_value.get(&action_type).copied().unwrap_or(0.0)
    }

    /// Instantiate the plan for an issue. Unknown issue types get an empty plan.
    #[must_use]
    pub fn plan_for(&self, issue: &SystemIssue) -> Vec<RecoveryAction> {
        self.plans
            .get(&issue.issue_type)
            .map(|steps| {
                steps
                    .iter()
                    .map(|step| RecoveryAction {
                        action_id: ActionId::generate(),
                        issue_id: issue.issue_id,
                        action_type: step.action_type,
                        description: format!(
                            "{} for {} on {}",
                            step.action_type, issue.issue_type, issue.affected_component
                        ),
                        estimated_duration: Duration::from_secs(step.estimated_duration_secs),
                        success_probability: step.success_probability,
                        rollback_available: step.rollback_available,
                    })
                    .collect()
            })
            .unwrap_or_default()
    }
}

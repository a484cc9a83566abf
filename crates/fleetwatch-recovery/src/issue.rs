//! Detected issues.

use std::fmt;

use chrono::{DateTime, Utc};
use fleetwatch_core::{AgentId, IssueId, IssueSeverity};
use serde::{Deserialize, Serialize};

/// Kinds of issue the detector can raise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueType {
    /// No heartbeats in the liveness window.
    AgentUnresponsive,
    /// Too few heartbeats in the liveness window.
    HeartbeatIrregular,
    /// Store probe failed or is slow.
    DatabaseConnectivity,
    /// Processing time above threshold.
    PerformanceDegradation,
    /// Share of error events above threshold.
    HighErrorRate,
    /// Memory usage growing across the window.
    MemoryLeak,
    /// Agent marked active without recent heartbeats.
    StateInconsistency,
    /// An external subsystem is falling back too often.
    SubsystemFallback,
}

impl IssueType {
    /// All issue types.
    pub const ALL: [Self; 8] = [
        Self::AgentUnresponsive,
        Self::HeartbeatIrregular,
        Self::DatabaseConnectivity,
        Self::PerformanceDegradation,
        Self::HighErrorRate,
        Self::MemoryLeak,
        Self::StateInconsistency,
        Self::SubsystemFallback,
    ];

    /// The canonical label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::AgentUnresponsive => "agent_unresponsive",
            Self::HeartbeatIrregular => "heartbeat_irregular",
            Self::DatabaseConnectivity => "database_connectivity",
            Self::PerformanceDegradation => "performance_degradation",
            Self::HighErrorRate => "high_error_rate",
            Self::MemoryLeak => "memory_leak",
            Self::StateInconsistency => "state_inconsistency",
            Self::SubsystemFallback => "subsystem_fallback",
        }
    }

    /// Expected minutes to recover.
    #[must_use]
    pub const fn estimated_recovery_minutes(self) -> u32 {
        match self {
            Self::AgentUnresponsive | Self::PerformanceDegradation => 5,
            Self::HeartbeatIrregular | Self::StateInconsistency => 2,
            Self::DatabaseConnectivity => 3,
            Self::HighErrorRate | Self::SubsystemFallback => 10,
            Self::MemoryLeak => 8,
        }
    }

    /// What the issue costs while it lasts.
    #[must_use]
    pub const fn business_impact(self) -> &'static str {
        match self {
            Self::AgentUnresponsive => "monitoring coverage lost for the affected agent",
            Self::HeartbeatIrregular => "liveness data for the agent is unreliable",
            Self::DatabaseConnectivity => "all agents lose shared state and audit trail",
            Self::PerformanceDegradation => "work items are delayed",
            Self::HighErrorRate => "work items are failing",
            Self::MemoryLeak => "agent will eventually exhaust memory and stop",
            Self::StateInconsistency => "fleet status reports are wrong",
            Self::SubsystemFallback => "dependent features run in degraded mode",
        }
    }
}

impl fmt::Display for IssueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An issue found in one detection cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemIssue {
    /// Unique per detection.
    pub issue_id: IssueId,
    /// Kind of issue.
    pub issue_type: IssueType,
    /// How bad it is.
    pub severity: IssueSeverity,
    /// Agent id, subsystem name or `database`.
    pub affected_component: String,
    /// Agent that recovery actions should target, if any.
    pub agent_id: Option<AgentId>,
    /// Human-readable summary.
    pub description: String,
    /// When the issue was detected.
    pub detected_at: DateTime<Utc>,
    /// Observations backing the detection.
    pub symptoms: Vec<String>,
    /// Business consequence.
    pub business_impact: String,
    /// Expected minutes to recover.
    pub estimated_recovery_time: u32,
}

impl SystemIssue {
    /// A new issue with defaults taken from `issue_type`.
    #[must_use]
    pub fn new(
        issue_type: IssueType,
        severity: IssueSeverity,
        affected_component: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            issue_id: IssueId::generate(),
            issue_type,
            severity,
            affected_component: affected_component.into(),
            agent_id: None,
            description: description.into(),
            detected_at: Utc::now(),
            symptoms: Vec::new(),
            business_impact: issue_type.business_impact().to_string(),
            estimated_recovery_time: issue_type.estimated_recovery_minutes(),
        }
    }

    /// An issue affecting one agent.
    #[must_use]
    pub fn for_agent(
        issue_type: IssueType,
        severity: IssueSeverity,
        agent_id: &AgentId,
        description: impl Into<String>,
    ) -> Self {
        let mut issue = Self::new(issue_type, severity, agent_id.as_str(), description);
        issue.agent_id = Some(agent_id.clone());
        issue
    }

    /// Add an observation.
    #[must_use]
    pub fn with_symptom(mut self, symptom: impl Into<String>) -> Self {
        self.symptoms.push(symptom.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_are_unique() {
        let mut labels: Vec<_> = IssueType::ALL.iter().map(|t| t.as_str()).collect();
        labels.sort_unstable();
        labels.dedup();
        assert_eq!(labels.len(), IssueType::ALL.len());
    }

    #[test]
    fn serde_uses_labels() {
        let json = serde_json::to_string(&IssueType::StateInconsistency).unwrap();
        assert_eq!(json, "\"state_inconsistency\"");
    }

    #[test]
    fn agent_issue_targets_agent() {
        let id = AgentId::new("A1").unwrap();
        let issue = SystemIssue::for_agent(
            IssueType::AgentUnresponsive,
            IssueSeverity::High,
            &id,
            "no heartbeats",
        )
        .with_symptom("0 heartbeats in 10 minutes");

        assert_eq!(issue.affected_component, "A1");
        assert_eq!(issue.agent_id, Some(id));
        assert_eq!(issue.symptoms.len(), 1);
        assert_eq!(issue.estimated_recovery_time, 5);
        assert!(!issue.business_impact.is_empty());
    }
}

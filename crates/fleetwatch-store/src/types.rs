//! Domain types stored in the database.
//!
//! These types represent the persisted state of agents, heartbeats, metric
//! samples and events, plus the query filters and diagnostics returned by the
//! store.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use fleetwatch_core::{AgentId, CoreError, EventSeverity, Payload};
use serde::{Deserialize, Serialize};

use crate::metrics::StoreCounters;

/// Lifecycle states for an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentState {
    /// Registered, not yet reporting.
    Initializing,
    /// Running and expected to heartbeat.
    Active,
    /// Deliberately stopped or found silent by state synchronization.
    Inactive,
    /// Reported a failure.
    Error,
}

impl AgentState {
    /// The canonical storage label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Initializing => "initializing",
            Self::Active => "active",
            Self::Inactive => "inactive",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for AgentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgentState {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "initializing" => Ok(Self::Initializing),
            "active" => Ok(Self::Active),
            "inactive" => Ok(Self::Inactive),
            "error" => Ok(Self::Error),
            _ => Err(CoreError::UnknownLabel {
                kind: "agent state",
                value: s.to_string(),
            }),
        }
    }
}

/// An agent record stored in the database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Agent {
    /// Unique identifier, chosen by the agent.
    pub agent_id: AgentId,
    /// Kind of agent (e.g. `heartbeat_monitor`).
    pub agent_type: String,
    /// Human-readable name.
    pub name: String,
    /// Current lifecycle state.
    pub state: AgentState,
    /// Opaque registration metadata.
    pub metadata: Payload,
    /// First registration.
    pub created_at: DateTime<Utc>,
    /// Last registration or state change.
    pub updated_at: DateTime<Utc>,
}

/// Input to `Store::register_agent`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRegistration {
    /// Unique identifier.
    pub agent_id: AgentId,
    /// Kind of agent.
    pub agent_type: String,
    /// Human-readable name.
    pub name: String,
    /// State to record.
    #[serde(default = "AgentRegistration::default_state")]
    pub state: AgentState,
    /// Opaque registration metadata.
    #[serde(default)]
    pub metadata: Payload,
}

impl AgentRegistration {
    const fn default_state() -> AgentState {
        AgentState::Initializing
    }

    /// Registration in the `initializing` state with empty metadata.
    #[must_use]
    pub fn new(agent_id: AgentId, agent_type: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            agent_id,
            agent_type: agent_type.into(),
            name: name.into(),
            state: Self::default_state(),
            metadata: Payload::new(),
        }
    }

    /// Set the state to record.
    #[must_use]
    pub const fn with_state(mut self, state: AgentState) -> Self {
        self.state = state;
        self
    }

    /// Set the registration metadata.
    #[must_use]
    pub fn with_metadata(mut self, metadata: Payload) -> Self {
        self.metadata = metadata;
        self
    }
}

/// A heartbeat reported by an agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Heartbeat {
    /// Reporting agent.
    pub agent_id: AgentId,
    /// When the heartbeat was emitted.
    pub timestamp: DateTime<Utc>,
    /// Opaque status data.
    #[serde(default)]
    pub payload: Payload,
    /// Self-assessed or computed health score, if any.
    #[serde(default)]
    pub health_score: Option<f64>,
}

impl Heartbeat {
    /// A heartbeat stamped now with an empty payload.
    #[must_use]
    pub fn now(agent_id: AgentId) -> Self {
        Self {
            agent_id,
            timestamp: Utc::now(),
            payload: Payload::new(),
            health_score: None,
        }
    }

    /// Override the timestamp.
    #[must_use]
    pub const fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Attach a payload.
    #[must_use]
    pub fn with_payload(mut self, payload: Payload) -> Self {
        self.payload = payload;
        self
    }

    /// Attach a health score.
    #[must_use]
    pub const fn with_health_score(mut self, score: f64) -> Self {
        self.health_score = Some(score);
        self
    }
}

/// A metric sample. `agent_id == None` marks a system-level sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetric {
    /// Owning agent, or `None` for system-level metrics.
    pub agent_id: Option<AgentId>,
    /// Metric name (e.g. `processing_time`).
    pub metric_name: String,
    /// Sample value.
    pub value: f64,
    /// Unit label (e.g. `seconds`, `percent`).
    pub unit: String,
    /// When the sample was taken.
    pub timestamp: DateTime<Utc>,
}

impl PerformanceMetric {
    /// A system-level sample stamped now.
    #[must_use]
    pub fn new(metric_name: impl Into<String>, value: f64, unit: impl Into<String>) -> Self {
        Self {
            agent_id: None,
            metric_name: metric_name.into(),
            value,
            unit: unit.into(),
            timestamp: Utc::now(),
        }
    }

    /// Attribute the sample to an agent.
    #[must_use]
    pub fn for_agent(mut self, agent_id: AgentId) -> Self {
        self.agent_id = Some(agent_id);
        self
    }

    /// Override the timestamp.
    #[must_use]
    pub const fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }
}

/// A persisted event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemEvent {
    /// Row identifier.
    pub id: i64,
    /// Event kind (e.g. `recovery_action`, `health_alert`).
    pub event_type: String,
    /// Opaque event data.
    pub event_data: Payload,
    /// Related agent, if any.
    pub agent_id: Option<AgentId>,
    /// Severity; drives retention.
    pub severity: EventSeverity,
    /// When the event occurred.
    pub timestamp: DateTime<Utc>,
}

/// Input to `Store::record_event`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewEvent {
    /// Event kind.
    pub event_type: String,
    /// Opaque event data.
    #[serde(default)]
    pub event_data: Payload,
    /// Related agent, if any.
    #[serde(default)]
    pub agent_id: Option<AgentId>,
    /// Severity.
    pub severity: EventSeverity,
    /// When the event occurred.
    pub timestamp: DateTime<Utc>,
}

impl NewEvent {
    /// An event stamped now with empty data.
    #[must_use]
    pub fn new(event_type: impl Into<String>, severity: EventSeverity) -> Self {
        Self {
            event_type: event_type.into(),
            event_data: Payload::new(),
            agent_id: None,
            severity,
            timestamp: Utc::now(),
        }
    }

    /// Attach event data.
    #[must_use]
    pub fn with_data(mut self, data: Payload) -> Self {
        self.event_data = data;
        self
    }

    /// Relate the event to an agent.
    #[must_use]
    pub fn for_agent(mut self, agent_id: AgentId) -> Self {
        self.agent_id = Some(agent_id);
        self
    }

    /// Override the timestamp.
    #[must_use]
    pub const fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }
}

/// Filter for `Store::get_metrics`. `None` fields do not filter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricQuery {
    /// Restrict to one agent.
    pub agent_id: Option<AgentId>,
    /// Restrict to one metric name.
    pub metric_name: Option<String>,
    /// Look-back window in hours; `0` is treated as one hour.
    pub window_hours: u32,
}

impl MetricQuery {
    /// All metrics within the window. A window of `0` is widened to one hour.
    #[must_use]
    pub fn within_hours(window_hours: u32) -> Self {
        Self {
            window_hours,
            ..Default::default()
        }
    }

    /// Restrict to one agent.
    #[must_use]
    pub fn agent(mut self, agent_id: AgentId) -> Self {
        self.agent_id = Some(agent_id);
        self
    }

    /// Restrict to one metric name.
    #[must_use]
    pub fn named(mut self, metric_name: impl Into<String>) -> Self {
        self.metric_name = Some(metric_name.into());
        self
    }
}

/// Filter for `Store::get_events`. `None` fields do not filter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventQuery {
    /// Restrict to one event type.
    pub event_type: Option<String>,
    /// Restrict to one agent.
    pub agent_id: Option<AgentId>,
    /// Restrict to one severity.
    pub severity: Option<EventSeverity>,
    /// Look-back window in hours; `0` is treated as one hour.
    pub window_hours: u32,
}

impl EventQuery {
    /// All events within the window. A window of `0` is widened to one hour.
    #[must_use]
    pub fn within_hours(window_hours: u32) -> Self {
        Self {
            window_hours,
            ..Default::default()
        }
    }

    /// Restrict to one event type.
    #[must_use]
    pub fn of_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_type = Some(event_type.into());
        self
    }

    /// Restrict to one agent.
    #[must_use]
    pub fn agent(mut self, agent_id: AgentId) -> Self {
        self.agent_id = Some(agent_id);
        self
    }

    /// Restrict to one severity.
    #[must_use]
    pub const fn severity(mut self, severity: EventSeverity) -> Self {
        self.severity = Some(severity);
        self
    }
}

/// An agent plus its recent heartbeat activity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentStatus {
    /// The agent record.
    pub agent: Agent,
    /// Most recent heartbeat, if any was ever recorded.
    pub last_heartbeat: Option<Heartbeat>,
    /// Heartbeats recorded in the last five minutes.
    pub recent_heartbeats: u32,
}

/// Outcome of the last store health check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    /// No check has run yet.
    #[default]
    Unknown,
    /// Both probe queries succeeded.
    Healthy,
    /// A probe query failed.
    Unhealthy,
}

/// Diagnostics returned by `Store::health_check`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreHealth {
    /// Result of this check.
    pub status: HealthStatus,
    /// Round-trip time of the probe queries.
    #[serde(with = "duration_millis")]
    pub response_time: Duration,
    /// Open connections.
    pub pool_size: u32,
    /// Idle connections.
    pub idle_connections: usize,
    /// Configured pool bound.
    pub max_connections: u32,
    /// Registered agents, when the count query succeeded.
    pub agent_count: Option<i64>,
    /// Store counters at the time of the check.
    pub counters: StoreCounters,
    /// Failure description for unhealthy results.
    pub error: Option<String>,
    /// When the check ran.
    pub checked_at: DateTime<Utc>,
}

impl StoreHealth {
    /// Returns true if the check passed.
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Healthy
    }
}

/// Rows removed by `Store::cleanup_old_data`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupReport {
    /// Heartbeats removed.
    pub heartbeats_deleted: u64,
    /// Metric samples removed.
    pub metrics_deleted: u64,
    /// Events removed (never `ERROR` or `CRITICAL`).
    pub events_deleted: u64,
    /// Store counters accumulated up to the cleanup; the collector is reset afterwards.
    pub counters: StoreCounters,
}

impl CleanupReport {
    /// Total rows removed.
    #[must_use]
    pub const fn total(&self) -> u64 {
        self.heartbeats_deleted + self.metrics_deleted + self.events_deleted
    }
}

mod duration_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    #[allow(clippy::cast_precision_loss)]
    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64() * 1000.0)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let millis = f64::deserialize(deserializer)?;
        Ok(Duration::from_secs_f64(millis.max(0.0) / 1000.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn agent_state_labels_roundtrip() {
        for state in [
            AgentState::Initializing,
            AgentState::Active,
            AgentState::Inactive,
            AgentState::Error,
        ] {
            assert_eq!(state.as_str().parse::<AgentState>().unwrap(), state);
        }
        assert!("running".parse::<AgentState>().is_err());
    }

    #[test]
    fn metric_builders() {
        let agent = AgentId::new("A1").unwrap();
        let metric = PerformanceMetric::new("processing_time", 1.5, "seconds").for_agent(agent.clone());
        assert_eq!(metric.agent_id, Some(agent));
        assert_eq!(metric.metric_name, "processing_time");
    }

    #[test]
    fn query_builders() {
        let query = EventQuery::within_hours(24)
            .of_type("recovery_action")
            .severity(EventSeverity::Warning);
        assert_eq!(query.event_type.as_deref(), Some("recovery_action"));
        assert_eq!(query.severity, Some(EventSeverity::Warning));
        assert!(query.agent_id.is_none());

        let query = MetricQuery::within_hours(1).named("memory_usage");
        assert_eq!(query.metric_name.as_deref(), Some("memory_usage"));
    }

    #[test]
    fn cleanup_report_total() {
        let report = CleanupReport {
            heartbeats_deleted: 3,
            metrics_deleted: 4,
            events_deleted: 5,
            counters: StoreCounters::default(),
        };
        assert_eq!(report.total(), 12);
    }

    #[test]
    fn store_health_serializes_millis() {
        let health = StoreHealth {
            status: HealthStatus::Healthy,
            response_time: Duration::from_millis(250),
            pool_size: 1,
            idle_connections: 1,
            max_connections: 10,
            agent_count: Some(0),
            counters: StoreCounters::default(),
            error: None,
            checked_at: Utc::now(),
        };
        let json = serde_json::to_value(&health).unwrap();
        assert_eq!(json["status"], "healthy");
        assert!((json["response_time"].as_f64().unwrap() - 250.0).abs() < 1e-6);
    }
}

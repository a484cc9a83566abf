//! Heartbeat agent: scores every registered agent and raises health alerts.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use fleetwatch_analysis::{score_agent, summarize_fleet, AgentHealth};
use fleetwatch_core::{AgentId, EventSeverity, Payload};
use fleetwatch_store::{EventQuery, MetricQuery, NewEvent, PerformanceMetric, Store};

use crate::agent::{CycleOutput, MonitorAgent};
use crate::error::Result;

/// Event raised for an agent scoring below a threshold.
pub const HEALTH_ALERT_EVENT: &str = "health_alert";
/// Per-agent metric carrying the composite score.
pub const HEALTH_SCORE_METRIC: &str = "health_score";
/// System metric carrying the mean fleet score.
pub const FLEET_HEALTH_METRIC: &str = "fleet_health_score";

/// Heartbeats are scored over this window.
const HEARTBEAT_WINDOW_MINUTES: u32 = 5;
/// Metrics and error events are scored over this window.
const ANALYSIS_WINDOW_HOURS: u32 = 1;

/// Scores the fleet each cycle.
pub struct HeartbeatAgent<S: Store> {
    id: AgentId,
    store: Arc<S>,
    interval: Duration,
    critical_threshold: f64,
    emergency_threshold: f64,
}

impl<S: Store> HeartbeatAgent<S> {
    /// Create a heartbeat agent. Scores below `critical_threshold` raise a
    /// WARNING alert, below `emergency_threshold` a CRITICAL one.
    pub fn new(
        id: AgentId,
        store: Arc<S>,
        interval: Duration,
        critical_threshold: f64,
        emergency_threshold: f64,
    ) -> Self {
        Self {
            id,
            store,
            interval,
            critical_threshold,
            emergency_threshold,
        }
    }

    fn alert_severity(&self, score: f64) -> Option<EventSeverity> {
        if score < self.emergency_threshold {
            Some(EventSeverity::Critical)
        } else if score < self.critical_threshold {
            Some(EventSeverity::Warning)
        } else {
            None
        }
    }

    async fn report(&self, health: &AgentHealth) -> Result<()> {
        let sample = PerformanceMetric::new(HEALTH_SCORE_METRIC, health.overall_score, "score")
            .for_agent(health.agent_id.clone());
        self.store.record_metric(&sample).await?;

        let Some(severity) = self.alert_severity(health.overall_score) else {
            return Ok(());
        };

        let data = Payload::new()
            .with("score", health.overall_score)
            .with("status", health.status.as_str())
            .with("trend", health.trend.as_str())
            .with("heartbeat_count", health.heartbeat_count)
            .with("error_count", health.error_count)
            .with("recommendations", health.recommendations.clone());
        let event = NewEvent::new(HEALTH_ALERT_EVENT, severity)
            .with_data(data)
            .for_agent(health.agent_id.clone());
        self.store.record_event(&event).await?;

        tracing::warn!(
            agent_id = %health.agent_id,
            score = health.overall_score,
            severity = %severity,
            "Health alert raised"
        );
        Ok(())
    }
}

#[async_trait]
impl<S: Store + 'static> MonitorAgent for HeartbeatAgent<S> {
    fn id(&self) -> &AgentId {
        &self.id
    }

    fn name(&self) -> &str {
        "Heartbeat Monitor"
    }

    fn agent_type(&self) -> &'static str {
        "heartbeat_monitor"
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    async fn run_cycle(&self) -> Result<CycleOutput> {
        let agents = self.store.list_agents(None).await?;
        let heartbeats = self
            .store
            .get_recent_heartbeats(None, HEARTBEAT_WINDOW_MINUTES)
            .await?;
        let metrics = self
            .store
            .get_metrics(&MetricQuery::within_hours(ANALYSIS_WINDOW_HOURS))
            .await?;
        let mut errors = Vec::new();
        for severity in [EventSeverity::Error, EventSeverity::Critical] {
            let query = EventQuery::within_hours(ANALYSIS_WINDOW_HOURS).severity(severity);
            errors.extend(self.store.get_events(&query).await?);
        }

        let now = Utc::now();
        let results: Vec<AgentHealth> = agents
            .iter()
            .map(|agent| score_agent(agent, &heartbeats, &metrics, &errors, now))
            .collect();

        for health in &results {
            self.report(health).await?;
        }

        let fleet = summarize_fleet(&results, self.critical_threshold);
        if !results.is_empty() {
            self.store
                .record_metric(&PerformanceMetric::new(
                    FLEET_HEALTH_METRIC,
                    fleet.mean_score,
                    "score",
                ))
                .await?;
        }

        tracing::info!(
            agents = fleet.agent_count,
            mean_score = fleet.mean_score,
            below_threshold = fleet.below_threshold.len(),
            "Fleet health scored"
        );

        Ok(CycleOutput::items(results.len()))
    }
}

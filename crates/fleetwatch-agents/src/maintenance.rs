//! Maintenance agent: retention cleanup.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use fleetwatch_core::{AgentId, EventSeverity, Payload};
use fleetwatch_store::{NewEvent, Store};

use crate::agent::{CycleOutput, MonitorAgent};
use crate::error::Result;

/// Event recording what a cleanup removed.
pub const CLEANUP_EVENT: &str = "data_cleanup";

/// Prunes history older than the retention window.
pub struct MaintenanceAgent<S: Store> {
    id: AgentId,
    store: Arc<S>,
    interval: Duration,
    retention_days: u32,
}

impl<S: Store> MaintenanceAgent<S> {
    /// Create a maintenance agent.
    pub fn new(id: AgentId, store: Arc<S>, interval: Duration, retention_days: u32) -> Self {
        Self {
            id,
            store,
            interval,
            retention_days,
        }
    }
}

#[async_trait]
impl<S: Store + 'static> MonitorAgent for MaintenanceAgent<S> {
    fn id(&self) -> &AgentId {
        &self.id
    }

    fn name(&self) -> &str {
        "Maintenance Agent"
    }

    fn agent_type(&self) -> &'static str {
        "maintenance"
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    async fn run_cycle(&self) -> Result<CycleOutput> {
        let report = self.store.cleanup_old_data(self.retention_days).await?;

        let data = Payload::new()
            .with("retention_days", self.retention_days)
            .with("heartbeats_deleted", report.heartbeats_deleted)
            .with("metrics_deleted", report.metrics_deleted)
            .with("events_deleted", report.events_deleted)
            .with("queries_executed", report.counters.queries_executed)
            .with("errors", report.counters.errors);
        self.store
            .record_event(&NewEvent::new(CLEANUP_EVENT, EventSeverity::Info).with_data(data))
            .await?;

        tracing::info!(
            retention_days = self.retention_days,
            heartbeats = report.heartbeats_deleted,
            metrics = report.metrics_deleted,
            events = report.events_deleted,
            "Old data cleaned up"
        );

        Ok(CycleOutput::items(usize::try_from(report.total()).unwrap_or(usize::MAX)))
    }
}

//! Performance agent: store diagnostics and anomaly detection.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use fleetwatch_analysis::{detect_anomalies, Anomaly};
use fleetwatch_core::{AgentId, EventSeverity, IssueSeverity, Payload};
use fleetwatch_store::{MetricQuery, NewEvent, PerformanceMetric, Store, StoreHealth};

use crate::agent::{CycleOutput, MonitorAgent};
use crate::error::Result;

/// Event raised for each anomalous series.
pub const ANOMALY_EVENT: &str = "anomaly_detected";

const ANALYSIS_WINDOW_HOURS: u32 = 1;

/// Watches the store and the metric streams.
pub struct PerformanceAgent<S: Store> {
    id: AgentId,
    store: Arc<S>,
    interval: Duration,
}

impl<S: Store> PerformanceAgent<S> {
    /// Create a performance agent.
    pub fn new(id: AgentId, store: Arc<S>, interval: Duration) -> Self {
        Self {
            id,
            store,
            interval,
        }
    }

    async fn record_store_diagnostics(&self, health: &StoreHealth) -> Result<()> {
        let counters = health.counters;
        #[allow(clippy::cast_precision_loss)]
        let samples = [
            ("db_response_time", health.response_time.as_secs_f64() * 1000.0, "ms"),
            ("db_pool_size", f64::from(health.pool_size), "connections"),
            ("db_idle_connections", health.idle_connections as f64, "connections"),
            ("db_queries_executed", counters.queries_executed as f64, "count"),
            ("db_errors", counters.errors as f64, "count"),
        ];

        for (name, value, unit) in samples {
            self.store
                .record_metric(&PerformanceMetric::new(name, value, unit))
                .await?;
        }
        Ok(())
    }

    async fn report(&self, owner: Option<&AgentId>, anomaly: &Anomaly) -> Result<()> {
        let severity = match anomaly.severity {
            IssueSeverity::Critical => EventSeverity::Critical,
            _ => EventSeverity::Warning,
        };
        let data = Payload::new()
            .with("metric_name", anomaly.metric_name.clone())
            .with("anomaly_score", anomaly.anomaly_score)
            .with("severity", anomaly.severity.as_str())
            .with("current_value", anomaly.current_value)
            .with("baseline_mean", anomaly.baseline_mean)
            .with("baseline_std", anomaly.baseline_std);

        let mut event = NewEvent::new(ANOMALY_EVENT, severity).with_data(data);
        if let Some(agent_id) = owner {
            event = event.for_agent(agent_id.clone());
        }
        self.store.record_event(&event).await?;

        tracing::warn!(
            agent_id = ?owner,
            metric = %anomaly.metric_name,
            score = anomaly.anomaly_score,
            "Anomaly detected"
        );
        Ok(())
    }
}

#[async_trait]
impl<S: Store + 'static> MonitorAgent for PerformanceAgent<S> {
    fn id(&self) -> &AgentId {
        &self.id
    }

    fn name(&self) -> &str {
        "Performance Monitor"
    }

    fn agent_type(&self) -> &'static str {
        "performance_monitor"
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    async fn run_cycle(&self) -> Result<CycleOutput> {
        let health = self.store.health_check().await?;
        if !health.is_healthy() {
            tracing::warn!(error = ?health.error, "Store health check failed");
        }
        self.record_store_diagnostics(&health).await?;

        let metrics = self
            .store
            .get_metrics(&MetricQuery::within_hours(ANALYSIS_WINDOW_HOURS))
            .await?;
        let sampled = metrics.len();

        // Series of different agents are never mixed into one baseline.
        let mut by_owner: BTreeMap<Option<AgentId>, Vec<PerformanceMetric>> = BTreeMap::new();
        for metric in metrics {
            by_owner.entry(metric.agent_id.clone()).or_default().push(metric);
        }

        let mut found = 0;
        for (owner, series) in &by_owner {
            for anomaly in detect_anomalies(series) {
                self.report(owner.as_ref(), &anomaly).await?;
                found += 1;
            }
        }

        tracing::info!(samples = sampled, anomalies = found, "Performance analysed");
        Ok(CycleOutput::items(sampled))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration as ChronoDuration, Utc};
    use fleetwatch_store::{AgentRegistration, EventQuery, SqlStore, StoreConfig};
    use tempfile::TempDir;

    async fn create_agent() -> (PerformanceAgent<SqlStore>, Arc<SqlStore>, TempDir) {
        let dir = TempDir::new().unwrap();
        let url = format!("sqlite://{}", dir.path().join("performance.db").display());
        let store = Arc::new(SqlStore::connect(StoreConfig::with_url(url)).await.unwrap());
        let agent = PerformanceAgent::new(
            AgentId::new("performance_monitor").unwrap(),
            Arc::clone(&store),
            Duration::from_secs(120),
        );
        (agent, store, dir)
    }

    #[tokio::test]
    async fn spike_is_reported_for_its_agent() {
        let (agent, store, _dir) = create_agent().await;
        let worker = AgentId::new("worker").unwrap();
        store
            .register_agent(&AgentRegistration::new(worker.clone(), "worker", "Worker"))
            .await
            .unwrap();

        let start = Utc::now() - ChronoDuration::minutes(30);
        let values = [10.0, 11.0, 9.0, 10.0, 10.0, 11.0, 9.0, 50.0];
        for (i, value) in values.into_iter().enumerate() {
            let sample = PerformanceMetric::new("latency", value, "ms")
                .for_agent(worker.clone())
                .at(start + ChronoDuration::minutes(i64::try_from(i).unwrap()));
            store.record_metric(&sample).await.unwrap();
        }

        let output = agent.run_cycle().await.unwrap();
        assert!(output.items_processed >= values.len());

        let anomalies = store
            .get_events(&EventQuery::within_hours(1).of_type(ANOMALY_EVENT))
            .await
            .unwrap();
        assert_eq!(anomalies.len(), 1);
        assert_eq!(anomalies[0].agent_id.as_ref(), Some(&worker));
        assert_eq!(anomalies[0].severity, EventSeverity::Critical);
        assert_eq!(anomalies[0].event_data.get_str("metric_name"), Some("latency"));
    }

    #[tokio::test]
    async fn records_store_diagnostics() {
        let (agent, store, _dir) = create_agent().await;

        agent.run_cycle().await.unwrap();

        let response = store
            .get_metrics(&MetricQuery::within_hours(1).named("db_response_time"))
            .await
            .unwrap();
        assert_eq!(response.len(), 1);
        assert!(response[0].agent_id.is_none());
    }
}

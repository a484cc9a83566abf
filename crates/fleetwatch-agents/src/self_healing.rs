//! Self-healing agent: detection followed by recovery.

use std::cmp::Reverse;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use fleetwatch_core::{AgentId, EventSeverity, Payload};
use fleetwatch_recovery::{ActionExecutor, IssueDetector, RecoveryEngine};
use fleetwatch_store::{NewEvent, Store};

use crate::agent::{CycleOutput, MonitorAgent};
use crate::error::Result;

/// Summary event written after every cycle.
pub const RECOVERY_CYCLE_EVENT: &str = "recovery_cycle";

/// Detects issues and drives them through recovery.
pub struct SelfHealingAgent<S: Store, E: ActionExecutor> {
    id: AgentId,
    store: Arc<S>,
    interval: Duration,
    detector: IssueDetector<S>,
    engine: RecoveryEngine<S, E>,
}

impl<S: Store, E: ActionExecutor> SelfHealingAgent<S, E> {
    /// Create a self-healing agent.
    pub fn new(
        id: AgentId,
        store: Arc<S>,
        interval: Duration,
        detector: IssueDetector<S>,
        engine: RecoveryEngine<S, E>,
    ) -> Self {
        Self {
            id,
            store,
            interval,
            detector,
            engine,
        }
    }
}

#[async_trait]
impl<S: Store + 'static, E: ActionExecutor + 'static> MonitorAgent for SelfHealingAgent<S, E> {
    fn id(&self) -> &AgentId {
        &self.id
    }

    fn name(&self) -> &str {
        "Self-Healing Agent"
    }

    fn agent_type(&self) -> &'static str {
        "self_healing"
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    async fn run_cycle(&self) -> Result<CycleOutput> {
        let mut detection = self.detector.detect().await;
        for failure in &detection.rule_errors {
            tracing::warn!(rule = %failure.rule, error = %failure.error, "Detection rule failed");
        }

        // Most severe first, so the per-cycle cap defers the least urgent.
        detection.issues.sort_by_key(|issue| Reverse(issue.severity));
        let cycle = self.engine.run_cycle(&detection.issues).await;

        let recovered = cycle.succeeded();
        let exhausted = cycle.reports.len() - recovered;
        let value = cycle.business_value_preserved();
        let severity = if exhausted > 0 {
            EventSeverity::Warning
        } else {
            EventSeverity::Info
        };

        let data = Payload::new()
            .with("issues_detected", detection.issues.len())
            .with("recovered", recovered)
            .with("exhausted", exhausted)
            .with("deferred", cycle.deferred)
            .with("rule_errors", detection.rule_errors.len())
            .with("business_value_preserved", value);
        self.store
            .record_event(&NewEvent::new(RECOVERY_CYCLE_EVENT, severity).with_data(data))
            .await?;

        tracing::info!(
            issues = detection.issues.len(),
            recovered,
            exhausted,
            deferred = cycle.deferred,
            "Self-healing cycle complete"
        );

        Ok(CycleOutput::items(detection.issues.len()).with_value(value))
    }
}

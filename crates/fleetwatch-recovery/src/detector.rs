//! Issue detection over live store data.
//!
//! Each rule runs independently against the store. A rule whose query fails
//! is logged and reported in [`Detection::rule_errors`]; the database rule
//! instead turns its own failure into a HIGH issue so that connectivity
//! problems always surface.
//!
//! Rules are thresholds over windowed data. The performance rule also runs
//! [`detect_anomalies`] so a latency spike surfaces before it moves the mean.
//! Per-agent health scores are produced by the heartbeat agent, not here.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use fleetwatch_analysis::{detect_anomalies, Anomaly};
use fleetwatch_core::{AgentId, IssueSeverity};
use fleetwatch_store::{
    AgentState, EventQuery, Heartbeat, MetricQuery, PerformanceMetric, Store,
};
use serde::Serialize;

use crate::config::DetectorConfig;
use crate::error::Result;
use crate::issue::{IssueType, SystemIssue};
use crate::rules::{EventRateRule, RuleRegistry};

/// Component name for system-level samples and fleet-wide issues.
pub const SYSTEM_COMPONENT: &str = "system";

/// Component name for store issues.
pub const DATABASE_COMPONENT: &str = "database";

const PROCESSING_TIME: &str = "processing_time";
const MEMORY_USAGE: &str = "memory_usage";

/// A rule that could not be evaluated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RuleFailure {
    /// Rule name.
    pub rule: String,
    /// Failure description.
    pub error: String,
}

/// Result of one detection cycle.
#[derive(Debug, Clone, Serialize)]
pub struct Detection {
    /// Issues found, in rule order.
    pub issues: Vec<SystemIssue>,
    /// Rules that failed to run.
    pub rule_errors: Vec<RuleFailure>,
    /// When the cycle ran.
    pub checked_at: DateTime<Utc>,
}

impl Detection {
    /// Issues of one type.
    pub fn of_type(&self, issue_type: IssueType) -> impl Iterator<Item = &SystemIssue> {
        self.issues.iter().filter(move |i| i.issue_type == issue_type)
    }
}

/// Detects issues from heartbeats, metrics, events and store health.
pub struct IssueDetector<S: Store> {
    store: Arc<S>,
    config: DetectorConfig,
    rules: RuleRegistry,
}

impl<S: Store> IssueDetector<S> {
    /// Create a detector.
    pub fn new(store: Arc<S>, config: DetectorConfig, rules: RuleRegistry) -> Self {
        Self {
            store,
            config,
            rules,
        }
    }

    /// The event-rate rules evaluated each cycle.
    pub fn rules(&self) -> &RuleRegistry {
        &self.rules
    }

    /// Mutable access for registering rules.
    pub fn rules_mut(&mut self) -> &mut RuleRegistry {
        &mut self.rules
    }

    /// Run every rule once.
    pub async fn detect(&self) -> Detection {
        let now = Utc::now();
        let mut detection = Detection {
            issues: Vec::new(),
            rule_errors: Vec::new(),
            checked_at: now,
        };

        let liveness = self.check_agent_liveness(now).await;
        absorb(&mut detection, "agent_liveness", liveness);

        let database = self.check_database().await;
        detection.issues.extend(database);

        let performance = self.check_performance().await;
        absorb(&mut detection, "performance_degradation", performance);

        let error_rate = self.check_error_rate().await;
        absorb(&mut detection, "error_rate", error_rate);

        let memory = self.check_memory_growth().await;
        absorb(&mut detection, "memory_leak", memory);

        let state = self.check_state_consistency(now).await;
        absorb(&mut detection, "state_consistency", state);

        for rule in self.rules.rules() {
            let result = self.check_event_rate(rule).await;
            absorb(&mut detection, &rule.name, result);
        }

        tracing::debug!(
            issues = detection.issues.len(),
            rule_errors = detection.rule_errors.len(),
            "Detection cycle complete"
        );
        detection
    }

    /// Agents with no or too few heartbeats in the liveness window.
    /// Inactive agents are skipped.
    async fn check_agent_liveness(&self, now: DateTime<Utc>) -> Result<Vec<SystemIssue>> {
        let window = self.config.liveness_window_minutes;
        let agents = self.store.list_agents(None).await?;
        let heartbeats = self.store.get_recent_heartbeats(None, window).await?;
        let counts = count_by_agent(&heartbeats, now - minutes(window));

        let mut issues = Vec::new();
        for agent in agents.iter().filter(|a| a.state != AgentState::Inactive) {
            let count = counts.get(&agent.agent_id).copied().unwrap_or(0);
            if count == 0 {
                issues.push(
                    SystemIssue::for_agent(
                        IssueType::AgentUnresponsive,
                        IssueSeverity::High,
                        &agent.agent_id,
                        format!("Agent {} has not sent a heartbeat in {window} minutes", agent.agent_id),
                    )
                    .with_symptom(format!("0 heartbeats in {window} minutes"))
                    .with_symptom(format!("state {}", agent.state)),
                );
            } else if count <= self.config.irregular_max_heartbeats {
                issues.push(
                    SystemIssue::for_agent(
                        IssueType::HeartbeatIrregular,
                        IssueSeverity::Medium,
                        &agent.agent_id,
                        format!("Agent {} heartbeats are irregular", agent.agent_id),
                    )
                    .with_symptom(format!("{count} heartbeats in {window} minutes")),
                );
            }
        }
        Ok(issues)
    }

    /// Store probe status and latency. Never fails.
    async fn check_database(&self) -> Vec<SystemIssue> {
        let health = match self.store.health_check().await {
            Ok(health) => health,
            Err(e) => {
                tracing::warn!(error = %e, "Database health could not be assessed");
                return vec![SystemIssue::new(
                    IssueType::DatabaseConnectivity,
                    IssueSeverity::High,
                    DATABASE_COMPONENT,
                    "Unable to assess database health",
                )
                .with_symptom(e.to_string())];
            }
        };

        if !health.is_healthy() {
            let mut issue = SystemIssue::new(
                IssueType::DatabaseConnectivity,
                IssueSeverity::Critical,
                DATABASE_COMPONENT,
                "Database health check failed",
            );
            if let Some(error) = health.error {
                issue = issue.with_symptom(error);
            }
            return vec![issue];
        }

        let latency = health.response_time;
        let severity = if latency > self.config.db_response_high {
            IssueSeverity::High
        } else if latency > self.config.db_response_warning {
            IssueSeverity::Medium
        } else {
            return Vec::new();
        };

        vec![SystemIssue::new(
            IssueType::DatabaseConnectivity,
            severity,
            DATABASE_COMPONENT,
            "Database responding slowly",
        )
        .with_symptom(format!("health check took {} ms", latency.as_millis()))]
    }

    /// Mean processing time per agent over the analysis window. An owner under
    /// the threshold is still flagged MEDIUM when its latest sample is a HIGH
    /// or CRITICAL anomaly above the MEDIUM threshold.
    async fn check_performance(&self) -> Result<Vec<SystemIssue>> {
        let window = self.config.analysis_window_hours;
        let metrics = self
            .store
            .get_metrics(&MetricQuery::within_hours(window).named(PROCESSING_TIME))
            .await?;

        let mut issues = Vec::new();
        for (owner, samples) in group_by_owner(&metrics) {
            let avg = mean(&samples);
            if let Some(severity) = band(
                avg,
                self.config.processing_time_medium,
                self.config.processing_time_high,
            ) {
                let description =
                    format!("Mean processing time {avg:.2}s on {}", owner_label(owner));
                issues.push(
                    issue_for_owner(IssueType::PerformanceDegradation, severity, owner, description)
                        .with_symptom(format!("{} samples in the last {window}h", samples.len())),
                );
            } else if let Some(spike) = self.processing_spike(&metrics, owner) {
                let description = format!(
                    "Processing time spike {:.2}s on {}",
                    spike.current_value,
                    owner_label(owner)
                );
                issues.push(
                    issue_for_owner(
                        IssueType::PerformanceDegradation,
                        IssueSeverity::Medium,
                        owner,
                        description,
                    )
                    .with_symptom(format!(
                        "anomaly score {:.1} against a {:.2}s baseline",
                        spike.anomaly_score, spike.baseline_mean
                    )),
                );
            }
        }
        Ok(issues)
    }

    fn processing_spike(
        &self,
        metrics: &[PerformanceMetric],
        owner: Option<&AgentId>,
    ) -> Option<Anomaly> {
        let owned: Vec<PerformanceMetric> = metrics
            .iter()
            .filter(|m| m.agent_id.as_ref() == owner)
            .cloned()
            .collect();
        detect_anomalies(&owned).into_iter().find(|a| {
            a.severity >= IssueSeverity::High
                && a.current_value > self.config.processing_time_medium
        })
    }

    /// Share of `ERROR`/`CRITICAL` events across the fleet.
    #[allow(clippy::cast_precision_loss)]
    async fn check_error_rate(&self) -> Result<Vec<SystemIssue>> {
        let events = self
            .store
            .get_events(&EventQuery::within_hours(self.config.analysis_window_hours))
            .await?;
        if events.is_empty() {
            return Ok(Vec::new());
        }

        let errors = events.iter().filter(|e| e.severity.is_retained()).count();
        let rate = errors as f64 / events.len() as f64;
        let Some(severity) = band(rate, self.config.error_rate_medium, self.config.error_rate_high)
        else {
            return Ok(Vec::new());
        };

        Ok(vec![SystemIssue::new(
            IssueType::HighErrorRate,
            severity,
            SYSTEM_COMPONENT,
            format!("Error rate {:.1}% over the last {}h", rate * 100.0, self.config.analysis_window_hours),
        )
        .with_symptom(format!("{errors} of {} events are errors", events.len()))])
    }

    /// Growth between the oldest and newest memory samples per agent.
    async fn check_memory_growth(&self) -> Result<Vec<SystemIssue>> {
        let metrics = self
            .store
            .get_metrics(&MetricQuery::within_hours(self.config.analysis_window_hours).named(MEMORY_USAGE))
            .await?;

        let mut issues = Vec::new();
        for (owner, samples) in group_by_owner(&metrics) {
            let Some(growth) = memory_growth(&samples, self.config.memory_sample_span) else {
                continue;
            };
            let Some(severity) = band(
                growth,
                self.config.memory_growth_medium,
                self.config.memory_growth_high,
            ) else {
                continue;
            };
            let description = format!("Memory usage grew {growth:.1}% on {}", owner_label(owner));
            issues.push(
                issue_for_owner(IssueType::MemoryLeak, severity, owner, description)
                    .with_symptom(format!("{} samples", samples.len())),
            );
        }
        Ok(issues)
    }

    /// Agents marked active without heartbeats in the state window.
    async fn check_state_consistency(&self, now: DateTime<Utc>) -> Result<Vec<SystemIssue>> {
        let window = self.config.state_window_minutes;
        let active = self.store.list_agents(Some(AgentState::Active)).await?;
        let heartbeats = self.store.get_recent_heartbeats(None, window).await?;
        let counts = count_by_agent(&heartbeats, now - minutes(window));

        Ok(active
            .iter()
            .filter(|a| !counts.contains_key(&a.agent_id))
            .map(|a| {
                SystemIssue::for_agent(
                    IssueType::StateInconsistency,
                    IssueSeverity::Medium,
                    &a.agent_id,
                    format!("Agent {} is marked active but silent", a.agent_id),
                )
                .with_symptom(format!("0 heartbeats in {window} minutes"))
            })
            .collect())
    }

    async fn check_event_rate(&self, rule: &EventRateRule) -> Result<Vec<SystemIssue>> {
        let events = self
            .store
            .get_events(&EventQuery::within_hours(1).of_type(rule.event_type.clone()))
            .await?;
        let count = rule.count(&events);
        if !rule.is_triggered(count) {
            return Ok(Vec::new());
        }

        tracing::info!(rule = %rule.name, component = %rule.component, count, "Event-rate rule triggered");
        Ok(vec![SystemIssue::new(
            IssueType::SubsystemFallback,
            rule.severity,
            rule.component.clone(),
            format!("{} emitted {count} {} events in the last hour", rule.component, rule.event_type),
        )
        .with_symptom(format!("threshold {} per hour", rule.threshold_per_hour))])
    }
}

fn absorb(detection: &mut Detection, rule: &str, result: Result<Vec<SystemIssue>>) {
    match result {
        Ok(issues) => detection.issues.extend(issues),
        Err(e) => {
            tracing::warn!(rule, error = %e, "Detection rule failed");
            detection.rule_errors.push(RuleFailure {
                rule: rule.to_string(),
                error: e.to_string(),
            });
        }
    }
}

fn minutes(window: u32) -> ChronoDuration {
    ChronoDuration::minutes(i64::from(window))
}

fn count_by_agent(heartbeats: &[Heartbeat], since: DateTime<Utc>) -> HashMap<AgentId, usize> {
    let mut counts = HashMap::new();
    for hb in heartbeats.iter().filter(|hb| hb.timestamp >= since) {
        *counts.entry(hb.agent_id.clone()).or_insert(0) += 1;
    }
    counts
}

fn group_by_owner(metrics: &[PerformanceMetric]) -> BTreeMap<Option<&AgentId>, Vec<f64>> {
    let mut groups: BTreeMap<Option<&AgentId>, Vec<f64>> = BTreeMap::new();
    for metric in metrics {
        groups.entry(metric.agent_id.as_ref()).or_default().push(metric.value);
    }
    groups
}

fn owner_label(owner: Option<&AgentId>) -> &str {
    owner.map_or(SYSTEM_COMPONENT, AgentId::as_str)
}

fn issue_for_owner(
    issue_type: IssueType,
    severity: IssueSeverity,
    owner: Option<&AgentId>,
    description: String,
) -> SystemIssue {
    match owner {
        Some(id) => SystemIssue::for_agent(issue_type, severity, id, description),
        None => SystemIssue::new(issue_type, severity, SYSTEM_COMPONENT, description),
    }
}

#[allow(clippy::cast_precision_loss)]
fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

/// MEDIUM above `medium`, HIGH above `high`, nothing otherwise.
fn band(value: f64, medium: f64, high: f64) -> Option<IssueSeverity> {
    if value > high {
        Some(IssueSeverity::High)
    } else if value > medium {
        Some(IssueSeverity::Medium)
    } else {
        None
    }
}

/// Percentage growth from the mean of the oldest `span` samples to the mean
/// of the newest `span`. Needs more than `span` samples and a positive
/// starting mean.
fn memory_growth(samples: &[f64], span: usize) -> Option<f64> {
    if span == 0 || samples.len() <= span {
        return None;
    }
    let early = mean(&samples[..span]);
    let late = mean(&samples[samples.len() - span..]);
    (early > 0.0).then(|| (late - early) / early * 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleetwatch_core::{EventSeverity, Payload};
    use fleetwatch_store::{AgentRegistration, NewEvent, SqlStore, StoreConfig};
    use tempfile::TempDir;

    async fn create_detector() -> (IssueDetector<SqlStore>, Arc<SqlStore>, TempDir) {
        let dir = TempDir::new().unwrap();
        let url = format!("sqlite://{}", dir.path().join("detector.db").display());
        let store = Arc::new(SqlStore::connect(StoreConfig::with_url(url)).await.unwrap());
        let detector = IssueDetector::new(
            Arc::clone(&store),
            DetectorConfig::default(),
            RuleRegistry::with_defaults(),
        );
        (detector, store, dir)
    }

    fn id(raw: &str) -> AgentId {
        AgentId::new(raw).unwrap()
    }

    async fn register(store: &SqlStore, raw: &str, state: AgentState) {
        store
            .register_agent(&AgentRegistration::new(id(raw), "worker", raw).with_state(state))
            .await
            .unwrap();
    }

    async fn heartbeat(store: &SqlStore, raw: &str, minutes_ago: i64) {
        store
            .record_heartbeat(
                &Heartbeat::now(id(raw)).at(Utc::now() - ChronoDuration::minutes(minutes_ago)),
            )
            .await
            .unwrap();
    }

    async fn metric_series(store: &SqlStore, raw: Option<&str>, name: &str, values: &[f64]) {
        let now = Utc::now();
        let n = i64::try_from(values.len()).unwrap();
        for (value, i) in values.iter().zip(0..n) {
            let mut metric =
                PerformanceMetric::new(name, *value, "").at(now - ChronoDuration::minutes(n - i));
            if let Some(raw) = raw {
                metric = metric.for_agent(id(raw));
            }
            store.record_metric(&metric).await.unwrap();
        }
    }

    #[tokio::test]
    async fn silent_active_agent_is_unresponsive_and_inconsistent() {
        let (detector, store, _dir) = create_detector().await;
        register(&store, "A1", AgentState::Active).await;
        heartbeat(&store, "A1", 12).await;

        let detection = detector.detect().await;
        assert!(detection.rule_errors.is_empty());

        let unresponsive: Vec<_> = detection.of_type(IssueType::AgentUnresponsive).collect();
        assert_eq!(unresponsive.len(), 1);
        assert_eq!(unresponsive[0].severity, IssueSeverity::High);
        assert_eq!(unresponsive[0].agent_id, Some(id("A1")));

        let inconsistent: Vec<_> = detection.of_type(IssueType::StateInconsistency).collect();
        assert_eq!(inconsistent.len(), 1);
        assert_eq!(inconsistent[0].severity, IssueSeverity::Medium);
    }

    #[tokio::test]
    async fn few_heartbeats_are_irregular() {
        let (detector, store, _dir) = create_detector().await;
        register(&store, "A1", AgentState::Active).await;
        heartbeat(&store, "A1", 1).await;
        heartbeat(&store, "A1", 7).await;

        let detection = detector.detect().await;
        let irregular: Vec<_> = detection.of_type(IssueType::HeartbeatIrregular).collect();
        assert_eq!(irregular.len(), 1);
        assert_eq!(irregular[0].severity, IssueSeverity::Medium);
        assert_eq!(detection.of_type(IssueType::AgentUnresponsive).count(), 0);
        assert_eq!(detection.of_type(IssueType::StateInconsistency).count(), 0);
    }

    #[tokio::test]
    async fn healthy_and_inactive_agents_are_not_flagged() {
        let (detector, store, _dir) = create_detector().await;
        register(&store, "busy", AgentState::Active).await;
        for minutes_ago in 0..4 {
            heartbeat(&store, "busy", minutes_ago).await;
        }
        register(&store, "parked", AgentState::Inactive).await;

        let detection = detector.detect().await;
        assert!(detection.issues.is_empty(), "{:?}", detection.issues);
    }

    #[tokio::test]
    async fn memory_growth_of_fifty_percent_is_medium() {
        let (detector, store, _dir) = create_detector().await;
        metric_series(
            &store,
            None,
            "memory_usage",
            &[40.0, 40.0, 40.0, 40.0, 40.0, 60.0, 60.0, 60.0, 60.0, 60.0],
        )
        .await;

        let detection = detector.detect().await;
        let leaks: Vec<_> = detection.of_type(IssueType::MemoryLeak).collect();
        assert_eq!(leaks.len(), 1);
        assert_eq!(leaks[0].severity, IssueSeverity::Medium);
        assert_eq!(leaks[0].affected_component, SYSTEM_COMPONENT);
    }

    #[tokio::test]
    async fn slow_agent_is_degraded() {
        let (detector, store, _dir) = create_detector().await;
        register(&store, "slow", AgentState::Initializing).await;
        heartbeat(&store, "slow", 0).await;
        heartbeat(&store, "slow", 1).await;
        heartbeat(&store, "slow", 2).await;
        metric_series(&store, Some("slow"), "processing_time", &[11.0, 12.0, 13.0]).await;
        metric_series(&store, None, "processing_time", &[6.0, 6.0]).await;

        let detection = detector.detect().await;
        let mut degraded: Vec<_> = detection.of_type(IssueType::PerformanceDegradation).collect();
        degraded.sort_by_key(|i| i.severity);
        assert_eq!(degraded.len(), 2);
        assert_eq!(degraded[0].severity, IssueSeverity::Medium);
        assert_eq!(degraded[0].agent_id, None);
        assert_eq!(degraded[1].severity, IssueSeverity::High);
        assert_eq!(degraded[1].agent_id, Some(id("slow")));
    }

    #[tokio::test]
    async fn latency_spike_is_degraded_before_the_mean_moves() {
        let (detector, store, _dir) = create_detector().await;
        register(&store, "spiky", AgentState::Initializing).await;
        register(&store, "quick", AgentState::Initializing).await;
        // mean 2.6s, under the 5s threshold; latest sample far outside the baseline
        metric_series(&store, Some("spiky"), "processing_time", &[1.0, 1.2, 0.8, 1.0, 9.0]).await;
        // just as anomalous, but still fast in absolute terms
        metric_series(&store, Some("quick"), "processing_time", &[0.1, 0.12, 0.08, 0.1, 0.9]).await;

        let detection = detector.detect().await;
        let degraded: Vec<_> = detection.of_type(IssueType::PerformanceDegradation).collect();
        assert_eq!(degraded.len(), 1);
        assert_eq!(degraded[0].severity, IssueSeverity::Medium);
        assert_eq!(degraded[0].agent_id, Some(id("spiky")));
        assert!(degraded[0].symptoms[0].contains("anomaly score"));
    }

    #[tokio::test]
    async fn error_share_and_fallback_storm() {
        let (detector, store, _dir) = create_detector().await;
        for _ in 0..5 {
            store
                .record_event(
                    &NewEvent::new("llm_fallback", EventSeverity::Info)
                        .with_data(Payload::new().with("component", "llm_service")),
                )
                .await
                .unwrap();
        }
        store
            .record_event(&NewEvent::new("agent_error", EventSeverity::Error))
            .await
            .unwrap();

        let detection = detector.detect().await;

        let storms: Vec<_> = detection.of_type(IssueType::SubsystemFallback).collect();
        assert_eq!(storms.len(), 1);
        assert_eq!(storms[0].severity, IssueSeverity::High);
        assert_eq!(storms[0].affected_component, "llm_service");

        // 1 of 6 events
        let errors: Vec<_> = detection.of_type(IssueType::HighErrorRate).collect();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].severity, IssueSeverity::Medium);
    }

    #[tokio::test]
    async fn closed_store_surfaces_as_critical_database_issue() {
        let (detector, store, _dir) = create_detector().await;
        store.close().await;

        let detection = detector.detect().await;
        let db: Vec<_> = detection.of_type(IssueType::DatabaseConnectivity).collect();
        assert_eq!(db.len(), 1);
        assert_eq!(db[0].severity, IssueSeverity::Critical);
        assert!(!detection.rule_errors.is_empty());
        assert!(detection
            .rule_errors
            .iter()
            .any(|f| f.rule == "agent_liveness"));
    }

    #[test]
    fn memory_growth_needs_more_than_span() {
        assert_eq!(memory_growth(&[1.0; 5], 5), None);
        assert_eq!(memory_growth(&[0.0; 6], 5), None);
        let growth = memory_growth(&[10.0, 10.0, 10.0, 10.0, 10.0, 30.0], 5).unwrap();
        // oldest five mean 10, newest five mean 14
        assert!((growth - 40.0).abs() < 1e-9);
    }

    #[test]
    fn band_is_strict() {
        assert_eq!(band(50.0, 20.0, 50.0), Some(IssueSeverity::Medium));
        assert_eq!(band(50.1, 20.0, 50.0), Some(IssueSeverity::High));
        assert_eq!(band(20.0, 20.0, 50.0), None);
    }
}

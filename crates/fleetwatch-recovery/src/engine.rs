//! Recovery engine.
//!
//! For each issue the engine builds a plan from the [`RecoveryPolicy`], runs
//! the actions strictly in order until one succeeds, and writes every result
//! to the store as a `recovery_action` event (INFO on success, WARNING on
//! failure). Those events are the audit trail; results are not kept as rows.

use std::sync::Arc;
use std::time::Instant;

use fleetwatch_core::{EventSeverity, IssueId, Payload};
use fleetwatch_store::{NewEvent, Store};
use serde::Serialize;

use crate::action::{ActionType, RecoveryAction, RecoveryResult};
use crate::config::RecoveryConfig;
use crate::error::{RecoveryError, Result};
use crate::executor::ActionExecutor;
use crate::issue::{IssueType, SystemIssue};
use crate::phase::{self, RecoveryPhase};
use crate::policy::RecoveryPolicy;

/// Event type of the per-action audit records.
pub const RECOVERY_ACTION_EVENT: &str = "recovery_action";

/// Outcome of recovering one issue.
#[derive(Debug, Clone, Serialize)]
pub struct RecoveryReport {
    /// The issue.
    pub issue_id: IssueId,
    /// Its type.
    pub issue_type: IssueType,
    /// Final phase: `Succeeded` or `Exhausted`.
    pub phase: RecoveryPhase,
    /// One result per action run, in order.
    pub results: Vec<RecoveryResult>,
    /// The action that fixed the issue, if any.
    pub succeeded_with: Option<ActionType>,
}

impl RecoveryReport {
    /// Returns true if an action fixed the issue.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.phase == RecoveryPhase::Succeeded
    }

    /// Sum of business value preserved across results.
    #[must_use]
    pub fn business_value_preserved(&self) -> f64 {
        self.results.iter().map(|r| r.business_value_preserved).sum()
    }
}

/// Outcome of one recovery cycle.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RecoveryCycle {
    /// Reports for the issues handled this cycle.
    pub reports: Vec<RecoveryReport>,
    /// Issues left for the next cycle.
    pub deferred: usize,
}

impl RecoveryCycle {
    /// Issues fixed this cycle.
    #[must_use]
    pub fn succeeded(&self) -> usize {
        self.reports.iter().filter(|r| r.is_success()).count()
    }

    /// Business value preserved this cycle.
    #[must_use]
    pub fn business_value_preserved(&self) -> f64 {
        self.reports.iter().map(RecoveryReport::business_value_preserved).sum()
    }
}

/// Plans and executes recovery for detected issues.
pub struct RecoveryEngine<S: Store, E: ActionExecutor> {
    store: Arc<S>,
    executor: Arc<E>,
    policy: RecoveryPolicy,
    config: RecoveryConfig,
}

impl<S: Store, E: ActionExecutor> RecoveryEngine<S, E> {
    /// Create an engine.
    pub fn new(
        store: Arc<S>,
        executor: Arc<E>,
        policy: RecoveryPolicy,
        config: RecoveryConfig,
    ) -> Self {
        Self {
            store,
            executor,
            policy,
            config,
        }
    }

    /// The policy plans are built from.
    pub fn policy(&self) -> &RecoveryPolicy {
        &self.policy
    }

    /// Ordered actions for an issue.
    pub fn plan(&self, issue: &SystemIssue) -> Vec<RecoveryAction> {
        self.policy.plan_for(issue)
    }

    /// Recover up to `max_concurrent_recoveries` issues, in the order given.
    /// The rest are counted as deferred.
    pub async fn run_cycle(&self, issues: &[SystemIssue]) -> RecoveryCycle {
        let cap = self.config.max_concurrent_recoveries;
        let (now, later) = issues.split_at(issues.len().min(cap));

        let mut cycle = RecoveryCycle {
            reports: Vec::with_capacity(now.len()),
            deferred: later.len(),
        };
        for issue in now {
            match self.recover(issue).await {
                Ok(report) => cycle.reports.push(report),
                Err(e) => tracing::error!(issue_id = %issue.issue_id, error = %e, "Recovery aborted"),
            }
        }

        if cycle.deferred > 0 {
            tracing::info!(deferred = cycle.deferred, "Issues deferred to next cycle");
        }
        cycle
    }

    /// Run the plan for one issue until an action succeeds.
    ///
    /// # Errors
    ///
    /// Returns `RecoveryError::InvalidPhase` if the state machine is violated.
    pub async fn recover(&self, issue: &SystemIssue) -> Result<RecoveryReport> {
        let id = issue.issue_id;
        let mut current = phase::advance(id, RecoveryPhase::Detected, RecoveryPhase::Planned)?;
        let plan = self.plan(issue);

        tracing::info!(
            issue_id = %id,
            issue_type = %issue.issue_type,
            severity = %issue.severity,
            actions = plan.len(),
            "Recovery planned"
        );

        let mut results = Vec::with_capacity(plan.len());
        let mut succeeded_with = None;

        if !plan.is_empty() {
            current = phase::advance(id, current, RecoveryPhase::Executing)?;
            for action in &plan {
                let result = self.execute_action(action, issue).await;
                self.record(issue, &result).await;
                let success = result.success;
                results.push(result);
                if success {
                    succeeded_with = Some(action.action_type);
                    break;
                }
            }
        }

        let terminal = if succeeded_with.is_some() {
            RecoveryPhase::Succeeded
        } else {
            RecoveryPhase::Exhausted
        };
        current = phase::advance(id, current, terminal)?;

        if current == RecoveryPhase::Exhausted {
            tracing::warn!(issue_id = %id, issue_type = %issue.issue_type, "Recovery plan exhausted");
        }

        Ok(RecoveryReport {
            issue_id: id,
            issue_type: issue.issue_type,
            phase: current,
            results,
            succeeded_with,
        })
    }

    async fn execute_action(&self, action: &RecoveryAction, issue: &SystemIssue) -> RecoveryResult {
        let started = Instant::now();
        let limit = self.config.action_timeout;
        let outcome = tokio::time::timeout(limit, self.executor.execute(action, issue)).await;

        let (success, error_message) = match outcome {
            Ok(Ok(true)) => (true, None),
            Ok(Ok(false)) => (false, Some("action did not resolve the issue".to_string())),
            Ok(Err(e)) => (false, Some(e.to_string())),
            Err(_) => {
                let e = RecoveryError::Timeout {
                    action: action.action_type,
                    after: limit,
                };
                (false, Some(e.to_string()))
            }
        };

        if !success && action.rollback_available {
            if let Err(e) = self.executor.rollback(action, issue).await {
                tracing::warn!(action = %action.action_type, error = %e, "Rollback failed");
            }
        }

        let business_value_preserved = if success {
            self.policy.business_value(action.action_type) * action.success_probability
        } else {
            0.0
        };

        RecoveryResult {
            action_id: action.action_id,
            action_type: action.action_type,
            success,
            execution_time: started.elapsed(),
            error_message,
            business_value_preserved,
        }
    }

    /// Write the audit event. Failures are logged, never propagated.
    async fn record(&self, issue: &SystemIssue, result: &RecoveryResult) {
        let severity = if result.success {
            EventSeverity::Info
        } else {
            EventSeverity::Warning
        };

        let mut data = Payload::new()
            .with("issue_id", issue.issue_id.to_string())
            .with("issue_type", issue.issue_type.as_str())
            .with("component", issue.affected_component.clone())
            .with("action_id", result.action_id.to_string())
            .with("action_type", result.action_type.as_str())
            .with("success", result.success)
            .with("execution_time_ms", duration_millis(result))
            .with("business_value_preserved", result.business_value_preserved);
        if let Some(message) = &result.error_message {
            data.insert("error_message", message.clone());
        }

        let mut event = NewEvent::new(RECOVERY_ACTION_EVENT, severity).with_data(data);
        if let Some(agent_id) = &issue.agent_id {
            event = event.for_agent(agent_id.clone());
        }

        if let Err(e) = self.store.record_event(&event).await {
            tracing::warn!(
                issue_id = %issue.issue_id,
                action = %result.action_type,
                error = %e,
                "Failed to record recovery action"
            );
        }
    }
}

fn duration_millis(result: &RecoveryResult) -> u64 {
    u64::try_from(result.execution_time.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use fleetwatch_core::IssueSeverity;
    use fleetwatch_store::{EventQuery, SqlStore, StoreConfig};
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::time::Duration;
    use tempfile::TempDir;

    #[derive(Clone, Copy)]
    enum Outcome {
        Fixed,
        NotFixed,
        Fails,
        Hangs,
    }

    /// Executor with a fixed outcome per action type.
    #[derive(Default)]
    struct ScriptedExecutor {
        outcomes: HashMap<ActionType, Outcome>,
        calls: Mutex<Vec<ActionType>>,
        rollbacks: Mutex<Vec<ActionType>>,
    }

    impl ScriptedExecutor {
        fn with(mut self, action_type: ActionType, outcome: Outcome) -> Self {
            self.outcomes.insert(action_type, outcome);
            self
        }
    }

    #[async_trait]
    impl ActionExecutor for ScriptedExecutor {
        async fn execute(&self, action: &RecoveryAction, _issue: &SystemIssue) -> Result<bool> {
            self.calls.lock().push(action.action_type);
            match self.outcomes.get(&action.action_type).copied().unwrap_or(Outcome::NotFixed) {
                Outcome::Fixed => Ok(true),
                Outcome::NotFixed => Ok(false),
                Outcome::Fails => Err(RecoveryError::Controller("unreachable agent".into())),
                Outcome::Hangs => {
                    tokio::time::sleep(Duration::from_secs(30)).await;
                    Ok(true)
                }
            }
        }

        async fn rollback(&self, action: &RecoveryAction, _issue: &SystemIssue) -> Result<()> {
            self.rollbacks.lock().push(action.action_type);
            Ok(())
        }
    }

    async fn create_engine(
        executor: ScriptedExecutor,
        config: RecoveryConfig,
    ) -> (RecoveryEngine<SqlStore, ScriptedExecutor>, Arc<SqlStore>, TempDir) {
        let dir = TempDir::new().unwrap();
        let url = format!("sqlite://{}", dir.path().join("engine.db").display());
        let store = Arc::new(SqlStore::connect(StoreConfig::with_url(url)).await.unwrap());
        let engine = RecoveryEngine::new(
            Arc::clone(&store),
            Arc::new(executor),
            RecoveryPolicy::default(),
            config,
        );
        (engine, store, dir)
    }

    fn unresponsive() -> SystemIssue {
        SystemIssue::new(
            IssueType::AgentUnresponsive,
            IssueSeverity::High,
            "A1",
            "silent agent",
        )
    }

    #[tokio::test]
    async fn stops_at_first_success() {
        let executor = ScriptedExecutor::default()
            .with(ActionType::RestartAgent, Outcome::Fails)
            .with(ActionType::ResetHeartbeat, Outcome::Fixed)
            .with(ActionType::ClearCache, Outcome::Fixed);
        let (engine, store, _dir) = create_engine(executor, RecoveryConfig::default()).await;

        let report = engine.recover(&unresponsive()).await.unwrap();

        assert_eq!(report.phase, RecoveryPhase::Succeeded);
        assert_eq!(report.succeeded_with, Some(ActionType::ResetHeartbeat));
        assert_eq!(
            *engine.executor.calls.lock(),
            vec![ActionType::RestartAgent, ActionType::ResetHeartbeat]
        );
        assert!(!report.results[0].success);
        assert!(report.results[0].business_value_preserved.abs() < f64::EPSILON);
        assert!(report.results[0]
            .error_message
            .as_deref()
            .unwrap()
            .contains("unreachable agent"));
        // 150 * 0.6
        assert!((report.business_value_preserved() - 90.0).abs() < 1e-9);

        let events = store
            .get_events(&EventQuery::within_hours(1).of_type(RECOVERY_ACTION_EVENT))
            .await
            .unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(
            events.iter().filter(|e| e.severity == EventSeverity::Warning).count(),
            1
        );
    }

    #[tokio::test]
    async fn exhausted_plan_logs_every_failure() {
        let (engine, store, _dir) =
            create_engine(ScriptedExecutor::default(), RecoveryConfig::default()).await;

        let report = engine.recover(&unresponsive()).await.unwrap();

        assert_eq!(report.phase, RecoveryPhase::Exhausted);
        assert_eq!(report.results.len(), 3);
        assert!(report.succeeded_with.is_none());

        let warnings = store
            .get_events(
                &EventQuery::within_hours(1)
                    .of_type(RECOVERY_ACTION_EVENT)
                    .severity(EventSeverity::Warning),
            )
            .await
            .unwrap();
        assert_eq!(warnings.len(), 3);
    }

    #[tokio::test]
    async fn failed_reversible_action_is_rolled_back() {
        let executor = ScriptedExecutor::default()
            .with(ActionType::TuneParameters, Outcome::Fails)
            .with(ActionType::PurgeStateStore, Outcome::Fixed);
        let (engine, _store, _dir) = create_engine(executor, RecoveryConfig::default()).await;
        let issue = SystemIssue::new(
            IssueType::SubsystemFallback,
            IssueSeverity::High,
            "llm_service",
            "fallback storm",
        );

        let report = engine.recover(&issue).await.unwrap();

        assert_eq!(report.succeeded_with, Some(ActionType::PurgeStateStore));
        assert_eq!(*engine.executor.rollbacks.lock(), vec![ActionType::TuneParameters]);
    }

    #[tokio::test]
    async fn hung_action_times_out() {
        let executor = ScriptedExecutor::default()
            .with(ActionType::ReconnectDatabase, Outcome::Hangs)
            .with(ActionType::ClearCache, Outcome::Fixed);
        let config = RecoveryConfig {
            action_timeout: Duration::from_millis(50),
            ..RecoveryConfig::default()
        };
        let (engine, _store, _dir) = create_engine(executor, config).await;
        let issue = SystemIssue::new(
            IssueType::DatabaseConnectivity,
            IssueSeverity::Critical,
            "database",
            "probe failed",
        );

        let report = engine.recover(&issue).await.unwrap();

        assert!(report.is_success());
        assert!(report.results[0]
            .error_message
            .as_deref()
            .unwrap()
            .contains("timed out"));
    }

    #[tokio::test]
    async fn cycle_defers_issues_beyond_cap() {
        let executor = ScriptedExecutor::default().with(ActionType::RestartAgent, Outcome::Fixed);
        let config = RecoveryConfig {
            max_concurrent_recoveries: 3,
            ..RecoveryConfig::default()
        };
        let (engine, _store, _dir) = create_engine(executor, config).await;
        let issues: Vec<_> = (0..5).map(|_| unresponsive()).collect();

        let cycle = engine.run_cycle(&issues).await;

        assert_eq!(cycle.reports.len(), 3);
        assert_eq!(cycle.deferred, 2);
        assert_eq!(cycle.succeeded(), 3);
        assert_eq!(
            cycle.reports.iter().map(|r| r.issue_id).collect::<Vec<_>>(),
            issues[..3].iter().map(|i| i.issue_id).collect::<Vec<_>>()
        );
        // 3 * 500 * 0.8
        assert!((cycle.business_value_preserved() - 1200.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn empty_plan_is_exhausted() {
        let (mut engine, _store, _dir) =
            create_engine(ScriptedExecutor::default(), RecoveryConfig::default()).await;
        engine.policy.plans.clear();

        let report = engine.recover(&unresponsive()).await.unwrap();

        assert_eq!(report.phase, RecoveryPhase::Exhausted);
        assert!(report.results.is_empty());
        assert!(engine.executor.calls.lock().is_empty());
    }
}

//! Concrete recovery action handlers.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use fleetwatch_core::{ActionId, AgentId};
use fleetwatch_store::{AgentState, Store};
use parking_lot::Mutex;

use crate::action::{ActionType, RecoveryAction};
use crate::config::RecoveryConfig;
use crate::controller::AgentController;
use crate::error::{RecoveryError, Result};
use crate::issue::SystemIssue;
use crate::subsystems::{ParameterSnapshot, SubsystemRegistry};

/// Runs recovery actions.
///
/// This trait separates the engine's sequencing from the handlers, allowing
/// scripted implementations in tests.
#[async_trait]
pub trait ActionExecutor: Send + Sync {
    /// Run one action against the issue.
    ///
    /// Returns `Ok(true)` if the issue is considered fixed and `Ok(false)` if
    /// the action ran without fixing it.
    ///
    /// # Errors
    ///
    /// Returns an error if the action could not be carried out.
    async fn execute(&self, action: &RecoveryAction, issue: &SystemIssue) -> Result<bool>;

    /// Undo a failed action. Only called when `rollback_available` is set.
    ///
    /// # Errors
    ///
    /// Returns an error if the rollback could not be carried out.
    async fn rollback(&self, action: &RecoveryAction, issue: &SystemIssue) -> Result<()>;
}

/// Executor acting on the store, the agents and the registered subsystems.
pub struct FleetActionExecutor<S: Store, C: AgentController> {
    store: Arc<S>,
    controller: Arc<C>,
    subsystems: Arc<SubsystemRegistry>,
    config: RecoveryConfig,
    snapshots: Mutex<HashMap<ActionId, (String, ParameterSnapshot)>>,
}

impl<S: Store, C: AgentController> FleetActionExecutor<S, C> {
    /// Create an executor.
    pub fn new(
        store: Arc<S>,
        controller: Arc<C>,
        subsystems: Arc<SubsystemRegistry>,
        config: RecoveryConfig,
    ) -> Self {
        Self {
            store,
            controller,
            subsystems,
            config,
            snapshots: Mutex::new(HashMap::new()),
        }
    }

    /// The subsystems this executor tunes.
    pub fn subsystems(&self) -> &Arc<SubsystemRegistry> {
        &self.subsystems
    }

    /// Mark silent `active` agents `inactive` and heartbeating `inactive`
    /// agents `active`. Returns the number of agents updated.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read or updated.
    pub async fn sync_agent_states(&self) -> Result<usize> {
        let heartbeats = self
            .store
            .get_recent_heartbeats(None, self.config.sync_window_minutes)
            .await?;
        let alive: HashSet<&AgentId> = heartbeats.iter().map(|hb| &hb.agent_id).collect();

        let mut updated = 0;
        for agent in self.store.list_agents(None).await? {
            let target = match (agent.state, alive.contains(&agent.agent_id)) {
                (AgentState::Active, false) => AgentState::Inactive,
                (AgentState::Inactive, true) => AgentState::Active,
                _ => continue,
            };
            self.store.update_agent_state(&agent.agent_id, target).await?;
            tracing::info!(
                agent_id = %agent.agent_id,
                from = %agent.state,
                to = %target,
                "Agent state synchronized"
            );
            updated += 1;
        }
        Ok(updated)
    }

    async fn restart(&self, agent_id: &AgentId) -> Result<bool> {
        let signalled_at = Utc::now().timestamp_millis();
        self.controller.restart_agent(agent_id).await?;
        self.heartbeat_since(agent_id, signalled_at, "restart").await
    }

    async fn reset_heartbeat(&self, agent_id: &AgentId) -> Result<bool> {
        let signalled_at = Utc::now().timestamp_millis();
        self.controller.reset_heartbeat(agent_id).await?;
        self.heartbeat_since(agent_id, signalled_at, "heartbeat reset").await
    }

    /// Wait out the settle time, then look for a heartbeat newer than the signal.
    async fn heartbeat_since(
        &self,
        agent_id: &AgentId,
        signalled_at: i64,
        signal: &str,
    ) -> Result<bool> {
        tokio::time::sleep(self.config.restart_settle).await;

        // Stored timestamps have millisecond precision.
        let settle_minutes = self.config.restart_settle.as_secs().div_ceil(60);
        let window = u32::try_from(settle_minutes).unwrap_or(u32::MAX).saturating_add(1);
        let fresh = self
            .store
            .get_recent_heartbeats(Some(agent_id), window)
            .await?
            .iter()
            .any(|hb| hb.timestamp.timestamp_millis() >= signalled_at);

        if !fresh {
            tracing::warn!(agent_id = %agent_id, signal, "No heartbeat after control signal");
        }
        Ok(fresh)
    }

    async fn reconnect(&self) -> Result<bool> {
        self.store.reconnect().await?;
        Ok(self.store.health_check().await?.is_healthy())
    }

    async fn clear_cache(&self, issue: &SystemIssue) -> Result<bool> {
        match &issue.agent_id {
            Some(agent_id) => {
                let signalled_at = Utc::now().timestamp_millis();
                self.controller.clear_cache(agent_id).await?;
                self.heartbeat_since(agent_id, signalled_at, "cache clear").await
            }
            None => {
                self.subsystems.clear_cache(&issue.affected_component)?;
                Ok(true)
            }
        }
    }

    fn tune(&self, action: &RecoveryAction, component: &str) -> Result<bool> {
        let previous = self.subsystems.tune_down(component, self.config.tune_factor)?;
        self.snapshots
            .lock()
            .insert(action.action_id, (component.to_string(), previous));
        Ok(true)
    }
}

fn target(action: &RecoveryAction, issue: &SystemIssue) -> Result<AgentId> {
    issue
        .agent_id
        .clone()
        .ok_or(RecoveryError::MissingTarget(action.action_type))
}

#[async_trait]
impl<S: Store, C: AgentController> ActionExecutor for FleetActionExecutor<S, C> {
    async fn execute(&self, action: &RecoveryAction, issue: &SystemIssue) -> Result<bool> {
        tracing::info!(
            issue_id = %issue.issue_id,
            action = %action.action_type,
            component = %issue.affected_component,
            "Executing recovery action"
        );

        match action.action_type {
            ActionType::RestartAgent => self.restart(&target(action, issue)?).await,
            ActionType::ReconnectDatabase => self.reconnect().await,
            ActionType::ClearCache => self.clear_cache(issue).await,
            ActionType::SyncState => {
                let updated = self.sync_agent_states().await?;
                tracing::debug!(updated, "State synchronization complete");
                Ok(true)
            }
            ActionType::ResetHeartbeat => self.reset_heartbeat(&target(action, issue)?).await,
            ActionType::TuneParameters => self.tune(action, &issue.affected_component),
            ActionType::PurgeStateStore => {
                self.subsystems.purge_and_rebuild(&issue.affected_component)?;
                Ok(true)
            }
        }
    }

    async fn rollback(&self, action: &RecoveryAction, _issue: &SystemIssue) -> Result<()> {
        let snapshot = self.snapshots.lock().remove(&action.action_id);
        match snapshot {
            Some((component, previous)) => self.subsystems.restore(&component, &previous),
            None => {
                tracing::debug!(action = %action.action_type, "Nothing to roll back");
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::NoopAgentController;
    use crate::issue::IssueType;
    use crate::policy::RecoveryPolicy;
    use fleetwatch_core::IssueSeverity;
    use fleetwatch_store::{AgentRegistration, Heartbeat, SqlStore, StoreConfig};
    use std::time::Duration;
    use tempfile::TempDir;

    /// Controller whose agents heartbeat again after any signal.
    struct RespawningController {
        store: Arc<SqlStore>,
    }

    impl RespawningController {
        async fn beat(&self, agent_id: &AgentId) -> Result<()> {
            self.store.record_heartbeat(&Heartbeat::now(agent_id.clone())).await?;
            Ok(())
        }
    }

    #[async_trait]
    impl AgentController for RespawningController {
        async fn restart_agent(&self, agent_id: &AgentId) -> Result<()> {
            self.beat(agent_id).await
        }

        async fn clear_cache(&self, agent_id: &AgentId) -> Result<()> {
            self.beat(agent_id).await
        }

        async fn reset_heartbeat(&self, agent_id: &AgentId) -> Result<()> {
            self.beat(agent_id).await
        }
    }

    /// Controller that accepts every signal while the agent stays silent.
    struct DeafController;

    #[async_trait]
    impl AgentController for DeafController {
        async fn restart_agent(&self, _agent_id: &AgentId) -> Result<()> {
            Ok(())
        }

        async fn clear_cache(&self, _agent_id: &AgentId) -> Result<()> {
            Ok(())
        }

        async fn reset_heartbeat(&self, _agent_id: &AgentId) -> Result<()> {
            Ok(())
        }
    }

    fn quick_config() -> RecoveryConfig {
        RecoveryConfig {
            restart_settle: Duration::from_millis(10),
            ..RecoveryConfig::default()
        }
    }

    async fn create_store() -> (Arc<SqlStore>, TempDir) {
        let dir = TempDir::new().unwrap();
        let url = format!("sqlite://{}", dir.path().join("executor.db").display());
        let store = Arc::new(SqlStore::connect(StoreConfig::with_url(url)).await.unwrap());
        (store, dir)
    }

    fn executor<C: AgentController>(
        store: &Arc<SqlStore>,
        controller: C,
    ) -> FleetActionExecutor<SqlStore, C> {
        FleetActionExecutor::new(
            Arc::clone(store),
            Arc::new(controller),
            Arc::new(SubsystemRegistry::new()),
            quick_config(),
        )
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

    fn action_for(issue: &SystemIssue, action_type: ActionType) -> RecoveryAction {
        RecoveryPolicy::default()
            .plan_for(issue)
            .into_iter()
            .find(|a| a.action_type == action_type)
            .unwrap()
    }

    #[tokio::test]
    async fn restart_succeeds_when_agent_heartbeats_again() {
        let (store, _dir) = create_store().await;
        register(&store, "A1", AgentState::Active).await;
        let issue = SystemIssue::for_agent(
            IssueType::AgentUnresponsive,
            IssueSeverity::High,
            &id("A1"),
            "silent",
        );
        let action = action_for(&issue, ActionType::RestartAgent);

        let respawning = executor(&store, RespawningController { store: Arc::clone(&store) });
        assert!(respawning.execute(&action, &issue).await.unwrap());

        let silent = executor(&store, DeafController);
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(!silent.execute(&action, &issue).await.unwrap());
    }

    #[tokio::test]
    async fn agent_signals_need_a_fresh_heartbeat() {
        let (store, _dir) = create_store().await;
        register(&store, "A1", AgentState::Active).await;
        let issue = SystemIssue::for_agent(
            IssueType::AgentUnresponsive,
            IssueSeverity::High,
            &id("A1"),
            "silent",
        );
        let reset = action_for(&issue, ActionType::ResetHeartbeat);
        let clear = action_for(&issue, ActionType::ClearCache);

        let silent = executor(&store, DeafController);
        assert!(!silent.execute(&reset, &issue).await.unwrap());
        assert!(!silent.execute(&clear, &issue).await.unwrap());

        let respawning = executor(&store, RespawningController { store: Arc::clone(&store) });
        assert!(respawning.execute(&reset, &issue).await.unwrap());
        assert!(respawning.execute(&clear, &issue).await.unwrap());
    }

    #[tokio::test]
    async fn unconfigured_controller_fails_agent_signals() {
        let (store, _dir) = create_store().await;
        register(&store, "A1", AgentState::Active).await;
        let issue = SystemIssue::for_agent(
            IssueType::AgentUnresponsive,
            IssueSeverity::High,
            &id("A1"),
            "silent",
        );
        let exec = executor(&store, NoopAgentController::new());

        for action_type in [
            ActionType::RestartAgent,
            ActionType::ResetHeartbeat,
            ActionType::ClearCache,
        ] {
            let action = action_for(&issue, action_type);
            assert!(matches!(
                exec.execute(&action, &issue).await,
                Err(RecoveryError::Controller(_))
            ));
        }
        assert!(store
            .get_recent_heartbeats(Some(&id("A1")), 10)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn agent_actions_need_a_target() {
        let (store, _dir) = create_store().await;
        let issue = SystemIssue::new(
            IssueType::HeartbeatIrregular,
            IssueSeverity::Medium,
            "system",
            "no agent",
        );
        let action = action_for(&issue, ActionType::ResetHeartbeat);
        let err = executor(&store, NoopAgentController::new())
            .execute(&action, &issue)
            .await
            .unwrap_err();
        assert!(matches!(err, RecoveryError::MissingTarget(ActionType::ResetHeartbeat)));
    }

    #[tokio::test]
    async fn sync_reconciles_state_with_heartbeats() {
        let (store, _dir) = create_store().await;
        register(&store, "silent", AgentState::Active).await;
        register(&store, "back", AgentState::Inactive).await;
        register(&store, "fine", AgentState::Active).await;
        store.record_heartbeat(&Heartbeat::now(id("back"))).await.unwrap();
        store.record_heartbeat(&Heartbeat::now(id("fine"))).await.unwrap();

        let exec = executor(&store, NoopAgentController::new());
        assert_eq!(exec.sync_agent_states().await.unwrap(), 2);

        let state = |raw: &'static str| {
            let store = Arc::clone(&store);
            async move { store.get_agent(&id(raw)).await.unwrap().unwrap().state }
        };
        assert_eq!(state("silent").await, AgentState::Inactive);
        assert_eq!(state("back").await, AgentState::Active);
        assert_eq!(state("fine").await, AgentState::Active);
    }

    #[tokio::test]
    async fn tuning_is_rolled_back_to_snapshot() {
        let (store, _dir) = create_store().await;
        let exec = executor(&store, NoopAgentController::new());
        exec.subsystems()
            .register_parameter("llm_service", "max_tokens", 1000.0, 100.0);

        let issue = SystemIssue::new(
            IssueType::SubsystemFallback,
            IssueSeverity::High,
            "llm_service",
            "fallback storm",
        );
        let action = action_for(&issue, ActionType::TuneParameters);
        assert!(action.rollback_available);

        assert!(exec.execute(&action, &issue).await.unwrap());
        let tuned = exec.subsystems().snapshot("llm_service").unwrap();
        assert!((tuned.parameters["max_tokens"].value - 800.0).abs() < 1e-9);

        exec.rollback(&action, &issue).await.unwrap();
        let restored = exec.subsystems().snapshot("llm_service").unwrap();
        assert!((restored.parameters["max_tokens"].value - 1000.0).abs() < 1e-9);

        // second rollback is a no-op
        exec.rollback(&action, &issue).await.unwrap();
    }

    #[tokio::test]
    async fn subsystem_actions_fail_for_unknown_components() {
        let (store, _dir) = create_store().await;
        let exec = executor(&store, NoopAgentController::new());
        let issue = SystemIssue::new(
            IssueType::SubsystemFallback,
            IssueSeverity::High,
            "vector_index",
            "fallback storm",
        );
        let purge = action_for(&issue, ActionType::PurgeStateStore);
        assert!(matches!(
            exec.execute(&purge, &issue).await,
            Err(RecoveryError::UnknownSubsystem(_))
        ));
    }

    #[tokio::test]
    async fn reconnect_recovers_closed_store() {
        let (store, _dir) = create_store().await;
        store.close().await;
        let issue = SystemIssue::new(
            IssueType::DatabaseConnectivity,
            IssueSeverity::Critical,
            "database",
            "probe failed",
        );
        let action = action_for(&issue, ActionType::ReconnectDatabase);
        let exec = executor(&store, NoopAgentController::new());
        assert!(exec.execute(&action, &issue).await.unwrap());
        assert!(store.health_check().await.unwrap().is_healthy());
    }
}

//! Cycle runner.
//!
//! [`AgentRunner`] owns the loop around a [`MonitorAgent`]. It registers the
//! agent, wraps each cycle in a watchdog timeout and writes the per-cycle
//! metrics. Heartbeats go out on their own timer, so an agent with a long
//! work interval stays live between cycles. Shutdown is signalled through a
//! `tokio::sync::watch` channel.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use fleetwatch_analysis::metric_names;
use fleetwatch_core::Payload;
use fleetwatch_store::{AgentRegistration, AgentState, Heartbeat, PerformanceMetric, Store};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::agent::{CycleResult, MonitorAgent};
use crate::error::{AgentError, Result};

/// Metric recording the wall time of every cycle, in seconds.
pub const CYCLE_PROCESSING_TIME: &str = "cycle_processing_time";

/// Heartbeat interval used unless [`AgentRunner::with_heartbeat_interval`] is set.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Drives one agent.
pub struct AgentRunner<S: Store> {
    store: Arc<S>,
    agent: Arc<dyn MonitorAgent>,
    cycle_timeout: Duration,
    heartbeat_interval: Duration,
    cycles: AtomicU64,
    last_success: AtomicBool,
}

impl<S: Store> AgentRunner<S> {
    /// Create a runner.
    pub fn new(store: Arc<S>, agent: Arc<dyn MonitorAgent>, cycle_timeout: Duration) -> Self {
        Self {
            store,
            agent,
            cycle_timeout,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            cycles: AtomicU64::new(0),
            last_success: AtomicBool::new(true),
        }
    }

    /// Set how often [`AgentRunner::run`] heartbeats between cycles.
    #[must_use]
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    /// The driven agent.
    pub fn agent(&self) -> &Arc<dyn MonitorAgent> {
        &self.agent
    }

    /// Upsert the agent's registration as `active`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store rejects the registration.
    pub async fn register(&self) -> Result<()> {
        let agent = &self.agent;
        let metadata = Payload::new()
            .with("interval_secs", agent.interval().as_secs())
            .with("version", env!("CARGO_PKG_VERSION"));
        let registration =
            AgentRegistration::new(agent.id().clone(), agent.agent_type(), agent.name())
                .with_state(AgentState::Active)
                .with_metadata(metadata);

        self.store.register_agent(&registration).await?;
        tracing::info!(agent_id = %agent.id(), agent_type = agent.agent_type(), "Agent registered");
        Ok(())
    }

    /// Run one tick: heartbeat, the cycle under the watchdog, cycle metrics.
    ///
    /// Never fails; problems are reported in the returned [`CycleResult`].
    pub async fn tick(&self) -> CycleResult {
        self.heartbeat().await;

        let id = self.agent.id().clone();
        let started = Instant::now();
        let outcome = tokio::time::timeout(self.cycle_timeout, self.agent.run_cycle()).await;
        let elapsed = started.elapsed();

        let result = match outcome {
            Ok(Ok(output)) => CycleResult::completed(id, output, elapsed),
            Ok(Err(e)) => CycleResult::failed(id, e.to_string(), elapsed),
            Err(_) => CycleResult::failed(
                id,
                AgentError::Watchdog(self.cycle_timeout).to_string(),
                elapsed,
            ),
        };

        self.cycles.fetch_add(1, Ordering::Relaxed);
        self.last_success.store(result.success, Ordering::Relaxed);
        self.record_cycle(&result).await;

        if result.success {
            tracing::debug!(
                agent_id = %result.agent_id,
                items = result.items_processed,
                elapsed = ?elapsed,
                "Cycle completed"
            );
        } else {
            tracing::warn!(
                agent_id = %result.agent_id,
                error = result.error_details.as_deref().unwrap_or_default(),
                "Cycle failed"
            );
        }
        result
    }

    /// Loop until `shutdown` flips to `true` or its sender is dropped.
    ///
    /// A registration failure is retried on the next tick. Once registered,
    /// a separate task heartbeats every `heartbeat_interval` until shutdown,
    /// including while a cycle is running. On shutdown the agent is marked
    /// `inactive`.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>)
    where
        S: 'static,
    {
        let runner = Arc::new(self);
        let id = runner.agent.id().clone();
        let mut pulse: Option<JoinHandle<()>> = None;
        let mut ticker = tokio::time::interval(runner.agent.interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(
            agent_id = %id,
            interval = ?runner.agent.interval(),
            heartbeat_interval = ?runner.heartbeat_interval,
            "Agent loop started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if pulse.is_none() {
                        match runner.register().await {
                            Ok(()) => pulse = Some(tokio::spawn(Arc::clone(&runner).pulse())),
                            Err(e) => {
                                tracing::error!(agent_id = %id, error = %e, "Registration failed");
                                continue;
                            }
                        }
                    }
                    runner.tick().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        if let Some(pulse) = pulse {
            pulse.abort();
            if let Err(e) = pulse.await {
                if !e.is_cancelled() {
                    tracing::warn!(agent_id = %id, error = %e, "Heartbeat task failed");
                }
            }
            if let Err(e) = runner.store.update_agent_state(&id, AgentState::Inactive).await {
                tracing::warn!(agent_id = %id, error = %e, "Failed to mark agent inactive");
            }
        }
        tracing::info!(agent_id = %id, "Agent loop stopped");
    }

    /// Heartbeat forever on the heartbeat interval. The first beat comes one
    /// interval in, since every work tick beats on its own.
    async fn pulse(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.heartbeat_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            self.heartbeat().await;
        }
    }

    async fn heartbeat(&self) {
        let payload = Payload::new()
            .with("cycles", self.cycles.load(Ordering::Relaxed))
            .with("last_cycle_success", self.last_success.load(Ordering::Relaxed));
        let heartbeat = Heartbeat::now(self.agent.id().clone()).with_payload(payload);

        if let Err(e) = self.store.record_heartbeat(&heartbeat).await {
            tracing::warn!(agent_id = %self.agent.id(), error = %e, "Failed to record heartbeat");
        }
    }

    async fn record_cycle(&self, result: &CycleResult) {
        let id = &result.agent_id;
        let samples = [
            PerformanceMetric::new(
                CYCLE_PROCESSING_TIME,
                result.processing_time.as_secs_f64(),
                "seconds",
            ),
            PerformanceMetric::new(metric_names::BUSINESS_VALUE, result.business_value, "units"),
        ];

        for sample in samples {
            let sample = sample.for_agent(id.clone());
            if let Err(e) = self.store.record_metric(&sample).await {
                tracing::warn!(
                    agent_id = %id,
                    metric = %sample.metric_name,
                    error = %e,
                    "Failed to record cycle metric"
                );
            }
        }
    }
}

//! Pooled SQL persistence layer for fleetwatch.
//!
//! This crate owns every piece of durable state in the fleet: agents, their
//! heartbeats, performance metric samples and system events. It is the only
//! shared mutable resource between agents, and it exposes its own telemetry
//! through [`StoreMetrics`].
//!
//! # Schema
//!
//! - `agents`: one row per registered agent, keyed by `id`
//! - `agent_heartbeats`: append-only liveness reports
//! - `performance_metrics`: metric samples; `agent_id` is `NULL` for system-level samples
//! - `system_events`: notable occurrences; `ERROR`/`CRITICAL` rows survive retention
//! - `schema_version`: applied schema revision
//!
//! # Example
//!
//! ```no_run
//! use fleetwatch_core::AgentId;
//! use fleetwatch_store::{AgentRegistration, SqlStore, Store, StoreConfig};
//!
//! # async fn demo() -> fleetwatch_store::Result<()> {
//! let store = SqlStore::connect(StoreConfig::with_url("sqlite:///tmp/fleetwatch.db")).await?;
//! let id = AgentId::new("heartbeat-monitor").unwrap();
//! store
//!     .register_agent(&AgentRegistration::new(id, "heartbeat_monitor", "Heartbeat Monitor"))
//!     .await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod config;
pub mod error;
pub mod metrics;
pub mod schema;
pub mod sql;
pub mod types;

pub use config::StoreConfig;
pub use error::{Result, StoreError};
pub use metrics::{StoreCounters, StoreMetrics};
pub use sql::{SqlStore, TransactionMode};
pub use types::{
    Agent, AgentRegistration, AgentState, AgentStatus, CleanupReport, EventQuery, HealthStatus,
    Heartbeat, MetricQuery, NewEvent, PerformanceMetric, StoreHealth, SystemEvent,
};

use async_trait::async_trait;
use fleetwatch_core::{AgentId, EventSeverity};

/// The storage trait defining all database operations.
///
/// This trait abstracts the persistence layer so analysis, recovery and the
/// agents can be exercised against any implementation.
#[async_trait]
pub trait Store: Send + Sync {
    // =========================================================================
    // Agent Operations
    // =========================================================================

    /// Insert an agent or update the existing row with the same id.
    ///
    /// `created_at` is kept on update; `updated_at` is refreshed.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn register_agent(&self, registration: &AgentRegistration) -> Result<Agent>;

    /// Update an agent's lifecycle state.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::AgentNotFound` if the agent doesn't exist.
    async fn update_agent_state(&self, agent_id: &AgentId, state: AgentState) -> Result<()>;

    /// Get an agent by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn get_agent(&self, agent_id: &AgentId) -> Result<Option<Agent>>;

    /// Get an agent together with its latest heartbeat and its heartbeat
    /// count over the last five minutes.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn get_agent_status(&self, agent_id: &AgentId) -> Result<Option<AgentStatus>>;

    /// List agents, optionally restricted to one state.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn list_agents(&self, state: Option<AgentState>) -> Result<Vec<Agent>>;

    // =========================================================================
    // Heartbeat Operations
    // =========================================================================

    /// Append a heartbeat.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::AgentNotFound` if the agent isn't registered.
    async fn record_heartbeat(&self, heartbeat: &Heartbeat) -> Result<()>;

    /// Heartbeats within the last `window_minutes`, newest first.
    ///
    /// `None` returns heartbeats of every agent. A window of `0` is treated
    /// as one minute.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn get_recent_heartbeats(
        &self,
        agent_id: Option<&AgentId>,
        window_minutes: u32,
    ) -> Result<Vec<Heartbeat>>;

    // =========================================================================
    // Metric Operations
    // =========================================================================

    /// Append a metric sample and return its row id.
    ///
    /// A sample referencing an unregistered agent is stored as system-level.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn record_metric(&self, metric: &PerformanceMetric) -> Result<i64>;

    /// Metric samples matching the query, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn get_metrics(&self, query: &MetricQuery) -> Result<Vec<PerformanceMetric>>;

    // =========================================================================
    // Event Operations
    // =========================================================================

    /// Append an event and return its row id.
    ///
    /// An event referencing an unregistered agent is stored without agent.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn record_event(&self, event: &NewEvent) -> Result<i64>;

    /// Events matching the query, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn get_events(&self, query: &EventQuery) -> Result<Vec<SystemEvent>>;

    // =========================================================================
    // Maintenance
    // =========================================================================

    /// Probe the database and report pool diagnostics.
    ///
    /// A failed probe yields an `Unhealthy` report rather than an error.
    ///
    /// # Errors
    ///
    /// Implementations may fail if diagnostics cannot be assembled at all.
    async fn health_check(&self) -> Result<StoreHealth>;

    /// Delete heartbeats, metrics and non-error events older than
    /// `retention_days`, in one transaction. Resets the store counters.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction fails; nothing is deleted then.
    async fn cleanup_old_data(&self, retention_days: u32) -> Result<CleanupReport>;

    /// Close the pool and open a fresh one.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Init` if the new pool cannot be established.
    async fn reconnect(&self) -> Result<()>;

    /// Current store counters.
    fn counters(&self) -> StoreCounters;

    // =========================================================================
    // Collaborator aliases
    // =========================================================================

    /// All registered agents.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn get_registered_agents(&self) -> Result<Vec<Agent>> {
        self.list_agents(None).await
    }

    /// Metric samples for reporting layers.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn get_performance_metrics(
        &self,
        agent_id: Option<&AgentId>,
        metric_name: Option<&str>,
        window_hours: u32,
    ) -> Result<Vec<PerformanceMetric>> {
        let query = MetricQuery {
            agent_id: agent_id.cloned(),
            metric_name: metric_name.map(str::to_string),
            window_hours,
        };
        self.get_metrics(&query).await
    }

    /// Events for reporting layers.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn get_system_events(
        &self,
        event_type: Option<&str>,
        severity: Option<EventSeverity>,
        window_hours: u32,
    ) -> Result<Vec<SystemEvent>> {
        let query = EventQuery {
            event_type: event_type.map(str::to_string),
            agent_id: None,
            severity,
            window_hours,
        };
        self.get_events(&query).await
    }

    /// Entry point for external subsystems reporting an event.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn log_system_event(&self, event: NewEvent) -> Result<i64> {
        self.record_event(&event).await
    }

    /// Entry point for external subsystems reporting a metric.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn log_performance_metric(&self, metric: PerformanceMetric) -> Result<i64> {
        self.record_metric(&metric).await
    }
}

//! The agent abstraction shared by all orchestrating agents.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fleetwatch_core::AgentId;
use serde::Serialize;

use crate::error::Result;

/// Work reported by a successful cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct CycleOutput {
    /// Agents, samples or issues handled.
    pub items_processed: usize,
    /// Business value attributed to the cycle, in policy units.
    pub business_value: f64,
}

impl CycleOutput {
    /// Output with no business value.
    #[must_use]
    pub fn items(items_processed: usize) -> Self {
        Self {
            items_processed,
            business_value: 0.0,
        }
    }

    /// Attach a business value.
    #[must_use]
    pub fn with_value(mut self, business_value: f64) -> Self {
        self.business_value = business_value;
        self
    }
}

/// Uniform record of one work cycle, produced whether or not it succeeded.
#[derive(Debug, Clone, Serialize)]
pub struct CycleResult {
    /// Agent that ran the cycle.
    pub agent_id: AgentId,
    /// Whether the cycle completed without error.
    pub success: bool,
    /// Items handled; 0 on failure.
    pub items_processed: usize,
    /// Wall time of the cycle.
    pub processing_time: Duration,
    /// Business value attributed to the cycle; 0 on failure.
    pub business_value: f64,
    /// Failure description.
    pub error_details: Option<String>,
    /// When the cycle finished.
    pub completed_at: DateTime<Utc>,
}

impl CycleResult {
    /// A completed cycle.
    #[must_use]
    pub fn completed(agent_id: AgentId, output: CycleOutput, processing_time: Duration) -> Self {
        Self {
            agent_id,
            success: true,
            items_processed: output.items_processed,
            processing_time,
            business_value: output.business_value,
            error_details: None,
            completed_at: Utc::now(),
        }
    }

    /// A failed cycle.
    #[must_use]
    pub fn failed(agent_id: AgentId, error: impl Into<String>, processing_time: Duration) -> Self {
        Self {
            agent_id,
            success: false,
            items_processed: 0,
            processing_time,
            business_value: 0.0,
            error_details: Some(error.into()),
            completed_at: Utc::now(),
        }
    }
}

/// A timer-driven agent.
///
/// Implementations do the collect / analyze / act / report work of one cycle
/// and leave registration, heartbeats, metrics and the watchdog to
/// [`AgentRunner`](crate::runner::AgentRunner).
#[async_trait]
pub trait MonitorAgent: Send + Sync {
    /// Identifier the agent registers under.
    fn id(&self) -> &AgentId;

    /// Human-readable name.
    fn name(&self) -> &str;

    /// Agent type label stored with the registration.
    fn agent_type(&self) -> &'static str;

    /// Time between cycles.
    fn interval(&self) -> Duration;

    /// Run one work cycle.
    ///
    /// # Errors
    ///
    /// Returns an error if the cycle could not complete; the runner turns
    /// it into a failed [`CycleResult`].
    async fn run_cycle(&self) -> Result<CycleOutput>;
}

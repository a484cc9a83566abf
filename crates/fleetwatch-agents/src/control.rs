//! Control channel selection.

use async_trait::async_trait;
use fleetwatch_core::AgentId;
use fleetwatch_recovery::{AgentController, HttpAgentController, NoopAgentController};

use crate::error::Result;

/// The agent controller chosen at startup.
///
/// Without a control URL every signal goes to the no-op controller, which
/// logs and rejects it.
#[derive(Debug, Clone)]
pub enum ControlChannel {
    /// Signals posted to the agent control endpoint.
    Http(HttpAgentController),
    /// No control endpoint configured.
    Noop(NoopAgentController),
}

impl ControlChannel {
    /// Build the channel for an optional control URL.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn from_url(url: Option<&str>) -> Result<Self> {
        match url {
            Some(url) => {
                tracing::info!(controller_url = %url, "Agent control enabled");
                Ok(Self::Http(HttpAgentController::new(url)?))
            }
            None => {
                tracing::warn!("No AGENT_CONTROL_URL set - agent-level recovery actions will fail");
                Ok(Self::Noop(NoopAgentController::new()))
            }
        }
    }

    /// Returns true if signals reach a real endpoint.
    #[must_use]
    pub const fn is_connected(&self) -> bool {
        matches!(self, Self::Http(_))
    }
}

#[async_trait]
impl AgentController for ControlChannel {
    async fn restart_agent(&self, agent_id: &AgentId) -> fleetwatch_recovery::Result<()> {
        match self {
            Self::Http(c) => c.restart_agent(agent_id).await,
            Self::Noop(c) => c.restart_agent(agent_id).await,
        }
    }

    async fn clear_cache(&self, agent_id: &AgentId) -> fleetwatch_recovery::Result<()> {
        match self {
            Self::Http(c) => c.clear_cache(agent_id).await,
            Self::Noop(c) => c.clear_cache(agent_id).await,
        }
    }

    async fn reset_heartbeat(&self, agent_id: &AgentId) -> fleetwatch_recovery::Result<()> {
        match self {
            Self::Http(c) => c.reset_heartbeat(agent_id).await,
            Self::Noop(c) => c.reset_heartbeat(agent_id).await,
        }
    }
}

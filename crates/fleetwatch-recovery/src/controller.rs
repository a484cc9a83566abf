//! Agent control signals.
//!
//! Restart, cache-clear and heartbeat-reset actions need to reach the agent
//! process itself. [`AgentController`] abstracts that channel.

use std::time::Duration;

use async_trait::async_trait;
use fleetwatch_core::AgentId;
use serde::Deserialize;

use crate::error::{RecoveryError, Result};

/// Trait for sending control signals to agents.
///
/// This trait abstracts the control channel, allowing for mock
/// implementations in tests.
#[async_trait]
pub trait AgentController: Send + Sync {
    /// Ask the agent to restart.
    ///
    /// # Errors
    ///
    /// Returns an error if the signal could not be delivered.
    async fn restart_agent(&self, agent_id: &AgentId) -> Result<()>;

    /// Ask the agent to drop its cached state.
    ///
    /// # Errors
    ///
    /// Returns an error if the signal could not be delivered.
    async fn clear_cache(&self, agent_id: &AgentId) -> Result<()>;

    /// Ask the agent to restart its heartbeat loop.
    ///
    /// # Errors
    ///
    /// Returns an error if the signal could not be delivered.
    async fn reset_heartbeat(&self, agent_id: &AgentId) -> Result<()>;
}

/// HTTP controller posting to `{base_url}/v1/agents/{agent_id}/{signal}`.
#[derive(Debug, Clone)]
pub struct HttpAgentController {
    client: reqwest::Client,
    base_url: String,
}

/// Error response from the agent control endpoint.
#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: String,
}

impl HttpAgentController {
    /// Create a controller for the given base URL.
    ///
    /// # Errors
    ///
    /// Returns `RecoveryError::Controller` if the HTTP client cannot be built.
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| RecoveryError::Controller(format!("failed to create HTTP client: {e}")))?;

        Ok(Self::with_client(client, base_url))
    }

    /// Create a controller with a custom reqwest client.
    #[must_use]
    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Get the base URL of the control endpoint.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn signal(&self, agent_id: &AgentId, signal: &str) -> Result<()> {
        let url = format!("{}/v1/agents/{}/{signal}", self.base_url, agent_id);

        let response = self
            .client
            .post(&url)
            .send()
            .await
            .map_err(|e| RecoveryError::Controller(format!("{signal} request failed: {e}")))?;

        if response.status().is_success() {
            tracing::debug!(agent_id = %agent_id, signal, "Control signal delivered");
            return Ok(());
        }

        let status = response.status();
        let error = response
            .json::<ErrorResponse>()
            .await
            .map(|e| e.error)
            .unwrap_or_else(|_| format!("controller returned status {status}"));

        tracing::error!(
            agent_id = %agent_id,
            signal,
            status = %status,
            error = %error,
            "Control signal rejected"
        );
        Err(RecoveryError::Controller(error))
    }
}

#[async_trait]
impl AgentController for HttpAgentController {
    async fn restart_agent(&self, agent_id: &AgentId) -> Result<()> {
        self.signal(agent_id, "restart").await
    }

    async fn clear_cache(&self, agent_id: &AgentId) -> Result<()> {
        self.signal(agent_id, "cache/clear").await
    }

    async fn reset_heartbeat(&self, agent_id: &AgentId) -> Result<()> {
        self.signal(agent_id, "heartbeat/reset").await
    }
}

/// A no-op controller for when no control endpoint is configured.
///
/// Every signal is logged and fails with `RecoveryError::Controller`.
#[derive(Debug, Clone, Default)]
pub struct NoopAgentController;

impl NoopAgentController {
    /// Create a new no-op controller.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

fn not_configured() -> RecoveryError {
    RecoveryError::Controller("no controller configured".to_string())
}

#[async_trait]
impl AgentController for NoopAgentController {
    async fn restart_agent(&self, agent_id: &AgentId) -> Result<()> {
        tracing::warn!(
            agent_id = %agent_id,
            "NoopAgentController: restart_agent called but no controller configured"
        );
        Err(not_configured())
    }

    async fn clear_cache(&self, agent_id: &AgentId) -> Result<()> {
        tracing::warn!(
            agent_id = %agent_id,
            "NoopAgentController: clear_cache called but no controller configured"
        );
        Err(not_configured())
    }

    async fn reset_heartbeat(&self, agent_id: &AgentId) -> Result<()> {
        tracing::warn!(
            agent_id = %agent_id,
            "NoopAgentController: reset_heartbeat called but no controller configured"
        );
        Err(not_configured())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn agent() -> AgentId {
        AgentId::new("A1").unwrap()
    }

    #[test]
    fn base_url_is_normalized() {
        let controller = HttpAgentController::new("http://localhost:9000/").unwrap();
        assert_eq!(controller.base_url(), "http://localhost:9000");
    }

    #[tokio::test]
    async fn restart_posts_to_agent_endpoint() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/agents/A1/restart"))
            .respond_with(ResponseTemplate::new(202))
            .expect(1)
            .mount(&server)
            .await;

        let controller = HttpAgentController::new(server.uri()).unwrap();
        controller.restart_agent(&agent()).await.unwrap();
    }

    #[tokio::test]
    async fn rejection_carries_error_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/agents/A1/heartbeat/reset"))
            .respond_with(
                ResponseTemplate::new(409)
                    .set_body_json(serde_json::json!({ "error": "agent is stopping" })),
            )
            .mount(&server)
            .await;

        let controller = HttpAgentController::new(server.uri()).unwrap();
        let err = controller.reset_heartbeat(&agent()).await.unwrap_err();
        assert!(matches!(err, RecoveryError::Controller(msg) if msg == "agent is stopping"));
    }

    #[tokio::test]
    async fn rejection_without_body_reports_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/agents/A1/cache/clear"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let controller = HttpAgentController::new(server.uri()).unwrap();
        let err = controller.clear_cache(&agent()).await.unwrap_err();
        assert!(err.to_string().contains("500"));
    }

    #[tokio::test]
    async fn noop_controller_delivers_nothing() {
        let controller = NoopAgentController::new();
        let err = controller.restart_agent(&agent()).await.unwrap_err();
        assert_eq!(err.to_string(), "agent controller error: no controller configured");
        assert!(controller.clear_cache(&agent()).await.is_err());
        assert!(controller.reset_heartbeat(&agent()).await.is_err());
    }
}

//! Read-only status API.
//!
//! UI and reporting collaborators read agents, heartbeats, metrics and
//! events through these routes; nothing here writes to the store.

pub mod error;
pub mod handlers;

use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use fleetwatch_store::Store;

pub use error::ApiError;

/// Shared state for the status handlers.
pub struct ApiState<S: Store> {
    /// The store queried by every handler.
    pub store: Arc<S>,
}

impl<S: Store> ApiState<S> {
    /// Create a new API state.
    #[must_use]
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }
}

impl<S: Store> Clone for ApiState<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

/// Create the status router.
///
/// # Routes
///
/// - `GET /health` - Store diagnostics (503 when unhealthy)
/// - `GET /ready` - Readiness check
/// - `GET /v1/agents[?state=]` - List agents
/// - `GET /v1/agents/:agent_id` - Agent with its latest heartbeat
/// - `GET /v1/heartbeats[?agent_id=&window_minutes=]` - Recent heartbeats
/// - `GET /v1/metrics[?agent_id=&metric_name=&window_hours=]` - Metric samples
/// - `GET /v1/events[?event_type=&agent_id=&severity=&window_hours=]` - Events
pub fn create_router<S: Store + 'static>(state: ApiState<S>) -> Router {
    Router::new()
        .route("/health", get(handlers::health::<S>))
        .route("/ready", get(handlers::ready))
        .route("/v1/agents", get(handlers::list_agents::<S>))
        .route("/v1/agents/:agent_id", get(handlers::get_agent::<S>))
        .route("/v1/heartbeats", get(handlers::heartbeats::<S>))
        .route("/v1/metrics", get(handlers::metrics::<S>))
        .route("/v1/events", get(handlers::events::<S>))
        .with_state(state)
}

//! Read-only status handlers.

use std::str::FromStr;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use fleetwatch_core::{AgentId, EventSeverity};
use fleetwatch_store::{
    Agent, AgentState, AgentStatus, EventQuery, Heartbeat, MetricQuery, PerformanceMetric, Store,
    SystemEvent,
};
use serde::{Deserialize, Serialize};

use super::error::ApiError;
use super::ApiState;

// =============================================================================
// Query Parameters
// =============================================================================

/// Filter for `GET /v1/agents`.
#[derive(Debug, Deserialize)]
pub struct AgentsQuery {
    /// Restrict to one state.
    pub state: Option<String>,
}

/// Filter for `GET /v1/heartbeats`.
#[derive(Debug, Deserialize)]
pub struct HeartbeatsQuery {
    /// Restrict to one agent.
    pub agent_id: Option<String>,
    /// Look-back window (default: 5).
    #[serde(default = "default_heartbeat_window")]
    pub window_minutes: u32,
}

/// Filter for `GET /v1/metrics`.
#[derive(Debug, Deserialize)]
pub struct MetricsQuery {
    /// Restrict to one agent.
    pub agent_id: Option<String>,
    /// Restrict to one series.
    pub metric_name: Option<String>,
    /// Look-back window (default: 1).
    #[serde(default = "default_metric_window")]
    pub window_hours: u32,
}

/// Filter for `GET /v1/events`.
#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    /// Restrict to one event type.
    pub event_type: Option<String>,
    /// Restrict to one agent.
    pub agent_id: Option<String>,
    /// Restrict to one severity, case-insensitive.
    pub severity: Option<String>,
    /// Look-back window (default: 24).
    #[serde(default = "default_event_window")]
    pub window_hours: u32,
}

const fn default_heartbeat_window() -> u32 {
    5
}

const fn default_metric_window() -> u32 {
    1
}

const fn default_event_window() -> u32 {
    24
}

// =============================================================================
// Responses
// =============================================================================

/// Response for `GET /v1/agents`.
#[derive(Debug, Serialize)]
pub struct ListAgentsResponse {
    /// Registered agents.
    pub agents: Vec<Agent>,
}

/// Response for `GET /v1/heartbeats`.
#[derive(Debug, Serialize)]
pub struct HeartbeatsResponse {
    /// Heartbeats, newest first.
    pub heartbeats: Vec<Heartbeat>,
}

/// Response for `GET /v1/metrics`.
#[derive(Debug, Serialize)]
pub struct MetricsResponse {
    /// Samples, oldest first.
    pub metrics: Vec<PerformanceMetric>,
}

/// Response for `GET /v1/events`.
#[derive(Debug, Serialize)]
pub struct EventsResponse {
    /// Events, newest first.
    pub events: Vec<SystemEvent>,
}

// =============================================================================
// Handlers
// =============================================================================

/// `GET /health`: store diagnostics, 503 when unhealthy.
pub async fn health<S: Store>(State(state): State<ApiState<S>>) -> Result<impl IntoResponse, ApiError> {
    let health = state.store.health_check().await?;
    let status = if health.is_healthy() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    Ok((status, Json(health)))
}

/// `GET /ready`.
pub async fn ready() -> impl IntoResponse {
    (StatusCode::OK, "ready")
}

/// `GET /v1/agents`
pub async fn list_agents<S: Store>(
    State(state): State<ApiState<S>>,
    Query(query): Query<AgentsQuery>,
) -> Result<Json<ListAgentsResponse>, ApiError> {
    let filter = query
        .state
        .as_deref()
        .map(AgentState::from_str)
        .transpose()
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let agents = state.store.list_agents(filter).await?;
    Ok(Json(ListAgentsResponse { agents }))
}

/// `GET /v1/agents/:agent_id`
pub async fn get_agent<S: Store>(
    State(state): State<ApiState<S>>,
    Path(agent_id): Path<String>,
) -> Result<Json<AgentStatus>, ApiError> {
    let agent_id = parse_agent_id(&agent_id)?;
    state
        .store
        .get_agent_status(&agent_id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("agent {agent_id}")))
}

/// `GET /v1/heartbeats`
pub async fn heartbeats<S: Store>(
    State(state): State<ApiState<S>>,
    Query(query): Query<HeartbeatsQuery>,
) -> Result<Json<HeartbeatsResponse>, ApiError> {
    let agent_id = query.agent_id.as_deref().map(parse_agent_id).transpose()?;
    let heartbeats = state
        .store
        .get_recent_heartbeats(agent_id.as_ref(), query.window_minutes)
        .await?;
    Ok(Json(HeartbeatsResponse { heartbeats }))
}

/// `GET /v1/metrics`
pub async fn metrics<S: Store>(
    State(state): State<ApiState<S>>,
    Query(query): Query<MetricsQuery>,
) -> Result<Json<MetricsResponse>, ApiError> {
    let metric_query = MetricQuery {
        agent_id: query.agent_id.as_deref().map(parse_agent_id).transpose()?,
        metric_name: query.metric_name,
        window_hours: query.window_hours,
    };
    let metrics = state.store.get_metrics(&metric_query).await?;
    Ok(Json(MetricsResponse { metrics }))
}

/// `GET /v1/events`
pub async fn events<S: Store>(
    State(state): State<ApiState<S>>,
    Query(query): Query<EventsQuery>,
) -> Result<Json<EventsResponse>, ApiError> {
    let event_query = EventQuery {
        event_type: query.event_type,
        agent_id: query.agent_id.as_deref().map(parse_agent_id).transpose()?,
        severity: query
            .severity
            .as_deref()
            .map(EventSeverity::from_str)
            .transpose()
            .map_err(|e| ApiError::BadRequest(e.to_string()))?,
        window_hours: query.window_hours,
    };
    let events = state.store.get_events(&event_query).await?;
    Ok(Json(EventsResponse { events }))
}

fn parse_agent_id(raw: &str) -> Result<AgentId, ApiError> {
    AgentId::new(raw).map_err(|e| ApiError::BadRequest(format!("invalid agent id: {e}")))
}

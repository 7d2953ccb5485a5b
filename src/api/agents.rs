//! Agent lifecycle endpoints
//!
//! POST /agent/register   - register (optionally with a preferred id)
//! POST /agent/heartbeat  - record liveness
//! POST /agent/unregister - release claim and remove the agent

use super::{ApiError, ApiState};
use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use phalanx_core::protocol::{AgentRequest, RegisterRequest, RegisterResponse};
use tracing::info;

/// Register a new agent; the response carries the orchestrator config
/// snapshot so the runtime needs no separate config file.
pub async fn register(
    State(state): State<ApiState>,
    Json(request): Json<RegisterRequest>,
) -> Result<Json<RegisterResponse>, ApiError> {
    let record = state
        .coordinator
        .register(request.capabilities, request.preferred_id)
        .await?;
    info!(agent_id = %record.agent_id, "agent registered via API");
    Ok(Json(RegisterResponse {
        agent_id: record.agent_id,
        config: state.coordinator.config().clone(),
    }))
}

/// Record an agent heartbeat.
pub async fn heartbeat(
    State(state): State<ApiState>,
    Json(request): Json<AgentRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.coordinator.heartbeat(&request.agent_id).await?;
    Ok(Json(serde_json::json!({ "success": true })))
}

/// Unregister an agent, releasing any held claim.
pub async fn unregister(
    State(state): State<ApiState>,
    Json(request): Json<AgentRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.coordinator.unregister(&request.agent_id).await?;
    Ok(Json(serde_json::json!({ "success": true })))
}

/// Agent routes.
pub fn routes() -> Router<ApiState> {
    Router::new()
        .route("/agent/register", post(register))
        .route("/agent/heartbeat", post(heartbeat))
        .route("/agent/unregister", post(unregister))
}

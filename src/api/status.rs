//! Status and maintenance endpoints
//!
//! GET  /status  - phases, tasks, agents and computed counters
//! POST /cleanup - manual reaper sweep, returns the number of reset tasks

use super::{ApiError, ApiState};
use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use phalanx_core::protocol::{CleanupResponse, StatusResponse};
use tracing::info;

/// Full orchestrator status.
pub async fn status(State(state): State<ApiState>) -> Result<Json<StatusResponse>, ApiError> {
    Ok(Json(state.coordinator.status().await?))
}

/// Manual cleanup: sweep dead agents and reset their tasks.
pub async fn cleanup(State(state): State<ApiState>) -> Result<Json<CleanupResponse>, ApiError> {
    info!("manual cleanup requested via API");
    let recovered = state.reaper.sweep().await?;
    Ok(Json(CleanupResponse { recovered }))
}

/// Status routes.
pub fn routes() -> Router<ApiState> {
    Router::new()
        .route("/status", get(status))
        .route("/cleanup", post(cleanup))
}

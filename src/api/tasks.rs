//! Task endpoints
//!
//! POST /task/claim    - atomically claim the next available task
//! POST /task/complete - signal success or failure
//! GET  /task/:id      - fetch one task record

use super::{ApiError, ApiState};
use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use phalanx_core::protocol::{ClaimRequest, ClaimResponse, CompleteRequest, CompleteResponse};
use phalanx_core::task::Task;
use phalanx_core::ClaimOutcome;

/// Claim the next available task in the active phase.
pub async fn claim(
    State(state): State<ApiState>,
    Json(request): Json<ClaimRequest>,
) -> Result<Json<ClaimResponse>, ApiError> {
    let outcome = state.coordinator.claim(&request.agent_id).await?;
    let response = match outcome {
        ClaimOutcome::Claimed { task, role } => ClaimResponse {
            task: Some(task),
            role: Some(role),
            reason: None,
            phase: None,
        },
        ClaimOutcome::NoTasks { phase, reason } => ClaimResponse {
            task: None,
            role: None,
            reason: Some(reason.to_string()),
            phase,
        },
    };
    Ok(Json(response))
}

/// Complete a task; success enqueues a merge request.
pub async fn complete(
    State(state): State<ApiState>,
    Json(request): Json<CompleteRequest>,
) -> Result<Json<CompleteResponse>, ApiError> {
    let queue_position = state
        .coordinator
        .complete(
            &request.agent_id,
            &request.task_id,
            request.success,
            request.branch_name,
            request.pr_handle,
        )
        .await?;
    Ok(Json(CompleteResponse {
        success: true,
        queue_position,
    }))
}

/// Fetch one task record.
pub async fn get_task(
    State(state): State<ApiState>,
    Path(task_id): Path<String>,
) -> Result<Json<Task>, ApiError> {
    Ok(Json(state.coordinator.get_task(&task_id).await?))
}

/// Task routes.
pub fn routes() -> Router<ApiState> {
    Router::new()
        .route("/task/claim", post(claim))
        .route("/task/complete", post(complete))
        .route("/task/:id", get(get_task))
}

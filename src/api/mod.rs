//! HTTP API for the coordinator service
//!
//! Endpoints:
//! - `POST /agent/register` — register an agent
//! - `POST /agent/heartbeat` — record liveness
//! - `POST /agent/unregister` — release and remove an agent
//! - `POST /task/claim` — claim the next available task
//! - `POST /task/complete` — signal task completion
//! - `GET  /task/:id` — fetch one task
//! - `GET  /status` — phases, tasks, agents, queue depth
//! - `POST /cleanup` — manual reaper sweep
//! - `GET  /health` — liveness / store probe
//!
//! Status codes: 200 success, 404 unknown agent/task, 409 lock or claim
//! conflict, 422 precondition violation, 503 transient state-store failure.

pub mod agents;
pub mod health;
pub mod status;
pub mod tasks;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::Router;
use phalanx_core::error::CoordinatorError;
use phalanx_core::protocol::ErrorBody;
use phalanx_core::{Coordinator, Reaper, StateStore};
use std::sync::Arc;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    /// Coordinator operations
    pub coordinator: Arc<Coordinator>,
    /// Reaper (manual cleanup endpoint)
    pub reaper: Arc<Reaper>,
    /// Store handle (health probe)
    pub store: Arc<dyn StateStore>,
}

/// Error wrapper mapping coordinator errors to HTTP status codes.
pub struct ApiError(CoordinatorError);

impl From<CoordinatorError> for ApiError {
    fn from(err: CoordinatorError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            CoordinatorError::UnknownAgent(_) | CoordinatorError::UnknownTask(_) => {
                StatusCode::NOT_FOUND
            }
            CoordinatorError::AgentIdTaken(_)
            | CoordinatorError::LockNotHeld { .. }
            | CoordinatorError::WrongAgent { .. }
            | CoordinatorError::InvalidTransition { .. } => StatusCode::CONFLICT,
            CoordinatorError::MissingBranch(_) => StatusCode::UNPROCESSABLE_ENTITY,
            CoordinatorError::Store(e) if e.is_transient() => StatusCode::SERVICE_UNAVAILABLE,
            CoordinatorError::Store(_) | CoordinatorError::Serialization(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        let body = Json(ErrorBody {
            error: self.0.to_string(),
        });
        (status, body).into_response()
    }
}

/// Build the full API router.
pub fn api_router(state: ApiState) -> Router {
    Router::new()
        .merge(agents::routes())
        .merge(tasks::routes())
        .merge(status::routes())
        .merge(health::routes())
        .with_state(state)
}

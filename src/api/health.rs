//! Health check endpoints
//!
//! GET /health - overall status with a state-store probe

use super::ApiState;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::get;
use axum::Router;
use serde::Serialize;

/// Health response with a store probe.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// `healthy` or `unhealthy`
    pub status: &'static str,
    /// Crate version
    pub version: &'static str,
    /// State store connectivity
    pub store: &'static str,
    /// Probe error, when unhealthy
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Liveness probe: healthy iff the state store responds.
pub async fn health(State(state): State<ApiState>) -> (StatusCode, Json<HealthResponse>) {
    match state.store.ping().await {
        Ok(()) => (
            StatusCode::OK,
            Json(HealthResponse {
                status: "healthy",
                version: env!("CARGO_PKG_VERSION"),
                store: "connected",
                error: None,
            }),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(HealthResponse {
                status: "unhealthy",
                version: env!("CARGO_PKG_VERSION"),
                store: "disconnected",
                error: Some(e.to_string()),
            }),
        ),
    }
}

/// Health routes.
pub fn routes() -> Router<ApiState> {
    Router::new().route("/health", get(health))
}

//! HTTP API handlers.
//!
//! # Endpoints
//!
//! - `POST /api/space/process`            – inbound webhook deliveries
//! - `POST /api/builds/status`            – build progress from the engine
//! - `GET  /api/triggers/health`          – last reconciliation per trigger
//! - `POST /api/triggers/{id}/reconcile`  – queue a resync of one trigger
//! - `POST /api/sources/{id}/index`       – run head discovery for a source

mod builds;
mod inbound;
mod sources;
mod triggers;

use axum::{
    Json, Router,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde_json::json;
use spacehook_core::config::WebhookEndpoint;

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route(WebhookEndpoint::PATH, post(inbound::process))
        .route("/api/builds/status", post(builds::report_status))
        .route("/api/triggers/health", get(triggers::health))
        .route("/api/triggers/{id}/reconcile", post(triggers::reconcile))
        .route("/api/sources/{id}/index", post(sources::index))
}

/// Errors of the operational endpoints.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0} not found")]
    NotFound(String),
    #[error("remote call failed: {0}")]
    Upstream(String),
    #[error("service is shutting down")]
    Unavailable,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Upstream(e) => {
                tracing::warn!(error = %e, "Operational request failed upstream");
                StatusCode::BAD_GATEWAY
            }
            ApiError::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

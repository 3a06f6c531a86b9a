//! Build status reports from the build engine.

use axum::{Json, extract::State, http::StatusCode};
use spacehook_core::processors::{BuildReport, ReportError};

use super::ApiError;
use crate::state::AppState;

/// `POST /api/builds/status`: publish a build's progress as a commit check.
pub async fn report_status(
    State(state): State<AppState>,
    Json(report): Json<BuildReport>,
) -> Result<StatusCode, ApiError> {
    state.reporter.report(&report).await.map_err(|e| match e {
        ReportError::UnknownConnection(id) => ApiError::NotFound(format!("connection {id}")),
        ReportError::Remote(e) => ApiError::Upstream(e.to_string()),
    })?;
    Ok(StatusCode::NO_CONTENT)
}

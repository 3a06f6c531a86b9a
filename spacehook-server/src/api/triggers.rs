//! Trigger health and manual resync.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use spacehook_core::events::ReconcileRequest;
use spacehook_core::store::{JobConfigStore, TriggerHealth};

use super::ApiError;
use crate::state::AppState;

/// `GET /api/triggers/health`
pub async fn health(State(state): State<AppState>) -> Json<Vec<TriggerHealth>> {
    let mut health = state.store.health().await;
    health.sort_by(|a, b| a.owner.cmp(&b.owner).then_with(|| a.owner_id.cmp(&b.owner_id)));
    Json(health)
}

/// `POST /api/triggers/{id}/reconcile`
pub async fn reconcile(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    if state.store.snapshot().await.find_trigger(&id).is_none() {
        return Err(ApiError::NotFound(format!("trigger {id}")));
    }
    state
        .reconcile_tx
        .send(ReconcileRequest::Trigger(id))
        .await
        .map_err(|_| ApiError::Unavailable)?;
    Ok(StatusCode::ACCEPTED)
}

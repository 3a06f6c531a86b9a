//! On-demand head discovery for multibranch sources.

use axum::{
    Json,
    extract::{Path, Query, State},
};
use serde::{Deserialize, Serialize};
use spacehook_core::entities::{Head, Revision};
use spacehook_core::processors::{
    CollectingObserver, DiscoveryError, DiscoveryReport, HeadCriteria, RequiredFile,
};
use spacehook_core::store::JobConfigStore;

use super::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct IndexQuery {
    /// Only heads containing this file are reported.
    pub required_file: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ObservedHead {
    pub head: Head,
    pub revision: Revision,
}

#[derive(Debug, Serialize)]
pub struct IndexResponse {
    #[serde(flatten)]
    pub report: DiscoveryReport,
    pub heads: Vec<ObservedHead>,
}

/// `POST /api/sources/{id}/index`
pub async fn index(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<IndexQuery>,
) -> Result<Json<IndexResponse>, ApiError> {
    let snapshot = state.store.snapshot().await;
    let source = snapshot
        .source(&id)
        .ok_or_else(|| ApiError::NotFound(format!("source {id}")))?;

    let criteria = query.required_file.map(RequiredFile);
    let mut observer = CollectingObserver::new();
    let report = state
        .discovery
        .retrieve(
            source,
            criteria.as_ref().map(|c| c as &dyn HeadCriteria),
            &mut observer,
            None,
        )
        .await
        .map_err(|e| match e {
            DiscoveryError::UnknownConnection(c) => ApiError::NotFound(format!("connection {c}")),
            other => ApiError::Upstream(other.to_string()),
        })?;

    Ok(Json(IndexResponse {
        report,
        heads: observer
            .observed
            .into_iter()
            .map(|(head, revision)| ObservedHead { head, revision })
            .collect(),
    }))
}

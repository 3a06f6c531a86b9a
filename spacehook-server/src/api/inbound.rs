//! Inbound webhook endpoint.

use axum::{
    Json,
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
};
use kanau::processor::Processor;
use spacehook_core::events::InboundEvent;

use crate::state::AppState;

/// `POST /api/space/process`: hand the raw delivery to the dispatcher.
///
/// The dispatcher never fails; its status code is passed through so that
/// unmatched deliveries are acknowledged and not retried by the remote side.
pub async fn process(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let response = match state
        .dispatcher
        .process(InboundEvent {
            content_type,
            body: body.to_vec(),
        })
        .await
    {
        Ok(response) => response,
        Err(never) => match never {},
    };

    let status =
        StatusCode::from_u16(response.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    match response.body {
        Some(body) => (status, Json(body)).into_response(),
        None => status.into_response(),
    }
}

//! Router assembly and the serve loop.

use std::net::SocketAddr;

use axum::{Json, Router, extract::State, routing::get};
use serde::Serialize;
use spacehook_core::store::JobConfigStore;
use tokio::net::TcpListener;

use crate::api;
use crate::shutdown::shutdown_signal;
use crate::state::AppState;

/// Health probe plus every API route, bound to `state`.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .merge(api::router())
        .with_state(state)
}

#[derive(Serialize)]
struct Health {
    status: &'static str,
    version: &'static str,
    jobs: usize,
    sources: usize,
}

/// Liveness, with the size of the configuration currently served.
async fn health(State(state): State<AppState>) -> Json<Health> {
    let snapshot = state.store.snapshot().await;
    Json(Health {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        jobs: snapshot.jobs.len(),
        sources: snapshot.sources.len(),
    })
}

/// Bind `addr` and serve until SIGTERM or SIGINT.
pub async fn run_server(router: Router, addr: SocketAddr) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, "Listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    tracing::info!("HTTP server stopped");
    Ok(())
}

//! Signal handling for graceful shutdown and config reload.

use std::collections::BTreeSet;
use std::sync::Arc;

use spacehook_core::store::InMemoryJobStore;
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::Notify;

use crate::config::ConfigLoader;

/// Creates a future that completes when a shutdown signal is received.
///
/// Listens for SIGTERM and SIGINT (Ctrl+C).
pub async fn shutdown_signal() {
    let (mut sigterm, mut sigint) = match (
        signal(SignalKind::terminate()),
        signal(SignalKind::interrupt()),
    ) {
        (Ok(term), Ok(int)) => (term, int),
        (Err(e), _) | (_, Err(e)) => {
            tracing::error!(error = %e, "Failed to install signal handlers, falling back to Ctrl+C");
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for Ctrl+C");
                std::future::pending::<()>().await;
            }
            return;
        }
    };

    tokio::select! {
        _ = sigterm.recv() => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown");
        }
        _ = sigint.recv() => {
            tracing::info!("Received SIGINT, initiating graceful shutdown");
        }
    }
}

/// Spawns a task that listens for SIGHUP and reloads jobs and sources.
///
/// Connections are fixed for the lifetime of the process; a reload that
/// changes them only logs a warning. Returns a Notify that stops the task.
pub fn spawn_config_reload_handler(
    store: Arc<InMemoryJobStore>,
    config_loader: Arc<ConfigLoader>,
    connection_ids: BTreeSet<String>,
) -> Arc<Notify> {
    let shutdown_notify = Arc::new(Notify::new());
    let shutdown_notify_clone = shutdown_notify.clone();

    tokio::spawn(async move {
        let mut sighup = match signal(SignalKind::hangup()) {
            Ok(sighup) => sighup,
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGHUP handler, reload disabled");
                return;
            }
        };

        loop {
            tokio::select! {
                _ = sighup.recv() => {
                    tracing::info!("Received SIGHUP, reloading configuration");
                    match config_loader.reload() {
                        Ok(loaded) => {
                            let reloaded: BTreeSet<String> = loaded
                                .connections
                                .iter()
                                .map(|c| c.config.id.clone())
                                .collect();
                            if reloaded != connection_ids {
                                tracing::warn!("Connection changes take effect after a restart");
                            }
                            let jobs = loaded.jobs.len();
                            let sources = loaded.sources.len();
                            store.replace(loaded.jobs, loaded.sources).await;
                            tracing::info!(jobs, sources, "Configuration reloaded successfully");
                        }
                        Err(e) => {
                            tracing::error!(error = %e, "Failed to reload configuration");
                        }
                    }
                }
                _ = shutdown_notify_clone.notified() => {
                    tracing::debug!("Config reload handler shutting down");
                    break;
                }
            }
        }
    });

    shutdown_notify
}

//! Spacehook Server
//!
//! Keeps webhook subscriptions on the code-hosting service in sync with the
//! configured jobs and turns inbound deliveries into scheduled builds.

mod api;
mod config;
mod scheduler;
mod server;
mod shutdown;
mod state;

use std::collections::BTreeSet;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use config::{ConfigLoader, ConnectionSettings};
use scheduler::{HttpBuildScheduler, LoggingScheduler};
use server::{build_router, run_server};
use shutdown::spawn_config_reload_handler;
use spacehook_core::config::{Connection, ConnectionRegistry};
use spacehook_core::events::reconcile_request_channel;
use spacehook_core::processors::{
    BuildStatusReporter, Dispatcher, HeadDiscoveryEngine, ReconcileWorker, SubscriptionReconciler,
};
use spacehook_core::remote::RemoteApi;
use spacehook_core::scheduler::BuildScheduler;
use spacehook_core::store::InMemoryJobStore;
use spacehook_sdk::client::SpaceClient;
use state::AppState;
use tokio::sync::watch;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Spacehook - webhook-driven build triggers for the code-hosting service
#[derive(Parser, Debug)]
#[command(name = "spacehook-server")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long, env = "SPACEHOOK_CONFIG", default_value = "./spacehook.toml")]
    config: PathBuf,

    /// Override the listen address (e.g., 0.0.0.0:3000)
    #[arg(short, long)]
    listen: Option<SocketAddr>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let args = Args::parse();

    tracing::info!("Starting spacehook-server v{}", env!("CARGO_PKG_VERSION"));

    let config_loader = Arc::new(ConfigLoader::new(&args.config, args.listen));
    let loaded = config_loader.load().map_err(|e| {
        tracing::error!("Failed to load configuration: {}", e);
        e
    })?;
    tracing::info!("Configuration loaded from {:?}", args.config);

    let timeouts = loaded.server.timeouts;
    let connection_ids: BTreeSet<String> =
        loaded.connections.iter().map(|c| c.config.id.clone()).collect();
    let connections = Arc::new(build_registry(loaded.connections, timeouts.remote_call)?);
    tracing::info!(connections = connections.len(), "Connections configured");

    let store = Arc::new(InMemoryJobStore::new(loaded.jobs, loaded.sources));

    let scheduler: Arc<dyn BuildScheduler> = match loaded.scheduler {
        Some(settings) => {
            tracing::info!(url = %settings.url, "Scheduling builds through the build engine");
            Arc::new(HttpBuildScheduler::new(
                settings.url,
                settings.token,
                timeouts.remote_call,
            )?)
        }
        None => {
            tracing::warn!("No [scheduler] configured, builds are only logged");
            Arc::new(LoggingScheduler)
        }
    };

    let (reconcile_tx, reconcile_rx) = reconcile_request_channel();
    let reconciler = Arc::new(SubscriptionReconciler::new(
        connections.clone(),
        store.clone(),
        loaded.server.endpoint.clone(),
        timeouts.remote_call,
    ));
    let dispatcher = Arc::new(
        Dispatcher::new(
            connections.clone(),
            store.clone(),
            scheduler,
            timeouts.remote_call,
            timeouts.dispatch,
        )
        .with_reconcile_requests(reconcile_tx.clone()),
    );
    let discovery = Arc::new(
        HeadDiscoveryEngine::new(connections.clone(), timeouts.remote_call)
            .with_reconciler(reconciler.clone()),
    );
    let reporter = Arc::new(BuildStatusReporter::new(connections, timeouts.remote_call));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker = tokio::spawn(ReconcileWorker::new(reconciler).run(
        shutdown_rx,
        reconcile_rx,
        store.subscribe(),
    ));

    let reload_notify =
        spawn_config_reload_handler(store.clone(), config_loader, connection_ids);

    let state = AppState {
        store,
        dispatcher,
        discovery,
        reporter,
        reconcile_tx,
    };
    let router = build_router(state);

    tracing::info!(
        "Starting HTTP server on {}, webhook endpoint {}",
        loaded.server.listen,
        loaded.server.endpoint.url
    );
    let result = run_server(router, loaded.server.listen).await;

    reload_notify.notify_one();
    let _ = shutdown_tx.send(true);
    if let Err(e) = worker.await {
        tracing::error!(error = %e, "Reconcile worker panicked");
    }
    tracing::info!("Server shutdown complete");

    result.map_err(Into::into)
}

/// Build one API client per configured connection.
fn build_registry(
    connections: Vec<ConnectionSettings>,
    call_timeout: Duration,
) -> anyhow::Result<ConnectionRegistry> {
    let mut built = Vec::with_capacity(connections.len());
    for settings in connections {
        let client = SpaceClient::new(settings.base_url, settings.token, call_timeout)?
            .with_max_retries(settings.max_retries);
        let remote: Arc<dyn RemoteApi> = Arc::new(client);
        built.push(Connection {
            config: settings.config,
            remote,
        });
    }
    Ok(ConnectionRegistry::new(built))
}

/// Initialize the tracing subscriber with environment-based filtering.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,reqwest=warn,tower_http=debug"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

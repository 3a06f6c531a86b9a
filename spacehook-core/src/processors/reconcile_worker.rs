//! ReconcileWorker processor.
//!
//! Drives the [`SubscriptionReconciler`]:
//! - bootstraps with a full reconciliation of every connection
//! - re-runs it whenever the job configuration changes
//! - serves [`ReconcileRequest`]s sent by the dispatcher and the API
//!
//! Identical requests are coalesced: a request arriving while the same one
//! is in flight is re-run once after it completes.

use std::collections::HashSet;
use std::sync::Arc;

use kanau::processor::Processor;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use super::reconciler::{ReconcileError, SubscriptionReconciler};
use crate::config::ConfigWatcher;
use crate::events::{ReconcileRequest, ReconcileRequestReceiver};

type PassResult = (ReconcileRequest, Result<(), ReconcileError>);

pub struct ReconcileWorker {
    reconciler: Arc<SubscriptionReconciler>,
}

impl ReconcileWorker {
    pub fn new(reconciler: Arc<SubscriptionReconciler>) -> Self {
        Self { reconciler }
    }

    /// Run until shutdown is signaled, then wait for in-flight passes.
    pub async fn run(
        self,
        mut shutdown_rx: watch::Receiver<bool>,
        mut request_rx: ReconcileRequestReceiver,
        mut config_watcher: ConfigWatcher,
    ) {
        let mut tasks: JoinSet<PassResult> = JoinSet::new();
        let mut in_flight: HashSet<ReconcileRequest> = HashSet::new();
        let mut rerun: HashSet<ReconcileRequest> = HashSet::new();

        info!("ReconcileWorker started");
        self.submit(ReconcileRequest::All, &mut tasks, &mut in_flight, &mut rerun);

        loop {
            tokio::select! {
                biased;

                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        info!("ReconcileWorker received shutdown signal");
                        break;
                    }
                }

                Ok(()) = config_watcher.changed() => {
                    debug!("Job configuration changed, reconciling everything");
                    self.submit(ReconcileRequest::All, &mut tasks, &mut in_flight, &mut rerun);
                }

                Some(request) = request_rx.recv() => {
                    self.submit(request, &mut tasks, &mut in_flight, &mut rerun);
                }

                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Some(request) = self.finish(joined, &mut in_flight) {
                        if rerun.remove(&request) {
                            self.submit(request, &mut tasks, &mut in_flight, &mut rerun);
                        }
                    }
                }
            }
        }

        if !tasks.is_empty() {
            info!(pending = tasks.len(), "Waiting for in-flight reconciliations");
        }
        while let Some(joined) = tasks.join_next().await {
            self.finish(joined, &mut in_flight);
        }
        info!("ReconcileWorker stopped");
    }

    fn submit(
        &self,
        request: ReconcileRequest,
        tasks: &mut JoinSet<PassResult>,
        in_flight: &mut HashSet<ReconcileRequest>,
        rerun: &mut HashSet<ReconcileRequest>,
    ) {
        if in_flight.contains(&request) {
            debug!(%request, "Reconciliation already running, queued a rerun");
            rerun.insert(request);
            return;
        }
        in_flight.insert(request.clone());
        let reconciler = self.reconciler.clone();
        tasks.spawn(async move {
            let result = reconciler.process(request.clone()).await;
            (request, result)
        });
    }

    /// Log a finished pass; returns its request unless the task panicked.
    fn finish(
        &self,
        joined: Result<PassResult, tokio::task::JoinError>,
        in_flight: &mut HashSet<ReconcileRequest>,
    ) -> Option<ReconcileRequest> {
        match joined {
            Ok((request, result)) => {
                in_flight.remove(&request);
                match result {
                    Ok(()) => debug!(%request, "Reconciliation finished"),
                    Err(e) if e.is_configuration() => {
                        warn!(%request, error = %e, "Reconciliation needs a configuration fix")
                    }
                    Err(e) => error!(%request, error = %e, "Reconciliation failed"),
                }
                Some(request)
            }
            Err(e) => {
                // The request is unknown here; clear everything so nothing stays stuck.
                error!(error = %e, "Reconciliation task panicked");
                in_flight.clear();
                None
            }
        }
    }
}

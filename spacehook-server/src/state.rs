//! Application state shared across all request handlers.

use std::sync::Arc;

use spacehook_core::events::ReconcileRequestSender;
use spacehook_core::processors::{BuildStatusReporter, Dispatcher, HeadDiscoveryEngine};
use spacehook_core::store::InMemoryJobStore;

/// Application state that is shared across all request handlers.
///
/// This is cloneable and cheap to pass around (everything is behind Arc).
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<InMemoryJobStore>,
    pub dispatcher: Arc<Dispatcher>,
    pub discovery: Arc<HeadDiscoveryEngine>,
    pub reporter: Arc<BuildStatusReporter>,
    /// Resync requests for the reconcile worker.
    pub reconcile_tx: ReconcileRequestSender,
}

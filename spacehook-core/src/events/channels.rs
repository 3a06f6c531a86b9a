//! Channel factories.

use super::types::ReconcileRequest;
use tokio::sync::mpsc;

/// Default buffer size for event channels.
pub const DEFAULT_CHANNEL_BUFFER: usize = 256;

pub type ReconcileRequestSender = mpsc::Sender<ReconcileRequest>;
pub type ReconcileRequestReceiver = mpsc::Receiver<ReconcileRequest>;

/// Create the channel feeding the reconcile worker.
///
/// Clone the sender for every component that may ask for a resync.
pub fn reconcile_request_channel() -> (ReconcileRequestSender, ReconcileRequestReceiver) {
    mpsc::channel(DEFAULT_CHANNEL_BUFFER)
}

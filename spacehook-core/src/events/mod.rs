//! Events flowing between the server and the processors.
//!
//! # Event Flow
//!
//! 1. Config reload / startup -> `ReconcileWorker` (via `ConfigWatcher`)
//! 2. `Dispatcher` emits `ReconcileRequest` -> `ReconcileWorker` when a
//!    delivery shows the remote state drifted
//! 3. Operational endpoints emit `ReconcileRequest` on demand
//!
//! Requests carry identifiers only; the worker re-reads the current job
//! snapshot before acting.

pub mod channels;
pub mod types;

pub use channels::{
    DEFAULT_CHANNEL_BUFFER, ReconcileRequestReceiver, ReconcileRequestSender,
    reconcile_request_channel,
};
pub use types::{InboundEvent, ReconcileRequest};

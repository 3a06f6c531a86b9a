//! Processors of the integration engine.
//!
//! - `SubscriptionReconciler`: converges remote webhooks and subscriptions
//!   to the configured triggers and sources
//! - `ReconcileWorker`: receives `ReconcileRequest`s and configuration
//!   changes, drives the reconciler
//! - `Dispatcher`: receives `InboundEvent`s, schedules builds
//! - `HeadDiscoveryEngine`: enumerates heads of multibranch sources
//! - `BuildStatusReporter`: receives `BuildReport`s, reports commit checks

pub mod discovery;
pub mod dispatcher;
pub mod reconcile_worker;
pub mod reconciler;
pub mod status_reporter;

pub use discovery::{
    CollectingObserver, DiscoveryError, DiscoveryReport, DiscoveryState, HeadCriteria,
    HeadDiscoveryEngine, HeadObserver, Probe, ProbeStat, RequiredFile,
};
pub use dispatcher::{DispatchError, DispatchResponse, Dispatcher, TriggerDecision};
pub use reconcile_worker::ReconcileWorker;
pub use reconciler::{ConnectionReport, ReconcileError, SubscriptionReconciler};
pub use status_reporter::{BuildOutcome, BuildReport, BuildStatusReporter, ReportError};

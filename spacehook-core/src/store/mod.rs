//! Port to the job configuration owned outside the core.
//!
//! The core only reads immutable snapshots and writes back the remote ids
//! and health found by reconciliation.

mod memory;

pub use memory::InMemoryJobStore;

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use time::OffsetDateTime;

use crate::entities::{JobSnapshot, RemoteIds};

#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    #[error("unknown trigger: {0}")]
    UnknownTrigger(String),
    #[error("unknown source: {0}")]
    UnknownSource(String),
}

/// Result of the last reconciliation of one trigger or source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TriggerHealth {
    /// Trigger or source id.
    pub owner_id: String,
    /// Owning job name, or the source id for sources.
    pub owner: String,
    pub connection: String,
    pub healthy: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(with = "time::serde::timestamp")]
    pub checked_at: OffsetDateTime,
}

#[async_trait]
pub trait JobConfigStore: Send + Sync {
    /// Current configuration; never mutated once handed out.
    async fn snapshot(&self) -> Arc<JobSnapshot>;

    async fn record_trigger_ids(&self, trigger_id: &str, ids: RemoteIds) -> Result<(), StoreError>;

    async fn record_source_webhook(&self, source_id: &str, webhook_id: &str)
    -> Result<(), StoreError>;

    async fn record_health(&self, health: TriggerHealth);

    async fn health(&self) -> Vec<TriggerHealth>;
}

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use super::{JobConfigStore, StoreError, TriggerHealth};
use crate::config::{ConfigStore, ConfigWatcher};
use crate::entities::{JobRecord, JobSnapshot, MultibranchSource, RemoteIds};

/// Job store backed by a [`ConfigStore`].
///
/// [`replace`](InMemoryJobStore::replace) installs a new configuration and
/// wakes watchers; recording remote ids patches the current snapshot
/// silently so reconciliation does not feed back into itself.
#[derive(Clone)]
pub struct InMemoryJobStore {
    config: ConfigStore<Arc<JobSnapshot>>,
    health: Arc<RwLock<HashMap<String, TriggerHealth>>>,
}

impl InMemoryJobStore {
    pub fn new(jobs: Vec<JobRecord>, sources: Vec<MultibranchSource>) -> Self {
        Self {
            config: ConfigStore::new(Arc::new(JobSnapshot::new(jobs, sources))),
            health: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Install a reloaded configuration, keeping remote ids of surviving
    /// triggers and sources.
    pub async fn replace(&self, jobs: Vec<JobRecord>, sources: Vec<MultibranchSource>) {
        let previous = self.config.snapshot().await;
        let mut next = JobSnapshot::new(jobs, sources);
        next.carry_over_ids(&previous);

        let live: Vec<String> = next
            .triggers()
            .map(|(_, t)| t.id.clone())
            .chain(next.sources.iter().map(|s| s.id.clone()))
            .collect();
        self.health
            .write()
            .await
            .retain(|owner_id, _| live.contains(owner_id));

        self.config.update(Arc::new(next)).await;
    }

    pub fn subscribe(&self) -> ConfigWatcher {
        self.config.subscribe()
    }
}

#[async_trait]
impl JobConfigStore for InMemoryJobStore {
    async fn snapshot(&self) -> Arc<JobSnapshot> {
        self.config.snapshot().await
    }

    async fn record_trigger_ids(&self, trigger_id: &str, ids: RemoteIds) -> Result<(), StoreError> {
        self.config
            .patch(|current| {
                if current.find_trigger(trigger_id).is_none() {
                    return Err(StoreError::UnknownTrigger(trigger_id.to_string()));
                }
                if current.remote_ids(trigger_id) == Some(&ids) {
                    return Ok(());
                }
                debug!(trigger_id, ?ids, "Recording remote ids");
                Arc::make_mut(current)
                    .trigger_ids
                    .insert(trigger_id.to_string(), ids);
                Ok(())
            })
            .await
    }

    async fn record_source_webhook(
        &self,
        source_id: &str,
        webhook_id: &str,
    ) -> Result<(), StoreError> {
        self.config
            .patch(|current| {
                if current.source(source_id).is_none() {
                    return Err(StoreError::UnknownSource(source_id.to_string()));
                }
                Arc::make_mut(current)
                    .source_webhooks
                    .insert(source_id.to_string(), webhook_id.to_string());
                Ok(())
            })
            .await
    }

    async fn record_health(&self, health: TriggerHealth) {
        self.health
            .write()
            .await
            .insert(health.owner_id.clone(), health);
    }

    async fn health(&self) -> Vec<TriggerHealth> {
        let mut all: Vec<TriggerHealth> = self.health.read().await.values().cloned().collect();
        all.sort_by(|a, b| a.owner_id.cmp(&b.owner_id));
        all
    }
}

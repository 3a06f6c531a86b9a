//! SubscriptionReconciler processor.
//!
//! Converges the remote webhook and subscription objects of one connection
//! to the triggers and multibranch sources currently configured:
//!
//! - every trigger and source owns exactly one webhook, named
//!   `{owner_id}|{project_key}|{repository}`, with exactly one subscription
//! - a webhook whose subscriptions are not exactly the one expected is
//!   repaired by deleting them all and creating a fresh one
//! - auto-generated webhooks that no longer belong to anything are deleted,
//!   but only after every owner of the connection reconciled successfully
//!
//! Passes for the same (connection, owner) pair are serialized with a
//! keyed lock; everything else runs concurrently.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::{join, join_all};
use kanau::processor::Processor;
use spacehook_sdk::objects::{
    CreateWebhookRequest, EndpointSpec, SubscriptionDefinition, UpdateWebhookRequest,
    WebhookRecord,
};
use time::OffsetDateTime;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::config::{Connection, ConnectionRegistry, WebhookEndpoint};
use crate::entities::{MultibranchSource, RemoteIds, TriggerSpec};
use crate::events::ReconcileRequest;
use crate::remote::{RemoteError, bounded};
use crate::store::{JobConfigStore, TriggerHealth};
use crate::utils::{WEBHOOK_DESCRIPTION, WebhookName};

#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error("no connection with id {0}")]
    UnknownConnection(String),

    #[error("project {project_key} cannot be resolved: {source}")]
    UnknownProject {
        project_key: String,
        #[source]
        source: RemoteError,
    },

    #[error("unknown trigger: {0}")]
    UnknownTrigger(String),

    #[error("unknown multibranch source: {0}")]
    UnknownSource(String),

    #[error(transparent)]
    Remote(#[from] RemoteError),
}

impl ReconcileError {
    /// Configuration problems are never retried; they need a user to act.
    pub fn is_configuration(&self) -> bool {
        match self {
            ReconcileError::UnknownConnection(_)
            | ReconcileError::UnknownTrigger(_)
            | ReconcileError::UnknownSource(_) => true,
            ReconcileError::UnknownProject { source, .. } => {
                matches!(source, RemoteError::NotFound(_))
            }
            ReconcileError::Remote(_) => false,
        }
    }
}

/// Outcome of reconciling every owner of one connection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionReport {
    pub connection: String,
    pub reconciled: usize,
    pub failed: usize,
    pub orphans_deleted: usize,
    /// Orphan cleanup did not run because some owner failed.
    pub cleanup_skipped: bool,
}

/// The webhook a trigger or source must have.
struct DesiredWebhook<'a> {
    owner_id: &'a str,
    name: String,
    subscription: SubscriptionDefinition,
}

pub struct SubscriptionReconciler {
    connections: Arc<ConnectionRegistry>,
    store: Arc<dyn JobConfigStore>,
    endpoint: WebhookEndpoint,
    call_timeout: Duration,
    locks: Mutex<HashMap<(String, String), Arc<Mutex<()>>>>,
}

impl SubscriptionReconciler {
    pub fn new(
        connections: Arc<ConnectionRegistry>,
        store: Arc<dyn JobConfigStore>,
        endpoint: WebhookEndpoint,
        call_timeout: Duration,
    ) -> Self {
        Self {
            connections,
            store,
            endpoint,
            call_timeout,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Converge the webhook of one trigger and record its remote ids.
    ///
    /// `existing` is a recent listing of the connection's webhooks; the
    /// webhook is matched by canonical name, never by a persisted id.
    pub async fn reconcile(
        &self,
        trigger: &TriggerSpec,
        existing: &[WebhookRecord],
    ) -> Result<RemoteIds, ReconcileError> {
        let connection = self.connection(&trigger.connection)?;
        let _guard = self.lock(&trigger.connection, &trigger.id).await;

        let project_id = self.project_id(connection, &trigger.project_key).await?;
        let desired = DesiredWebhook {
            owner_id: &trigger.id,
            name: trigger.webhook_name(),
            subscription: trigger.subscription(&project_id),
        };
        let ids = self.converge(connection, &desired, existing).await?;

        if let Err(e) = self.store.record_trigger_ids(&trigger.id, ids.clone()).await {
            warn!(trigger_id = %trigger.id, error = %e, "Trigger vanished before its ids could be recorded");
        }
        Ok(ids)
    }

    /// Converge the aggregate webhook of a multibranch source.
    pub async fn reconcile_source(
        &self,
        source: &MultibranchSource,
        existing: &[WebhookRecord],
    ) -> Result<String, ReconcileError> {
        let connection = self.connection(&source.connection)?;
        let _guard = self.lock(&source.connection, &source.id).await;

        let project_id = self.project_id(connection, &source.project_key).await?;
        let desired = DesiredWebhook {
            owner_id: &source.id,
            name: source.webhook_name(),
            subscription: source.subscription(&project_id),
        };
        let ids = self.converge(connection, &desired, existing).await?;
        let webhook_id = ids
            .webhook_id
            .ok_or_else(|| RemoteError::Decode("webhook id missing after reconciliation".into()))?;

        if let Err(e) = self.store.record_source_webhook(&source.id, &webhook_id).await {
            warn!(source_id = %source.id, error = %e, "Source vanished before its webhook id could be recorded");
        }
        Ok(webhook_id)
    }

    /// Reconcile one trigger by id against a fresh webhook listing.
    pub async fn reconcile_trigger_by_id(&self, trigger_id: &str) -> Result<RemoteIds, ReconcileError> {
        let snapshot = self.store.snapshot().await;
        let (job, trigger) = snapshot
            .find_trigger(trigger_id)
            .ok_or_else(|| ReconcileError::UnknownTrigger(trigger_id.to_string()))?;
        let result: Result<RemoteIds, ReconcileError> = async {
            let connection = self.connection(&trigger.connection)?;
            let existing = bounded(self.call_timeout, connection.remote.list_webhooks()).await?;
            self.reconcile(trigger, &existing).await
        }
        .await;
        self.record_health(&trigger.id, &job.name, &trigger.connection, result.as_ref().err())
            .await;
        result
    }

    /// Reconcile one source by id against a fresh webhook listing.
    pub async fn reconcile_source_by_id(&self, source_id: &str) -> Result<String, ReconcileError> {
        let snapshot = self.store.snapshot().await;
        let source = snapshot
            .source(source_id)
            .ok_or_else(|| ReconcileError::UnknownSource(source_id.to_string()))?;
        let result: Result<String, ReconcileError> = async {
            let connection = self.connection(&source.connection)?;
            let existing = bounded(self.call_timeout, connection.remote.list_webhooks()).await?;
            self.reconcile_source(source, &existing).await
        }
        .await;
        self.record_health(&source.id, &source.id, &source.connection, result.as_ref().err())
            .await;
        result
    }

    /// Reconcile every trigger and source of a connection, then delete
    /// orphaned auto-generated webhooks.
    ///
    /// A failing owner is reported through its health entry and does not
    /// stop its siblings, but it does suppress orphan cleanup.
    pub async fn reconcile_connection(
        &self,
        connection_id: &str,
    ) -> Result<ConnectionReport, ReconcileError> {
        let connection = self.connection(connection_id)?;
        let snapshot = self.store.snapshot().await;
        let existing = bounded(self.call_timeout, connection.remote.list_webhooks()).await?;

        let triggers: Vec<_> = snapshot
            .triggers()
            .filter(|(_, t)| t.connection == connection_id)
            .collect();
        let sources: Vec<_> = snapshot
            .sources
            .iter()
            .filter(|s| s.connection == connection_id)
            .collect();

        let trigger_passes = join_all(triggers.iter().map(|(job, trigger)| {
            let existing = &existing;
            async move {
                let result = self.reconcile(trigger, existing).await.map(|_| ());
                (job.name.as_str(), trigger.id.as_str(), result)
            }
        }));
        let source_passes = join_all(sources.iter().map(|source| {
            let existing = &existing;
            async move {
                let result = self.reconcile_source(source, existing).await.map(|_| ());
                (source.id.as_str(), source.id.as_str(), result)
            }
        }));
        let (trigger_results, source_results) = join(trigger_passes, source_passes).await;

        let mut report = ConnectionReport {
            connection: connection_id.to_string(),
            ..Default::default()
        };
        for (owner, owner_id, result) in trigger_results.into_iter().chain(source_results) {
            match &result {
                Ok(()) => report.reconciled += 1,
                Err(e) => {
                    report.failed += 1;
                    error!(
                        connection = connection_id,
                        owner,
                        owner_id,
                        configuration = e.is_configuration(),
                        error = %e,
                        "Failed to reconcile webhook"
                    );
                }
            }
            self.record_health(owner_id, owner, connection_id, result.as_ref().err())
                .await;
        }

        if report.failed > 0 {
            warn!(
                connection = connection_id,
                failed = report.failed,
                "Skipping orphan webhook cleanup after partial failure"
            );
            report.cleanup_skipped = true;
            return Ok(report);
        }

        let desired: HashSet<String> = triggers
            .iter()
            .map(|(_, t)| t.webhook_name())
            .chain(sources.iter().map(|s| s.webhook_name()))
            .collect();
        report.orphans_deleted = self.delete_orphans(connection, &existing, &desired).await;

        info!(
            connection = connection_id,
            reconciled = report.reconciled,
            orphans_deleted = report.orphans_deleted,
            "Connection reconciled"
        );
        Ok(report)
    }

    /// Reconcile every configured connection concurrently.
    pub async fn reconcile_all(&self) -> Vec<Result<ConnectionReport, ReconcileError>> {
        let ids: Vec<String> = self.connections.ids().map(str::to_string).collect();
        join_all(ids.iter().map(|id| self.reconcile_connection(id))).await
    }

    // -- Private helpers ----------------------------------------------------

    fn connection(&self, id: &str) -> Result<&Connection, ReconcileError> {
        self.connections
            .get(id)
            .ok_or_else(|| ReconcileError::UnknownConnection(id.to_string()))
    }

    async fn lock(&self, connection: &str, owner_id: &str) -> tokio::sync::OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            locks
                .entry((connection.to_string(), owner_id.to_string()))
                .or_default()
                .clone()
        };
        lock.lock_owned().await
    }

    async fn project_id(
        &self,
        connection: &Connection,
        project_key: &str,
    ) -> Result<String, ReconcileError> {
        bounded(self.call_timeout, connection.remote.project_id(project_key))
            .await
            .map_err(|source| ReconcileError::UnknownProject {
                project_key: project_key.to_string(),
                source,
            })
    }

    fn endpoint_spec(&self) -> EndpointSpec {
        EndpointSpec {
            url: self.endpoint.url.clone(),
            ssl_verification: self.endpoint.ssl_verification,
        }
    }

    /// Bring one owner's webhook to the desired state. Runs under the
    /// owner's lock.
    ///
    /// `existing` may predate the lock. It is trusted only when it shows
    /// exactly one webhook with the canonical name; creating a webhook or
    /// removing duplicates is decided on a listing taken under the lock.
    async fn converge(
        &self,
        connection: &Connection,
        desired: &DesiredWebhook<'_>,
        existing: &[WebhookRecord],
    ) -> Result<RemoteIds, RemoteError> {
        let remote = connection.remote.as_ref();
        let mut fresh: Option<Vec<WebhookRecord>> = None;
        loop {
            let listing = fresh.as_deref().unwrap_or(existing);
            let named: Vec<&WebhookRecord> =
                listing.iter().filter(|w| w.name == desired.name).collect();
            if named.len() != 1 && fresh.is_none() {
                fresh = Some(bounded(self.call_timeout, remote.list_webhooks()).await?);
                continue;
            }
            let Some((webhook, duplicates)) = named.split_first() else {
                return self.create(connection, desired).await;
            };
            for duplicate in duplicates {
                warn!(webhook = %desired.name, webhook_id = %duplicate.id, "Deleting duplicate webhook");
                match bounded(self.call_timeout, remote.delete_webhook(&duplicate.id)).await {
                    Ok(()) | Err(RemoteError::NotFound(_)) => {}
                    Err(e) => return Err(e),
                }
            }

            let update = UpdateWebhookRequest {
                name: desired.name.clone(),
                description: WEBHOOK_DESCRIPTION.to_string(),
                enabled: true,
                endpoint: self.endpoint_spec(),
            };
            match bounded(self.call_timeout, remote.update_webhook(&webhook.id, &update)).await {
                Ok(()) => {
                    let webhook_id = webhook.id.clone();
                    return self.converge_subscription(connection, desired, webhook_id).await;
                }
                Err(RemoteError::NotFound(_)) if fresh.is_none() => {
                    debug!(webhook = %desired.name, "Listed webhook disappeared, listing again");
                    fresh = Some(bounded(self.call_timeout, remote.list_webhooks()).await?);
                }
                Err(RemoteError::NotFound(_)) => {
                    debug!(webhook = %desired.name, "Listed webhook disappeared, recreating");
                    return self.create(connection, desired).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Leave exactly one subscription with the desired filters on `webhook_id`.
    async fn converge_subscription(
        &self,
        connection: &Connection,
        desired: &DesiredWebhook<'_>,
        webhook_id: String,
    ) -> Result<RemoteIds, RemoteError> {
        let remote = connection.remote.as_ref();
        let subscriptions =
            bounded(self.call_timeout, remote.list_subscriptions(&webhook_id)).await?;
        let subscription_id = match subscriptions.as_slice() {
            [only] if only.name == desired.subscription.name => {
                if !only.matches(&desired.subscription) {
                    bounded(
                        self.call_timeout,
                        remote.update_subscription(&webhook_id, &only.id, &desired.subscription),
                    )
                    .await?;
                    debug!(webhook = %desired.name, "Subscription filters updated");
                }
                only.id.clone()
            }
            other => {
                warn!(
                    webhook = %desired.name,
                    owner_id = desired.owner_id,
                    count = other.len(),
                    "Webhook does not carry exactly one expected subscription, recreating it"
                );
                for stale in other {
                    bounded(
                        self.call_timeout,
                        remote.delete_subscription(&webhook_id, &stale.id),
                    )
                    .await?;
                }
                bounded(
                    self.call_timeout,
                    remote.create_subscription(&webhook_id, &desired.subscription),
                )
                .await?
                .id
            }
        };

        bounded(
            self.call_timeout,
            remote.request_missing_rights(&webhook_id, &subscription_id),
        )
        .await?;

        Ok(RemoteIds {
            webhook_id: Some(webhook_id),
            subscription_id: Some(subscription_id),
        })
    }

    async fn create(
        &self,
        connection: &Connection,
        desired: &DesiredWebhook<'_>,
    ) -> Result<RemoteIds, RemoteError> {
        let remote = connection.remote.as_ref();
        let request = CreateWebhookRequest {
            name: desired.name.clone(),
            description: WEBHOOK_DESCRIPTION.to_string(),
            endpoint: self.endpoint_spec(),
        };
        // The subscription can only be attached once the webhook exists.
        let webhook = bounded(self.call_timeout, remote.create_webhook(&request)).await?;
        let subscription = bounded(
            self.call_timeout,
            remote.create_subscription(&webhook.id, &desired.subscription),
        )
        .await?;
        info!(
            connection = %connection.config.id,
            webhook = %desired.name,
            webhook_id = %webhook.id,
            "Created webhook"
        );
        Ok(RemoteIds {
            webhook_id: Some(webhook.id),
            subscription_id: Some(subscription.id),
        })
    }

    /// Delete auto-generated webhooks not in `desired`; returns how many went.
    ///
    /// Each deletion holds the owner's lock and re-checks the current
    /// configuration, so a webhook created meanwhile for a newly added
    /// trigger or source survives.
    async fn delete_orphans(
        &self,
        connection: &Connection,
        existing: &[WebhookRecord],
        desired: &HashSet<String>,
    ) -> usize {
        let connection_id = connection.config.id.as_str();
        let mut deleted = 0;
        for orphan in existing.iter().filter(|w| !desired.contains(&w.name)) {
            let Some(name) = WebhookName::parse(&orphan.name) else {
                continue;
            };
            let _guard = self.lock(connection_id, &name.owner_id).await;
            if self.is_configured(connection_id, &orphan.name).await {
                debug!(webhook = %orphan.name, "Owner was configured meanwhile, keeping webhook");
                continue;
            }
            match bounded(self.call_timeout, connection.remote.delete_webhook(&orphan.id)).await {
                Ok(()) | Err(RemoteError::NotFound(_)) => {
                    info!(connection = connection_id, webhook = %orphan.name, "Deleted orphaned webhook");
                    deleted += 1;
                }
                Err(e) => {
                    warn!(connection = connection_id, webhook = %orphan.name, error = %e, "Failed to delete orphaned webhook");
                }
            }
        }
        deleted
    }

    async fn is_configured(&self, connection_id: &str, webhook_name: &str) -> bool {
        let snapshot = self.store.snapshot().await;
        let trigger = snapshot
            .triggers()
            .any(|(_, t)| t.connection == connection_id && t.webhook_name() == webhook_name);
        trigger
            || snapshot
                .sources
                .iter()
                .any(|s| s.connection == connection_id && s.webhook_name() == webhook_name)
    }

    async fn record_health(
        &self,
        owner_id: &str,
        owner: &str,
        connection: &str,
        error: Option<&ReconcileError>,
    ) {
        self.store
            .record_health(TriggerHealth {
                owner_id: owner_id.to_string(),
                owner: owner.to_string(),
                connection: connection.to_string(),
                healthy: error.is_none(),
                error: error.map(|e| e.to_string()),
                checked_at: OffsetDateTime::now_utc(),
            })
            .await;
    }
}

// ---------------------------------------------------------------------------
// Processor trait implementation
// ---------------------------------------------------------------------------

impl Processor<ReconcileRequest> for SubscriptionReconciler {
    type Output = ();
    type Error = ReconcileError;

    async fn process(&self, request: ReconcileRequest) -> Result<(), ReconcileError> {
        debug!(%request, "Handling reconcile request");
        match request {
            ReconcileRequest::All => {
                for result in self.reconcile_all().await {
                    if let Err(e) = result {
                        error!(error = %e, "Failed to reconcile connection");
                    }
                }
                Ok(())
            }
            ReconcileRequest::Connection(id) => self.reconcile_connection(&id).await.map(|_| ()),
            ReconcileRequest::Trigger(id) => self.reconcile_trigger_by_id(&id).await.map(|_| ()),
            ReconcileRequest::Source(id) => self.reconcile_source_by_id(&id).await.map(|_| ()),
        }
    }
}

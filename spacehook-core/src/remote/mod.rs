//! Contract of the remote code-hosting API as consumed by the processors.
//!
//! [`RemoteApi`] is implemented for the sdk's `SpaceClient` in [`http`];
//! tests substitute an in-memory fake.

pub mod http;

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use spacehook_sdk::objects::{
    BranchInfo, CreateWebhookRequest, ExternalCheckReport, GitEntry, MergeRequestRecord, Page,
    PageRequest, RepositoryUrls, SubscriptionDefinition, SubscriptionRecord,
    UpdateWebhookRequest, WebhookRecord,
};

#[derive(Debug, Clone, thiserror::Error)]
pub enum RemoteError {
    /// Network failure, rate limit or server error that survived the
    /// client's own retries.
    #[error("transient remote failure: {0}")]
    Transient(String),

    #[error("remote call timed out")]
    Timeout,

    #[error("not found: {0}")]
    NotFound(String),

    /// The remote side refused the request (4xx other than 404).
    #[error("rejected with status {status}: {message}")]
    Rejected { status: u16, message: String },

    #[error("cannot decode remote response: {0}")]
    Decode(String),
}

/// Bound `call` by `limit`, mapping expiry to [`RemoteError::Timeout`].
pub async fn bounded<T>(
    limit: Duration,
    call: impl Future<Output = Result<T, RemoteError>>,
) -> Result<T, RemoteError> {
    tokio::time::timeout(limit, call)
        .await
        .map_err(|_| RemoteError::Timeout)?
}

#[async_trait]
pub trait RemoteApi: Send + Sync {
    /// Id of the project with the given key.
    async fn project_id(&self, project_key: &str) -> Result<String, RemoteError>;

    async fn repository_urls(
        &self,
        project_key: &str,
        repository: &str,
    ) -> Result<RepositoryUrls, RemoteError>;

    async fn list_webhooks(&self) -> Result<Vec<WebhookRecord>, RemoteError>;

    async fn create_webhook(
        &self,
        request: &CreateWebhookRequest,
    ) -> Result<WebhookRecord, RemoteError>;

    async fn update_webhook(
        &self,
        webhook_id: &str,
        request: &UpdateWebhookRequest,
    ) -> Result<(), RemoteError>;

    async fn delete_webhook(&self, webhook_id: &str) -> Result<(), RemoteError>;

    async fn list_subscriptions(
        &self,
        webhook_id: &str,
    ) -> Result<Vec<SubscriptionRecord>, RemoteError>;

    async fn create_subscription(
        &self,
        webhook_id: &str,
        definition: &SubscriptionDefinition,
    ) -> Result<SubscriptionRecord, RemoteError>;

    async fn update_subscription(
        &self,
        webhook_id: &str,
        subscription_id: &str,
        definition: &SubscriptionDefinition,
    ) -> Result<(), RemoteError>;

    async fn delete_subscription(
        &self,
        webhook_id: &str,
        subscription_id: &str,
    ) -> Result<(), RemoteError>;

    async fn request_missing_rights(
        &self,
        webhook_id: &str,
        subscription_id: &str,
    ) -> Result<(), RemoteError>;

    async fn report_external_check_status(
        &self,
        report: &ExternalCheckReport,
    ) -> Result<(), RemoteError>;

    async fn list_branches(
        &self,
        project_key: &str,
        repository: &str,
        page: &PageRequest,
    ) -> Result<Page<BranchInfo>, RemoteError>;

    /// Open merge requests of one repository.
    async fn list_merge_requests(
        &self,
        project_key: &str,
        repository: &str,
        page: &PageRequest,
    ) -> Result<Page<MergeRequestRecord>, RemoteError>;

    async fn get_merge_request(
        &self,
        project_id: &str,
        merge_request_id: &str,
    ) -> Result<MergeRequestRecord, RemoteError>;

    /// Entries at `path` in the tree of `commit`.
    async fn list_files(
        &self,
        project_key: &str,
        repository: &str,
        commit: &str,
        path: &str,
    ) -> Result<Vec<GitEntry>, RemoteError>;
}

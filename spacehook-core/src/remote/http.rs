//! [`RemoteApi`] over the sdk HTTP client.

use async_trait::async_trait;
use spacehook_sdk::client::{ClientError, SpaceClient};
use spacehook_sdk::objects::{
    BranchInfo, CreateWebhookRequest, ExternalCheckReport, GitEntry, MergeRequestRecord, Page,
    PageRequest, RepositoryUrls, SubscriptionDefinition, SubscriptionRecord,
    UpdateWebhookRequest, WebhookRecord,
};

use super::{RemoteApi, RemoteError};

impl From<ClientError> for RemoteError {
    fn from(e: ClientError) -> Self {
        if e.is_timeout() {
            return RemoteError::Timeout;
        }
        match e {
            ClientError::Api { status, body } if status.as_u16() == 404 => RemoteError::NotFound(body),
            ClientError::Api { status, body } if status.is_client_error() && status.as_u16() != 429 => {
                RemoteError::Rejected {
                    status: status.as_u16(),
                    message: body,
                }
            }
            ClientError::Json(e) => RemoteError::Decode(e.to_string()),
            other => RemoteError::Transient(other.to_string()),
        }
    }
}

#[async_trait]
impl RemoteApi for SpaceClient {
    async fn project_id(&self, project_key: &str) -> Result<String, RemoteError> {
        Ok(self.get_project(project_key).await?.id)
    }

    async fn repository_urls(
        &self,
        project_key: &str,
        repository: &str,
    ) -> Result<RepositoryUrls, RemoteError> {
        Ok(self.get_repository_urls(project_key, repository).await?)
    }

    async fn list_webhooks(&self) -> Result<Vec<WebhookRecord>, RemoteError> {
        Ok(SpaceClient::list_webhooks(self).await?)
    }

    async fn create_webhook(
        &self,
        request: &CreateWebhookRequest,
    ) -> Result<WebhookRecord, RemoteError> {
        Ok(SpaceClient::create_webhook(self, request).await?)
    }

    async fn update_webhook(
        &self,
        webhook_id: &str,
        request: &UpdateWebhookRequest,
    ) -> Result<(), RemoteError> {
        Ok(SpaceClient::update_webhook(self, webhook_id, request).await?)
    }

    async fn delete_webhook(&self, webhook_id: &str) -> Result<(), RemoteError> {
        Ok(SpaceClient::delete_webhook(self, webhook_id).await?)
    }

    async fn list_subscriptions(
        &self,
        webhook_id: &str,
    ) -> Result<Vec<SubscriptionRecord>, RemoteError> {
        Ok(SpaceClient::list_subscriptions(self, webhook_id).await?)
    }

    async fn create_subscription(
        &self,
        webhook_id: &str,
        definition: &SubscriptionDefinition,
    ) -> Result<SubscriptionRecord, RemoteError> {
        Ok(SpaceClient::create_subscription(self, webhook_id, definition).await?)
    }

    async fn update_subscription(
        &self,
        webhook_id: &str,
        subscription_id: &str,
        definition: &SubscriptionDefinition,
    ) -> Result<(), RemoteError> {
        Ok(SpaceClient::update_subscription(self, webhook_id, subscription_id, definition).await?)
    }

    async fn delete_subscription(
        &self,
        webhook_id: &str,
        subscription_id: &str,
    ) -> Result<(), RemoteError> {
        Ok(SpaceClient::delete_subscription(self, webhook_id, subscription_id).await?)
    }

    async fn request_missing_rights(
        &self,
        webhook_id: &str,
        subscription_id: &str,
    ) -> Result<(), RemoteError> {
        Ok(SpaceClient::request_missing_rights(self, webhook_id, subscription_id).await?)
    }

    async fn report_external_check_status(
        &self,
        report: &ExternalCheckReport,
    ) -> Result<(), RemoteError> {
        Ok(SpaceClient::report_external_check_status(self, report).await?)
    }

    async fn list_branches(
        &self,
        project_key: &str,
        repository: &str,
        page: &PageRequest,
    ) -> Result<Page<BranchInfo>, RemoteError> {
        Ok(SpaceClient::list_branches(self, project_key, repository, page).await?)
    }

    async fn list_merge_requests(
        &self,
        project_key: &str,
        repository: &str,
        page: &PageRequest,
    ) -> Result<Page<MergeRequestRecord>, RemoteError> {
        Ok(self
            .list_open_merge_requests(project_key, repository, page)
            .await?)
    }

    async fn get_merge_request(
        &self,
        project_id: &str,
        merge_request_id: &str,
    ) -> Result<MergeRequestRecord, RemoteError> {
        Ok(SpaceClient::get_merge_request(self, project_id, merge_request_id).await?)
    }

    async fn list_files(
        &self,
        project_key: &str,
        repository: &str,
        commit: &str,
        path: &str,
    ) -> Result<Vec<GitEntry>, RemoteError> {
        Ok(SpaceClient::list_files(self, project_key, repository, commit, path).await?)
    }
}

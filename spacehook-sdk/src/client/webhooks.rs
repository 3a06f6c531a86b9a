//! Webhook and subscription endpoints of the application.

use super::{ClientError, SpaceClient, expect_success, parse_response, segment};
use crate::objects::DataList;
use crate::objects::webhook::{
    CreateWebhookRequest, SubscriptionDefinition, SubscriptionRecord, UpdateWebhookRequest,
    WebhookRecord,
};

const WEBHOOKS: &str = "/api/http/applications/me/webhooks";

impl SpaceClient {
    /// `GET /api/http/applications/me/webhooks` – all webhooks of the application.
    pub async fn list_webhooks(&self) -> Result<Vec<WebhookRecord>, ClientError> {
        let url = self.endpoint(WEBHOOKS)?;
        let resp = self.send(|http| http.get(url.clone())).await?;
        let list: DataList<WebhookRecord> = parse_response(resp).await?;
        Ok(list.data)
    }

    /// `POST /api/http/applications/me/webhooks`
    pub async fn create_webhook(
        &self,
        request: &CreateWebhookRequest,
    ) -> Result<WebhookRecord, ClientError> {
        let url = self.endpoint(WEBHOOKS)?;
        let resp = self.send(|http| http.post(url.clone()).json(request)).await?;
        parse_response(resp).await
    }

    /// `PATCH /api/http/applications/me/webhooks/{id}`
    pub async fn update_webhook(
        &self,
        webhook_id: &str,
        request: &UpdateWebhookRequest,
    ) -> Result<(), ClientError> {
        let url = self.endpoint(&format!("{WEBHOOKS}/{}", segment(webhook_id)))?;
        let resp = self.send(|http| http.patch(url.clone()).json(request)).await?;
        expect_success(resp).await
    }

    /// `DELETE /api/http/applications/me/webhooks/{id}`
    pub async fn delete_webhook(&self, webhook_id: &str) -> Result<(), ClientError> {
        let url = self.endpoint(&format!("{WEBHOOKS}/{}", segment(webhook_id)))?;
        let resp = self.send(|http| http.delete(url.clone())).await?;
        expect_success(resp).await
    }

    /// `GET /api/http/applications/me/webhooks/{id}/subscriptions`
    pub async fn list_subscriptions(
        &self,
        webhook_id: &str,
    ) -> Result<Vec<SubscriptionRecord>, ClientError> {
        let url = self.endpoint(&format!(
            "{WEBHOOKS}/{}/subscriptions",
            segment(webhook_id)
        ))?;
        let resp = self.send(|http| http.get(url.clone())).await?;
        let list: DataList<SubscriptionRecord> = parse_response(resp).await?;
        Ok(list.data)
    }

    /// `POST /api/http/applications/me/webhooks/{id}/subscriptions`
    pub async fn create_subscription(
        &self,
        webhook_id: &str,
        definition: &SubscriptionDefinition,
    ) -> Result<SubscriptionRecord, ClientError> {
        let url = self.endpoint(&format!(
            "{WEBHOOKS}/{}/subscriptions",
            segment(webhook_id)
        ))?;
        let resp = self
            .send(|http| http.post(url.clone()).json(definition))
            .await?;
        parse_response(resp).await
    }

    /// `PATCH /api/http/applications/me/webhooks/{id}/subscriptions/{subscription_id}`
    pub async fn update_subscription(
        &self,
        webhook_id: &str,
        subscription_id: &str,
        definition: &SubscriptionDefinition,
    ) -> Result<(), ClientError> {
        let url = self.endpoint(&format!(
            "{WEBHOOKS}/{}/subscriptions/{}",
            segment(webhook_id),
            segment(subscription_id)
        ))?;
        let resp = self
            .send(|http| http.patch(url.clone()).json(definition))
            .await?;
        expect_success(resp).await
    }

    /// `DELETE /api/http/applications/me/webhooks/{id}/subscriptions/{subscription_id}`
    pub async fn delete_subscription(
        &self,
        webhook_id: &str,
        subscription_id: &str,
    ) -> Result<(), ClientError> {
        let url = self.endpoint(&format!(
            "{WEBHOOKS}/{}/subscriptions/{}",
            segment(webhook_id),
            segment(subscription_id)
        ))?;
        let resp = self.send(|http| http.delete(url.clone())).await?;
        expect_success(resp).await
    }

    /// `POST .../subscriptions/{subscription_id}/request-missing-rights`
    ///
    /// Asks the organization administrators to grant any permission the
    /// subscription needs but the application does not hold yet.
    pub async fn request_missing_rights(
        &self,
        webhook_id: &str,
        subscription_id: &str,
    ) -> Result<(), ClientError> {
        let url = self.endpoint(&format!(
            "{WEBHOOKS}/{}/subscriptions/{}/request-missing-rights",
            segment(webhook_id),
            segment(subscription_id)
        ))?;
        let resp = self.send(|http| http.post(url.clone())).await?;
        expect_success(resp).await
    }
}

//! Webhook and subscription objects as exchanged with the remote API.

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

/// Event type codes attached to a subscription. Almost always one to four.
pub type EventTypeCodes = SmallVec<[String; 4]>;

/// A webhook registered on the remote side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookRecord {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub endpoint_url: Option<String>,
    #[serde(default = "default_true")]
    pub active: bool,
}

fn default_true() -> bool {
    true
}

/// Endpoint the remote service delivers webhook payloads to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointSpec {
    pub url: String,
    /// Whether the remote side verifies the endpoint's TLS certificate.
    pub ssl_verification: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateWebhookRequest {
    pub name: String,
    pub description: String,
    pub endpoint: EndpointSpec,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateWebhookRequest {
    pub name: String,
    pub description: String,
    pub enabled: bool,
    pub endpoint: EndpointSpec,
}

/// Filter narrowing which events of a subject are delivered.
///
/// Empty branch spec lists mean "no restriction".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionFilter {
    pub project_id: String,
    pub repository: String,
    #[serde(default)]
    pub branch_spec: Vec<String>,
    #[serde(default)]
    pub target_branch_spec: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title_regex: Option<String>,
}

/// Desired state of a subscription, used for both create and update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionDefinition {
    pub name: String,
    pub subject_code: String,
    pub filter: SubscriptionFilter,
    pub event_type_codes: EventTypeCodes,
}

/// A subscription as it exists on the remote side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionRecord {
    pub id: String,
    pub name: String,
    pub subject_code: String,
    pub filter: SubscriptionFilter,
    pub event_type_codes: EventTypeCodes,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl SubscriptionRecord {
    /// Whether this record already carries exactly the given definition.
    pub fn matches(&self, definition: &SubscriptionDefinition) -> bool {
        self.name == definition.name
            && self.subject_code == definition.subject_code
            && self.filter == definition.filter
            && self.event_type_codes == definition.event_type_codes
    }
}

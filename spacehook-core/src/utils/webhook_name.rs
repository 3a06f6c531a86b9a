//! Canonical names of auto-generated webhooks.
//!
//! The name is `{owner_id}|{project_key}|{repository}` where the owner is a
//! trigger or a multibranch source. It is recomputed on every
//! reconciliation, so persisted remote ids never have to be trusted.

use std::fmt;

/// Description attached to every auto-generated webhook.
pub const WEBHOOK_DESCRIPTION: &str = "Auto-generated webhook for triggering builds";

pub fn webhook_name(owner_id: &str, project_key: &str, repository: &str) -> String {
    format!("{owner_id}|{project_key}|{repository}")
}

/// A parsed canonical webhook name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WebhookName {
    pub owner_id: String,
    pub project_key: String,
    pub repository: String,
}

impl WebhookName {
    /// Parse a remote webhook name; `None` if it is not one of ours.
    pub fn parse(name: &str) -> Option<Self> {
        let mut parts = name.splitn(3, '|');
        let owner_id = parts.next().filter(|s| !s.is_empty())?;
        let project_key = parts.next().filter(|s| !s.is_empty())?;
        let repository = parts.next().filter(|s| !s.is_empty() && !s.contains('|'))?;
        Some(Self {
            owner_id: owner_id.to_string(),
            project_key: project_key.to_string(),
            repository: repository.to_string(),
        })
    }
}

impl fmt::Display for WebhookName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}|{}", self.owner_id, self.project_key, self.repository)
    }
}

//! External check status reports attached to commits.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommitExecutionStatus {
    Scheduled,
    Running,
    Succeeded,
    Failed,
    Terminated,
}

/// Body of the "report external check status" call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExternalCheckReport {
    pub project_key: String,
    pub repository: String,
    pub revision: String,
    pub branch: String,
    pub status: CommitExecutionStatus,
    pub url: String,
    pub external_service_name: String,
    pub task_name: String,
    pub task_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_build_id: Option<String>,
    /// Milliseconds since the unix epoch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

//! Build causes handed to the scheduler.

use serde::{Deserialize, Serialize};
use spacehook_sdk::objects::{MergeRequestRecord, RepoPushEvent, SafeMergeCommand};

use super::trigger::EventSelection;
use crate::config::ConnectionConfig;

pub const ENV_SPACE_URL: &str = "SPACE_URL";
pub const ENV_PROJECT_KEY: &str = "SPACE_PROJECT_KEY";
pub const ENV_REPOSITORY_NAME: &str = "SPACE_REPOSITORY_NAME";
pub const ENV_MERGE_REQUEST_ID: &str = "SPACE_MERGE_REQUEST_ID";
pub const ENV_MERGE_REQUEST_NUMBER: &str = "SPACE_MERGE_REQUEST_NUMBER";
pub const ENV_MERGE_REQUEST_SOURCE_BRANCH: &str = "SPACE_MERGE_REQUEST_SOURCE_BRANCH";
pub const ENV_MERGE_REQUEST_TARGET_BRANCH: &str = "SPACE_MERGE_REQUEST_TARGET_BRANCH";
pub const ENV_MERGE_REQUEST_TITLE: &str = "SPACE_MERGE_REQUEST_TITLE";
pub const ENV_MERGE_REQUEST_URL: &str = "SPACE_MERGE_REQUEST_URL";
pub const ENV_IS_SAFE_MERGE: &str = "IS_SAFE_MERGE";
pub const ENV_IS_DRY_RUN: &str = "IS_DRY_RUN";
pub const ENV_SAFE_MERGE_STARTED_BY_USER_ID: &str = "SAFE_MERGE_STARTED_BY_USER_ID";

/// Why a build was scheduled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildCause {
    pub connection_id: String,
    pub space_url: String,
    pub project_key: String,
    pub repository: String,
    pub details: CauseDetails,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CauseDetails {
    BranchPush {
        head: String,
        commit_id: String,
        /// Link to the commits of the head on the remote web UI.
        url: String,
    },
    MergeRequest {
        merge_request: MergeRequestCause,
        safe_merge: Option<SafeMergeCause>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeRequestCause {
    pub id: String,
    pub number: u32,
    pub title: String,
    pub source_branch: String,
    pub target_branch: String,
    pub url: String,
}

/// Synthetic merge requested before the actual merge is permitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SafeMergeCause {
    pub branch: String,
    pub commit: String,
    pub is_dry_run: bool,
    pub started_by_user_id: String,
}

impl From<&SafeMergeCommand> for SafeMergeCause {
    fn from(command: &SafeMergeCommand) -> Self {
        Self {
            branch: command.branch.clone(),
            commit: command.commit.clone(),
            is_dry_run: command.is_dry_run,
            started_by_user_id: command.started_by_user_id.clone(),
        }
    }
}

/// `{base}/p/{project}/repositories/{repo}/commits?query=head%3A{head}`
pub fn commits_url(base_url: &str, project_key: &str, repository: &str, head: &str) -> String {
    format!(
        "{}/p/{}/repositories/{}/commits?query={}",
        base_url.trim_end_matches('/'),
        project_key,
        repository,
        urlencoding::encode(&format!("head:{head}"))
    )
}

impl BuildCause {
    /// Cause for a push whose new commit id is known.
    pub fn branch_push(connection: &ConnectionConfig, event: &RepoPushEvent, commit_id: &str) -> Self {
        Self {
            connection_id: connection.id.clone(),
            space_url: connection.base_url.clone(),
            project_key: event.project_key.clone(),
            repository: event.repository.clone(),
            details: CauseDetails::BranchPush {
                head: event.head.clone(),
                commit_id: commit_id.to_string(),
                url: commits_url(
                    &connection.base_url,
                    &event.project_key,
                    &event.repository,
                    &event.head,
                ),
            },
        }
    }

    pub fn merge_request(
        connection: &ConnectionConfig,
        mr: &MergeRequestRecord,
        safe_merge: Option<SafeMergeCause>,
    ) -> Self {
        Self {
            connection_id: connection.id.clone(),
            space_url: connection.base_url.clone(),
            project_key: mr.project_key.clone(),
            repository: mr.repository.clone(),
            details: CauseDetails::MergeRequest {
                merge_request: MergeRequestCause {
                    id: mr.id.clone(),
                    number: mr.number,
                    title: mr.title.clone(),
                    source_branch: mr.source_branch.clone(),
                    target_branch: mr.target_branch.clone(),
                    url: mr.web_url(&connection.base_url),
                },
                safe_merge,
            },
        }
    }

    pub fn short_description(&self) -> &'static str {
        match &self.details {
            CauseDetails::BranchPush { .. } => "Triggered by push to git branch",
            CauseDetails::MergeRequest {
                safe_merge: Some(_), ..
            } => "Triggered by safe merge",
            CauseDetails::MergeRequest { .. } => "Triggered by merge request updated",
        }
    }

    pub fn event_selection(&self) -> EventSelection {
        match self.details {
            CauseDetails::BranchPush { .. } => EventSelection::Branches,
            CauseDetails::MergeRequest { .. } => EventSelection::MergeRequests,
        }
    }

    /// Environment variables contributed to the build.
    pub fn environment(&self) -> Vec<(&'static str, String)> {
        let mut env = vec![
            (ENV_SPACE_URL, self.space_url.clone()),
            (ENV_PROJECT_KEY, self.project_key.clone()),
            (ENV_REPOSITORY_NAME, self.repository.clone()),
        ];
        if let CauseDetails::MergeRequest {
            merge_request: mr,
            safe_merge,
        } = &self.details
        {
            env.extend([
                (ENV_MERGE_REQUEST_ID, mr.id.clone()),
                (ENV_MERGE_REQUEST_NUMBER, mr.number.to_string()),
                (ENV_MERGE_REQUEST_SOURCE_BRANCH, mr.source_branch.clone()),
                (ENV_MERGE_REQUEST_TARGET_BRANCH, mr.target_branch.clone()),
                (ENV_MERGE_REQUEST_TITLE, mr.title.clone()),
                (ENV_MERGE_REQUEST_URL, mr.url.clone()),
            ]);
            if let Some(safe) = safe_merge {
                env.extend([
                    (ENV_IS_SAFE_MERGE, "true".to_string()),
                    (ENV_IS_DRY_RUN, safe.is_dry_run.to_string()),
                    (ENV_SAFE_MERGE_STARTED_BY_USER_ID, safe.started_by_user_id.clone()),
                ]);
            }
        }
        env
    }
}

//! Inbound webhook envelope and the event types decoded from it.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::repository::{MergeRequestRecord, ReviewerState};

/// Event type codes used both in subscriptions and in inbound deliveries.
pub mod event_codes {
    pub const SUBJECT_REPOSITORY_HEADS: &str = "Repository.Heads";
    pub const SUBJECT_CODE_REVIEW: &str = "CodeReview";

    pub const REPOSITORY_HEADS: &str = "Repository.Heads";
    pub const CODE_REVIEW_CREATED: &str = "CodeReview.Created";
    pub const CODE_REVIEW_UPDATED: &str = "CodeReview.Updated";
    pub const CODE_REVIEW_COMMITS_UPDATED: &str = "CodeReview.CommitsUpdated";
    pub const CODE_REVIEW_TARGET_BRANCH_UPDATED: &str = "CodeReview.TargetBranchUpdated";
    pub const CODE_REVIEW_CHANGES_ACCEPTED: &str = "CodeReview.Participant.ChangesAccepted";
    pub const SAFE_MERGE_START: &str = "SafeMerge.Start";
    pub const SAFE_MERGE_STOP: &str = "SafeMerge.Stop";
    pub const SAFE_MERGE_FETCH_STATUS: &str = "SafeMerge.FetchStatus";
}

#[derive(Debug, thiserror::Error)]
pub enum PayloadError {
    #[error("unsupported event type code: {0}")]
    UnsupportedEvent(String),
    #[error("malformed {code} payload: {source}")]
    Malformed {
        code: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Envelope of every inbound delivery.
///
/// `webhook_id` and `subscription_id` are absent on safe merge commands,
/// which are not tied to a subscription.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookEnvelope {
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub webhook_id: Option<String>,
    #[serde(default)]
    pub subscription_id: Option<String>,
    pub event_type_code: String,
    #[serde(default)]
    pub payload: Value,
}

impl WebhookEnvelope {
    /// Decode the type-specific payload according to `event_type_code`.
    pub fn decode(&self) -> Result<WebhookEvent, PayloadError> {
        use event_codes::*;

        let code = self.event_type_code.as_str();
        let action = match code {
            REPOSITORY_HEADS => return self.parse().map(WebhookEvent::RepoPush),
            SAFE_MERGE_START => return self.parse().map(WebhookEvent::SafeMerge),
            SAFE_MERGE_STOP => return self.parse().map(WebhookEvent::SafeMergeStop),
            SAFE_MERGE_FETCH_STATUS => return self.parse().map(WebhookEvent::SafeMergeStatus),
            CODE_REVIEW_CREATED => CodeReviewAction::Created,
            CODE_REVIEW_UPDATED => CodeReviewAction::Updated,
            CODE_REVIEW_COMMITS_UPDATED => CodeReviewAction::CommitsUpdated,
            CODE_REVIEW_TARGET_BRANCH_UPDATED => CodeReviewAction::TargetBranchUpdated,
            CODE_REVIEW_CHANGES_ACCEPTED => CodeReviewAction::ParticipantChanged,
            other => return Err(PayloadError::UnsupportedEvent(other.to_string())),
        };
        let body: CodeReviewBody = self.parse()?;
        Ok(WebhookEvent::CodeReview(CodeReviewEvent {
            action,
            review: body.review,
            commit_set_review: body.commit_set_review,
            title_change: body.title_change,
            reviewer_state: body.reviewer_state,
        }))
    }

    fn parse<T: serde::de::DeserializeOwned>(&self) -> Result<T, PayloadError> {
        serde_json::from_value(self.payload.clone()).map_err(|source| PayloadError::Malformed {
            code: self.event_type_code.clone(),
            source,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookEvent {
    RepoPush(RepoPushEvent),
    CodeReview(CodeReviewEvent),
    SafeMerge(SafeMergeCommand),
    /// Cancel a safe merge build started earlier.
    SafeMergeStop(SafeMergeBuildRef),
    /// Ask for the current state of a safe merge build.
    SafeMergeStatus(SafeMergeBuildRef),
}

impl WebhookEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            WebhookEvent::RepoPush(_) => "repo_push",
            WebhookEvent::CodeReview(_) => "code_review",
            WebhookEvent::SafeMerge(_) => "safe_merge",
            WebhookEvent::SafeMergeStop(_) => "safe_merge_stop",
            WebhookEvent::SafeMergeStatus(_) => "safe_merge_status",
        }
    }
}

/// A push to (or creation/deletion of) a git head.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepoPushEvent {
    pub project_key: String,
    pub repository: String,
    pub head: String,
    #[serde(default)]
    pub old_commit_id: Option<String>,
    #[serde(default)]
    pub new_commit_id: Option<String>,
    #[serde(default)]
    pub created: bool,
    #[serde(default)]
    pub deleted: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodeReviewAction {
    Created,
    /// Title or description changed.
    Updated,
    CommitsUpdated,
    TargetBranchUpdated,
    ParticipantChanged,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TitleChange {
    #[serde(default)]
    pub old: Option<String>,
    #[serde(default)]
    pub new: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeReviewEvent {
    pub action: CodeReviewAction,
    /// `None` when the payload carried no review at all.
    pub review: Option<MergeRequestRecord>,
    /// The review is a commit-set review rather than a merge request.
    pub commit_set_review: bool,
    pub title_change: Option<TitleChange>,
    pub reviewer_state: Option<ReviewerState>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CodeReviewBody {
    #[serde(default)]
    review: Option<MergeRequestRecord>,
    #[serde(default)]
    commit_set_review: bool,
    #[serde(default)]
    title_change: Option<TitleChange>,
    #[serde(default)]
    reviewer_state: Option<ReviewerState>,
}

/// Request to build a synthetic merge of a merge request's source branch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SafeMergeCommand {
    /// Name of the job to run.
    pub project: String,
    pub project_id: String,
    pub merge_request_id: String,
    /// Synthetic merge ref to build.
    pub branch: String,
    pub commit: String,
    #[serde(default)]
    pub is_dry_run: bool,
    pub started_by_user_id: String,
}

/// A safe merge build, as identified in an earlier response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SafeMergeBuildRef {
    /// Name of the job that runs the safe merge.
    pub project: String,
    /// `queue-item-{n}` while queued, `build-{n}` once started.
    pub build_id: String,
}

//! Project, repository, branch and merge request objects.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectRecord {
    pub id: String,
    pub key: String,
    #[serde(default)]
    pub name: Option<String>,
}

/// Clone URLs of a repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepositoryUrls {
    #[serde(default)]
    pub http_url: Option<String>,
    #[serde(default)]
    pub ssh_url: Option<String>,
}

/// One git head as returned by the branch listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BranchInfo {
    /// Full ref name, e.g. `refs/heads/main`.
    pub head: String,
    #[serde(rename = "ref")]
    pub commit_id: String,
    /// Milliseconds since the unix epoch.
    #[serde(default)]
    pub last_updated: Option<i64>,
}

impl BranchInfo {
    /// Branch name without the `refs/heads/` prefix.
    pub fn short_name(&self) -> &str {
        self.head.strip_prefix("refs/heads/").unwrap_or(&self.head)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParticipantRole {
    Author,
    Reviewer,
    Watcher,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReviewerState {
    Accepted,
    Rejected,
    Pending,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub user_id: String,
    pub role: ParticipantRole,
    #[serde(default)]
    pub state: Option<ReviewerState>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum MergeRequestState {
    #[default]
    Opened,
    Closed,
    Deleted,
}

/// A merge request. Only single-branch-pair requests are modelled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeRequestRecord {
    pub id: String,
    pub number: u32,
    pub title: String,
    pub project_key: String,
    pub repository: String,
    pub source_branch: String,
    pub target_branch: String,
    #[serde(default)]
    pub source_commit: Option<String>,
    #[serde(default)]
    pub state: MergeRequestState,
    #[serde(default)]
    pub last_updated: Option<i64>,
    #[serde(default)]
    pub participants: Vec<Participant>,
}

impl MergeRequestRecord {
    /// True when the request has at least one reviewer and all of them accepted.
    pub fn accepted_by_all_reviewers(&self) -> bool {
        let mut reviewers = self
            .participants
            .iter()
            .filter(|p| p.role == ParticipantRole::Reviewer)
            .peekable();
        reviewers.peek().is_some() && reviewers.all(|p| p.state == Some(ReviewerState::Accepted))
    }

    /// Link to the merge request page on the remote web UI.
    pub fn web_url(&self, base_url: &str) -> String {
        format!(
            "{}/p/{}/reviews/{}/timeline",
            base_url.trim_end_matches('/'),
            self.project_key,
            self.number
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GitEntryType {
    File,
    Dir,
    Symlink,
    Submodule,
}

/// One entry of a repository tree listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GitEntry {
    pub path: String,
    #[serde(rename = "type")]
    pub kind: GitEntryType,
}

/// Cursor-paginated response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub data: Vec<T>,
    /// Opaque cursor for the next page; `None` once exhausted.
    #[serde(default)]
    pub next: Option<String>,
}

impl<T> Page<T> {
    pub fn last(data: Vec<T>) -> Self {
        Self { data, next: None }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next: Option<String>,
    #[serde(rename = "$top", skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mr(participants: Vec<Participant>) -> MergeRequestRecord {
        MergeRequestRecord {
            id: "mr-1".into(),
            number: 7,
            title: "Add thing".into(),
            project_key: "PRJ".into(),
            repository: "repo".into(),
            source_branch: "feature".into(),
            target_branch: "main".into(),
            source_commit: Some("abc".into()),
            state: MergeRequestState::Opened,
            last_updated: None,
            participants,
        }
    }

    fn reviewer(state: Option<ReviewerState>) -> Participant {
        Participant {
            user_id: "u".into(),
            role: ParticipantRole::Reviewer,
            state,
        }
    }

    #[test]
    fn test_accepted_by_all_reviewers() {
        assert!(!mr(vec![]).accepted_by_all_reviewers());
        assert!(mr(vec![reviewer(Some(ReviewerState::Accepted))]).accepted_by_all_reviewers());
        assert!(
            !mr(vec![
                reviewer(Some(ReviewerState::Accepted)),
                reviewer(Some(ReviewerState::Pending)),
            ])
            .accepted_by_all_reviewers()
        );
        assert!(!mr(vec![reviewer(None)]).accepted_by_all_reviewers());
    }

    #[test]
    fn test_web_url_trims_trailing_slash() {
        assert_eq!(
            mr(vec![]).web_url("https://acme.example.com/"),
            "https://acme.example.com/p/PRJ/reviews/7/timeline"
        );
    }

    #[test]
    fn test_branch_short_name() {
        let branch = BranchInfo {
            head: "refs/heads/release/1.0".into(),
            commit_id: "c".into(),
            last_updated: None,
        };
        assert_eq!(branch.short_name(), "release/1.0");
    }
}

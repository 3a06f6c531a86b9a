use serde::{Deserialize, Serialize};
use smallvec::smallvec;
use spacehook_sdk::objects::event_codes;
use spacehook_sdk::objects::{
    EventTypeCodes, MergeRequestRecord, SubscriptionDefinition, SubscriptionFilter,
};

use crate::utils::{BranchSpec, full_match_regex, webhook_name};

/// Which kind of remote events a trigger reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventSelection {
    Branches,
    MergeRequests,
}

impl std::fmt::Display for EventSelection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventSelection::Branches => write!(f, "branches"),
            EventSelection::MergeRequests => write!(f, "merge_requests"),
        }
    }
}

/// Conditions a merge request must satisfy to trigger a build.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MergeRequestFilters {
    /// Whole-title regex; `None` accepts every title.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title_regex: Option<String>,
    pub source_branch_spec: BranchSpec,
    pub target_branch_spec: BranchSpec,
    /// Build only once every reviewer accepted the changes.
    pub require_approval: bool,
}

impl MergeRequestFilters {
    /// Event codes the remote side should deliver for these filters.
    pub fn event_type_codes(&self) -> EventTypeCodes {
        let mut codes: EventTypeCodes = smallvec![];
        if !self.require_approval {
            codes.push(event_codes::CODE_REVIEW_CREATED.to_string());
        }
        codes.push(event_codes::CODE_REVIEW_COMMITS_UPDATED.to_string());
        codes.push(event_codes::CODE_REVIEW_TARGET_BRANCH_UPDATED.to_string());
        if self.require_approval {
            codes.push(event_codes::CODE_REVIEW_CHANGES_ACCEPTED.to_string());
        }
        if self.title_regex.is_some() {
            codes.push(event_codes::CODE_REVIEW_UPDATED.to_string());
        }
        codes
    }

    /// An invalid regex matches no title.
    pub fn title_matches(&self, title: &str) -> bool {
        match &self.title_regex {
            None => true,
            Some(pattern) => full_match_regex(pattern).is_some_and(|re| re.is_match(title)),
        }
    }

    pub fn matches(&self, mr: &MergeRequestRecord) -> bool {
        self.title_matches(&mr.title)
            && self.source_branch_spec.matches(&mr.source_branch)
            && self.target_branch_spec.matches(&mr.target_branch)
    }

    fn filter(&self, project_id: &str, repository: &str) -> SubscriptionFilter {
        SubscriptionFilter {
            project_id: project_id.to_string(),
            repository: repository.to_string(),
            branch_spec: self.source_branch_spec.lines().to_vec(),
            target_branch_spec: self.target_branch_spec.lines().to_vec(),
            title_regex: self.title_regex.clone(),
        }
    }
}

/// A build trigger declared on a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerSpec {
    pub id: String,
    /// Id of the connection the trigger subscribes through.
    pub connection: String,
    pub project_key: String,
    pub repository: String,
    pub event_selection: EventSelection,
    pub branch_spec: BranchSpec,
    pub merge_requests: MergeRequestFilters,
    /// Accept safe merge commands for the owning job.
    pub allow_safe_merge: bool,
}

impl TriggerSpec {
    pub fn webhook_name(&self) -> String {
        webhook_name(&self.id, &self.project_key, &self.repository)
    }

    /// The single subscription the trigger's webhook must carry.
    pub fn subscription(&self, project_id: &str) -> SubscriptionDefinition {
        match self.event_selection {
            EventSelection::Branches => SubscriptionDefinition {
                name: self.webhook_name(),
                subject_code: event_codes::SUBJECT_REPOSITORY_HEADS.to_string(),
                filter: SubscriptionFilter {
                    project_id: project_id.to_string(),
                    repository: self.repository.clone(),
                    branch_spec: self.branch_spec.lines().to_vec(),
                    ..Default::default()
                },
                event_type_codes: smallvec![event_codes::REPOSITORY_HEADS.to_string()],
            },
            EventSelection::MergeRequests => SubscriptionDefinition {
                name: self.webhook_name(),
                subject_code: event_codes::SUBJECT_CODE_REVIEW.to_string(),
                filter: self.merge_requests.filter(project_id, &self.repository),
                event_type_codes: self.merge_requests.event_type_codes(),
            },
        }
    }
}

/// Last known remote ids of a trigger's webhook and subscription.
///
/// Only a cache: every reconciliation looks the webhook up by name again.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteIds {
    pub webhook_id: Option<String>,
    pub subscription_id: Option<String>,
}

use std::collections::HashMap;
use std::time::Duration;

use smallvec::smallvec;
use spacehook_sdk::objects::event_codes;
use spacehook_sdk::objects::{SubscriptionDefinition, SubscriptionFilter};

use super::trigger::{MergeRequestFilters, RemoteIds, TriggerSpec};
use crate::utils::{BranchSpec, webhook_name};

/// A job that can be scheduled, with its webhook triggers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobRecord {
    /// Full job name, unique across the configuration.
    pub name: String,
    pub quiet_period: Duration,
    pub triggers: Vec<TriggerSpec>,
}

/// A multibranch source whose heads are discovered from the remote side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultibranchSource {
    pub id: String,
    pub connection: String,
    pub project_key: String,
    pub repository: String,
    pub branch_spec: BranchSpec,
    pub discover_branches: bool,
    pub discover_merge_requests: bool,
    pub merge_requests: MergeRequestFilters,
}

impl MultibranchSource {
    pub fn webhook_name(&self) -> String {
        webhook_name(&self.id, &self.project_key, &self.repository)
    }

    /// Subscription of the source's aggregate webhook.
    ///
    /// Branch pushes cover merge request source branches as well, so the
    /// code review subject is only used when branch discovery is off.
    pub fn subscription(&self, project_id: &str) -> SubscriptionDefinition {
        if self.discover_branches || !self.discover_merge_requests {
            SubscriptionDefinition {
                name: self.webhook_name(),
                subject_code: event_codes::SUBJECT_REPOSITORY_HEADS.to_string(),
                filter: SubscriptionFilter {
                    project_id: project_id.to_string(),
                    repository: self.repository.clone(),
                    ..Default::default()
                },
                event_type_codes: smallvec![event_codes::REPOSITORY_HEADS.to_string()],
            }
        } else {
            SubscriptionDefinition {
                name: self.webhook_name(),
                subject_code: event_codes::SUBJECT_CODE_REVIEW.to_string(),
                filter: SubscriptionFilter {
                    project_id: project_id.to_string(),
                    repository: self.repository.clone(),
                    ..Default::default()
                },
                event_type_codes: smallvec![
                    event_codes::CODE_REVIEW_CREATED.to_string(),
                    event_codes::CODE_REVIEW_COMMITS_UPDATED.to_string(),
                    event_codes::CODE_REVIEW_TARGET_BRANCH_UPDATED.to_string(),
                ],
            }
        }
    }
}

/// Immutable view of every configured job and source, plus the remote ids
/// recorded by previous reconciliations.
#[derive(Debug, Clone, Default)]
pub struct JobSnapshot {
    pub jobs: Vec<JobRecord>,
    pub sources: Vec<MultibranchSource>,
    /// Keyed by trigger id.
    pub trigger_ids: HashMap<String, RemoteIds>,
    /// Aggregate webhook id keyed by source id.
    pub source_webhooks: HashMap<String, String>,
}

impl JobSnapshot {
    pub fn new(jobs: Vec<JobRecord>, sources: Vec<MultibranchSource>) -> Self {
        Self {
            jobs,
            sources,
            ..Default::default()
        }
    }

    /// Every (job, trigger) pair.
    pub fn triggers(&self) -> impl Iterator<Item = (&JobRecord, &TriggerSpec)> {
        self.jobs
            .iter()
            .flat_map(|job| job.triggers.iter().map(move |t| (job, t)))
    }

    pub fn find_trigger(&self, trigger_id: &str) -> Option<(&JobRecord, &TriggerSpec)> {
        self.triggers().find(|(_, t)| t.id == trigger_id)
    }

    pub fn job(&self, name: &str) -> Option<&JobRecord> {
        self.jobs.iter().find(|j| j.name == name)
    }

    pub fn source(&self, id: &str) -> Option<&MultibranchSource> {
        self.sources.iter().find(|s| s.id == id)
    }

    pub fn remote_ids(&self, trigger_id: &str) -> Option<&RemoteIds> {
        self.trigger_ids.get(trigger_id)
    }

    /// Copy recorded remote ids over from `previous` for triggers and
    /// sources that still exist.
    pub fn carry_over_ids(&mut self, previous: &JobSnapshot) {
        let trigger_ids: Vec<(String, RemoteIds)> = self
            .triggers()
            .filter_map(|(_, t)| {
                previous
                    .trigger_ids
                    .get(&t.id)
                    .map(|ids| (t.id.clone(), ids.clone()))
            })
            .collect();
        self.trigger_ids.extend(trigger_ids);
        for source in &self.sources {
            if let Some(id) = previous.source_webhooks.get(&source.id) {
                self.source_webhooks.insert(source.id.clone(), id.clone());
            }
        }
    }
}

//! In-memory doubles of the remote API and the build engine.

#![allow(clippy::unwrap_used)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use spacehook_sdk::objects::{
    BranchInfo, CreateWebhookRequest, ExternalCheckReport, GitEntry, MergeRequestRecord,
    MergeRequestState, Page, PageRequest, RepositoryUrls, SubscriptionDefinition,
    SubscriptionRecord, UpdateWebhookRequest, WebhookRecord,
};

use crate::config::{Connection, ConnectionConfig, ConnectionRegistry};
use crate::entities::{BuildCause, EventSelection, JobRecord, MergeRequestFilters, TriggerSpec};
use crate::remote::{RemoteApi, RemoteError};
use crate::scheduler::{
    BuildId, BuildScheduler, BuildState, QueueItem, ScheduleError, ScheduleOutcome, SourceEvent,
};
use crate::utils::BranchSpec;

pub const CONNECTION_ID: &str = "main";
pub const CLIENT_ID: &str = "client-1";
pub const BASE_URL: &str = "https://acme.example.com";

#[derive(Default)]
struct FakeState {
    webhooks: Vec<(WebhookRecord, Vec<SubscriptionRecord>)>,
    branches: Vec<BranchInfo>,
    merge_requests: Vec<MergeRequestRecord>,
    files: HashMap<(String, String), Vec<GitEntry>>,
    reports: Vec<ExternalCheckReport>,
    calls: Vec<String>,
    failing: Vec<String>,
}

/// Remote API double that keeps webhooks in memory and logs every call.
pub struct FakeRemote {
    state: Mutex<FakeState>,
    next_id: AtomicU64,
    page_size: usize,
}

impl FakeRemote {
    pub fn new() -> Self {
        Self::with_page_size(100)
    }

    pub fn with_page_size(page_size: usize) -> Self {
        Self {
            state: Mutex::new(FakeState::default()),
            next_id: AtomicU64::new(1),
            page_size,
        }
    }

    fn id(&self, prefix: &str) -> String {
        format!("{prefix}-{}", self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    fn log(&self, call: String) -> Result<(), RemoteError> {
        let mut state = self.state.lock().unwrap();
        let fails = state.failing.iter().any(|f| call.starts_with(f.as_str()));
        state.calls.push(call.clone());
        if fails {
            return Err(RemoteError::Transient(format!("injected failure: {call}")));
        }
        Ok(())
    }

    /// Make every call whose log line starts with `prefix` fail.
    pub fn fail_on(&self, prefix: &str) {
        self.state.lock().unwrap().failing.push(prefix.to_string());
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.calls().iter().filter(|c| c.starts_with(prefix)).count()
    }

    pub fn clear_calls(&self) {
        self.state.lock().unwrap().calls.clear();
    }

    pub fn webhook_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .state
            .lock()
            .unwrap()
            .webhooks
            .iter()
            .map(|(w, _)| w.name.clone())
            .collect();
        names.sort();
        names
    }

    pub fn webhook_by_name(&self, name: &str) -> Option<WebhookRecord> {
        self.state
            .lock()
            .unwrap()
            .webhooks
            .iter()
            .find(|(w, _)| w.name == name)
            .map(|(w, _)| w.clone())
    }

    pub fn subscriptions_of(&self, webhook_id: &str) -> Vec<SubscriptionRecord> {
        self.state
            .lock()
            .unwrap()
            .webhooks
            .iter()
            .find(|(w, _)| w.id == webhook_id)
            .map(|(_, subs)| subs.clone())
            .unwrap_or_default()
    }

    /// Insert a webhook with `subscriptions` stale subscriptions.
    pub fn seed_webhook(&self, name: &str, subscriptions: usize) -> String {
        let webhook_id = self.id("wh");
        let subs = (0..subscriptions)
            .map(|i| SubscriptionRecord {
                id: self.id("sub"),
                name: format!("stale-{i}"),
                subject_code: "Repository.Heads".into(),
                filter: Default::default(),
                event_type_codes: Default::default(),
                enabled: true,
            })
            .collect();
        self.state.lock().unwrap().webhooks.push((
            WebhookRecord {
                id: webhook_id.clone(),
                name: name.to_string(),
                endpoint_url: None,
                active: true,
            },
            subs,
        ));
        webhook_id
    }

    pub fn add_branch(&self, name: &str, commit: &str) {
        self.state.lock().unwrap().branches.push(BranchInfo {
            head: format!("refs/heads/{name}"),
            commit_id: commit.to_string(),
            last_updated: Some(1_700_000_000_000),
        });
    }

    pub fn add_merge_request(&self, mr: MergeRequestRecord) {
        self.state.lock().unwrap().merge_requests.push(mr);
    }

    pub fn add_files(&self, commit: &str, path: &str, entries: Vec<GitEntry>) {
        self.state
            .lock()
            .unwrap()
            .files
            .insert((commit.to_string(), path.to_string()), entries);
    }

    pub fn reports(&self) -> Vec<ExternalCheckReport> {
        self.state.lock().unwrap().reports.clone()
    }

    fn page<T: Clone>(&self, items: &[T], page: &PageRequest) -> Page<T> {
        let start: usize = page.next.as_deref().and_then(|n| n.parse().ok()).unwrap_or(0);
        let end = (start + self.page_size).min(items.len());
        Page {
            data: items[start.min(end)..end].to_vec(),
            next: (end < items.len()).then(|| end.to_string()),
        }
    }
}

#[async_trait]
impl RemoteApi for FakeRemote {
    async fn project_id(&self, project_key: &str) -> Result<String, RemoteError> {
        self.log(format!("project_id:{project_key}"))?;
        Ok(format!("id-{project_key}"))
    }

    async fn repository_urls(
        &self,
        project_key: &str,
        repository: &str,
    ) -> Result<RepositoryUrls, RemoteError> {
        self.log(format!("repository_urls:{project_key}/{repository}"))?;
        Ok(RepositoryUrls {
            http_url: Some(format!("{BASE_URL}/git/{project_key}/{repository}.git")),
            ssh_url: None,
        })
    }

    async fn list_webhooks(&self) -> Result<Vec<WebhookRecord>, RemoteError> {
        self.log("list_webhooks".into())?;
        // A real listing suspends on the network; let other passes interleave.
        tokio::task::yield_now().await;
        Ok(self
            .state
            .lock()
            .unwrap()
            .webhooks
            .iter()
            .map(|(w, _)| w.clone())
            .collect())
    }

    async fn create_webhook(
        &self,
        request: &CreateWebhookRequest,
    ) -> Result<WebhookRecord, RemoteError> {
        self.log(format!("create_webhook:{}", request.name))?;
        let record = WebhookRecord {
            id: self.id("wh"),
            name: request.name.clone(),
            endpoint_url: Some(request.endpoint.url.clone()),
            active: true,
        };
        self.state
            .lock()
            .unwrap()
            .webhooks
            .push((record.clone(), vec![]));
        Ok(record)
    }

    async fn update_webhook(
        &self,
        webhook_id: &str,
        request: &UpdateWebhookRequest,
    ) -> Result<(), RemoteError> {
        self.log(format!("update_webhook:{webhook_id}"))?;
        let mut state = self.state.lock().unwrap();
        let (webhook, _) = state
            .webhooks
            .iter_mut()
            .find(|(w, _)| w.id == webhook_id)
            .ok_or_else(|| RemoteError::NotFound(webhook_id.to_string()))?;
        webhook.endpoint_url = Some(request.endpoint.url.clone());
        webhook.active = request.enabled;
        Ok(())
    }

    async fn delete_webhook(&self, webhook_id: &str) -> Result<(), RemoteError> {
        self.log(format!("delete_webhook:{webhook_id}"))?;
        self.state
            .lock()
            .unwrap()
            .webhooks
            .retain(|(w, _)| w.id != webhook_id);
        Ok(())
    }

    async fn list_subscriptions(
        &self,
        webhook_id: &str,
    ) -> Result<Vec<SubscriptionRecord>, RemoteError> {
        self.log(format!("list_subscriptions:{webhook_id}"))?;
        Ok(self.subscriptions_of(webhook_id))
    }

    async fn create_subscription(
        &self,
        webhook_id: &str,
        definition: &SubscriptionDefinition,
    ) -> Result<SubscriptionRecord, RemoteError> {
        self.log(format!("create_subscription:{webhook_id}"))?;
        let record = SubscriptionRecord {
            id: self.id("sub"),
            name: definition.name.clone(),
            subject_code: definition.subject_code.clone(),
            filter: definition.filter.clone(),
            event_type_codes: definition.event_type_codes.clone(),
            enabled: true,
        };
        let mut state = self.state.lock().unwrap();
        let (_, subs) = state
            .webhooks
            .iter_mut()
            .find(|(w, _)| w.id == webhook_id)
            .ok_or_else(|| RemoteError::NotFound(webhook_id.to_string()))?;
        subs.push(record.clone());
        Ok(record)
    }

    async fn update_subscription(
        &self,
        webhook_id: &str,
        subscription_id: &str,
        definition: &SubscriptionDefinition,
    ) -> Result<(), RemoteError> {
        self.log(format!("update_subscription:{webhook_id}/{subscription_id}"))?;
        let mut state = self.state.lock().unwrap();
        let sub = state
            .webhooks
            .iter_mut()
            .filter(|(w, _)| w.id == webhook_id)
            .flat_map(|(_, subs)| subs.iter_mut())
            .find(|s| s.id == subscription_id)
            .ok_or_else(|| RemoteError::NotFound(subscription_id.to_string()))?;
        sub.name = definition.name.clone();
        sub.subject_code = definition.subject_code.clone();
        sub.filter = definition.filter.clone();
        sub.event_type_codes = definition.event_type_codes.clone();
        Ok(())
    }

    async fn delete_subscription(
        &self,
        webhook_id: &str,
        subscription_id: &str,
    ) -> Result<(), RemoteError> {
        self.log(format!("delete_subscription:{webhook_id}/{subscription_id}"))?;
        for (w, subs) in self.state.lock().unwrap().webhooks.iter_mut() {
            if w.id == webhook_id {
                subs.retain(|s| s.id != subscription_id);
            }
        }
        Ok(())
    }

    async fn request_missing_rights(
        &self,
        webhook_id: &str,
        subscription_id: &str,
    ) -> Result<(), RemoteError> {
        self.log(format!("request_missing_rights:{webhook_id}/{subscription_id}"))
    }

    async fn report_external_check_status(
        &self,
        report: &ExternalCheckReport,
    ) -> Result<(), RemoteError> {
        self.log(format!("report_status:{}", report.revision))?;
        self.state.lock().unwrap().reports.push(report.clone());
        Ok(())
    }

    async fn list_branches(
        &self,
        project_key: &str,
        repository: &str,
        page: &PageRequest,
    ) -> Result<Page<BranchInfo>, RemoteError> {
        self.log(format!("list_branches:{project_key}/{repository}"))?;
        let branches = self.state.lock().unwrap().branches.clone();
        Ok(self.page(&branches, page))
    }

    async fn list_merge_requests(
        &self,
        project_key: &str,
        repository: &str,
        page: &PageRequest,
    ) -> Result<Page<MergeRequestRecord>, RemoteError> {
        self.log(format!("list_merge_requests:{project_key}/{repository}"))?;
        let open: Vec<MergeRequestRecord> = self
            .state
            .lock()
            .unwrap()
            .merge_requests
            .iter()
            .filter(|mr| mr.state == MergeRequestState::Opened)
            .cloned()
            .collect();
        Ok(self.page(&open, page))
    }

    async fn get_merge_request(
        &self,
        project_id: &str,
        merge_request_id: &str,
    ) -> Result<MergeRequestRecord, RemoteError> {
        self.log(format!("get_merge_request:{project_id}/{merge_request_id}"))?;
        self.state
            .lock()
            .unwrap()
            .merge_requests
            .iter()
            .find(|mr| mr.id == merge_request_id)
            .cloned()
            .ok_or_else(|| RemoteError::NotFound(merge_request_id.to_string()))
    }

    async fn list_files(
        &self,
        project_key: &str,
        repository: &str,
        commit: &str,
        path: &str,
    ) -> Result<Vec<GitEntry>, RemoteError> {
        self.log(format!("list_files:{project_key}/{repository}@{commit}:{path}"))?;
        Ok(self
            .state
            .lock()
            .unwrap()
            .files
            .get(&(commit.to_string(), path.to_string()))
            .cloned()
            .unwrap_or_default())
    }
}

/// Build engine double that records scheduled builds.
#[derive(Default)]
pub struct RecordingScheduler {
    pub scheduled: Mutex<Vec<(String, Duration, BuildCause)>>,
    pub source_events: Mutex<Vec<SourceEvent>>,
    pub refuse: std::sync::atomic::AtomicBool,
    /// Jobs whose scheduling fails with [`ScheduleError::Unavailable`].
    pub failing_jobs: Mutex<Vec<String>>,
    builds: Mutex<HashMap<(String, BuildId), BuildState>>,
}

impl RecordingScheduler {
    pub fn add_build(&self, job: &str, id: BuildId, state: BuildState) {
        self.builds.lock().unwrap().insert((job.to_string(), id), state);
    }

    pub fn build(&self, job: &str, id: BuildId) -> Option<BuildState> {
        self.builds.lock().unwrap().get(&(job.to_string(), id)).cloned()
    }

    pub fn scheduled_jobs(&self) -> Vec<String> {
        self.scheduled
            .lock()
            .unwrap()
            .iter()
            .map(|(job, _, _)| job.clone())
            .collect()
    }
}

#[async_trait]
impl BuildScheduler for RecordingScheduler {
    async fn schedule(
        &self,
        job: &str,
        quiet_period: Duration,
        cause: BuildCause,
    ) -> Result<ScheduleOutcome, ScheduleError> {
        if self.refuse.load(Ordering::Relaxed) {
            return Ok(ScheduleOutcome::Refused);
        }
        if self.failing_jobs.lock().unwrap().iter().any(|j| j == job) {
            return Err(ScheduleError::Unavailable(format!("{job} is offline")));
        }
        let mut scheduled = self.scheduled.lock().unwrap();
        scheduled.push((job.to_string(), quiet_period, cause));
        Ok(ScheduleOutcome::Queued(QueueItem {
            id: format!("queue-{}", scheduled.len()),
            url: None,
        }))
    }

    async fn notify_source_event(&self, event: SourceEvent) -> Result<(), ScheduleError> {
        self.source_events.lock().unwrap().push(event);
        Ok(())
    }

    async fn cancel(&self, job: &str, build: BuildId) -> Result<Option<BuildState>, ScheduleError> {
        let mut builds = self.builds.lock().unwrap();
        let state = builds
            .get_mut(&(job.to_string(), build))
            .ok_or_else(|| ScheduleError::UnknownBuild(build.to_string()))?;
        match state {
            BuildState::QueueItem { cancelled, .. } if !*cancelled => *cancelled = true,
            BuildState::Build {
                in_progress,
                result,
                ..
            } if *in_progress => {
                *in_progress = false;
                *result = Some("ABORTED".into());
            }
            _ => return Ok(None),
        }
        Ok(Some(state.clone()))
    }

    async fn build_state(&self, job: &str, build: BuildId) -> Result<BuildState, ScheduleError> {
        self.build(job, build)
            .ok_or_else(|| ScheduleError::UnknownBuild(build.to_string()))
    }
}

pub fn queued(id: u64) -> BuildState {
    BuildState::QueueItem {
        id: BuildId::QueueItem(id).to_string(),
        url: None,
        cancelled: false,
        stuck: false,
        why: Some("Waiting for next available executor".into()),
    }
}

pub fn running(number: u32) -> BuildState {
    BuildState::Build {
        id: BuildId::Build(number).to_string(),
        url: None,
        display_name: format!("#{number}"),
        in_progress: true,
        duration_ms: 0,
        result: None,
        queue_id: None,
    }
}

pub fn connection_config() -> ConnectionConfig {
    ConnectionConfig {
        id: CONNECTION_ID.into(),
        base_url: BASE_URL.into(),
        client_id: CLIENT_ID.into(),
    }
}

pub fn registry(remote: Arc<FakeRemote>) -> Arc<ConnectionRegistry> {
    Arc::new(ConnectionRegistry::new([Connection {
        config: connection_config(),
        remote,
    }]))
}

pub fn branches_trigger(id: &str) -> TriggerSpec {
    TriggerSpec {
        id: id.into(),
        connection: CONNECTION_ID.into(),
        project_key: "PRJ".into(),
        repository: "repo".into(),
        event_selection: EventSelection::Branches,
        branch_spec: BranchSpec::default(),
        merge_requests: MergeRequestFilters::default(),
        allow_safe_merge: false,
    }
}

pub fn merge_request_trigger(id: &str) -> TriggerSpec {
    TriggerSpec {
        event_selection: EventSelection::MergeRequests,
        ..branches_trigger(id)
    }
}

pub fn job(name: &str, triggers: Vec<TriggerSpec>) -> JobRecord {
    JobRecord {
        name: name.into(),
        quiet_period: Duration::from_secs(5),
        triggers,
    }
}

pub fn merge_request(id: &str, number: u32, title: &str) -> MergeRequestRecord {
    MergeRequestRecord {
        id: id.into(),
        number,
        title: title.into(),
        project_key: "PRJ".into(),
        repository: "repo".into(),
        source_branch: format!("feature/{number}"),
        target_branch: "main".into(),
        source_commit: Some(format!("c-{number}")),
        state: MergeRequestState::Opened,
        last_updated: Some(1_700_000_000_000),
        participants: vec![],
    }
}

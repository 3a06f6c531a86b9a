//! Dispatcher processor.
//!
//! Correlates inbound webhook deliveries with the triggers whose
//! subscription produced them and schedules builds on the matched jobs.
//! Correlation is by subscription id: two triggers on the same repository
//! with different event selections own different subscriptions.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use kanau::processor::Processor;
use serde_json::{Value, json};
use spacehook_sdk::objects::{
    CodeReviewAction, CodeReviewEvent, PayloadError, RepoPushEvent, SafeMergeBuildRef,
    SafeMergeCommand, WebhookEnvelope, WebhookEvent,
};
use tracing::{debug, error, info, warn};

use crate::config::{Connection, ConnectionConfig, ConnectionRegistry};
use crate::entities::{
    BuildCause, EventSelection, JobRecord, JobSnapshot, SafeMergeCause, TriggerSpec,
};
use crate::events::{InboundEvent, ReconcileRequest, ReconcileRequestSender};
use crate::remote::{RemoteError, bounded};
use crate::scheduler::{BuildId, BuildScheduler, ScheduleError, ScheduleOutcome, SourceEvent};
use crate::store::JobConfigStore;
use crate::utils::WebhookName;

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("unsupported content type: {}", .0.as_deref().unwrap_or("none"))]
    UnsupportedContentType(Option<String>),

    #[error("malformed envelope: {0}")]
    MalformedEnvelope(#[from] serde_json::Error),

    #[error(transparent)]
    Payload(#[from] PayloadError),

    #[error("unknown job: {0}")]
    UnknownJob(String),

    #[error("safe merge is not enabled for job {0}")]
    SafeMergeNotEnabled(String),

    #[error("build of job {0} was refused")]
    BuildRefused(String),

    #[error("no connection for client id {0}")]
    UnknownClient(String),

    #[error(transparent)]
    Schedule(#[from] ScheduleError),

    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error("dispatch timed out")]
    Timeout,
}

impl DispatchError {
    /// HTTP status reported back to the remote side.
    pub fn status(&self) -> u16 {
        match self {
            DispatchError::UnsupportedContentType(_) => 415,
            DispatchError::MalformedEnvelope(_) | DispatchError::Payload(_) => 400,
            DispatchError::SafeMergeNotEnabled(_) | DispatchError::UnknownClient(_) => 401,
            DispatchError::UnknownJob(_) => 404,
            DispatchError::BuildRefused(_) => 409,
            DispatchError::Schedule(ScheduleError::InvalidBuildId(_)) => 400,
            DispatchError::Schedule(ScheduleError::UnknownJob(_) | ScheduleError::UnknownBuild(_)) => {
                404
            }
            DispatchError::Schedule(ScheduleError::Unavailable(_)) | DispatchError::Remote(_) => 500,
            DispatchError::Timeout => 504,
        }
    }
}

/// Status code and optional JSON body returned for one delivery.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchResponse {
    pub status: u16,
    pub body: Option<Value>,
}

impl DispatchResponse {
    fn new(status: u16, body: Value) -> Self {
        Self {
            status,
            body: Some(body),
        }
    }

    fn empty(status: u16) -> Self {
        Self { status, body: None }
    }

    fn from_error(error: &DispatchError) -> Self {
        Self::new(error.status(), json!({ "error": error.to_string() }))
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Verdict of deep validation of an event against one matched trigger.
#[derive(Debug, Clone, PartialEq)]
pub enum TriggerDecision {
    RunBuild(BuildCause),
    /// Legitimate event that the trigger's filters exclude.
    Ignored(&'static str),
    /// The subscription should not have delivered this event; its remote
    /// state is probably stale.
    Unexpected(&'static str),
}

pub struct Dispatcher {
    connections: Arc<ConnectionRegistry>,
    store: Arc<dyn JobConfigStore>,
    scheduler: Arc<dyn BuildScheduler>,
    reconcile_tx: Option<ReconcileRequestSender>,
    call_timeout: Duration,
    dispatch_timeout: Duration,
}

impl Dispatcher {
    pub fn new(
        connections: Arc<ConnectionRegistry>,
        store: Arc<dyn JobConfigStore>,
        scheduler: Arc<dyn BuildScheduler>,
        call_timeout: Duration,
        dispatch_timeout: Duration,
    ) -> Self {
        Self {
            connections,
            store,
            scheduler,
            reconcile_tx: None,
            call_timeout,
            dispatch_timeout,
        }
    }

    /// Route resync requests for stale triggers to the reconcile worker.
    pub fn with_reconcile_requests(mut self, tx: ReconcileRequestSender) -> Self {
        self.reconcile_tx = Some(tx);
        self
    }

    /// Handle one raw delivery. Never fails: errors become status codes.
    pub async fn dispatch(&self, content_type: Option<&str>, body: &[u8]) -> DispatchResponse {
        let result = tokio::time::timeout(self.dispatch_timeout, self.try_dispatch(content_type, body))
            .await
            .unwrap_or(Err(DispatchError::Timeout));
        match result {
            Ok(response) => response,
            Err(e) => {
                if e.status() >= 500 {
                    error!(error = %e, "Failed to dispatch webhook delivery");
                } else {
                    warn!(error = %e, status = e.status(), "Rejected webhook delivery");
                }
                DispatchResponse::from_error(&e)
            }
        }
    }

    #[tracing::instrument(skip_all, name = "Dispatcher::dispatch")]
    async fn try_dispatch(
        &self,
        content_type: Option<&str>,
        body: &[u8],
    ) -> Result<DispatchResponse, DispatchError> {
        if !content_type.is_some_and(is_json) {
            return Err(DispatchError::UnsupportedContentType(
                content_type.map(str::to_string),
            ));
        }
        let envelope: WebhookEnvelope = serde_json::from_slice(body)?;
        let event = envelope.decode()?;
        debug!(
            event_type = %envelope.event_type_code,
            webhook_id = envelope.webhook_id.as_deref().unwrap_or_default(),
            subscription_id = envelope.subscription_id.as_deref().unwrap_or_default(),
            "Decoded webhook delivery"
        );

        match &event {
            WebhookEvent::SafeMerge(command) => return self.safe_merge(&envelope, command).await,
            WebhookEvent::SafeMergeStop(build) => {
                return self.stop_safe_merge(&envelope, build).await;
            }
            WebhookEvent::SafeMergeStatus(build) => {
                return self.safe_merge_status(&envelope, build).await;
            }
            WebhookEvent::RepoPush(_) | WebhookEvent::CodeReview(_) => {}
        }

        let snapshot = self.store.snapshot().await;
        let mut sources = matching_sources(&snapshot, &envelope);
        let mut triggers = matching_triggers(&snapshot, &envelope);

        if triggers.is_empty() && sources.is_empty() {
            let owner = self
                .owner_by_webhook_name(&envelope)
                .await
                .unwrap_or_else(|e| {
                    warn!(error = %e, "Webhook name lookup failed, treating delivery as unmatched");
                    None
                });
            if let Some(owner) = owner {
                if let Some(found) = snapshot.find_trigger(&owner) {
                    triggers.push(found);
                    self.request_resync(ReconcileRequest::Trigger(owner));
                } else if snapshot.source(&owner).is_some() {
                    sources.push(owner.clone());
                    self.request_resync(ReconcileRequest::Source(owner));
                }
            }
        }

        for source_id in &sources {
            if let Some(source_event) = source_event(source_id, &event) {
                self.scheduler.notify_source_event(source_event).await?;
            }
        }

        if triggers.is_empty() {
            if sources.is_empty() {
                info!(
                    event_type = %envelope.event_type_code,
                    subscription_id = envelope.subscription_id.as_deref().unwrap_or_default(),
                    "No trigger matches delivery"
                );
                return Ok(DispatchResponse::new(200, json!({ "status": "unmatched" })));
            }
            return Ok(DispatchResponse::new(
                202,
                json!({ "status": "indexed", "sources": sources }),
            ));
        }

        let mut scheduled = Vec::new();
        let mut ignored = 0usize;
        let mut failed = Vec::new();
        let mut first_failure = None;
        for (job, trigger) in triggers {
            let Some(connection) = self.connections.get(&trigger.connection) else {
                warn!(trigger_id = %trigger.id, connection = %trigger.connection, "Trigger references an unknown connection");
                ignored += 1;
                continue;
            };
            match evaluate(trigger, &connection.config, &event) {
                TriggerDecision::RunBuild(cause) => {
                    match self.schedule(job, job.quiet_period, cause).await {
                        Ok(_) => scheduled.push(job.name.clone()),
                        Err(e) => {
                            error!(job = %job.name, error = %e, "Failed to schedule build");
                            failed.push(json!({ "job": job.name, "error": e.to_string() }));
                            first_failure.get_or_insert(e);
                        }
                    }
                }
                TriggerDecision::Ignored(reason) => {
                    debug!(job = %job.name, trigger_id = %trigger.id, reason, "Event ignored by trigger filters");
                    ignored += 1;
                }
                TriggerDecision::Unexpected(reason) => {
                    warn!(job = %job.name, trigger_id = %trigger.id, reason, "Unexpected event for trigger, requesting resync");
                    self.request_resync(ReconcileRequest::Trigger(trigger.id.clone()));
                    ignored += 1;
                }
            }
        }

        // A retry would queue the already scheduled jobs again, so only a
        // delivery that scheduled nothing is reported as failed.
        if scheduled.is_empty() {
            if let Some(e) = first_failure {
                return Err(e);
            }
        }
        let status = if scheduled.is_empty() { 202 } else { 200 };
        let mut body = json!({ "scheduled": scheduled, "ignored": ignored });
        if !failed.is_empty() {
            body["failed"] = Value::Array(failed);
        }
        Ok(DispatchResponse::new(status, body))
    }

    /// Resolve the job named by a safe merge request and check that the
    /// delivering connection may run safe merges on it.
    fn authorize_safe_merge<'a>(
        &'a self,
        snapshot: &'a JobSnapshot,
        envelope: &WebhookEnvelope,
        project: &str,
    ) -> Result<(&'a JobRecord, &'a Connection), DispatchError> {
        let job = snapshot
            .job(project)
            .ok_or_else(|| DispatchError::UnknownJob(project.to_string()))?;

        let client_id = envelope.client_id.as_deref().unwrap_or_default();
        let connection = self
            .connections
            .by_client_id(client_id)
            .ok_or_else(|| DispatchError::UnknownClient(client_id.to_string()))?;
        let enabled = job
            .triggers
            .iter()
            .any(|t| t.allow_safe_merge && t.connection == connection.config.id);
        if !enabled {
            return Err(DispatchError::SafeMergeNotEnabled(job.name.clone()));
        }
        Ok((job, connection))
    }

    async fn safe_merge(
        &self,
        envelope: &WebhookEnvelope,
        command: &SafeMergeCommand,
    ) -> Result<DispatchResponse, DispatchError> {
        let snapshot = self.store.snapshot().await;
        let (job, connection) = self.authorize_safe_merge(&snapshot, envelope, &command.project)?;

        let merge_request = bounded(
            self.call_timeout,
            connection
                .remote
                .get_merge_request(&command.project_id, &command.merge_request_id),
        )
        .await?;
        let cause = BuildCause::merge_request(
            &connection.config,
            &merge_request,
            Some(SafeMergeCause::from(command)),
        );

        let item = self.schedule(job, Duration::ZERO, cause).await?;
        info!(job = %job.name, branch = %command.branch, dry_run = command.is_dry_run, "Safe merge build queued");
        Ok(DispatchResponse::new(200, json!(item)))
    }

    async fn stop_safe_merge(
        &self,
        envelope: &WebhookEnvelope,
        build: &SafeMergeBuildRef,
    ) -> Result<DispatchResponse, DispatchError> {
        let snapshot = self.store.snapshot().await;
        let (job, _) = self.authorize_safe_merge(&snapshot, envelope, &build.project)?;
        let build_id: BuildId = build.build_id.parse()?;

        match self.scheduler.cancel(&job.name, build_id).await? {
            Some(state) => {
                info!(job = %job.name, build = %build_id, "Safe merge build stopped");
                Ok(DispatchResponse::new(200, json!(state)))
            }
            None => {
                debug!(job = %job.name, build = %build_id, "Safe merge build already finished");
                Ok(DispatchResponse::empty(200))
            }
        }
    }

    async fn safe_merge_status(
        &self,
        envelope: &WebhookEnvelope,
        build: &SafeMergeBuildRef,
    ) -> Result<DispatchResponse, DispatchError> {
        let snapshot = self.store.snapshot().await;
        let (job, _) = self.authorize_safe_merge(&snapshot, envelope, &build.project)?;
        let build_id: BuildId = build.build_id.parse()?;

        let state = self.scheduler.build_state(&job.name, build_id).await?;
        Ok(DispatchResponse::new(200, json!(state)))
    }

    async fn schedule(
        &self,
        job: &JobRecord,
        quiet_period: Duration,
        cause: BuildCause,
    ) -> Result<crate::scheduler::QueueItem, DispatchError> {
        info!(job = %job.name, cause = cause.short_description(), "Scheduling build");
        match self.scheduler.schedule(&job.name, quiet_period, cause).await? {
            ScheduleOutcome::Queued(item) => Ok(item),
            ScheduleOutcome::Refused => Err(DispatchError::BuildRefused(job.name.clone())),
        }
    }

    /// Resolve the owner of the delivering webhook from its canonical name.
    async fn owner_by_webhook_name(
        &self,
        envelope: &WebhookEnvelope,
    ) -> Result<Option<String>, DispatchError> {
        let (Some(client_id), Some(webhook_id)) = (&envelope.client_id, &envelope.webhook_id)
        else {
            return Ok(None);
        };
        let Some(connection) = self.connections.by_client_id(client_id) else {
            return Ok(None);
        };
        let webhooks = bounded(self.call_timeout, connection.remote.list_webhooks()).await?;
        let owner = webhooks
            .iter()
            .find(|w| &w.id == webhook_id)
            .and_then(|w| WebhookName::parse(&w.name))
            .map(|name| name.owner_id);
        if let Some(owner) = &owner {
            debug!(owner_id = %owner, "Matched delivery by webhook name");
        }
        Ok(owner)
    }

    fn request_resync(&self, request: ReconcileRequest) {
        if let Some(tx) = &self.reconcile_tx {
            if let Err(e) = tx.try_send(request) {
                warn!(error = %e, "Cannot queue resync request");
            }
        }
    }
}

fn is_json(content_type: &str) -> bool {
    let media_type = content_type.split(';').next().unwrap_or_default().trim();
    media_type.eq_ignore_ascii_case("application/json")
        || media_type.to_ascii_lowercase().ends_with("+json")
}

fn matching_triggers<'a>(
    snapshot: &'a JobSnapshot,
    envelope: &WebhookEnvelope,
) -> Vec<(&'a JobRecord, &'a TriggerSpec)> {
    let Some(subscription_id) = envelope.subscription_id.as_deref() else {
        return Vec::new();
    };
    snapshot
        .triggers()
        .filter(|(_, t)| {
            snapshot
                .remote_ids(&t.id)
                .and_then(|ids| ids.subscription_id.as_deref())
                == Some(subscription_id)
        })
        .collect()
}

fn matching_sources(snapshot: &JobSnapshot, envelope: &WebhookEnvelope) -> Vec<String> {
    let Some(webhook_id) = envelope.webhook_id.as_deref() else {
        return Vec::new();
    };
    snapshot
        .source_webhooks
        .iter()
        .filter(|(_, id)| id.as_str() == webhook_id)
        .map(|(source, _)| source.clone())
        .collect()
}

fn source_event(source_id: &str, event: &WebhookEvent) -> Option<SourceEvent> {
    match event {
        WebhookEvent::RepoPush(push) => Some(SourceEvent {
            source_id: source_id.to_string(),
            head: push.head.clone(),
            commit: if push.deleted {
                None
            } else {
                push.new_commit_id.clone()
            },
        }),
        WebhookEvent::CodeReview(review) => review.review.as_ref().map(|mr| SourceEvent {
            source_id: source_id.to_string(),
            head: format!("MR-{}", mr.number),
            commit: mr.source_commit.clone(),
        }),
        WebhookEvent::SafeMerge(_)
        | WebhookEvent::SafeMergeStop(_)
        | WebhookEvent::SafeMergeStatus(_) => None,
    }
}

/// Validate an event against a trigger already matched by subscription id.
pub fn evaluate(
    trigger: &TriggerSpec,
    connection: &ConnectionConfig,
    event: &WebhookEvent,
) -> TriggerDecision {
    match (trigger.event_selection, event) {
        (EventSelection::Branches, WebhookEvent::RepoPush(push)) => {
            evaluate_push(trigger, connection, push)
        }
        (EventSelection::MergeRequests, WebhookEvent::CodeReview(review)) => {
            evaluate_review(trigger, connection, review)
        }
        _ => TriggerDecision::Unexpected("event type does not fit the trigger"),
    }
}

fn evaluate_push(
    trigger: &TriggerSpec,
    connection: &ConnectionConfig,
    push: &RepoPushEvent,
) -> TriggerDecision {
    if push.project_key != trigger.project_key || push.repository != trigger.repository {
        return TriggerDecision::Unexpected("push to another repository");
    }
    if push.deleted {
        return TriggerDecision::Ignored("branch deleted");
    }
    let Some(commit) = push.new_commit_id.as_deref() else {
        return TriggerDecision::Unexpected("push without a new commit");
    };
    if !trigger.branch_spec.matches(&push.head) {
        return TriggerDecision::Ignored("branch excluded by branch spec");
    }
    TriggerDecision::RunBuild(BuildCause::branch_push(connection, push, commit))
}

fn evaluate_review(
    trigger: &TriggerSpec,
    connection: &ConnectionConfig,
    event: &CodeReviewEvent,
) -> TriggerDecision {
    let filters = &trigger.merge_requests;
    let Some(mr) = event.review.as_ref().filter(|_| !event.commit_set_review) else {
        return TriggerDecision::Unexpected("code review is not a merge request");
    };
    if mr.project_key != trigger.project_key || mr.repository != trigger.repository {
        return TriggerDecision::Unexpected("merge request in another repository");
    }

    match event.action {
        CodeReviewAction::Created if filters.require_approval => {
            return TriggerDecision::Unexpected("creation while approval is required");
        }
        CodeReviewAction::Updated => {
            if filters.title_regex.is_none() {
                return TriggerDecision::Unexpected("title update without a title filter");
            }
            let change = event.title_change.as_ref();
            let new_matches = change
                .and_then(|c| c.new.as_deref())
                .is_some_and(|t| filters.title_matches(t));
            let old_matched = change
                .and_then(|c| c.old.as_deref())
                .is_some_and(|t| filters.title_matches(t));
            if !new_matches || old_matched {
                return TriggerDecision::Ignored("title change does not enter the filter");
            }
        }
        CodeReviewAction::ParticipantChanged if !filters.require_approval => {
            return TriggerDecision::Unexpected("participant change without approval filter");
        }
        _ => {}
    }

    if filters.require_approval && !mr.accepted_by_all_reviewers() {
        return TriggerDecision::Ignored("not every reviewer accepted");
    }
    if !filters.matches(mr) {
        return TriggerDecision::Ignored("merge request excluded by filters");
    }
    TriggerDecision::RunBuild(BuildCause::merge_request(connection, mr, None))
}

// ---------------------------------------------------------------------------
// Processor trait implementation
// ---------------------------------------------------------------------------

impl Processor<InboundEvent> for Dispatcher {
    type Output = DispatchResponse;
    type Error = Infallible;

    async fn process(&self, event: InboundEvent) -> Result<DispatchResponse, Infallible> {
        Ok(self.dispatch(event.content_type.as_deref(), &event.body).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{CauseDetails, RemoteIds};
    use crate::events::reconcile_request_channel;
    use crate::store::InMemoryJobStore;
    use crate::testing::{
        CLIENT_ID, FakeRemote, RecordingScheduler, branches_trigger, connection_config, job,
        merge_request, merge_request_trigger, queued, registry, running,
    };
    use spacehook_sdk::objects::{
        MergeRequestRecord, Participant, ParticipantRole, ReviewerState, TitleChange, event_codes,
    };

    struct Harness {
        remote: Arc<FakeRemote>,
        store: Arc<InMemoryJobStore>,
        scheduler: Arc<RecordingScheduler>,
        dispatcher: Dispatcher,
    }

    fn harness(jobs: Vec<JobRecord>) -> Harness {
        let remote = Arc::new(FakeRemote::new());
        let store = Arc::new(InMemoryJobStore::new(jobs, vec![]));
        let scheduler = Arc::new(RecordingScheduler::default());
        let dispatcher = Dispatcher::new(
            registry(remote.clone()),
            store.clone(),
            scheduler.clone(),
            Duration::from_secs(5),
            Duration::from_secs(10),
        );
        Harness {
            remote,
            store,
            scheduler,
            dispatcher,
        }
    }

    async fn link(store: &InMemoryJobStore, trigger_id: &str, webhook: &str, subscription: &str) {
        store
            .record_trigger_ids(
                trigger_id,
                RemoteIds {
                    webhook_id: Some(webhook.into()),
                    subscription_id: Some(subscription.into()),
                },
            )
            .await
            .unwrap();
    }

    fn delivery(webhook: &str, subscription: &str, code: &str, payload: Value) -> Vec<u8> {
        serde_json::to_vec(&json!({
            "clientId": CLIENT_ID,
            "webhookId": webhook,
            "subscriptionId": subscription,
            "eventTypeCode": code,
            "payload": payload,
        }))
        .unwrap()
    }

    fn push(head: &str, commit: &str) -> Value {
        json!({
            "projectKey": "PRJ",
            "repository": "repo",
            "head": head,
            "newCommitId": commit,
        })
    }

    fn review(number: u32, title: &str) -> Value {
        json!({ "review": serde_json::to_value(merge_request("mr-1", number, title)).unwrap() })
    }

    const JSON: Option<&str> = Some("application/json");

    #[tokio::test]
    async fn test_rejects_non_json_content_type() {
        let h = harness(vec![]);
        let response = h.dispatcher.dispatch(Some("text/plain"), b"{}").await;
        assert_eq!(response.status, 415);
        let response = h.dispatcher.dispatch(None, b"{}").await;
        assert_eq!(response.status, 415);
    }

    #[tokio::test]
    async fn test_rejects_malformed_envelope() {
        let h = harness(vec![]);
        let response = h
            .dispatcher
            .dispatch(Some("application/json; charset=utf-8"), b"not json")
            .await;
        assert_eq!(response.status, 400);
    }

    #[tokio::test]
    async fn test_correlates_by_subscription_id() {
        let h = harness(vec![
            job("branches", vec![branches_trigger("t-branches")]),
            job("reviews", vec![merge_request_trigger("t-reviews")]),
        ]);
        link(&h.store, "t-branches", "wh-1", "sub-1").await;
        link(&h.store, "t-reviews", "wh-2", "sub-2").await;

        let body = delivery("wh-1", "sub-1", event_codes::REPOSITORY_HEADS, push("refs/heads/main", "abc"));
        let response = h.dispatcher.dispatch(JSON, &body).await;
        assert_eq!(response.status, 200);
        assert_eq!(h.scheduler.scheduled_jobs(), vec!["branches".to_string()]);

        let body = delivery("wh-2", "sub-2", event_codes::CODE_REVIEW_COMMITS_UPDATED, review(7, "Add feature"));
        let response = h.dispatcher.dispatch(JSON, &body).await;
        assert_eq!(response.status, 200);
        assert_eq!(
            h.scheduler.scheduled_jobs(),
            vec!["branches".to_string(), "reviews".to_string()]
        );

        let scheduled = h.scheduler.scheduled.lock().unwrap();
        let (_, quiet_period, cause) = &scheduled[1];
        assert_eq!(*quiet_period, Duration::from_secs(5));
        assert!(matches!(
            &cause.details,
            CauseDetails::MergeRequest { merge_request, safe_merge: None } if merge_request.number == 7
        ));
    }

    #[tokio::test]
    async fn test_unmatched_delivery_succeeds_without_builds() {
        let h = harness(vec![job("branches", vec![branches_trigger("t1")])]);
        link(&h.store, "t1", "wh-1", "sub-1").await;

        let body = delivery("wh-9", "sub-9", event_codes::REPOSITORY_HEADS, push("refs/heads/main", "abc"));
        let response = h.dispatcher.dispatch(JSON, &body).await;

        assert_eq!(response.status, 200);
        assert!(response.is_success());
        assert!(h.scheduler.scheduled_jobs().is_empty());
    }

    #[tokio::test]
    async fn test_falls_back_to_webhook_name_and_requests_resync() {
        let (tx, mut rx) = reconcile_request_channel();
        let mut h = harness(vec![job("branches", vec![branches_trigger("t1")])]);
        h.dispatcher = h.dispatcher.with_reconcile_requests(tx);
        let webhook_id = h.remote.seed_webhook("t1|PRJ|repo", 1);

        let body = delivery(&webhook_id, "sub-unknown", event_codes::REPOSITORY_HEADS, push("refs/heads/main", "abc"));
        let response = h.dispatcher.dispatch(JSON, &body).await;

        assert_eq!(response.status, 200);
        assert_eq!(h.scheduler.scheduled_jobs(), vec!["branches".to_string()]);
        assert_eq!(rx.try_recv().unwrap(), ReconcileRequest::Trigger("t1".into()));
    }

    #[tokio::test]
    async fn test_filtered_events_are_ignored() {
        let mut trigger = branches_trigger("t1");
        trigger.branch_spec = crate::utils::BranchSpec::new(["release/*"]);
        let h = harness(vec![job("branches", vec![trigger])]);
        link(&h.store, "t1", "wh-1", "sub-1").await;

        let body = delivery("wh-1", "sub-1", event_codes::REPOSITORY_HEADS, push("refs/heads/main", "abc"));
        let response = h.dispatcher.dispatch(JSON, &body).await;

        assert_eq!(response.status, 202);
        assert!(h.scheduler.scheduled_jobs().is_empty());
    }

    #[tokio::test]
    async fn test_unexpected_event_requests_resync() {
        let (tx, mut rx) = reconcile_request_channel();
        let mut h = harness(vec![job("branches", vec![branches_trigger("t1")])]);
        h.dispatcher = h.dispatcher.with_reconcile_requests(tx);
        link(&h.store, "t1", "wh-1", "sub-1").await;

        let body = delivery("wh-1", "sub-1", event_codes::CODE_REVIEW_CREATED, review(1, "x"));
        let response = h.dispatcher.dispatch(JSON, &body).await;

        assert_eq!(response.status, 202);
        assert!(h.scheduler.scheduled_jobs().is_empty());
        assert_eq!(rx.try_recv().unwrap(), ReconcileRequest::Trigger("t1".into()));
    }

    #[test]
    fn test_push_validation() {
        let trigger = branches_trigger("t1");
        let connection = connection_config();
        let mut event = RepoPushEvent {
            project_key: "PRJ".into(),
            repository: "repo".into(),
            head: "refs/heads/main".into(),
            old_commit_id: None,
            new_commit_id: Some("abc".into()),
            created: false,
            deleted: false,
        };
        assert!(matches!(
            evaluate(&trigger, &connection, &WebhookEvent::RepoPush(event.clone())),
            TriggerDecision::RunBuild(_)
        ));

        event.deleted = true;
        assert_eq!(
            evaluate(&trigger, &connection, &WebhookEvent::RepoPush(event.clone())),
            TriggerDecision::Ignored("branch deleted")
        );

        event.deleted = false;
        event.new_commit_id = None;
        assert!(matches!(
            evaluate(&trigger, &connection, &WebhookEvent::RepoPush(event.clone())),
            TriggerDecision::Unexpected(_)
        ));

        event.new_commit_id = Some("abc".into());
        event.repository = "other".into();
        assert!(matches!(
            evaluate(&trigger, &connection, &WebhookEvent::RepoPush(event)),
            TriggerDecision::Unexpected(_)
        ));
    }

    #[test]
    fn test_merge_request_title_and_approval_rules() {
        let connection = connection_config();
        let mut trigger = merge_request_trigger("t1");
        trigger.merge_requests.title_regex = Some("Ready: .*".into());
        let mr = merge_request("mr-1", 3, "Ready: ship it");

        let updated = |old: &str, new: &str| {
            WebhookEvent::CodeReview(CodeReviewEvent {
                action: CodeReviewAction::Updated,
                review: Some(mr.clone()),
                commit_set_review: false,
                title_change: Some(TitleChange {
                    old: Some(old.into()),
                    new: Some(new.into()),
                }),
                reviewer_state: None,
            })
        };
        assert!(matches!(
            evaluate(&trigger, &connection, &updated("WIP", "Ready: ship it")),
            TriggerDecision::RunBuild(_)
        ));
        assert!(matches!(
            evaluate(&trigger, &connection, &updated("Ready: a", "Ready: b")),
            TriggerDecision::Ignored(_)
        ));

        trigger.merge_requests.require_approval = true;
        let mut approved = mr.clone();
        approved.participants = vec![Participant {
            user_id: "u1".into(),
            role: ParticipantRole::Reviewer,
            state: Some(ReviewerState::Pending),
        }];
        let accepted = |mr: MergeRequestRecord| {
            WebhookEvent::CodeReview(CodeReviewEvent {
                action: CodeReviewAction::ParticipantChanged,
                review: Some(mr),
                commit_set_review: false,
                title_change: None,
                reviewer_state: Some(ReviewerState::Accepted),
            })
        };
        assert!(matches!(
            evaluate(&trigger, &connection, &accepted(approved.clone())),
            TriggerDecision::Ignored("not every reviewer accepted")
        ));
        approved.participants[0].state = Some(ReviewerState::Accepted);
        assert!(matches!(
            evaluate(&trigger, &connection, &accepted(approved)),
            TriggerDecision::RunBuild(_)
        ));
    }

    fn safe_merge_body(job: &str) -> Vec<u8> {
        serde_json::to_vec(&json!({
            "clientId": CLIENT_ID,
            "eventTypeCode": event_codes::SAFE_MERGE_START,
            "payload": {
                "project": job,
                "projectId": "id-PRJ",
                "mergeRequestId": "mr-1",
                "branch": "refs/merges/mr-1",
                "commit": "m-1",
                "isDryRun": true,
                "startedByUserId": "u-1",
            },
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_safe_merge_schedules_immediately() {
        let mut trigger = merge_request_trigger("t1");
        trigger.allow_safe_merge = true;
        let h = harness(vec![job("reviews", vec![trigger])]);
        h.remote.add_merge_request(merge_request("mr-1", 4, "Ship"));

        let response = h.dispatcher.dispatch(JSON, &safe_merge_body("reviews")).await;

        assert_eq!(response.status, 200);
        assert_eq!(response.body.unwrap()["id"], "queue-1");
        let scheduled = h.scheduler.scheduled.lock().unwrap();
        let (job, quiet_period, cause) = &scheduled[0];
        assert_eq!(job, "reviews");
        assert_eq!(*quiet_period, Duration::ZERO);
        assert_eq!(cause.short_description(), "Triggered by safe merge");
    }

    #[tokio::test]
    async fn test_safe_merge_error_statuses() {
        let h = harness(vec![job("reviews", vec![merge_request_trigger("t1")])]);
        h.remote.add_merge_request(merge_request("mr-1", 4, "Ship"));

        let response = h.dispatcher.dispatch(JSON, &safe_merge_body("missing")).await;
        assert_eq!(response.status, 404);

        let response = h.dispatcher.dispatch(JSON, &safe_merge_body("reviews")).await;
        assert_eq!(response.status, 401);

        let mut trigger = merge_request_trigger("t1");
        trigger.allow_safe_merge = true;
        h.store
            .replace(vec![job("reviews", vec![trigger])], vec![])
            .await;
        h.scheduler
            .refuse
            .store(true, std::sync::atomic::Ordering::Relaxed);
        let response = h.dispatcher.dispatch(JSON, &safe_merge_body("reviews")).await;
        assert_eq!(response.status, 409);
    }

    #[tokio::test]
    async fn test_failed_name_lookup_leaves_delivery_unmatched() {
        let h = harness(vec![job("branches", vec![branches_trigger("t1")])]);
        h.remote.seed_webhook("t1|PRJ|repo", 1);
        h.remote.fail_on("list_webhooks");

        let body = delivery("wh-unknown", "sub-unknown", event_codes::REPOSITORY_HEADS, push("refs/heads/main", "abc"));
        let response = h.dispatcher.dispatch(JSON, &body).await;

        assert_eq!(response.status, 200);
        assert_eq!(response.body.unwrap(), json!({ "status": "unmatched" }));
        assert!(h.scheduler.scheduled_jobs().is_empty());
    }

    #[tokio::test]
    async fn test_partial_scheduling_failure_still_succeeds() {
        let h = harness(vec![
            job("app", vec![branches_trigger("t-app")]),
            job("docs", vec![branches_trigger("t-docs")]),
        ]);
        link(&h.store, "t-app", "wh-1", "sub-1").await;
        link(&h.store, "t-docs", "wh-1", "sub-1").await;
        h.scheduler.failing_jobs.lock().unwrap().push("docs".into());

        let body = delivery("wh-1", "sub-1", event_codes::REPOSITORY_HEADS, push("refs/heads/main", "abc"));
        let response = h.dispatcher.dispatch(JSON, &body).await;

        assert_eq!(response.status, 200);
        assert_eq!(h.scheduler.scheduled_jobs(), vec!["app".to_string()]);
        let body = response.body.unwrap();
        assert_eq!(body["scheduled"], json!(["app"]));
        let failed = body["failed"].as_array().unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0]["job"], "docs");

        h.scheduler.failing_jobs.lock().unwrap().push("app".into());
        let body = delivery("wh-1", "sub-1", event_codes::REPOSITORY_HEADS, push("refs/heads/main", "def"));
        let response = h.dispatcher.dispatch(JSON, &body).await;
        assert_eq!(response.status, 500);
        assert_eq!(h.scheduler.scheduled_jobs().len(), 1);
    }

    fn safe_merge_build_body(code: &str, job: &str, build_id: &str) -> Vec<u8> {
        serde_json::to_vec(&json!({
            "clientId": CLIENT_ID,
            "eventTypeCode": code,
            "payload": { "project": job, "buildId": build_id },
        }))
        .unwrap()
    }

    fn safe_merge_harness() -> Harness {
        let mut trigger = merge_request_trigger("t1");
        trigger.allow_safe_merge = true;
        harness(vec![job("reviews", vec![trigger])])
    }

    #[tokio::test]
    async fn test_safe_merge_stop_cancels_queued_and_running_builds() {
        let h = safe_merge_harness();
        h.scheduler.add_build("reviews", BuildId::QueueItem(5), queued(5));
        h.scheduler.add_build("reviews", BuildId::Build(2), running(2));
        let stop = |id: &str| safe_merge_build_body(event_codes::SAFE_MERGE_STOP, "reviews", id);

        let response = h.dispatcher.dispatch(JSON, &stop("queue-item-5")).await;
        assert_eq!(response.status, 200);
        let body = response.body.unwrap();
        assert_eq!(body["type"], "queue_item");
        assert_eq!(body["cancelled"], true);

        let response = h.dispatcher.dispatch(JSON, &stop("build-2")).await;
        assert_eq!(response.status, 200);
        let body = response.body.unwrap();
        assert_eq!(body["in_progress"], false);
        assert_eq!(body["result"], "ABORTED");

        // Already aborted: nothing left to stop.
        let response = h.dispatcher.dispatch(JSON, &stop("build-2")).await;
        assert_eq!(response, DispatchResponse { status: 200, body: None });
    }

    #[tokio::test]
    async fn test_safe_merge_stop_error_statuses() {
        let h = safe_merge_harness();
        let stop = |job: &str, id: &str| safe_merge_build_body(event_codes::SAFE_MERGE_STOP, job, id);

        assert_eq!(h.dispatcher.dispatch(JSON, &stop("reviews", "build-9")).await.status, 404);
        assert_eq!(h.dispatcher.dispatch(JSON, &stop("reviews", "nine")).await.status, 400);
        assert_eq!(h.dispatcher.dispatch(JSON, &stop("missing", "build-1")).await.status, 404);

        h.store
            .replace(vec![job("reviews", vec![merge_request_trigger("t1")])], vec![])
            .await;
        h.scheduler.add_build("reviews", BuildId::Build(1), running(1));
        let response = h.dispatcher.dispatch(JSON, &stop("reviews", "build-1")).await;
        assert_eq!(response.status, 401);
        assert_eq!(h.scheduler.build("reviews", BuildId::Build(1)), Some(running(1)));
    }

    #[tokio::test]
    async fn test_safe_merge_status_reports_build_state() {
        let h = safe_merge_harness();
        h.scheduler.add_build("reviews", BuildId::Build(3), running(3));
        let status = |id: &str| safe_merge_build_body(event_codes::SAFE_MERGE_FETCH_STATUS, "reviews", id);

        let response = h.dispatcher.dispatch(JSON, &status("build-3")).await;
        assert_eq!(response.status, 200);
        let body = response.body.unwrap();
        assert_eq!(body["type"], "build");
        assert_eq!(body["id"], "build-3");
        assert_eq!(body["in_progress"], true);

        let response = h.dispatcher.dispatch(JSON, &status("queue-item-1")).await;
        assert_eq!(response.status, 404);
        assert!(h.scheduler.scheduled_jobs().is_empty());
    }
}

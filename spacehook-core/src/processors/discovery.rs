//! HeadDiscoveryEngine.
//!
//! Enumerates the heads of a multibranch source page by page, filters them,
//! optionally evaluates criteria through a [`Probe`], and hands accepted
//! heads to a [`HeadObserver`]. Enumeration stops as soon as the observer
//! is saturated.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use spacehook_sdk::objects::{GitEntryType, PageRequest};
use time::OffsetDateTime;
use tracing::{debug, info, warn};

use super::reconciler::SubscriptionReconciler;
use crate::config::{Connection, ConnectionRegistry};
use crate::entities::{Head, HeadKind, MergeRequestHead, MultibranchSource, Revision};
use crate::remote::{RemoteApi, RemoteError, bounded};
use crate::scheduler::SourceEvent;

/// Default number of heads requested per page.
pub const DEFAULT_PAGE_SIZE: u32 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscoveryState {
    Idle,
    Enumerating,
    Filtering,
    Observing,
    Completed,
    Failed,
}

#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    #[error("no connection with id {0}")]
    UnknownConnection(String),

    #[error("{kind:?} discovery failed: {source}")]
    Enumeration {
        kind: HeadKind,
        #[source]
        source: RemoteError,
    },

    #[error("criteria evaluation failed for head {head}: {source}")]
    Criteria {
        head: String,
        #[source]
        source: RemoteError,
    },
}

/// What a remote path resolves to at a given revision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeStat {
    Nonexistent,
    RegularFile,
    Directory,
    Link,
}

/// Lightweight view of a head at one revision. Nothing is checked out;
/// [`Probe::stat`] issues a single tree listing.
pub struct Probe<'a> {
    head: &'a Head,
    revision: &'a Revision,
    source: &'a MultibranchSource,
    remote: &'a dyn RemoteApi,
    call_timeout: Duration,
}

impl<'a> Probe<'a> {
    pub fn head(&self) -> &Head {
        self.head
    }

    pub fn revision(&self) -> &Revision {
        self.revision
    }

    pub fn last_modified(&self) -> Option<OffsetDateTime> {
        let millis = self.head.last_updated?;
        OffsetDateTime::from_unix_timestamp_nanos(i128::from(millis) * 1_000_000).ok()
    }

    pub async fn stat(&self, path: &str) -> Result<ProbeStat, RemoteError> {
        let path = path.trim_matches('/');
        let (parent, name) = path.rsplit_once('/').unwrap_or(("", path));
        let entries = bounded(
            self.call_timeout,
            self.remote.list_files(
                &self.source.project_key,
                &self.source.repository,
                &self.revision.commit,
                parent,
            ),
        )
        .await?;
        let entry = entries.iter().find(|e| {
            let entry_path = e.path.trim_matches('/');
            entry_path == path || entry_path == name
        });
        Ok(match entry.map(|e| e.kind) {
            None => ProbeStat::Nonexistent,
            Some(GitEntryType::File) => ProbeStat::RegularFile,
            Some(GitEntryType::Dir | GitEntryType::Submodule) => ProbeStat::Directory,
            Some(GitEntryType::Symlink) => ProbeStat::Link,
        })
    }
}

/// Decides from a probe whether a head is buildable.
#[async_trait]
pub trait HeadCriteria: Send + Sync {
    async fn is_head(&self, probe: &Probe<'_>) -> Result<bool, RemoteError>;
}

/// Accepts heads containing a regular file at the given path.
#[derive(Debug, Clone)]
pub struct RequiredFile(pub String);

#[async_trait]
impl HeadCriteria for RequiredFile {
    async fn is_head(&self, probe: &Probe<'_>) -> Result<bool, RemoteError> {
        Ok(probe.stat(&self.0).await? == ProbeStat::RegularFile)
    }
}

pub trait HeadObserver: Send {
    fn observe(&mut self, head: Head, revision: Revision);

    /// Once true, no further heads are requested.
    fn is_saturated(&self) -> bool {
        false
    }
}

/// Observer that keeps every observed head, up to an optional limit.
#[derive(Debug, Default)]
pub struct CollectingObserver {
    pub observed: Vec<(Head, Revision)>,
    limit: Option<usize>,
}

impl CollectingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limit(limit: usize) -> Self {
        Self {
            observed: Vec::new(),
            limit: Some(limit),
        }
    }

    pub fn revisions(&self) -> Vec<Revision> {
        self.observed.iter().map(|(_, r)| r.clone()).collect()
    }
}

impl HeadObserver for CollectingObserver {
    fn observe(&mut self, head: Head, revision: Revision) {
        self.observed.push((head, revision));
    }

    fn is_saturated(&self) -> bool {
        self.limit.is_some_and(|limit| self.observed.len() >= limit)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DiscoveryReport {
    pub source_id: String,
    pub state: DiscoveryState,
    pub observed: usize,
    pub saturated: bool,
    /// Aggregate webhook id, when a full pass reconciled it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub webhook_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub webhook_error: Option<String>,
}

#[derive(Debug, Clone, Copy)]
enum Handler {
    Branches,
    MergeRequests,
}

impl Handler {
    fn kind(self) -> HeadKind {
        match self {
            Handler::Branches => HeadKind::Branch,
            Handler::MergeRequests => HeadKind::MergeRequest,
        }
    }

    /// One page of heads accepted by the source's filters.
    async fn page(
        self,
        remote: &dyn RemoteApi,
        source: &MultibranchSource,
        page: &PageRequest,
        call_timeout: Duration,
    ) -> Result<(Vec<Head>, Option<String>), RemoteError> {
        match self {
            Handler::Branches => {
                let page = bounded(
                    call_timeout,
                    remote.list_branches(&source.project_key, &source.repository, page),
                )
                .await?;
                let heads = page
                    .data
                    .iter()
                    .filter(|b| source.branch_spec.matches(&b.head))
                    .map(|b| Head::branch(b.short_name(), b.commit_id.clone(), b.last_updated))
                    .collect();
                Ok((heads, page.next))
            }
            Handler::MergeRequests => {
                let page = bounded(
                    call_timeout,
                    remote.list_merge_requests(&source.project_key, &source.repository, page),
                )
                .await?;
                let heads = page
                    .data
                    .iter()
                    .filter(|mr| source.merge_requests.matches(mr))
                    .filter_map(|mr| {
                        let commit = mr.source_commit.clone()?;
                        let details = MergeRequestHead {
                            id: mr.id.clone(),
                            number: mr.number,
                            title: mr.title.clone(),
                            source_branch: mr.source_branch.clone(),
                            target_branch: mr.target_branch.clone(),
                        };
                        Some(Head::merge_request(details, commit, mr.last_updated))
                    })
                    .collect();
                Ok((heads, page.next))
            }
        }
    }
}

/// Whether `head` is the one an event is about.
fn concerns(event: &SourceEvent, head: &Head) -> bool {
    let name = event.head.strip_prefix("refs/heads/").unwrap_or(&event.head);
    head.name == name
        || head
            .merge_request
            .as_ref()
            .is_some_and(|mr| mr.source_branch == name)
}

pub struct HeadDiscoveryEngine {
    connections: Arc<ConnectionRegistry>,
    reconciler: Option<Arc<SubscriptionReconciler>>,
    call_timeout: Duration,
    page_size: u32,
}

impl HeadDiscoveryEngine {
    pub fn new(connections: Arc<ConnectionRegistry>, call_timeout: Duration) -> Self {
        Self {
            connections,
            reconciler: None,
            call_timeout,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    /// Reconcile the source's aggregate webhook after every full pass.
    pub fn with_reconciler(mut self, reconciler: Arc<SubscriptionReconciler>) -> Self {
        self.reconciler = Some(reconciler);
        self
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Discover the heads of `source` and feed them to `observer`.
    ///
    /// With `event`, only the head the event is about is observed and the
    /// aggregate webhook is left alone.
    pub async fn retrieve(
        &self,
        source: &MultibranchSource,
        criteria: Option<&dyn HeadCriteria>,
        observer: &mut dyn HeadObserver,
        event: Option<&SourceEvent>,
    ) -> Result<DiscoveryReport, DiscoveryError> {
        let connection = self
            .connections
            .get(&source.connection)
            .ok_or_else(|| DiscoveryError::UnknownConnection(source.connection.clone()))?;

        let mut report = DiscoveryReport {
            source_id: source.id.clone(),
            state: DiscoveryState::Idle,
            observed: 0,
            saturated: false,
            webhook_id: None,
            webhook_error: None,
        };

        if let Err(e) = self
            .enumerate(connection, source, criteria, observer, event, &mut report)
            .await
        {
            report.state = DiscoveryState::Failed;
            warn!(source_id = %source.id, observed = report.observed, error = %e, "Head discovery failed");
            return Err(e);
        }
        report.state = DiscoveryState::Completed;
        info!(
            source_id = %source.id,
            observed = report.observed,
            saturated = report.saturated,
            "Head discovery completed"
        );

        // A saturated pass stopped early, so only a complete one touches the
        // aggregate webhook.
        if event.is_none() && !report.saturated {
            if let Some(reconciler) = &self.reconciler {
                match self.reconcile_webhook(reconciler, connection, source).await {
                    Ok(id) => report.webhook_id = Some(id),
                    Err(e) => {
                        warn!(source_id = %source.id, error = %e, "Failed to reconcile aggregate webhook");
                        report.webhook_error = Some(e.to_string());
                    }
                }
            }
        }
        Ok(report)
    }

    async fn enumerate(
        &self,
        connection: &Connection,
        source: &MultibranchSource,
        criteria: Option<&dyn HeadCriteria>,
        observer: &mut dyn HeadObserver,
        event: Option<&SourceEvent>,
        report: &mut DiscoveryReport,
    ) -> Result<(), DiscoveryError> {
        let mut handlers = Vec::with_capacity(2);
        if source.discover_branches {
            handlers.push(Handler::Branches);
        }
        if source.discover_merge_requests {
            handlers.push(Handler::MergeRequests);
        }

        let remote = connection.remote.as_ref();
        for handler in handlers {
            if observer.is_saturated() {
                report.saturated = true;
                return Ok(());
            }
            let mut request = PageRequest {
                next: None,
                limit: Some(self.page_size),
            };
            loop {
                self.transition(report, DiscoveryState::Enumerating);
                let (heads, next) = handler
                    .page(remote, source, &request, self.call_timeout)
                    .await
                    .map_err(|source| DiscoveryError::Enumeration {
                        kind: handler.kind(),
                        source,
                    })?;

                self.transition(report, DiscoveryState::Filtering);
                for head in heads {
                    if event.is_some_and(|e| !concerns(e, &head)) {
                        continue;
                    }
                    let revision = head.revision();
                    if let Some(criteria) = criteria {
                        let probe = Probe {
                            head: &head,
                            revision: &revision,
                            source,
                            remote,
                            call_timeout: self.call_timeout,
                        };
                        let accepted = criteria.is_head(&probe).await.map_err(|source| {
                            DiscoveryError::Criteria {
                                head: head.name.clone(),
                                source,
                            }
                        })?;
                        if !accepted {
                            debug!(head = %head.name, "Head rejected by criteria");
                            continue;
                        }
                    }

                    self.transition(report, DiscoveryState::Observing);
                    observer.observe(head, revision);
                    report.observed += 1;
                    if observer.is_saturated() {
                        report.saturated = true;
                        return Ok(());
                    }
                }

                match next {
                    Some(cursor) if request.next.as_deref() != Some(cursor.as_str()) => {
                        request.next = Some(cursor);
                    }
                    _ => break,
                }
            }
        }
        Ok(())
    }

    fn transition(&self, report: &mut DiscoveryReport, state: DiscoveryState) {
        if report.state != state {
            tracing::trace!(source_id = %report.source_id, from = ?report.state, to = ?state, "Discovery state");
            report.state = state;
        }
    }

    async fn reconcile_webhook(
        &self,
        reconciler: &SubscriptionReconciler,
        connection: &Connection,
        source: &MultibranchSource,
    ) -> Result<String, super::ReconcileError> {
        let existing = bounded(self.call_timeout, connection.remote.list_webhooks()).await?;
        reconciler.reconcile_source(source, &existing).await
    }
}

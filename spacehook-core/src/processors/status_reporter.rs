//! BuildStatusReporter processor.
//!
//! Publishes build progress back to the commit that caused the build, as an
//! external check on the remote side.

use std::sync::Arc;
use std::time::Duration;

use kanau::processor::Processor;
use serde::{Deserialize, Serialize};
use spacehook_sdk::objects::{CommitExecutionStatus, ExternalCheckReport};
use tracing::{debug, info};

use crate::config::ConnectionRegistry;
use crate::entities::{BuildCause, CauseDetails};
use crate::remote::{RemoteError, bounded};

/// Service name shown next to reported checks.
pub const EXTERNAL_SERVICE_NAME: &str = "Spacehook";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildOutcome {
    Running,
    Success,
    Unstable,
    Failure,
    Aborted,
    NotBuilt,
}

impl BuildOutcome {
    pub fn execution_status(self) -> CommitExecutionStatus {
        match self {
            BuildOutcome::Running => CommitExecutionStatus::Running,
            BuildOutcome::Success | BuildOutcome::Unstable => CommitExecutionStatus::Succeeded,
            BuildOutcome::Failure => CommitExecutionStatus::Failed,
            BuildOutcome::Aborted | BuildOutcome::NotBuilt => CommitExecutionStatus::Terminated,
        }
    }
}

/// Progress of one build, as reported by the build engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildReport {
    pub job: String,
    pub build_number: u32,
    pub build_url: String,
    pub outcome: BuildOutcome,
    /// Commit that was built.
    pub revision: String,
    pub cause: BuildCause,
    /// Build start, milliseconds since the unix epoch.
    #[serde(default)]
    pub started_at: Option<i64>,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    #[error("no connection with id {0}")]
    UnknownConnection(String),
    #[error(transparent)]
    Remote(#[from] RemoteError),
}

pub struct BuildStatusReporter {
    connections: Arc<ConnectionRegistry>,
    call_timeout: Duration,
}

impl BuildStatusReporter {
    pub fn new(connections: Arc<ConnectionRegistry>, call_timeout: Duration) -> Self {
        Self {
            connections,
            call_timeout,
        }
    }

    pub async fn report(&self, report: &BuildReport) -> Result<(), ReportError> {
        let connection = self
            .connections
            .get(&report.cause.connection_id)
            .ok_or_else(|| ReportError::UnknownConnection(report.cause.connection_id.clone()))?;
        let check = external_check(report);
        debug!(job = %report.job, build = report.build_number, status = ?check.status, "Reporting build status");
        bounded(
            self.call_timeout,
            connection.remote.report_external_check_status(&check),
        )
        .await?;
        info!(
            job = %report.job,
            build = report.build_number,
            revision = %report.revision,
            outcome = ?report.outcome,
            "Build status reported"
        );
        Ok(())
    }
}

/// Branch the check is attached to.
fn reported_branch(cause: &BuildCause) -> String {
    match &cause.details {
        CauseDetails::BranchPush { head, .. } => head.clone(),
        CauseDetails::MergeRequest {
            safe_merge: Some(safe),
            ..
        } => safe.branch.clone(),
        CauseDetails::MergeRequest { merge_request, .. } => {
            if merge_request.source_branch.starts_with("refs/") {
                merge_request.source_branch.clone()
            } else {
                format!("refs/heads/{}", merge_request.source_branch)
            }
        }
    }
}

pub fn external_check(report: &BuildReport) -> ExternalCheckReport {
    ExternalCheckReport {
        project_key: report.cause.project_key.clone(),
        repository: report.cause.repository.clone(),
        revision: report.revision.clone(),
        branch: reported_branch(&report.cause),
        status: report.outcome.execution_status(),
        url: report.build_url.clone(),
        external_service_name: EXTERNAL_SERVICE_NAME.to_string(),
        task_name: report.job.clone(),
        task_id: report.job.clone(),
        task_build_id: Some(report.build_number.to_string()),
        timestamp: report.started_at,
        description: Some(
            report
                .description
                .clone()
                .unwrap_or_else(|| report.cause.short_description().to_string()),
        ),
    }
}

impl Processor<BuildReport> for BuildStatusReporter {
    type Output = ();
    type Error = ReportError;

    async fn process(&self, report: BuildReport) -> Result<(), ReportError> {
        self.report(&report).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::SafeMergeCause;
    use crate::testing::{FakeRemote, connection_config, merge_request, registry};
    use spacehook_sdk::objects::RepoPushEvent;

    fn push_cause() -> BuildCause {
        BuildCause::branch_push(
            &connection_config(),
            &RepoPushEvent {
                project_key: "PRJ".into(),
                repository: "repo".into(),
                head: "refs/heads/main".into(),
                old_commit_id: None,
                new_commit_id: Some("abc".into()),
                created: false,
                deleted: false,
            },
            "abc",
        )
    }

    fn build(outcome: BuildOutcome, cause: BuildCause) -> BuildReport {
        BuildReport {
            job: "build".into(),
            build_number: 42,
            build_url: "https://ci.example.com/job/build/42/".into(),
            outcome,
            revision: "abc".into(),
            cause,
            started_at: Some(1_700_000_000_000),
            description: None,
        }
    }

    #[test]
    fn test_outcome_mapping() {
        use BuildOutcome::*;
        use CommitExecutionStatus as S;
        for (outcome, status) in [
            (Running, S::Running),
            (Success, S::Succeeded),
            (Unstable, S::Succeeded),
            (Failure, S::Failed),
            (Aborted, S::Terminated),
            (NotBuilt, S::Terminated),
        ] {
            assert_eq!(outcome.execution_status(), status, "{outcome:?}");
        }
    }

    #[test]
    fn test_branch_follows_cause() {
        let mr = merge_request("mr-1", 3, "t");
        let report = build(
            BuildOutcome::Running,
            BuildCause::merge_request(&connection_config(), &mr, None),
        );
        assert_eq!(external_check(&report).branch, "refs/heads/feature/3");

        let safe = SafeMergeCause {
            branch: "refs/merges/3".into(),
            commit: "m".into(),
            is_dry_run: false,
            started_by_user_id: "u".into(),
        };
        let report = build(
            BuildOutcome::Running,
            BuildCause::merge_request(&connection_config(), &mr, Some(safe)),
        );
        assert_eq!(external_check(&report).branch, "refs/merges/3");
    }

    #[tokio::test]
    async fn test_report_reaches_remote() {
        let remote = Arc::new(FakeRemote::new());
        let reporter = BuildStatusReporter::new(registry(remote.clone()), Duration::from_secs(5));

        reporter
            .process(build(BuildOutcome::Unstable, push_cause()))
            .await
            .unwrap();

        let reports = remote.reports();
        assert_eq!(reports.len(), 1);
        let check = &reports[0];
        assert_eq!(check.status, CommitExecutionStatus::Succeeded);
        assert_eq!(check.branch, "refs/heads/main");
        assert_eq!(check.task_build_id.as_deref(), Some("42"));
        assert_eq!(check.external_service_name, EXTERNAL_SERVICE_NAME);
        assert_eq!(
            check.description.as_deref(),
            Some("Triggered by push to git branch")
        );
    }

    #[tokio::test]
    async fn test_unknown_connection_is_rejected() {
        let remote = Arc::new(FakeRemote::new());
        let reporter = BuildStatusReporter::new(registry(remote.clone()), Duration::from_secs(5));
        let mut cause = push_cause();
        cause.connection_id = "other".into();

        let err = reporter
            .report(&build(BuildOutcome::Failure, cause))
            .await
            .unwrap_err();

        assert!(matches!(err, ReportError::UnknownConnection(_)));
        assert!(remote.reports().is_empty());
    }
}

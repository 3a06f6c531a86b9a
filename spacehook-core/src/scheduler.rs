//! Port to the external build engine.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::entities::BuildCause;

#[derive(Debug, Clone, thiserror::Error)]
pub enum ScheduleError {
    #[error("build engine unavailable: {0}")]
    Unavailable(String),
    #[error("unknown job: {0}")]
    UnknownJob(String),
    #[error("unknown build: {0}")]
    UnknownBuild(String),
    #[error("cannot parse build id {0:?}")]
    InvalidBuildId(String),
}

/// Queue entry created by the build engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueItem {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScheduleOutcome {
    /// Newly queued, or merged into an equivalent queued build.
    Queued(QueueItem),
    /// The engine declined to queue the build.
    Refused,
}

/// A build on the engine: a queue item until it starts, then a build.
///
/// Queue items and builds are numbered independently, so the textual form
/// carries a prefix: `queue-item-{n}` or `build-{n}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BuildId {
    QueueItem(u64),
    Build(u32),
}

impl BuildId {
    pub const QUEUE_ITEM_PREFIX: &'static str = "queue-item-";
    pub const BUILD_PREFIX: &'static str = "build-";
}

impl FromStr for BuildId {
    type Err = ScheduleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ScheduleError::InvalidBuildId(s.to_string());
        if let Some(n) = s.strip_prefix(Self::QUEUE_ITEM_PREFIX) {
            n.parse().map(BuildId::QueueItem).map_err(|_| invalid())
        } else if let Some(n) = s.strip_prefix(Self::BUILD_PREFIX) {
            n.parse().map(BuildId::Build).map_err(|_| invalid())
        } else {
            Err(invalid())
        }
    }
}

impl fmt::Display for BuildId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuildId::QueueItem(n) => write!(f, "{}{n}", Self::QUEUE_ITEM_PREFIX),
            BuildId::Build(n) => write!(f, "{}{n}", Self::BUILD_PREFIX),
        }
    }
}

/// Latest known state of a queue item or build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BuildState {
    QueueItem {
        id: String,
        #[serde(default)]
        url: Option<String>,
        #[serde(default)]
        cancelled: bool,
        #[serde(default)]
        stuck: bool,
        /// Why the item is still waiting.
        #[serde(default)]
        why: Option<String>,
    },
    Build {
        id: String,
        #[serde(default)]
        url: Option<String>,
        display_name: String,
        in_progress: bool,
        #[serde(default)]
        duration_ms: u64,
        #[serde(default)]
        result: Option<String>,
        #[serde(default)]
        queue_id: Option<String>,
    },
}

/// Change notification for a multibranch source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceEvent {
    pub source_id: String,
    /// Branch name as delivered, e.g. `refs/heads/main`.
    pub head: String,
    /// `None` when the head was deleted.
    pub commit: Option<String>,
}

/// Schedules builds on the external build engine.
///
/// Permission checks for the scheduled job belong to the engine.
#[async_trait]
pub trait BuildScheduler: Send + Sync {
    async fn schedule(
        &self,
        job: &str,
        quiet_period: Duration,
        cause: BuildCause,
    ) -> Result<ScheduleOutcome, ScheduleError>;

    /// Tell the engine that a multibranch source changed so it can re-index.
    async fn notify_source_event(&self, event: SourceEvent) -> Result<(), ScheduleError>;

    /// Remove a queue item of `job` or abort its running build.
    ///
    /// Returns the state after cancellation, or `None` when nothing was
    /// left to cancel (already finished or already dequeued).
    async fn cancel(&self, job: &str, build: BuildId) -> Result<Option<BuildState>, ScheduleError>;

    /// Current state of a build; a queue item that already started is
    /// reported as its build.
    async fn build_state(&self, job: &str, build: BuildId) -> Result<BuildState, ScheduleError>;
}

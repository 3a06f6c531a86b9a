//! Build scheduler adapters.
//!
//! [`HttpBuildScheduler`] forwards scheduling requests to the external
//! build engine; [`LoggingScheduler`] is used when no engine is configured.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Serialize;
use spacehook_core::entities::BuildCause;
use spacehook_core::scheduler::{
    BuildId, BuildScheduler, BuildState, QueueItem, ScheduleError, ScheduleOutcome, SourceEvent,
};
use url::Url;

/// Body of a build request sent to the engine.
#[derive(Debug, Serialize)]
struct BuildRequest<'a> {
    job: &'a str,
    quiet_period_secs: u64,
    description: &'static str,
    parameters: BTreeMap<&'static str, String>,
    cause: &'a BuildCause,
}

pub struct HttpBuildScheduler {
    http: reqwest::Client,
    base_url: Url,
    token: Option<String>,
}

impl HttpBuildScheduler {
    pub fn new(base_url: Url, token: Option<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        Ok(Self {
            http: reqwest::Client::builder().timeout(timeout).build()?,
            base_url,
            token,
        })
    }

    fn url(&self, path: &str) -> Result<Url, ScheduleError> {
        self.base_url
            .join(path)
            .map_err(|e| ScheduleError::Unavailable(e.to_string()))
    }

    fn post(&self, url: Url) -> reqwest::RequestBuilder {
        self.authorized(self.http.post(url))
    }

    fn get(&self, url: Url) -> reqwest::RequestBuilder {
        self.authorized(self.http.get(url))
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    fn build_url(&self, job: &str, build: BuildId, suffix: &str) -> Result<Url, ScheduleError> {
        self.url(&format!(
            "jobs/{}/builds/{build}{suffix}",
            urlencoding_segment(job)
        ))
    }
}

fn engine_answered(status: StatusCode) -> ScheduleError {
    ScheduleError::Unavailable(format!("build engine answered {status}"))
}

fn unavailable(e: reqwest::Error) -> ScheduleError {
    ScheduleError::Unavailable(e.to_string())
}

#[async_trait]
impl BuildScheduler for HttpBuildScheduler {
    async fn schedule(
        &self,
        job: &str,
        quiet_period: Duration,
        cause: BuildCause,
    ) -> Result<ScheduleOutcome, ScheduleError> {
        let body = BuildRequest {
            job,
            quiet_period_secs: quiet_period.as_secs(),
            description: cause.short_description(),
            parameters: cause.environment().into_iter().collect(),
            cause: &cause,
        };
        let url = self.url(&format!("jobs/{}/builds", urlencoding_segment(job)))?;
        let resp = self.post(url).json(&body).send().await.map_err(unavailable)?;

        match resp.status() {
            status if status.is_success() => {
                let item: QueueItem = resp.json().await.map_err(unavailable)?;
                tracing::debug!(job, queue_item = %item.id, "Build queued by engine");
                Ok(ScheduleOutcome::Queued(item))
            }
            StatusCode::NOT_FOUND => Err(ScheduleError::UnknownJob(job.to_string())),
            StatusCode::CONFLICT | StatusCode::FORBIDDEN => Ok(ScheduleOutcome::Refused),
            status => Err(engine_answered(status)),
        }
    }

    async fn notify_source_event(&self, event: SourceEvent) -> Result<(), ScheduleError> {
        let url = self.url(&format!(
            "sources/{}/events",
            urlencoding_segment(&event.source_id)
        ))?;
        let resp = self.post(url).json(&event).send().await.map_err(unavailable)?;
        if resp.status().is_success() {
            Ok(())
        } else {
            Err(engine_answered(resp.status()))
        }
    }

    async fn cancel(&self, job: &str, build: BuildId) -> Result<Option<BuildState>, ScheduleError> {
        let url = self.build_url(job, build, "/stop")?;
        let resp = self.post(url).send().await.map_err(unavailable)?;

        match resp.status() {
            StatusCode::NO_CONTENT | StatusCode::CONFLICT => Ok(None),
            status if status.is_success() => {
                let state: BuildState = resp.json().await.map_err(unavailable)?;
                tracing::debug!(job, %build, "Build cancelled by engine");
                Ok(Some(state))
            }
            StatusCode::NOT_FOUND => Err(ScheduleError::UnknownBuild(build.to_string())),
            status => Err(engine_answered(status)),
        }
    }

    async fn build_state(&self, job: &str, build: BuildId) -> Result<BuildState, ScheduleError> {
        let url = self.build_url(job, build, "")?;
        let resp = self.get(url).send().await.map_err(unavailable)?;

        match resp.status() {
            status if status.is_success() => resp.json().await.map_err(unavailable),
            StatusCode::NOT_FOUND => Err(ScheduleError::UnknownBuild(build.to_string())),
            status => Err(engine_answered(status)),
        }
    }
}

fn urlencoding_segment(value: &str) -> String {
    urlencoding::encode(value).into_owned()
}

/// Scheduler that only logs; every build counts as queued.
pub struct LoggingScheduler;

#[async_trait]
impl BuildScheduler for LoggingScheduler {
    async fn schedule(
        &self,
        job: &str,
        quiet_period: Duration,
        cause: BuildCause,
    ) -> Result<ScheduleOutcome, ScheduleError> {
        let id = uuid::Uuid::new_v4().to_string();
        tracing::info!(
            job,
            quiet_period_secs = quiet_period.as_secs(),
            cause = cause.short_description(),
            queue_item = %id,
            "No build engine configured, build logged only"
        );
        Ok(ScheduleOutcome::Queued(QueueItem { id, url: None }))
    }

    async fn notify_source_event(&self, event: SourceEvent) -> Result<(), ScheduleError> {
        tracing::info!(source_id = %event.source_id, head = %event.head, "Source changed");
        Ok(())
    }

    // Logged builds never reach a queue, so there is nothing to look up.
    async fn cancel(&self, _job: &str, build: BuildId) -> Result<Option<BuildState>, ScheduleError> {
        Err(ScheduleError::UnknownBuild(build.to_string()))
    }

    async fn build_state(&self, _job: &str, build: BuildId) -> Result<BuildState, ScheduleError> {
        Err(ScheduleError::UnknownBuild(build.to_string()))
    }
}

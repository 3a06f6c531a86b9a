//! HTTP client for the remote code-hosting API.
//!
//! Gated behind the `client` cargo feature so downstream crates that only
//! need the shared types do not pull in `reqwest`.

mod projects;
mod webhooks;

use std::time::Duration;

use reqwest::{Client, RequestBuilder, Response, StatusCode};
use url::Url;

/// Upper bound for the retry exponent (250ms * 2^6 = 16s).
const MAX_RETRY_EXPONENT: u32 = 6;
const BASE_RETRY_DELAY_MS: u64 = 250;

/// Errors produced by [`SpaceClient`].
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Transport-level failure (DNS, TLS, connection reset, timeout, …).
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// The server returned a non-2xx status code.
    #[error("api error: status {status}, body: {body}")]
    Api { status: StatusCode, body: String },

    /// Response body could not be deserialized.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// The base URL could not be joined with the endpoint path.
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
}

impl ClientError {
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            ClientError::Api { status, .. } => Some(*status),
            ClientError::Http(e) => e.status(),
            _ => None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, ClientError::Http(e) if e.is_timeout())
    }

    /// Whether retrying the same request could succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            ClientError::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            ClientError::Api { status, .. } => is_retryable_status(*status),
            _ => false,
        }
    }
}

/// Typed HTTP client for one connection to the remote service.
///
/// Every request carries the connection's bearer token. Connection
/// failures, timeouts, `429` and `5xx` responses are retried with
/// exponential backoff up to `max_retries` times before surfacing.
#[derive(Debug, Clone)]
pub struct SpaceClient {
    http: Client,
    base_url: Url,
    token: String,
    max_retries: u32,
}

impl SpaceClient {
    /// Create a new `SpaceClient`.
    ///
    /// * `base_url` – root URL of the remote organization (e.g. `https://acme.example.com`).
    /// * `token` – bearer token of the application.
    /// * `timeout` – per-request timeout, applied to every attempt.
    pub fn new(
        base_url: Url,
        token: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ClientError> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url,
            token: token.into(),
            max_retries: 3,
        })
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Replace the default `reqwest::Client` with a custom one.
    pub fn with_http_client(mut self, client: Client) -> Self {
        self.http = client;
        self
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> Result<Url, ClientError> {
        Ok(self.base_url.join(path)?)
    }

    /// Send the request produced by `build`, retrying transient failures.
    async fn send(&self, build: impl Fn(&Client) -> RequestBuilder) -> Result<Response, ClientError> {
        let mut attempt = 0u32;
        loop {
            let result = build(&self.http).bearer_auth(&self.token).send().await;
            let retryable = match &result {
                Ok(resp) => is_retryable_status(resp.status()),
                Err(e) => e.is_timeout() || e.is_connect(),
            };
            if !retryable || attempt >= self.max_retries {
                return Ok(result?);
            }
            let delay = calculate_retry_delay(attempt);
            tracing::warn!(
                attempt = attempt + 1,
                max_retries = self.max_retries,
                delay_ms = delay.as_millis() as u64,
                "Transient failure from remote API, retrying"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

fn is_retryable_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

/// Backoff before retry number `attempt` (zero based).
pub fn calculate_retry_delay(attempt: u32) -> Duration {
    Duration::from_millis(BASE_RETRY_DELAY_MS * 2u64.pow(attempt.min(MAX_RETRY_EXPONENT)))
}

async fn parse_response<T: serde::de::DeserializeOwned>(resp: Response) -> Result<T, ClientError> {
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(ClientError::Api { status, body });
    }
    let bytes = resp.bytes().await?;
    serde_json::from_slice(&bytes).map_err(ClientError::Json)
}

async fn expect_success(resp: Response) -> Result<(), ClientError> {
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(ClientError::Api { status, body });
    }
    Ok(())
}

fn segment(value: &str) -> std::borrow::Cow<'_, str> {
    urlencoding::encode(value)
}

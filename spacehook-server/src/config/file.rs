//! TOML file configuration structures.
//!
//! These structs directly map to the `spacehook.toml` file format.

use std::net::{Ipv4Addr, SocketAddr};

use serde::{Deserialize, Serialize};
use spacehook_core::entities::{EventSelection, MergeRequestFilters};
use spacehook_core::utils::BranchSpec;
use url::Url;

/// Root configuration structure as read from the TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileConfig {
    pub server: ServerConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub connections: Vec<ConnectionConfig>,
    #[serde(default)]
    pub jobs: Vec<JobConfig>,
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// The address and port to listen on (e.g., "0.0.0.0:8080").
    #[serde(default = "default_listen_addr")]
    pub listen: SocketAddr,
    /// Public URL of this service; the remote side delivers webhooks to
    /// `{public_url}/api/space/process`.
    pub public_url: Url,
    /// Upper bound for one remote API call, retries included.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    /// Upper bound for handling one inbound delivery.
    #[serde(default = "default_dispatch_timeout")]
    pub dispatch_timeout_secs: u64,
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from((Ipv4Addr::UNSPECIFIED, 8080))
}

fn default_request_timeout() -> u64 {
    30
}

fn default_dispatch_timeout() -> u64 {
    60
}

/// External build engine. Builds are only logged when `url` is absent.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<Url>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

/// One application installed in a remote organization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    pub id: String,
    pub base_url: Url,
    /// Client id the remote side puts into every delivery.
    pub client_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    /// Name of the environment variable holding the token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_env: Option<String>,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_max_retries() -> u32 {
    3
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobConfig {
    pub name: String,
    #[serde(default = "default_quiet_period")]
    pub quiet_period_secs: u64,
    #[serde(default)]
    pub triggers: Vec<TriggerConfig>,
}

fn default_quiet_period() -> u64 {
    5
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerConfig {
    /// Stable trigger id; generated and written back when missing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub connection: String,
    pub project_key: String,
    pub repository: String,
    pub event_selection: EventSelection,
    #[serde(default)]
    pub branch_spec: BranchSpec,
    #[serde(default)]
    pub allow_safe_merge: bool,
    #[serde(default)]
    pub merge_requests: MergeRequestFilters,
}

/// A multibranch source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    pub id: String,
    pub connection: String,
    pub project_key: String,
    pub repository: String,
    #[serde(default)]
    pub branch_spec: BranchSpec,
    #[serde(default = "default_true")]
    pub discover_branches: bool,
    #[serde(default)]
    pub discover_merge_requests: bool,
    #[serde(default)]
    pub merge_requests: MergeRequestFilters,
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_config_parsing() {
        let toml_str = r#"
[server]
listen = "127.0.0.1:3000"
public_url = "https://ci.example.com"

[scheduler]
url = "http://engine.internal:8081"

[[connections]]
id = "main"
base_url = "https://acme.example.com"
client_id = "client-1"
token_env = "SPACE_TOKEN"

[[jobs]]
name = "backend"
quiet_period_secs = 10

[[jobs.triggers]]
id = "3f2a"
connection = "main"
project_key = "PRJ"
repository = "backend"
event_selection = "merge_requests"
allow_safe_merge = true

[jobs.triggers.merge_requests]
title_regex = "Ready:.*"
target_branch_spec = ["main"]
require_approval = true

[[sources]]
id = "backend-mb"
connection = "main"
project_key = "PRJ"
repository = "backend"
branch_spec = ["+:*", "-:wip/*"]
"#;
        let config: FileConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.listen.port(), 3000);
        assert_eq!(config.server.request_timeout_secs, 30);
        assert!(config.scheduler.url.is_some());
        assert_eq!(config.connections[0].max_retries, 3);

        let trigger = &config.jobs[0].triggers[0];
        assert_eq!(trigger.event_selection, EventSelection::MergeRequests);
        assert!(trigger.merge_requests.require_approval);
        assert!(trigger.merge_requests.source_branch_spec.is_empty());
        assert!(trigger.branch_spec.is_empty());

        let source = &config.sources[0];
        assert!(source.discover_branches);
        assert!(!source.discover_merge_requests);
        assert!(source.branch_spec.matches("feature/x"));
        assert!(!source.branch_spec.matches("wip/x"));
    }

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config: FileConfig = toml::from_str(
            r#"
[server]
public_url = "http://localhost:8080"
"#,
        )
        .unwrap();
        assert_eq!(config.server.listen, default_listen_addr());
        assert!(config.scheduler.url.is_none());
        assert!(config.jobs.is_empty());
    }
}

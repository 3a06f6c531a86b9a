//! Configuration module for spacehook-server.
//!
//! Loads the TOML file, applies CLI overrides, validates references between
//! sections, assigns ids to new triggers (rewriting the file so they stay
//! stable), and converts everything into core types.

pub mod file;

use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use spacehook_core::config::{ConnectionConfig, TimeoutConfig, WebhookEndpoint};
use spacehook_core::entities::{JobRecord, MultibranchSource, TriggerSpec};
use spacehook_core::utils::full_match_regex;
use thiserror::Error;
use url::Url;

use crate::config::file::{
    ConnectionConfig as FileConnectionConfig, FileConfig, JobConfig, SourceConfig, TriggerConfig,
};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("failed to serialize config: {0}")]
    SerializeError(#[from] toml::ser::Error),

    #[error("validation error: {0}")]
    ValidationError(String),

    #[error("no token for connection {0}: set `token` or `token_env`")]
    MissingToken(String),
}

/// Settings of the HTTP side of the server.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub listen: SocketAddr,
    pub endpoint: WebhookEndpoint,
    pub timeouts: TimeoutConfig,
}

#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub url: Url,
    pub token: Option<String>,
}

/// A connection together with the credentials to build its client.
#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    pub config: ConnectionConfig,
    pub base_url: Url,
    pub token: String,
    pub max_retries: u32,
}

/// Loaded configuration result containing all parts.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub server: ServerSettings,
    pub scheduler: Option<SchedulerSettings>,
    pub connections: Vec<ConnectionSettings>,
    pub jobs: Vec<JobRecord>,
    pub sources: Vec<MultibranchSource>,
}

/// Configuration loader that handles the complete loading process.
pub struct ConfigLoader {
    config_path: PathBuf,
    listen_override: Option<SocketAddr>,
}

impl ConfigLoader {
    pub fn new(config_path: impl AsRef<Path>, listen_override: Option<SocketAddr>) -> Self {
        Self {
            config_path: config_path.as_ref().to_path_buf(),
            listen_override,
        }
    }

    /// Load and process the configuration.
    ///
    /// This will:
    /// 1. Read the TOML file
    /// 2. Apply CLI overrides
    /// 3. Validate the configuration
    /// 4. Assign ids to triggers without one (and rewrite the file)
    /// 5. Build the loaded configuration
    pub fn load(&self) -> Result<LoadedConfig, ConfigError> {
        let config_content = std::fs::read_to_string(&self.config_path)?;
        let mut file_config: FileConfig = toml::from_str(&config_content)?;

        if let Some(listen) = self.listen_override {
            file_config.server.listen = listen;
        }

        validate(&file_config)?;

        let assigned = assign_trigger_ids(&mut file_config);
        if assigned > 0 {
            self.rewrite_config(&file_config)?;
            tracing::info!(assigned, "Trigger ids generated and config file updated");
        }

        build_loaded_config(file_config)
    }

    /// Reload the configuration (used during SIGHUP).
    pub fn reload(&self) -> Result<LoadedConfig, ConfigError> {
        self.load()
    }

    fn rewrite_config(&self, config: &FileConfig) -> Result<(), ConfigError> {
        let toml_string = toml::to_string_pretty(config)?;

        // Write atomically: write to temp file, then rename
        let temp_path = self.config_path.with_extension("toml.tmp");
        std::fs::write(&temp_path, toml_string)?;
        std::fs::rename(&temp_path, &self.config_path)?;

        Ok(())
    }
}

fn validate(config: &FileConfig) -> Result<(), ConfigError> {
    let invalid = |msg: String| -> Result<(), ConfigError> { Err(ConfigError::ValidationError(msg)) };

    let mut connection_ids = HashSet::new();
    let mut client_ids = HashSet::new();
    for connection in &config.connections {
        if connection.id.is_empty() || connection.id.contains('|') {
            return invalid(format!("invalid connection id {:?}", connection.id));
        }
        if !connection_ids.insert(connection.id.as_str()) {
            return invalid(format!("duplicate connection id {}", connection.id));
        }
        if !client_ids.insert(connection.client_id.as_str()) {
            return invalid(format!("duplicate client id {}", connection.client_id));
        }
    }

    let mut job_names = HashSet::new();
    let mut owner_ids = HashSet::new();
    for job in &config.jobs {
        if !job_names.insert(job.name.as_str()) {
            return invalid(format!("duplicate job name {}", job.name));
        }
        for trigger in &job.triggers {
            if !connection_ids.contains(trigger.connection.as_str()) {
                return invalid(format!(
                    "job {} references unknown connection {}",
                    job.name, trigger.connection
                ));
            }
            if let Some(id) = &trigger.id {
                if id.is_empty() || id.contains('|') {
                    return invalid(format!("invalid trigger id {id:?} in job {}", job.name));
                }
                if !owner_ids.insert(id.as_str()) {
                    return invalid(format!("duplicate trigger id {id}"));
                }
            }
            check_title_regex(&job.name, trigger.merge_requests.title_regex.as_deref())?;
        }
    }

    for source in &config.sources {
        if !connection_ids.contains(source.connection.as_str()) {
            return invalid(format!(
                "source {} references unknown connection {}",
                source.id, source.connection
            ));
        }
        if source.id.is_empty() || source.id.contains('|') {
            return invalid(format!("invalid source id {:?}", source.id));
        }
        if !owner_ids.insert(source.id.as_str()) {
            return invalid(format!("source id {} is already used", source.id));
        }
        check_title_regex(&source.id, source.merge_requests.title_regex.as_deref())?;
    }
    Ok(())
}

fn check_title_regex(owner: &str, pattern: Option<&str>) -> Result<(), ConfigError> {
    match pattern {
        Some(pattern) if full_match_regex(pattern).is_none() => Err(ConfigError::ValidationError(
            format!("invalid title regex {pattern:?} in {owner}"),
        )),
        _ => Ok(()),
    }
}

/// Give every trigger without an id a fresh UUID; returns how many.
fn assign_trigger_ids(config: &mut FileConfig) -> usize {
    let mut assigned = 0;
    for trigger in config.jobs.iter_mut().flat_map(|j| j.triggers.iter_mut()) {
        if trigger.id.is_none() {
            trigger.id = Some(uuid::Uuid::new_v4().to_string());
            assigned += 1;
        }
    }
    assigned
}

fn build_loaded_config(file_config: FileConfig) -> Result<LoadedConfig, ConfigError> {
    let public_url = file_config.server.public_url;
    let server = ServerSettings {
        listen: file_config.server.listen,
        endpoint: WebhookEndpoint::from_public_url(&public_url),
        timeouts: TimeoutConfig {
            remote_call: Duration::from_secs(file_config.server.request_timeout_secs),
            dispatch: Duration::from_secs(file_config.server.dispatch_timeout_secs),
        },
    };

    let scheduler = file_config.scheduler.url.map(|url| SchedulerSettings {
        url,
        token: file_config.scheduler.token,
    });

    let connections = file_config
        .connections
        .into_iter()
        .map(convert_connection)
        .collect::<Result<Vec<_>, _>>()?;

    Ok(LoadedConfig {
        server,
        scheduler,
        connections,
        jobs: file_config.jobs.into_iter().map(convert_job).collect(),
        sources: file_config.sources.into_iter().map(convert_source).collect(),
    })
}

fn convert_connection(c: FileConnectionConfig) -> Result<ConnectionSettings, ConfigError> {
    let token = match (&c.token, &c.token_env) {
        (Some(token), _) => token.clone(),
        (None, Some(var)) => {
            std::env::var(var).map_err(|_| ConfigError::MissingToken(c.id.clone()))?
        }
        (None, None) => return Err(ConfigError::MissingToken(c.id.clone())),
    };
    Ok(ConnectionSettings {
        config: ConnectionConfig {
            id: c.id,
            base_url: c.base_url.as_str().trim_end_matches('/').to_string(),
            client_id: c.client_id,
        },
        base_url: c.base_url,
        token,
        max_retries: c.max_retries,
    })
}

fn convert_job(j: JobConfig) -> JobRecord {
    JobRecord {
        name: j.name,
        quiet_period: Duration::from_secs(j.quiet_period_secs),
        triggers: j.triggers.into_iter().map(convert_trigger).collect(),
    }
}

fn convert_trigger(t: TriggerConfig) -> TriggerSpec {
    TriggerSpec {
        id: t.id.unwrap_or_default(),
        connection: t.connection,
        project_key: t.project_key,
        repository: t.repository,
        event_selection: t.event_selection,
        branch_spec: t.branch_spec,
        merge_requests: t.merge_requests,
        allow_safe_merge: t.allow_safe_merge,
    }
}

fn convert_source(s: SourceConfig) -> MultibranchSource {
    MultibranchSource {
        id: s.id,
        connection: s.connection,
        project_key: s.project_key,
        repository: s.repository,
        branch_spec: s.branch_spec,
        discover_branches: s.discover_branches,
        discover_merge_requests: s.discover_merge_requests,
        merge_requests: s.merge_requests,
    }
}

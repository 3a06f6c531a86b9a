//! Runtime configuration types shared between the core and the server.
//!
//! Loading and validating the configuration file is the server's job; the
//! core only sees the validated result.

mod config_store;
mod connection;

pub use config_store::{ConfigStore, ConfigWatcher};
pub use connection::{Connection, ConnectionConfig, ConnectionRegistry, WebhookEndpoint};

use std::time::Duration;

/// Timeouts applied at the integration boundaries.
#[derive(Debug, Clone, Copy)]
pub struct TimeoutConfig {
    /// Upper bound for a single remote API call, including client retries.
    pub remote_call: Duration,
    /// Upper bound for handling one inbound delivery.
    pub dispatch: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            remote_call: Duration::from_secs(30),
            dispatch: Duration::from_secs(60),
        }
    }
}

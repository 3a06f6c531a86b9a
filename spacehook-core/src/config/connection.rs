//! Connections to remote organizations.

use std::collections::HashMap;
use std::sync::Arc;

use url::Url;

use crate::remote::RemoteApi;

/// Validated settings of one connection.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub id: String,
    /// Root URL of the remote organization, without trailing slash.
    pub base_url: String,
    /// Application client id the remote side puts into every delivery.
    pub client_id: String,
}

/// A configured connection together with its API handle.
#[derive(Clone)]
pub struct Connection {
    pub config: ConnectionConfig,
    pub remote: Arc<dyn RemoteApi>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Lookup of connections by id or by application client id.
#[derive(Debug, Default, Clone)]
pub struct ConnectionRegistry {
    by_id: HashMap<String, Connection>,
}

impl ConnectionRegistry {
    pub fn new(connections: impl IntoIterator<Item = Connection>) -> Self {
        Self {
            by_id: connections
                .into_iter()
                .map(|c| (c.config.id.clone(), c))
                .collect(),
        }
    }

    pub fn get(&self, id: &str) -> Option<&Connection> {
        self.by_id.get(id)
    }

    pub fn by_client_id(&self, client_id: &str) -> Option<&Connection> {
        self.by_id.values().find(|c| c.config.client_id == client_id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.by_id.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

/// Where the remote side should deliver webhook payloads.
#[derive(Debug, Clone)]
pub struct WebhookEndpoint {
    pub url: String,
    pub ssl_verification: bool,
}

impl WebhookEndpoint {
    /// Path of the inbound endpoint on this service.
    pub const PATH: &'static str = "/api/space/process";

    /// Derive the endpoint from the service's public URL.
    ///
    /// TLS verification is requested whenever the public URL is https.
    pub fn from_public_url(public_url: &Url) -> Self {
        let root = public_url.as_str().trim_end_matches('/');
        Self {
            url: format!("{root}{}", Self::PATH),
            ssl_verification: public_url.scheme() == "https",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_from_public_url() {
        let url = Url::parse("https://ci.example.com/").unwrap();
        let endpoint = WebhookEndpoint::from_public_url(&url);
        assert_eq!(endpoint.url, "https://ci.example.com/api/space/process");
        assert!(endpoint.ssl_verification);

        let url = Url::parse("http://localhost:8080").unwrap();
        let endpoint = WebhookEndpoint::from_public_url(&url);
        assert_eq!(endpoint.url, "http://localhost:8080/api/space/process");
        assert!(!endpoint.ssl_verification);
    }
}

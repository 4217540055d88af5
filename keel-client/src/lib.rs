//! Keel registry client
//!
//! A small, type-safe client for the container registry HTTP API (v2),
//! covering what the publisher needs before it pushes: verifying credentials
//! and looking up what a tag currently points at.
//!
//! # Example
//!
//! ```no_run
//! use keel_client::{Credentials, RegistryClient};
//!
//! # async fn example() -> keel_client::Result<()> {
//! let client = RegistryClient::new(
//!     "https://registry-1.docker.io",
//!     Some(Credentials::new("ci-bot", "token")),
//! );
//!
//! client.ping().await?;
//! if let Some(manifest) = client.get_manifest("acme/frontend", "9fceb02").await? {
//!     println!("tag exists: {:?}", manifest.digest);
//! }
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod error;
mod manifests;

pub use auth::{Authorization, Challenge, Credentials};
pub use error::{ClientError, Result};
pub use manifests::{MANIFEST_MEDIA_TYPES, RemoteManifest};

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Registry operations the publisher depends on
///
/// Implemented by [`RegistryClient`]; tests substitute an in-memory store.
#[async_trait]
pub trait ManifestStore: Send + Sync {
    /// Verifies that the registry accepts the configured credentials
    async fn ping(&self) -> Result<()>;

    /// Looks up what `reference` currently points at in `repository`
    async fn manifest(&self, repository: &str, reference: &str)
    -> Result<Option<RemoteManifest>>;
}

/// HTTP client for a container registry
#[derive(Debug, Clone)]
pub struct RegistryClient {
    /// Base URL of the registry API (e.g., "https://ghcr.io")
    base_url: String,
    /// HTTP client instance
    client: Client,
    credentials: Option<Credentials>,
    /// Negotiated authorisation per scope
    tokens: Arc<Mutex<HashMap<String, Authorization>>>,
}

impl RegistryClient {
    /// Create a new registry client
    ///
    /// # Arguments
    /// * `base_url` - The registry API base (e.g., "https://registry-1.docker.io")
    /// * `credentials` - Username and password/token, if any
    pub fn new(base_url: impl Into<String>, credentials: Option<Credentials>) -> Self {
        Self::with_client(base_url, credentials, Client::new())
    }

    /// Create a new registry client with a custom HTTP client
    ///
    /// This allows you to configure timeouts, proxies, TLS settings, etc.
    pub fn with_client(
        base_url: impl Into<String>,
        credentials: Option<Credentials>,
        client: Client,
    ) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
            credentials,
            tokens: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Get the base URL of the registry
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Check that the registry is reachable and accepts our credentials
    pub async fn ping(&self) -> Result<()> {
        let url = format!("{}/v2/", self.base_url);
        let response = self
            .send_authorized(|client| client.get(&url), "")
            .await?;

        self.handle_empty_response(response).await
    }

    // =============================================================================
    // Response Handlers
    // =============================================================================

    /// Handle an API response and deserialize JSON
    async fn handle_response<T: DeserializeOwned>(&self, response: reqwest::Response) -> Result<T> {
        let status = response.status();

        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ClientError::api_error(status.as_u16(), error_text));
        }

        response
            .json()
            .await
            .map_err(|e| ClientError::ParseError(format!("Failed to parse JSON response: {}", e)))
    }

    /// Handle an API response whose body is ignored
    async fn handle_empty_response(&self, response: reqwest::Response) -> Result<()> {
        let status = response.status();

        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ClientError::api_error(status.as_u16(), error_text));
        }

        Ok(())
    }
}

#[async_trait]
impl ManifestStore for RegistryClient {
    async fn ping(&self) -> Result<()> {
        RegistryClient::ping(self).await
    }

    async fn manifest(
        &self,
        repository: &str,
        reference: &str,
    ) -> Result<Option<RemoteManifest>> {
        self.get_manifest(repository, reference).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_creation() {
        let client = RegistryClient::new("https://ghcr.io", None);
        assert_eq!(client.base_url(), "https://ghcr.io");
    }

    #[test]
    fn test_client_trims_trailing_slash() {
        let client = RegistryClient::new("http://localhost:5000/", None);
        assert_eq!(client.base_url(), "http://localhost:5000");
    }

    #[test]
    fn test_client_with_custom_client() {
        let http_client = Client::new();
        let client = RegistryClient::with_client(
            "https://registry-1.docker.io",
            Some(Credentials::new("u", "p")),
            http_client,
        );
        assert_eq!(client.base_url(), "https://registry-1.docker.io");
    }
}

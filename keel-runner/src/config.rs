//! Runner configuration
//!
//! Defines the per-machine parameters of a build unit: where the repository
//! and the layer cache live, which container CLI to drive, registry
//! credentials, and the timeouts and retry budget of network operations.
//! Pipeline-wide settings (services, namespace, conflict policy) come from
//! `keel.yaml` instead.

use keel_client::Credentials;
use keel_core::error::{PipelineError, Result};
use std::path::PathBuf;
use std::time::Duration;

use crate::retry::RetryPolicy;

/// Runner configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Repository checkout the service paths are relative to
    pub repo_root: PathBuf,

    /// Registry identity and secret, consumed only by the publisher
    pub credentials: Credentials,

    /// Directory holding durable layer cache entries
    pub cache_dir: PathBuf,

    /// Operating system component of cache keys
    pub cache_os: String,

    /// Cache entries kept per service after a successful build
    pub cache_retain: usize,

    /// Container CLI binary (docker, or a compatible replacement)
    pub container_cli: String,

    /// Maximum time one image build may take
    pub build_timeout: Duration,

    /// Maximum time of one push attempt
    pub push_timeout: Duration,

    /// Retry budget for pushes and registry lookups
    pub retry: RetryPolicy,
}

impl Config {
    /// Creates a new configuration with defaults
    pub fn new(credentials: Credentials) -> Self {
        Self {
            repo_root: PathBuf::from("."),
            credentials,
            cache_dir: PathBuf::from("/tmp/.keel-cache"),
            cache_os: std::env::consts::OS.to_string(),
            cache_retain: 3,
            container_cli: "docker".to_string(),
            build_timeout: Duration::from_secs(3600),
            push_timeout: Duration::from_secs(600),
            retry: RetryPolicy::default(),
        }
    }

    /// Creates configuration from environment variables
    ///
    /// Expected environment variables:
    /// - KEEL_REGISTRY_USERNAME (required)
    /// - KEEL_REGISTRY_PASSWORD (required)
    /// - KEEL_REPO_ROOT (optional, default: .)
    /// - KEEL_CACHE_DIR (optional, default: /tmp/.keel-cache)
    /// - KEEL_CACHE_OS (optional, default: current OS)
    /// - KEEL_CACHE_RETAIN (optional, default: 3)
    /// - KEEL_CONTAINER_CLI (optional, default: docker)
    /// - KEEL_BUILD_TIMEOUT (optional, seconds, default: 3600)
    /// - KEEL_PUSH_TIMEOUT (optional, seconds, default: 600)
    /// - KEEL_PUSH_RETRIES (optional, default: 3)
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Creates configuration from an arbitrary variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| {
            lookup(key)
                .filter(|v| !v.is_empty())
                .ok_or_else(|| PipelineError::Config(format!("{} environment variable not set", key)))
        };

        let credentials = Credentials::new(
            required("KEEL_REGISTRY_USERNAME")?,
            required("KEEL_REGISTRY_PASSWORD")?,
        );

        let mut config = Self::new(credentials);

        if let Some(root) = lookup("KEEL_REPO_ROOT") {
            config.repo_root = PathBuf::from(root);
        }
        if let Some(dir) = lookup("KEEL_CACHE_DIR") {
            config.cache_dir = PathBuf::from(dir);
        }
        if let Some(os) = lookup("KEEL_CACHE_OS") {
            config.cache_os = os;
        }
        if let Some(cli) = lookup("KEEL_CONTAINER_CLI") {
            config.container_cli = cli;
        }

        config.cache_retain = lookup("KEEL_CACHE_RETAIN")
            .and_then(|s| s.parse::<usize>().ok())
            .unwrap_or(config.cache_retain);

        config.build_timeout = lookup("KEEL_BUILD_TIMEOUT")
            .and_then(|s| s.parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(config.build_timeout);

        config.push_timeout = lookup("KEEL_PUSH_TIMEOUT")
            .and_then(|s| s.parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(config.push_timeout);

        if let Some(retries) = lookup("KEEL_PUSH_RETRIES").and_then(|s| s.parse::<u32>().ok()) {
            config.retry.max_attempts = retries;
        }

        Ok(config)
    }

    /// Validates the configuration
    pub fn validate(&self) -> Result<()> {
        if self.credentials.username.is_empty() || self.credentials.password.is_empty() {
            return Err(PipelineError::Config(
                "registry credentials cannot be empty".to_string(),
            ));
        }

        if self.cache_os.is_empty() || self.cache_os.contains('/') {
            return Err(PipelineError::Config(
                "cache_os must be a non-empty plain identifier".to_string(),
            ));
        }

        if self.container_cli.is_empty() {
            return Err(PipelineError::Config(
                "container_cli cannot be empty".to_string(),
            ));
        }

        if self.cache_retain == 0 {
            return Err(PipelineError::Config(
                "cache_retain must be greater than 0".to_string(),
            ));
        }

        if self.build_timeout.is_zero() || self.push_timeout.is_zero() {
            return Err(PipelineError::Config(
                "timeouts must be greater than 0".to_string(),
            ));
        }

        if self.retry.max_attempts == 0 {
            return Err(PipelineError::Config(
                "push retries must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

//! Error types for the Keel pipeline
//!
//! Run-level errors (history, registry auth, configuration) abort a run before
//! any build unit starts. Unit-level errors only fail their own build result.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Errors that can occur while running the pipeline
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Commit history needed for the diff is missing (shallow clone, unknown ref)
    #[error("commit history unavailable: {0}")]
    HistoryUnavailable(String),

    /// No build descriptor at any known location
    #[error("no build descriptor found for service '{service}'")]
    DescriptorNotFound { service: String },

    /// Container build failed
    #[error("build failed for service '{service}': {cause}")]
    BuildFailed { service: String, cause: String },

    /// Immutable tag already points at a different image
    #[error("tag '{tag}' of service '{service}' already exists with a different image")]
    PushConflict { service: String, tag: String },

    /// Push failed after exhausting retries
    #[error("push failed for service '{service}': {cause}")]
    PushFailed { service: String, cause: String },

    /// Registry rejected the configured credentials
    #[error("registry authentication failed: {0}")]
    RegistryAuthFailure(String),

    /// Unit was cancelled before completion
    #[error("build of service '{service}' was cancelled")]
    Cancelled { service: String },

    /// Invalid or missing configuration
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Orchestrator state machine misuse
    #[error("invalid run state transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
}

/// Machine-readable failure category carried by build results and reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    HistoryUnavailable,
    DescriptorNotFound,
    BuildFailed,
    PushConflict,
    PushFailed,
    RegistryAuthFailure,
    Cancelled,
    Config,
    Internal,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            FailureKind::HistoryUnavailable => "HistoryUnavailable",
            FailureKind::DescriptorNotFound => "DescriptorNotFound",
            FailureKind::BuildFailed => "BuildFailed",
            FailureKind::PushConflict => "PushConflict",
            FailureKind::PushFailed => "PushFailed",
            FailureKind::RegistryAuthFailure => "RegistryAuthFailure",
            FailureKind::Cancelled => "Cancelled",
            FailureKind::Config => "Config",
            FailureKind::Internal => "Internal",
        };
        f.write_str(name)
    }
}

impl PipelineError {
    /// Classify this error
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::HistoryUnavailable(_) => FailureKind::HistoryUnavailable,
            Self::DescriptorNotFound { .. } => FailureKind::DescriptorNotFound,
            Self::BuildFailed { .. } => FailureKind::BuildFailed,
            Self::PushConflict { .. } => FailureKind::PushConflict,
            Self::PushFailed { .. } => FailureKind::PushFailed,
            Self::RegistryAuthFailure(_) => FailureKind::RegistryAuthFailure,
            Self::Cancelled { .. } => FailureKind::Cancelled,
            Self::Config(_) => FailureKind::Config,
            Self::InvalidTransition { .. } | Self::Io(_) | Self::Json(_) | Self::Yaml(_) => {
                FailureKind::Internal
            }
        }
    }

    /// Check if this error aborts the whole run rather than a single unit
    pub fn is_run_level(&self) -> bool {
        matches!(
            self.kind(),
            FailureKind::HistoryUnavailable | FailureKind::RegistryAuthFailure | FailureKind::Config
        )
    }
}

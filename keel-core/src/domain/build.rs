//! Build unit domain types

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::PathBuf;

use crate::domain::service::ServiceDescriptor;
use crate::error::{FailureKind, PipelineError};

/// Resolved build file and context for one service
///
/// Resolved per unit at build time; never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildDescriptor {
    pub dockerfile_path: PathBuf,
    pub context_path: PathBuf,
}

/// Outcome of one service's build unit
///
/// Exactly one is produced per matrix entry, whether the unit succeeded,
/// failed, panicked or was cancelled.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildResult {
    pub service: ServiceDescriptor,
    /// Full image references that were published
    pub tags: BTreeSet<String>,
    pub success: bool,
    pub error: Option<String>,
    pub failure: Option<FailureKind>,
    #[serde(default)]
    pub warnings: Vec<String>,
    /// Local image id (config digest) of the built image
    pub image_id: Option<String>,
    /// Manifest digest reported by the registry for the immutable tag
    pub digest: Option<String>,
    pub finished_at: chrono::DateTime<chrono::Utc>,
}

impl BuildResult {
    pub fn succeeded<I, S>(service: ServiceDescriptor, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            service,
            tags: tags.into_iter().map(Into::into).collect(),
            success: true,
            error: None,
            failure: None,
            warnings: Vec::new(),
            image_id: None,
            digest: None,
            finished_at: chrono::Utc::now(),
        }
    }

    pub fn failed(service: ServiceDescriptor, error: &PipelineError) -> Self {
        Self {
            service,
            tags: BTreeSet::new(),
            success: false,
            error: Some(error.to_string()),
            failure: Some(error.kind()),
            warnings: Vec::new(),
            image_id: None,
            digest: None,
            finished_at: chrono::Utc::now(),
        }
    }

    pub fn with_warnings(mut self, warnings: Vec<String>) -> Self {
        self.warnings.extend(warnings);
        self
    }

    pub fn with_image(mut self, image_id: Option<String>, digest: Option<String>) -> Self {
        self.image_id = image_id;
        self.digest = digest;
        self
    }
}

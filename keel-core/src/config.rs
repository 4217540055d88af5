//! Pipeline configuration
//!
//! The `keel.yaml` file at the repository root is the single source of truth
//! for watched services. Both the build matrix and the upstream trigger filter
//! are derived from it.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::domain::image::Namespace;
use crate::domain::service::PathRegistry;
use crate::error::{PipelineError, Result};

pub const CONFIG_FILENAME: &str = "keel.yaml";

/// What to do when an immutable tag already points at a different image
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictPolicy {
    /// Fail the unit
    #[default]
    Fatal,
    /// Leave the existing tag alone, record a warning and continue
    Warn,
}

/// Registry the images are published to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrySettings {
    /// Image prefix, e.g. `acme` or `ghcr.io/acme`
    pub namespace: String,
    /// Overrides the registry API base derived from the namespace
    #[serde(default)]
    pub api_url: Option<String>,
}

/// Contents of `keel.yaml`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub registry: RegistrySettings,

    /// Build descriptor file name looked up in every service
    #[serde(default = "default_descriptor_file")]
    pub descriptor_file: String,

    /// Shared directory that also triggers the pipeline (manifests, release notes)
    #[serde(default = "default_release_dir")]
    pub release_dir: Option<String>,

    /// Watched service directories, in build order
    pub services: Vec<String>,

    #[serde(default)]
    pub push_conflict: ConflictPolicy,

    /// Cancel sibling units after the first unit failure
    #[serde(default)]
    pub fail_fast: bool,

    /// Maximum number of build units running at once
    #[serde(default = "default_max_parallel")]
    pub max_parallel: usize,
}

fn default_descriptor_file() -> String {
    "Dockerfile".to_string()
}

fn default_release_dir() -> Option<String> {
    Some("release".to_string())
}

fn default_max_parallel() -> usize {
    4
}

impl PipelineConfig {
    /// Parses and validates a YAML document
    pub fn from_yaml(contents: &str) -> Result<Self> {
        let config: PipelineConfig = serde_yaml::from_str(contents)
            .map_err(|e| PipelineError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration
    pub fn validate(&self) -> Result<()> {
        Namespace::parse(&self.registry.namespace)?;

        if let Some(url) = &self.registry.api_url {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(PipelineError::Config(
                    "registry.api_url must start with http:// or https://".to_string(),
                ));
            }
        }

        if self.descriptor_file.trim().is_empty() || self.descriptor_file.contains('/') {
            return Err(PipelineError::Config(
                "descriptor_file must be a plain file name".to_string(),
            ));
        }

        if self.services.is_empty() {
            return Err(PipelineError::Config(
                "at least one service must be listed".to_string(),
            ));
        }

        if self.max_parallel == 0 {
            return Err(PipelineError::Config(
                "max_parallel must be greater than 0".to_string(),
            ));
        }

        self.registry()?;
        Ok(())
    }

    /// The ordered service registry
    pub fn registry(&self) -> Result<PathRegistry> {
        PathRegistry::from_paths(&self.services)
    }

    pub fn namespace(&self) -> Result<Namespace> {
        Namespace::parse(&self.registry.namespace)
    }

    /// Registry API base URL
    pub fn api_base(&self) -> Result<String> {
        match &self.registry.api_url {
            Some(url) => Ok(url.trim_end_matches('/').to_string()),
            None => Ok(self.namespace()?.api_base()),
        }
    }

    /// Path globs for the upstream trigger filter
    pub fn trigger_filters(&self) -> Result<Vec<String>> {
        Ok(self.registry()?.trigger_filters(self.release_dir.as_deref()))
    }
}

/// Loads `keel.yaml` from a repository root
pub fn load(repo_root: &Path) -> Result<PipelineConfig> {
    load_from(&repo_root.join(CONFIG_FILENAME))
}

/// Loads a pipeline configuration file
pub fn load_from(path: &Path) -> Result<PipelineConfig> {
    if !path.exists() {
        return Err(PipelineError::Config(format!(
            "config file not found at {}",
            path.display()
        )));
    }
    let contents = std::fs::read_to_string(path)?;
    PipelineConfig::from_yaml(&contents)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    const FULL: &str = r#"
registry:
  namespace: ghcr.io/acme
  api_url: https://ghcr.io/
descriptor_file: Containerfile
release_dir: deploy
services:
  - src/adservice
  - src/cartservice
  - src/frontend
push_conflict: warn
fail_fast: true
max_parallel: 2
"#;

    #[test]
    fn parse_full_config() {
        let config = PipelineConfig::from_yaml(FULL).unwrap();
        assert_eq!(config.descriptor_file, "Containerfile");
        assert_eq!(config.push_conflict, ConflictPolicy::Warn);
        assert!(config.fail_fast);
        assert_eq!(config.max_parallel, 2);
        assert_eq!(config.api_base().unwrap(), "https://ghcr.io");
        assert_eq!(config.registry().unwrap().len(), 3);
    }

    #[test]
    fn parse_minimal_config_uses_defaults() {
        let yaml = "registry:\n  namespace: acme\nservices:\n  - src/frontend\n";
        let config = PipelineConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.descriptor_file, "Dockerfile");
        assert_eq!(config.release_dir.as_deref(), Some("release"));
        assert_eq!(config.push_conflict, ConflictPolicy::Fatal);
        assert!(!config.fail_fast);
        assert_eq!(config.max_parallel, 4);
        assert_eq!(config.api_base().unwrap(), "https://registry-1.docker.io");
    }

    #[test]
    fn trigger_filters_follow_services() {
        let config = PipelineConfig::from_yaml(FULL).unwrap();
        assert_eq!(
            config.trigger_filters().unwrap(),
            vec![
                "src/adservice/**",
                "src/cartservice/**",
                "src/frontend/**",
                "deploy/**"
            ]
        );
    }

    #[test]
    fn rejects_invalid_configs() {
        let duplicate = "registry:\n  namespace: acme\nservices:\n  - src/a\n  - src/a\n";
        assert!(PipelineConfig::from_yaml(duplicate).is_err());

        let empty = "registry:\n  namespace: acme\nservices: []\n";
        assert!(PipelineConfig::from_yaml(empty).is_err());

        let no_namespace = "registry:\n  namespace: ''\nservices:\n  - src/a\n";
        assert!(PipelineConfig::from_yaml(no_namespace).is_err());

        let nested_descriptor =
            "registry:\n  namespace: acme\ndescriptor_file: build/Dockerfile\nservices:\n  - src/a\n";
        assert!(PipelineConfig::from_yaml(nested_descriptor).is_err());
    }

    #[test]
    fn load_from_repo_root() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(CONFIG_FILENAME), FULL).unwrap();
        let config = load(dir.path()).unwrap();
        assert_eq!(config.services.len(), 3);
    }

    #[test]
    fn missing_config_returns_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(load(dir.path()), Err(PipelineError::Config(_))));
    }
}

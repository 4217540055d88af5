//! Configuration module
//!
//! Locates the repository checkout and its `keel.yaml`.

use anyhow::{Context, Result};
use keel_core::config::{self, CONFIG_FILENAME, PipelineConfig};
use std::path::PathBuf;

/// CLI configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Repository checkout the service paths are relative to
    pub repo_root: PathBuf,
    /// Explicit pipeline configuration file, instead of `<repo_root>/keel.yaml`
    pub config_file: Option<PathBuf>,
}

impl Config {
    pub fn config_path(&self) -> PathBuf {
        self.config_file
            .clone()
            .unwrap_or_else(|| self.repo_root.join(CONFIG_FILENAME))
    }

    /// Loads and validates the pipeline configuration
    pub fn pipeline(&self) -> Result<PipelineConfig> {
        let path = self.config_path();
        config::load_from(&path)
            .with_context(|| format!("Failed to load pipeline configuration from {}", path.display()))
    }
}

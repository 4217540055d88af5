//! Orchestrator configuration
//!
//! A run needs the runner configuration (credentials, cache, timeouts), the
//! pipeline configuration from `keel.yaml`, and the commit pair of the
//! triggering event.

use keel_core::config::{self, PipelineConfig};
use keel_core::domain::change::Revision;
use keel_core::error::{PipelineError, Result};

/// Revision pair of the triggering event, resolved during detection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Trigger {
    pub base: Revision,
    pub head: Revision,
}

impl Trigger {
    /// Reads KEEL_BASE_REF and KEEL_HEAD_REF
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |key: &str| {
            lookup(key)
                .ok_or_else(|| PipelineError::Config(format!("{} environment variable not set", key)))
                .and_then(Revision::new)
        };

        Ok(Self {
            base: read("KEEL_BASE_REF")?,
            head: read("KEEL_HEAD_REF")?,
        })
    }
}

/// Everything a pipeline run is configured with
#[derive(Debug, Clone)]
pub struct Config {
    pub runner: keel_runner::Config,
    pub pipeline: PipelineConfig,
}

impl Config {
    /// Loads the runner settings from the environment and `keel.yaml` from
    /// the repository root they name
    pub fn from_env() -> Result<Self> {
        let runner = keel_runner::Config::from_env()?;
        runner.validate()?;
        let pipeline = config::load(&runner.repo_root)?;

        Ok(Self { runner, pipeline })
    }
}

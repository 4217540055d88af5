//! Image builds through the container CLI
//!
//! Handles the build step of a unit:
//! - Checking that the CLI and its buildx plugin are available
//! - Running `buildx build` with both tags, OCI labels and local layer cache
//! - Reading back the local image id

use async_trait::async_trait;
use keel_core::domain::build::BuildDescriptor;
use keel_core::domain::change::CommitRef;
use keel_core::domain::image::ImageTag;
use keel_core::domain::service::ServiceDescriptor;
use keel_core::error::{PipelineError, Result};
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::process::{self, ProcessError};

const LABEL_REVISION: &str = "org.opencontainers.image.revision";
const LABEL_TITLE: &str = "org.opencontainers.image.title";

/// Everything one image build needs
#[derive(Debug, Clone, Copy)]
pub struct BuildRequest<'a> {
    pub service: &'a ServiceDescriptor,
    pub descriptor: &'a BuildDescriptor,
    pub tags: &'a ImageTag,
    pub head: &'a CommitRef,
    /// Cache entry to read layers from, if any was restored
    pub cache_from: Option<&'a Path>,
    /// Staging directory the build exports its layers to
    pub cache_to: &'a Path,
}

/// Image produced by a successful build
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuiltImage {
    /// Local image id, the digest of the image config
    pub image_id: String,
}

/// Builds one service image and applies both tags
#[async_trait]
pub trait ImageBuilder: Send + Sync {
    /// Checks once per run that builds can start at all
    async fn check_available(&self) -> Result<()> {
        Ok(())
    }

    async fn build(&self, request: &BuildRequest<'_>) -> Result<BuiltImage>;
}

/// Builder driving `<cli> buildx build`
#[derive(Debug, Clone)]
pub struct BuildxBuilder {
    cli: String,
    timeout: Duration,
}

impl BuildxBuilder {
    pub fn new(cli: impl Into<String>, timeout: Duration) -> Self {
        Self {
            cli: cli.into(),
            timeout,
        }
    }

    /// Arguments of the build command for `request`
    pub fn build_args(request: &BuildRequest<'_>) -> Vec<String> {
        let mut args = vec![
            "buildx".to_string(),
            "build".to_string(),
            "--file".to_string(),
            request.descriptor.dockerfile_path.display().to_string(),
            "--tag".to_string(),
            request.tags.stable_ref(),
            "--tag".to_string(),
            request.tags.immutable_ref(),
            "--label".to_string(),
            format!("{}={}", LABEL_REVISION, request.head),
            "--label".to_string(),
            format!("{}={}", LABEL_TITLE, request.service.name),
        ];

        if let Some(from) = request.cache_from {
            args.push("--cache-from".to_string());
            args.push(format!("type=local,src={}", from.display()));
        }

        args.push("--cache-to".to_string());
        args.push(format!(
            "type=local,dest={},mode=max",
            request.cache_to.display()
        ));
        args.push("--load".to_string());
        args.push(request.descriptor.context_path.display().to_string());

        args
    }

    async fn inspect_image_id(&self, service: &str, reference: &str) -> Result<String> {
        let args = vec![
            "image".to_string(),
            "inspect".to_string(),
            "--format".to_string(),
            "{{.Id}}".to_string(),
            reference.to_string(),
        ];

        let output = process::run(&self.cli, &args, None, None, Duration::from_secs(60))
            .await
            .map_err(|e| build_failed(service, e))?;

        let image_id = output.stdout.trim().to_string();
        if !output.success() || image_id.is_empty() {
            return Err(PipelineError::BuildFailed {
                service: service.to_string(),
                cause: format!("could not inspect {}: {}", reference, output.failure_message()),
            });
        }

        Ok(image_id)
    }
}

fn build_failed(service: &str, error: ProcessError) -> PipelineError {
    PipelineError::BuildFailed {
        service: service.to_string(),
        cause: error.to_string(),
    }
}

#[async_trait]
impl ImageBuilder for BuildxBuilder {
    /// Checks that the container CLI and buildx are installed
    async fn check_available(&self) -> Result<()> {
        let args = vec!["buildx".to_string(), "version".to_string()];
        let output = process::run(&self.cli, &args, None, None, Duration::from_secs(30))
            .await
            .map_err(|e| PipelineError::Config(format!("{} buildx is not available: {}", self.cli, e)))?;

        if !output.success() {
            return Err(PipelineError::Config(format!(
                "{} buildx is not working correctly: {}",
                self.cli,
                output.failure_message()
            )));
        }

        info!("{} buildx is available: {}", self.cli, output.stdout.trim());
        Ok(())
    }

    async fn build(&self, request: &BuildRequest<'_>) -> Result<BuiltImage> {
        let service = request.service.name.as_str();
        info!(
            "Building {} from {}",
            request.tags.immutable_ref(),
            request.descriptor.dockerfile_path.display()
        );

        let args = Self::build_args(request);
        let output = process::run(&self.cli, &args, None, None, self.timeout)
            .await
            .map_err(|e| build_failed(service, e))?;

        if !output.success() {
            return Err(PipelineError::BuildFailed {
                service: service.to_string(),
                cause: output.failure_message(),
            });
        }

        let image_id = self
            .inspect_image_id(service, &request.tags.immutable_ref())
            .await?;
        info!("Built {} ({})", request.tags.immutable_ref(), image_id);

        Ok(BuiltImage { image_id })
    }
}

//! Image publishing
//!
//! Pushes the immutable tag first and the stable tag second. Before the
//! immutable push the registry is asked what the tag currently holds:
//! - nothing: push it
//! - the same image: skip the push (re-run of the same commit)
//! - a different image: conflict, fatal or downgraded to a warning
//!
//! Registries have no conditional put, so the lookup is best-effort: another
//! writer can still push the tag between lookup and push. The tag is read
//! back after pushing and a different image there is treated as a conflict.

use async_trait::async_trait;
use keel_client::{ClientError, Credentials, ManifestStore, RemoteManifest};
use keel_core::config::ConflictPolicy;
use keel_core::domain::image::ImageTag;
use keel_core::domain::service::ServiceDescriptor;
use keel_core::error::{PipelineError, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::buildx::BuiltImage;
use crate::process::{self, ProcessError};
use crate::retry::{RetryPolicy, retry_with_backoff};

/// What a successful publish left in the registry
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublishOutcome {
    /// References now pointing at the built image
    pub published: Vec<String>,
    /// Registry manifest digest of the immutable tag, when known
    pub digest: Option<String>,
    pub warnings: Vec<String>,
}

/// Publishes built images to the registry
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Authenticates against the registry; failure aborts the whole run
    async fn login(&self) -> Result<()>;

    async fn publish(
        &self,
        service: &ServiceDescriptor,
        image: &BuiltImage,
        tags: &ImageTag,
    ) -> Result<PublishOutcome>;
}

/// Error of a single push or login command
#[derive(Debug, thiserror::Error)]
pub enum PushError {
    #[error(transparent)]
    Process(#[from] ProcessError),

    #[error("{0}")]
    Rejected(String),
}

/// Moves images between the local engine and the registry
#[async_trait]
pub trait ImagePusher: Send + Sync {
    async fn login(
        &self,
        registry_host: Option<&str>,
        credentials: &Credentials,
    ) -> std::result::Result<(), PushError>;

    /// Pushes `reference`, returning the manifest digest if the CLI reported one
    async fn push(&self, reference: &str) -> std::result::Result<Option<String>, PushError>;
}

/// Pusher driving `<cli> login` and `<cli> push`
#[derive(Debug, Clone)]
pub struct CliPusher {
    cli: String,
    timeout: Duration,
}

impl CliPusher {
    pub fn new(cli: impl Into<String>, timeout: Duration) -> Self {
        Self {
            cli: cli.into(),
            timeout,
        }
    }
}

#[async_trait]
impl ImagePusher for CliPusher {
    async fn login(
        &self,
        registry_host: Option<&str>,
        credentials: &Credentials,
    ) -> std::result::Result<(), PushError> {
        let mut args = vec![
            "login".to_string(),
            "--username".to_string(),
            credentials.username.clone(),
            "--password-stdin".to_string(),
        ];
        if let Some(host) = registry_host {
            args.push(host.to_string());
        }

        let output = process::run(
            &self.cli,
            &args,
            None,
            Some(&credentials.password),
            self.timeout,
        )
        .await?;

        if !output.success() {
            return Err(PushError::Rejected(output.failure_message()));
        }
        Ok(())
    }

    async fn push(&self, reference: &str) -> std::result::Result<Option<String>, PushError> {
        let args = vec!["push".to_string(), reference.to_string()];
        let output = process::run(&self.cli, &args, None, None, self.timeout).await?;

        if !output.success() {
            return Err(PushError::Rejected(output.failure_message()));
        }
        Ok(parse_push_digest(&output.stdout))
    }
}

/// Extracts the digest from push output (`<tag>: digest: sha256:... size: N`)
pub fn parse_push_digest(output: &str) -> Option<String> {
    output.lines().rev().find_map(|line| {
        let (_, rest) = line.split_once("digest: ")?;
        let digest = rest.split_whitespace().next()?;
        digest.starts_with("sha256:").then(|| digest.to_string())
    })
}

/// Publisher checking tag state through the registry API
pub struct RegistryPublisher {
    registry_host: Option<String>,
    credentials: Credentials,
    store: Arc<dyn ManifestStore>,
    pusher: Arc<dyn ImagePusher>,
    policy: ConflictPolicy,
    retry: RetryPolicy,
}

impl RegistryPublisher {
    pub fn new(
        registry_host: Option<String>,
        credentials: Credentials,
        store: Arc<dyn ManifestStore>,
        pusher: Arc<dyn ImagePusher>,
    ) -> Self {
        Self {
            registry_host,
            credentials,
            store,
            pusher,
            policy: ConflictPolicy::default(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_conflict_policy(mut self, policy: ConflictPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Lookup of `reference` in the repository behind `tags`
    async fn lookup(
        &self,
        service: &str,
        tags: &ImageTag,
        reference: &str,
    ) -> Result<Option<RemoteManifest>> {
        retry_with_backoff(
            &self.retry,
            "Manifest lookup",
            ClientError::is_transient,
            || self.store.manifest(&tags.repository, reference),
        )
        .await
        .map_err(|e| PipelineError::PushFailed {
            service: service.to_string(),
            cause: format!("could not look up {}:{}: {}", tags.repository, reference, e),
        })
    }

    /// Applies the conflict policy to an immutable tag holding another image
    fn conflict(&self, service: &str, immutable: &str, outcome: &mut PublishOutcome) -> Result<()> {
        match self.policy {
            ConflictPolicy::Fatal => Err(PipelineError::PushConflict {
                service: service.to_string(),
                tag: immutable.to_string(),
            }),
            ConflictPolicy::Warn => {
                let message = format!(
                    "{} already points at a different image and was left unchanged",
                    immutable
                );
                warn!("{}", message);
                outcome.warnings.push(message);
                Ok(())
            }
        }
    }

    async fn push_with_retry(&self, service: &str, reference: &str) -> Result<Option<String>> {
        let what = format!("Push of {}", reference);
        retry_with_backoff(&self.retry, &what, |_| true, || self.pusher.push(reference))
            .await
            .map_err(|e| PipelineError::PushFailed {
                service: service.to_string(),
                cause: e.to_string(),
            })
    }
}

#[async_trait]
impl Publisher for RegistryPublisher {
    async fn login(&self) -> Result<()> {
        let host = self.registry_host.as_deref();
        self.pusher
            .login(host, &self.credentials)
            .await
            .map_err(|e| PipelineError::RegistryAuthFailure(e.to_string()))?;

        retry_with_backoff(
            &self.retry,
            "Registry ping",
            ClientError::is_transient,
            || self.store.ping(),
        )
        .await
        .map_err(|e| PipelineError::RegistryAuthFailure(e.to_string()))?;

        info!(
            "Authenticated as {} against {}",
            self.credentials.username,
            host.unwrap_or("docker.io")
        );
        Ok(())
    }

    async fn publish(
        &self,
        service: &ServiceDescriptor,
        image: &BuiltImage,
        tags: &ImageTag,
    ) -> Result<PublishOutcome> {
        let mut outcome = PublishOutcome::default();
        let immutable = tags.immutable_ref();
        let stable = tags.stable_ref();

        let existing = self.lookup(&service.name, tags, &tags.immutable).await?;

        match existing {
            None => {
                let pushed = self.push_with_retry(&service.name, &immutable).await?;
                let current = self.lookup(&service.name, tags, &tags.immutable).await?;
                match current {
                    Some(manifest)
                        if !manifest.matches_image(&image.image_id)
                            && (pushed.is_none() || manifest.digest != pushed) =>
                    {
                        warn!("{} changed while it was being pushed", immutable);
                        self.conflict(&service.name, &immutable, &mut outcome)?;
                    }
                    _ => {
                        outcome.digest = pushed;
                        outcome.published.push(immutable.clone());
                    }
                }
            }
            Some(manifest) if manifest.matches_image(&image.image_id) => {
                info!("{} already holds this image, skipping push", immutable);
                outcome.digest = manifest.digest;
                outcome.published.push(immutable.clone());
            }
            Some(_) => self.conflict(&service.name, &immutable, &mut outcome)?,
        }

        let stable_digest = self.push_with_retry(&service.name, &stable).await?;
        if outcome.digest.is_none() {
            outcome.digest = stable_digest;
        }
        outcome.published.push(stable.clone());

        info!("Published {}", outcome.published.join(", "));
        Ok(outcome)
    }
}

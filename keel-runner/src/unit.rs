//! Build unit
//!
//! One unit takes one matrix entry through resolve, cache restore, build,
//! publish and cache promotion, strictly in that order. Every outcome,
//! including errors, is folded into a single [`BuildResult`].

use keel_client::RegistryClient;
use keel_core::config::PipelineConfig;
use keel_core::domain::build::BuildResult;
use keel_core::domain::change::CommitRef;
use keel_core::domain::image::{ImageTag, Namespace};
use keel_core::domain::service::ServiceDescriptor;
use keel_core::error::Result;
use std::sync::Arc;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::buildx::{BuildRequest, BuildxBuilder, ImageBuilder};
use crate::cache::{CacheKey, LayerCache};
use crate::config::Config;
use crate::publisher::{CliPusher, Publisher, RegistryPublisher};
use crate::resolver::DescriptorResolver;

/// Build-and-publish pipeline for a single service
pub struct BuildUnit {
    resolver: DescriptorResolver,
    namespace: Namespace,
    cache: LayerCache,
    cache_os: String,
    builder: Arc<dyn ImageBuilder>,
    publisher: Arc<dyn Publisher>,
}

impl BuildUnit {
    pub fn new(
        pipeline: &PipelineConfig,
        config: &Config,
        builder: Arc<dyn ImageBuilder>,
        publisher: Arc<dyn Publisher>,
    ) -> Result<Self> {
        Ok(Self {
            resolver: DescriptorResolver::new(&config.repo_root, &pipeline.descriptor_file),
            namespace: pipeline.namespace()?,
            cache: LayerCache::new(&config.cache_dir, config.cache_retain),
            cache_os: config.cache_os.clone(),
            builder,
            publisher,
        })
    }

    /// Unit wired to the container CLI and the registry API
    pub fn from_config(pipeline: &PipelineConfig, config: &Config) -> Result<Self> {
        let namespace = pipeline.namespace()?;
        let store = RegistryClient::new(pipeline.api_base()?, Some(config.credentials.clone()));
        let pusher = CliPusher::new(&config.container_cli, config.push_timeout);

        let publisher = RegistryPublisher::new(
            namespace.registry_host().map(str::to_string),
            config.credentials.clone(),
            Arc::new(store),
            Arc::new(pusher),
        )
        .with_conflict_policy(pipeline.push_conflict)
        .with_retry(config.retry);

        let builder = BuildxBuilder::new(&config.container_cli, config.build_timeout);

        Self::new(pipeline, config, Arc::new(builder), Arc::new(publisher))
    }

    /// Fails when the image builder cannot run on this host
    pub async fn check_builder(&self) -> Result<()> {
        self.builder.check_available().await
    }

    pub fn publisher(&self) -> Arc<dyn Publisher> {
        Arc::clone(&self.publisher)
    }

    pub fn resolver(&self) -> &DescriptorResolver {
        &self.resolver
    }

    /// Runs the unit for `service` at `head`, never failing outright
    pub async fn run(&self, service: &ServiceDescriptor, head: &CommitRef) -> BuildResult {
        let span = info_span!("unit", service = %service.name);

        async {
            info!("Starting build of {} at {}", service.path, head.short());
            match self.execute(service, head).await {
                Ok(result) => {
                    info!("Build of {} succeeded", service.name);
                    result
                }
                Err(e) => {
                    error!("Build of {} failed: {}", service.name, e);
                    BuildResult::failed(service.clone(), &e)
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn execute(&self, service: &ServiceDescriptor, head: &CommitRef) -> Result<BuildResult> {
        let descriptor = self.resolver.resolve(service)?;
        let tags = ImageTag::for_commit(&self.namespace, &service.name, head);
        let key = CacheKey::new(&self.cache_os, &service.name, head.as_str());

        let restored = match self.cache.restore(&key) {
            Ok(path) => path,
            Err(e) => {
                warn!("Cache restore failed, building without cache: {}", e);
                None
            }
        };

        // Dropped on any early return below, which discards the staging dir
        let staging = self.cache.stage(&key)?;

        let image = self
            .builder
            .build(&BuildRequest {
                service,
                descriptor: &descriptor,
                tags: &tags,
                head,
                cache_from: restored.as_deref(),
                cache_to: staging.path(),
            })
            .await?;

        let outcome = self.publisher.publish(service, &image, &tags).await?;

        match staging.commit() {
            Ok(path) => {
                debug!("Cache promoted to {}", path.display());
                if let Err(e) = self.cache.prune(&key) {
                    warn!("Cache pruning failed: {}", e);
                }
            }
            Err(e) => warn!("Failed to promote cache: {}", e),
        }

        Ok(BuildResult::succeeded(service.clone(), outcome.published)
            .with_warnings(outcome.warnings)
            .with_image(Some(image.image_id), outcome.digest))
    }
}

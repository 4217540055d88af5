//! Build descriptor resolution
//!
//! A service's descriptor is looked up through an ordered list of layout
//! strategies. The first strategy that finds a regular file wins; results
//! are never merged.

use keel_core::domain::build::BuildDescriptor;
use keel_core::domain::service::ServiceDescriptor;
use keel_core::error::{PipelineError, Result};
use std::path::{Path, PathBuf};
use tracing::debug;

/// One place a service may keep its build descriptor
pub trait ResolutionStrategy: Send + Sync {
    /// Short name used in diagnostics
    fn name(&self) -> &'static str;

    /// Directory used as build context for `service_dir`
    fn context_dir(&self, service_dir: &Path) -> PathBuf;

    /// Returns the descriptor if this layout applies to `service_dir`
    fn locate(&self, service_dir: &Path, descriptor_file: &str) -> Option<BuildDescriptor> {
        let context_path = self.context_dir(service_dir);
        let dockerfile_path = context_path.join(descriptor_file);

        dockerfile_path.is_file().then_some(BuildDescriptor {
            dockerfile_path,
            context_path,
        })
    }
}

/// `<path>/<file>` with the service directory as context
#[derive(Debug, Default, Clone, Copy)]
pub struct ServiceRootLayout;

impl ResolutionStrategy for ServiceRootLayout {
    fn name(&self) -> &'static str {
        "service-root"
    }

    fn context_dir(&self, service_dir: &Path) -> PathBuf {
        service_dir.to_path_buf()
    }
}

/// `<path>/src/<file>` with `<path>/src` as context
#[derive(Debug, Default, Clone, Copy)]
pub struct NestedSourceLayout;

impl ResolutionStrategy for NestedSourceLayout {
    fn name(&self) -> &'static str {
        "nested-src"
    }

    fn context_dir(&self, service_dir: &Path) -> PathBuf {
        service_dir.join("src")
    }
}

/// Locates build descriptors below a repository checkout
pub struct DescriptorResolver {
    repo_root: PathBuf,
    descriptor_file: String,
    strategies: Vec<Box<dyn ResolutionStrategy>>,
}

impl DescriptorResolver {
    /// Resolver with the standard layouts: service root, then nested `src`
    pub fn new(repo_root: impl Into<PathBuf>, descriptor_file: impl Into<String>) -> Self {
        Self::with_strategies(
            repo_root,
            descriptor_file,
            vec![Box::new(ServiceRootLayout), Box::new(NestedSourceLayout)],
        )
    }

    pub fn with_strategies(
        repo_root: impl Into<PathBuf>,
        descriptor_file: impl Into<String>,
        strategies: Vec<Box<dyn ResolutionStrategy>>,
    ) -> Self {
        Self {
            repo_root: repo_root.into(),
            descriptor_file: descriptor_file.into(),
            strategies,
        }
    }

    pub fn descriptor_file(&self) -> &str {
        &self.descriptor_file
    }

    /// Every location checked for `service`, in lookup order
    pub fn candidates(&self, service: &ServiceDescriptor) -> Vec<PathBuf> {
        let service_dir = self.repo_root.join(&service.path);
        self.strategies
            .iter()
            .map(|s| s.context_dir(&service_dir).join(&self.descriptor_file))
            .collect()
    }

    pub fn resolve(&self, service: &ServiceDescriptor) -> Result<BuildDescriptor> {
        let service_dir = self.repo_root.join(&service.path);

        for strategy in &self.strategies {
            if let Some(descriptor) = strategy.locate(&service_dir, &self.descriptor_file) {
                debug!(
                    "Resolved {} for {} via {} layout",
                    descriptor.dockerfile_path.display(),
                    service.name,
                    strategy.name()
                );
                return Ok(descriptor);
            }
        }

        Err(PipelineError::DescriptorNotFound {
            service: service.name.clone(),
        })
    }
}

//! Build inspection command handlers
//!
//! Answer "what would a build of this service do" without building anything.

use anyhow::{Context, Result, anyhow};
use colored::*;
use keel_core::config::PipelineConfig;
use keel_core::domain::change::Revision;
use keel_core::domain::image::ImageTag;
use keel_core::domain::service::ServiceDescriptor;
use keel_orchestrator::GitChangeDetector;
use keel_runner::DescriptorResolver;

use crate::config::Config;

fn find_service(pipeline: &PipelineConfig, service: &str) -> Result<ServiceDescriptor> {
    pipeline
        .registry()?
        .find(service)
        .cloned()
        .ok_or_else(|| anyhow!("'{}' is not a watched service in keel.yaml", service))
}

/// Show the resolved build descriptor, or every location that was checked.
/// Returns the exit code.
pub fn resolve_descriptor(config: &Config, service: &str) -> Result<i32> {
    let pipeline = config.pipeline()?;
    let service = find_service(&pipeline, service)?;
    let resolver = DescriptorResolver::new(&config.repo_root, &pipeline.descriptor_file);

    match resolver.resolve(&service) {
        Ok(descriptor) => {
            println!("{}", format!("✓ {}", service.name).green().bold());
            println!("  Descriptor: {}", descriptor.dockerfile_path.display().to_string().cyan());
            println!("  Context:    {}", descriptor.context_path.display());
            Ok(0)
        }
        Err(e) => {
            println!("{}", format!("✗ {}", e).red().bold());
            println!("  Checked:");
            for candidate in resolver.candidates(&service) {
                println!("    - {}", candidate.display().to_string().dimmed());
            }
            Ok(1)
        }
    }
}

/// Print the immutable and stable references for `service` at `head`
///
/// `head` may be any revision; it is resolved to its commit id first.
pub async fn print_tags(config: &Config, service: &str, head: &str) -> Result<()> {
    let pipeline = config.pipeline()?;
    let service = find_service(&pipeline, service)?;
    let head = GitChangeDetector::new(&config.repo_root)
        .resolve(&Revision::new(head)?)
        .await
        .with_context(|| format!("Failed to resolve {}", head))?;

    let tags = ImageTag::for_commit(&pipeline.namespace()?, &service.name, &head);
    for reference in tags.refs() {
        println!("{}", reference);
    }

    Ok(())
}

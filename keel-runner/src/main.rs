//! Keel Runner
//!
//! Worker process that builds and publishes exactly one matrix entry. Meant
//! for CI systems that fan the matrix out into separate jobs themselves.
//!
//! Input:
//! - KEEL_MATRIX_ENTRY: one matrix entry as JSON (`{"name":..,"path":..}`),
//!   or KEEL_SERVICE: a service name or path from `keel.yaml`
//! - KEEL_HEAD_REF: id of the commit being built (hex, not a branch name)
//! - everything `keel_runner::Config::from_env` reads
//!
//! The build result is printed to stdout as JSON. Exit code 0 on success,
//! 1 when the unit failed, 3 when the run could not start.

use anyhow::{Context, Result, bail};
use keel_core::config::{self as pipeline_config, PipelineConfig};
use keel_core::domain::change::CommitRef;
use keel_core::domain::service::ServiceDescriptor;
use keel_core::dto::matrix::parse_entry;
use keel_runner::{BuildUnit, Config};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const EXIT_UNIT_FAILED: i32 = 1;
const EXIT_RUN_FAILED: i32 = 3;

#[tokio::main]
async fn main() {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "keel_runner=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    info!("Starting Keel Runner");

    let code = match run().await {
        Ok(true) => 0,
        Ok(false) => EXIT_UNIT_FAILED,
        Err(e) => {
            error!("Runner failed: {:#}", e);
            EXIT_RUN_FAILED
        }
    };

    std::process::exit(code);
}

/// Runs the unit; `Ok(false)` means the unit itself failed
async fn run() -> Result<bool> {
    let config = Config::from_env().context("Failed to load runner configuration")?;
    config.validate()?;

    let pipeline = pipeline_config::load(&config.repo_root).context("Failed to load keel.yaml")?;
    let service = select_service(&pipeline)?;

    let head = std::env::var("KEEL_HEAD_REF").context("KEEL_HEAD_REF environment variable not set")?;
    let head = CommitRef::new(head).context("KEEL_HEAD_REF must be a commit id")?;

    info!(
        "Loaded configuration: service={}, head={}, cache_dir={}",
        service.name,
        head.short(),
        config.cache_dir.display()
    );

    let unit = BuildUnit::from_config(&pipeline, &config)?;
    unit.check_builder().await?;
    unit.publisher()
        .login()
        .await
        .context("Registry login failed")?;

    let result = unit.run(&service, &head).await;
    println!("{}", serde_json::to_string(&result)?);

    Ok(result.success)
}

/// Picks the service from KEEL_MATRIX_ENTRY or KEEL_SERVICE
fn select_service(pipeline: &PipelineConfig) -> Result<ServiceDescriptor> {
    let registry = pipeline.registry()?;

    let requested = if let Ok(entry) = std::env::var("KEEL_MATRIX_ENTRY") {
        parse_entry(&entry).context("Invalid KEEL_MATRIX_ENTRY")?.path
    } else if let Ok(service) = std::env::var("KEEL_SERVICE") {
        service
    } else {
        bail!("Either KEEL_MATRIX_ENTRY or KEEL_SERVICE must be set");
    };

    match registry.find(&requested) {
        Some(service) => Ok(service.clone()),
        None => bail!("'{}' is not a watched service in keel.yaml", requested),
    }
}

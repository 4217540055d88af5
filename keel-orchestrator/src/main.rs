//! Keel Orchestrator
//!
//! Runs the selective build-and-publish pipeline for the commit pair in
//! KEEL_BASE_REF / KEEL_HEAD_REF and exits with the run's exit code:
//! 0 success or nothing to build, 1 partial failure, 2 all units failed,
//! 3 run-level failure.

use anyhow::{Context, Result};
use keel_core::dto::report::RunSummary;
use keel_orchestrator::{Config, GitChangeDetector, Orchestrator, Trigger};
use keel_runner::BuildUnit;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const EXIT_RUN_FAILED: i32 = 3;

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "keel_orchestrator=info,keel_runner=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    info!("Starting Keel Orchestrator...");

    let code = match run().await {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            EXIT_RUN_FAILED
        }
    };

    std::process::exit(code);
}

async fn run() -> Result<i32> {
    let config = Config::from_env().context("Failed to load configuration")?;
    let trigger = Trigger::from_env().context("Failed to read trigger refs")?;

    info!(
        "Loaded configuration: {} service(s), namespace={}, max_parallel={}, fail_fast={}",
        config.pipeline.services.len(),
        config.pipeline.registry.namespace,
        config.pipeline.max_parallel,
        config.pipeline.fail_fast
    );

    let unit = BuildUnit::from_config(&config.pipeline, &config.runner)?;
    let detector = GitChangeDetector::new(&config.runner.repo_root);
    let orchestrator = Orchestrator::new(&config.pipeline, Arc::new(detector), Arc::new(unit))?;

    let cancel = orchestrator.cancel_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling all build units");
            cancel.cancel_all();
        }
    });

    let report = orchestrator.run(trigger.base, trigger.head).await;
    print!("{}", report);

    if let Ok(path) = std::env::var("KEEL_REPORT_PATH") {
        let summary = RunSummary::from(&report);
        std::fs::write(&path, serde_json::to_vec_pretty(&summary)?)
            .with_context(|| format!("Failed to write run report to {}", path))?;
        info!("Run report written to {}", path);
    }

    Ok(report.exit_code())
}

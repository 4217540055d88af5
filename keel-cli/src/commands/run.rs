//! Run command handler

use anyhow::{Context, Result};
use colored::*;
use keel_core::domain::change::Revision;
use keel_core::domain::run::{RunOutcome, RunReport};
use keel_core::dto::report::RunSummary;
use keel_orchestrator::{GitChangeDetector, Orchestrator};
use keel_runner::BuildUnit;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;

const EXIT_RUN_FAILED: i32 = 3;

/// Run the whole pipeline for `base..head` and return the exit code
pub async fn run_pipeline(config: &Config, base: &str, head: &str, json: bool) -> i32 {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "keel_orchestrator=info,keel_runner=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let report = match execute(config, base, head).await {
        Ok(report) => report,
        Err(e) => {
            eprintln!("{}", format!("✗ Run could not start: {:#}", e).red().bold());
            return EXIT_RUN_FAILED;
        }
    };

    if json {
        match serde_json::to_string_pretty(&RunSummary::from(&report)) {
            Ok(summary) => println!("{}", summary),
            Err(e) => eprintln!("Failed to serialize run summary: {}", e),
        }
    } else {
        print_report(&report);
    }

    report.exit_code()
}

async fn execute(config: &Config, base: &str, head: &str) -> Result<RunReport> {
    let pipeline = config.pipeline()?;

    let mut runner = keel_runner::Config::from_env().context("Failed to load runner configuration")?;
    runner.repo_root = config.repo_root.clone();
    runner.validate()?;

    let base = Revision::new(base)?;
    let head = Revision::new(head)?;

    let unit = BuildUnit::from_config(&pipeline, &runner)?;
    let detector = GitChangeDetector::new(&config.repo_root);
    let orchestrator = Orchestrator::new(&pipeline, Arc::new(detector), Arc::new(unit))?;

    let cancel = orchestrator.cancel_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("{}", "Interrupted, cancelling all builds...".yellow());
            cancel.cancel_all();
        }
    });

    Ok(orchestrator.run(base, head).await)
}

fn print_report(report: &RunReport) {
    let headline = format!("Run {}: {}", report.run_id, report.outcome);
    match report.outcome {
        RunOutcome::Success => println!("{}", format!("✓ {}", headline).green().bold()),
        RunOutcome::PartialFailure => println!("{}", format!("! {}", headline).yellow().bold()),
        RunOutcome::AllFailed | RunOutcome::Failed => {
            println!("{}", format!("✗ {}", headline).red().bold())
        }
    }

    if let Some(error) = &report.error {
        println!("  [{}] {}", error.kind.to_string().red(), error.message);
        return;
    }

    if report.results.is_empty() {
        println!("  {}", "No watched service changed, nothing to build.".dimmed());
        return;
    }

    for result in &report.results {
        if result.success {
            let tags: Vec<&str> = result.tags.iter().map(String::as_str).collect();
            println!("  {} {}  {}", "✓".green(), result.service.name.bold(), tags.join(", ").dimmed());
        } else {
            let kind = result
                .failure
                .map(|k| k.to_string())
                .unwrap_or_else(|| "unknown".to_string());
            println!(
                "  {} {}  [{}] {}",
                "✗".red(),
                result.service.name.bold(),
                kind.red(),
                result.error.as_deref().unwrap_or("")
            );
        }
        for warning in &result.warnings {
            println!("    {} {}", "warning:".yellow(), warning);
        }
    }
}

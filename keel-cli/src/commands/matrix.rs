//! Matrix command handler

use anyhow::{Context, Result, bail};
use colored::*;
use keel_core::domain::change::Revision;
use keel_core::domain::matrix::BuildMatrix;
use keel_core::dto::matrix::MatrixOutput;
use keel_orchestrator::{ChangeDetector, GitChangeDetector};
use std::path::PathBuf;

use crate::config::Config;

/// Compute and print the build matrix
///
/// With `changed` paths the diff is skipped and the refs are ignored;
/// otherwise `base..head` is diffed in the repository checkout. The JSON goes
/// to stdout, diagnostics to stderr.
pub async fn compute_matrix(
    config: &Config,
    base: Option<String>,
    head: Option<String>,
    changed: Vec<String>,
    github_output: Option<PathBuf>,
) -> Result<()> {
    let pipeline = config.pipeline()?;
    let registry = pipeline.registry()?;

    let (changed_count, matrix) = if !changed.is_empty() {
        (changed.len(), BuildMatrix::for_paths(&changed, &registry))
    } else {
        let (Some(base), Some(head)) = (base, head) else {
            bail!("--base and --head (or KEEL_BASE_REF / KEEL_HEAD_REF) are required without --changed");
        };
        let detector = GitChangeDetector::new(&config.repo_root);
        let changes = detector
            .detect(&Revision::new(base)?, &Revision::new(head)?)
            .await
            .context("Failed to detect changes")?;
        (changes.len(), BuildMatrix::compute(&changes, &registry))
    };

    eprintln!(
        "{} changed path(s), {} service(s) to build",
        changed_count.to_string().bold(),
        matrix.len().to_string().bold()
    );

    let output = MatrixOutput::from(matrix);
    println!("{}", serde_json::to_string(&output.matrix)?);

    if let Some(path) = github_output {
        output
            .append_to(&path)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        eprintln!(
            "{}",
            format!("✓ Matrix written to {}", path.display()).green()
        );
    }

    Ok(())
}

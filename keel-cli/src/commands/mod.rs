//! Commands module
//!
//! Defines all CLI commands and their handlers.

mod build;
mod matrix;
mod run;
mod services;

use anyhow::Result;
use clap::Subcommand;
use std::path::PathBuf;

use crate::config::Config;

/// Top-level CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// List watched services
    Services,
    /// Print the trigger path filters derived from keel.yaml
    Filters {
        /// Print as a JSON array
        #[arg(long)]
        json: bool,
    },
    /// Compute the build matrix between two commits
    Matrix {
        #[arg(long, env = "KEEL_BASE_REF")]
        base: Option<String>,

        #[arg(long, env = "KEEL_HEAD_REF")]
        head: Option<String>,

        /// Use these changed paths instead of diffing base..head
        #[arg(long, value_delimiter = ',')]
        changed: Vec<String>,

        /// Append `matrix=` and `has_changes=` lines to this file
        #[arg(long, env = "GITHUB_OUTPUT")]
        github_output: Option<PathBuf>,
    },
    /// Show where a service's build descriptor is resolved from
    Resolve {
        /// Service name or path
        service: String,
    },
    /// Print the image references a build of a service would publish
    Tags {
        /// Service name or path
        service: String,

        #[arg(long, env = "KEEL_HEAD_REF")]
        head: String,
    },
    /// Run the full pipeline: detect, build and publish
    Run {
        #[arg(long, env = "KEEL_BASE_REF")]
        base: String,

        #[arg(long, env = "KEEL_HEAD_REF")]
        head: String,

        /// Print the run summary as JSON instead of text
        #[arg(long)]
        json: bool,
    },
}

/// Handle a CLI command
///
/// Routes the command to the appropriate handler module and returns the
/// process exit code.
pub async fn handle_command(command: Commands, config: &Config) -> Result<i32> {
    match command {
        Commands::Services => services::list_services(config).map(|_| 0),
        Commands::Filters { json } => services::print_filters(config, json).map(|_| 0),
        Commands::Matrix {
            base,
            head,
            changed,
            github_output,
        } => matrix::compute_matrix(config, base, head, changed, github_output)
            .await
            .map(|_| 0),
        Commands::Resolve { service } => build::resolve_descriptor(config, &service),
        Commands::Tags { service, head } => build::print_tags(config, &service, &head).await.map(|_| 0),
        Commands::Run { base, head, json } => Ok(run::run_pipeline(config, &base, &head, json).await),
    }
}

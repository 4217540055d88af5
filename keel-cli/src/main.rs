//! Keel CLI
//!
//! Command-line interface for the selective build-and-publish pipeline.

mod commands;
mod config;

use anyhow::Result;
use clap::Parser;
use commands::{Commands, handle_command};
use config::Config;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "keel")]
#[command(about = "Selective monorepo build-and-publish pipeline", long_about = None)]
struct Cli {
    /// Repository checkout
    #[arg(long, env = "KEEL_REPO_ROOT", default_value = ".")]
    repo_root: PathBuf,

    /// Pipeline configuration file (default: <repo-root>/keel.yaml)
    #[arg(long, short)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config {
        repo_root: cli.repo_root,
        config_file: cli.config,
    };

    let code = handle_command(cli.command, &config).await?;
    if code != 0 {
        std::process::exit(code);
    }

    Ok(())
}

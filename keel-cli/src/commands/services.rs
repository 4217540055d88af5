//! Service registry command handlers

use anyhow::Result;
use colored::*;

use crate::config::Config;

/// List the watched services in build order
pub fn list_services(config: &Config) -> Result<()> {
    let pipeline = config.pipeline()?;
    let registry = pipeline.registry()?;

    println!(
        "{}",
        format!("Found {} service(s):", registry.len()).bold()
    );
    println!();
    for service in &registry {
        println!("  {:<24} {}", service.name.cyan(), service.path.dimmed());
    }

    Ok(())
}

/// Print the path filters for the upstream trigger
///
/// Generated from the same configuration as the registry, so the coarse
/// trigger filter and the matrix can never disagree about watched paths.
pub fn print_filters(config: &Config, json: bool) -> Result<()> {
    let filters = config.pipeline()?.trigger_filters()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&filters)?);
    } else {
        for filter in filters {
            println!("{}", filter);
        }
    }

    Ok(())
}

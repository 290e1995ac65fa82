//! Configuration display.

use crate::config::Config;
use std::path::PathBuf;

/// Print the configuration sources and the merged configuration.
pub fn show_config(config: &Config, sources: &[PathBuf]) -> anyhow::Result<()> {
    println!("Configuration sources:");
    if sources.is_empty() {
        println!("  (none)");
    } else {
        for source in sources {
            println!("  {}", source.display());
        }
    }
    println!();

    match config.data_dir() {
        Some(dir) => println!("Data directory: {}", dir.display()),
        None => println!("Data directory: (unknown)"),
    }
    println!();

    println!("Current configuration:");
    println!("{}", serde_json::to_string_pretty(config)?);

    Ok(())
}

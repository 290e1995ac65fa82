//! Comparing the pre and post snapshots of a label.

use super::open_store;
use crate::config::Config;
use anyhow::{bail, Context};
use clap::ValueEnum;
use netmig_snapshot::{compare, Phase};
use std::path::PathBuf;
use tracing::info;

/// Output format of `netmig diff`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum DiffFormat {
    Text,
    Json,
}

/// Options for `netmig diff`.
#[derive(Debug)]
pub struct DiffOptions {
    pub label: String,
    pub pre_at: Option<String>,
    pub post_at: Option<String>,
    pub format: DiffFormat,
    pub output: Option<PathBuf>,
    pub include_unchanged: bool,
    pub fail_on_change: bool,
}

/// Compare stored snapshots and print or write the report.
pub async fn handle_diff(config: &Config, options: DiffOptions) -> anyhow::Result<()> {
    let store = open_store(config)?;

    let pre = store
        .load(&options.label, Phase::Pre, options.pre_at.as_deref())
        .await
        .with_context(|| format!("Failed to load pre snapshot for '{}'", options.label))?;
    let post = store
        .load(&options.label, Phase::Post, options.post_at.as_deref())
        .await
        .with_context(|| format!("Failed to load post snapshot for '{}'", options.label))?;

    let report = compare(&pre, &post)?;
    let rendered = match options.format {
        DiffFormat::Text => report.render_text(options.include_unchanged),
        DiffFormat::Json => report.to_json()?,
    };

    match &options.output {
        Some(path) => {
            tokio::fs::write(path, &rendered)
                .await
                .with_context(|| format!("Failed to write {}", path.display()))?;
            info!(path = %path.display(), "Diff report written");
            println!("Wrote diff report to {}", path.display());
        }
        None => {
            print!("{rendered}");
            if !rendered.ends_with('\n') {
                println!();
            }
        }
    }

    let summary = report.summary();
    if options.fail_on_change && !summary.is_clean() {
        bail!(
            "{} of {} entries differ",
            summary.total() - summary.unchanged - summary.both_failed,
            summary.total()
        );
    }
    Ok(())
}

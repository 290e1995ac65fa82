//! Export of a stored snapshot as text logs or a workbook.

use super::open_store;
use crate::config::Config;
use anyhow::Context;
use clap::ValueEnum;
use netmig_snapshot::{export_text_logs, export_workbook, Phase};
use std::path::Path;

/// Output format of `netmig export`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ExportFormat {
    /// One text log per device
    Text,
    /// One `.xlsx` workbook, a row per device
    Xlsx,
}

/// Export a stored snapshot into `output`.
pub async fn handle_export(
    config: &Config,
    label: &str,
    phase: Phase,
    at: Option<&str>,
    output: &Path,
    format: ExportFormat,
) -> anyhow::Result<()> {
    let store = open_store(config)?;
    let snapshot = store.load(label, phase, at).await?;

    match format {
        ExportFormat::Text => {
            let files = export_text_logs(&snapshot, output)
                .await
                .with_context(|| format!("Failed to export logs to {}", output.display()))?;

            for file in &files {
                println!("  {}", file.display());
            }
            println!(
                "Exported {} device log(s) from {} to {}",
                files.len(),
                snapshot.timestamp_key(),
                output.display()
            );
        }
        ExportFormat::Xlsx => {
            let file = export_workbook(&snapshot, output)
                .await
                .with_context(|| format!("Failed to export workbook to {}", output.display()))?;
            println!(
                "Exported {} device(s) from {} to {}",
                snapshot.devices().len(),
                snapshot.timestamp_key(),
                file.display()
            );
        }
    }
    Ok(())
}

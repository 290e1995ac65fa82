//! Listing and inspecting stored snapshots.

use super::open_store;
use crate::config::Config;
use netmig_snapshot::{parse_timestamp_key, render_device_log, Outcome, Phase};

/// List labels, or the snapshots stored under `label`.
pub async fn handle_list(config: &Config, label: Option<&str>) -> anyhow::Result<()> {
    let store = open_store(config)?;

    let Some(label) = label else {
        let labels = store.labels().await?;
        if labels.is_empty() {
            println!("No snapshots found");
        }
        for label in labels {
            println!("{label}");
        }
        return Ok(());
    };

    let entries = store.list(label).await?;
    if entries.is_empty() {
        println!("No snapshots found for '{label}'");
        return Ok(());
    }

    println!("{:<6} {:<26} CAPTURED", "PHASE", "TIMESTAMP");
    for (phase, timestamp) in entries {
        let captured = parse_timestamp_key(&timestamp)
            .map(|at| at.format("%Y-%m-%d %H:%M:%S UTC").to_string())
            .unwrap_or_default();
        println!("{:<6} {:<26} {}", phase.as_str(), timestamp, captured);
    }
    Ok(())
}

/// Options for `netmig show`.
#[derive(Debug)]
pub struct ShowOptions {
    pub label: String,
    pub phase: Phase,
    pub at: Option<String>,
    pub device: Option<String>,
    pub command: Option<String>,
    pub json: bool,
}

/// Print a stored snapshot, one device of it, or a single result.
pub async fn handle_show(config: &Config, options: ShowOptions) -> anyhow::Result<()> {
    let store = open_store(config)?;
    let at = options.at.as_deref();

    match (&options.device, &options.command) {
        (Some(device), Some(command)) => {
            let result = store
                .load_result(&options.label, options.phase, at, device, command)
                .await?;
            if options.json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                match &result.outcome {
                    Outcome::Success { output } => print!("{output}"),
                    failure => println!("% {}", failure.describe()),
                }
            }
        }
        (Some(device), None) => {
            let capture = store
                .load_device(&options.label, options.phase, at, device)
                .await?;
            if options.json {
                println!("{}", serde_json::to_string_pretty(&capture)?);
            } else {
                print!("{}", render_device_log(&capture));
            }
        }
        _ => {
            let snapshot = store.load(&options.label, options.phase, at).await?;
            if options.json {
                println!("{}", serde_json::to_string_pretty(&snapshot)?);
                return Ok(());
            }

            let summary = snapshot.summary();
            println!(
                "Snapshot {} ({} {}, {})",
                snapshot.id(),
                snapshot.label(),
                snapshot.phase(),
                snapshot.timestamp_key()
            );
            if snapshot.is_cancelled() {
                println!("Run was cancelled before completion");
            }
            println!(
                "{} device(s), {} command(s): {} succeeded, {} failed, {} timed out",
                summary.devices,
                summary.commands,
                summary.succeeded,
                summary.failed,
                summary.timed_out
            );
            println!();

            for capture in snapshot.devices() {
                println!("{} [{}]", capture.display_name(), capture.class);
                for result in &capture.results {
                    let status = if result.outcome.is_success() {
                        "ok".to_string()
                    } else {
                        result.outcome.describe()
                    };
                    println!("  {:<32} {}", result.command_name, status);
                }
            }
        }
    }

    Ok(())
}

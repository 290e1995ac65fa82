//! Snapshot capture.

use super::open_store;
use crate::config::Config;
use anyhow::{bail, Context};
use netmig_device::{parse_device_list, ProcessConnector};
use netmig_snapshot::{
    export_text_logs, CommandCatalog, CommandSet, Phase, RunEvent, Runner, Snapshot,
};
use netmig_util::timing::format_duration;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Options for `netmig run`.
#[derive(Debug)]
pub struct RunOptions {
    pub label: String,
    pub phase: Phase,
    pub devices: PathBuf,
    pub commands: Option<PathBuf>,
    pub concurrency: Option<usize>,
    pub timeout: Option<u64>,
    pub attempts: Option<u32>,
    pub export_logs: Option<PathBuf>,
    pub quiet: bool,
}

/// What to run: one set for every device, or a set per device class.
enum Work {
    Set(CommandSet),
    Catalog(CommandCatalog),
}

/// Capture a snapshot and save it.
pub async fn handle_run(config: &Config, options: RunOptions) -> anyhow::Result<()> {
    let devices = parse_device_list(&read_list(&options.devices, "device list").await?);
    if devices.is_empty() {
        bail!("No devices in {}", options.devices.display());
    }
    let work = match &options.commands {
        Some(path) => {
            let text = read_list(path, "command list").await?;
            let commands = CommandSet::from_text(set_name(path), &text)
                .with_context(|| format!("Invalid command list {}", path.display()))?;
            Work::Set(commands)
        }
        None => {
            let catalog = config.catalog()?;
            if catalog.is_empty() {
                bail!("No commands to run: pass --commands or configure command_sets");
            }
            Work::Catalog(catalog)
        }
    };
    let store = open_store(config)?;

    let mut runner_config = config.runner_config();
    if let Some(concurrency) = options.concurrency {
        runner_config.concurrency = concurrency;
    }
    if let Some(secs) = options.timeout {
        runner_config.command_timeout_secs = secs;
    }
    if let Some(attempts) = options.attempts {
        runner_config.retry.max_attempts = attempts;
    }

    let save_policy = runner_config.retry;

    let connector = ProcessConnector::new(config.transport(), Arc::new(config.credential_resolver()));
    let cancel = CancellationToken::new();
    let (tx, rx) = mpsc::unbounded_channel();
    let runner = Runner::new(Arc::new(connector))
        .with_config(runner_config)
        .with_events(tx)
        .with_cancellation(cancel.clone());

    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("Interrupted; pending commands will be recorded as cancelled");
            cancel.cancel();
        }
    });
    let progress = tokio::spawn(print_progress(rx, options.quiet));

    let started = Instant::now();
    let result = match &work {
        Work::Set(commands) => {
            runner
                .run(&devices, commands, options.phase, &options.label)
                .await
        }
        Work::Catalog(catalog) => {
            runner
                .run_catalog(&devices, catalog, options.phase, &options.label)
                .await
        }
    };
    // Closes the event channel so the progress task finishes.
    drop(runner);
    interrupt.abort();
    if let Err(e) = progress.await {
        warn!(error = %e, "Progress reporter failed");
    }
    let snapshot = result?;

    let location = match store.save_with_retry(&snapshot, &save_policy).await {
        Ok(location) => location,
        Err(e) => {
            print_summary(&snapshot, started);
            let kept = preserve_unsaved(&snapshot, options.export_logs.as_deref()).await;
            let err = anyhow::Error::new(e).context("Failed to save snapshot");
            if kept.is_empty() {
                return Err(err);
            }
            return Err(err.context(format!("Captured results kept in {}", kept.join(" and "))));
        }
    };
    info!(location = %location, "Snapshot saved");

    print_summary(&snapshot, started);
    println!("Saved to {}", store.directory(&location).display());
    println!("Timestamp: {}", location.timestamp);

    if let Some(dir) = &options.export_logs {
        let files = export_text_logs(&snapshot, dir)
            .await
            .with_context(|| format!("Failed to export logs to {}", dir.display()))?;
        println!("Exported {} device log(s) to {}", files.len(), dir.display());
    }

    Ok(())
}

/// Write a snapshot that could not be stored where the user can still get at it.
///
/// Returns a description of everything that was written.
async fn preserve_unsaved(snapshot: &Snapshot, export_logs: Option<&Path>) -> Vec<String> {
    let mut kept = Vec::new();

    let path = PathBuf::from(format!("netmig-unsaved-{}.json", snapshot.id()));
    let written = match serde_json::to_vec_pretty(snapshot) {
        Ok(body) => tokio::fs::write(&path, body).await.map_err(anyhow::Error::from),
        Err(e) => Err(e.into()),
    };
    match written {
        Ok(()) => kept.push(path.display().to_string()),
        Err(e) => warn!(path = %path.display(), error = %e, "Failed to write unsaved snapshot"),
    }

    if let Some(dir) = export_logs {
        match export_text_logs(snapshot, dir).await {
            Ok(files) => kept.push(format!("{} device log(s) under {}", files.len(), dir.display())),
            Err(e) => warn!(dir = %dir.display(), error = %e, "Failed to export device logs"),
        }
    }

    kept
}

async fn read_list(path: &Path, what: &str) -> anyhow::Result<String> {
    tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {what} {}", path.display()))
}

fn set_name(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "commands".to_string())
}

async fn print_progress(mut rx: mpsc::UnboundedReceiver<RunEvent>, quiet: bool) {
    while let Some(event) = rx.recv().await {
        if quiet {
            continue;
        }
        match event {
            RunEvent::RunStarted {
                label,
                phase,
                devices,
                ..
            } => eprintln!("Capturing {phase} snapshot '{label}' from {devices} device(s)"),
            RunEvent::CommandFinished {
                device,
                command,
                outcome,
            } if !outcome.is_success() => {
                eprintln!("  {device}: {command}: {}", outcome.describe());
            }
            RunEvent::DeviceFinished {
                device,
                succeeded,
                total,
            } => eprintln!("  {device}: {succeeded}/{total} command(s) succeeded"),
            _ => {}
        }
    }
}

fn print_summary(snapshot: &Snapshot, started: Instant) {
    let summary = snapshot.summary();
    println!(
        "Captured {} {} snapshot '{}' in {}",
        if snapshot.is_cancelled() {
            "partial"
        } else {
            "complete"
        },
        snapshot.phase(),
        snapshot.label(),
        format_duration(started.elapsed())
    );
    println!(
        "  {} device(s), {} command(s): {} succeeded, {} failed, {} timed out",
        summary.devices, summary.commands, summary.succeeded, summary.failed, summary.timed_out
    );
    if snapshot.is_cancelled() {
        println!("  Run was cancelled; commands never sent are recorded as cancelled");
    }
}

//! Netmig - capture and compare network device state around a migration.
//!
//! This is the main entry point for the netmig CLI.

mod commands;
mod config;

use clap::{Parser, Subcommand};
use commands::*;
use config::Config;
use netmig_snapshot::Phase;
use std::path::PathBuf;
use tracing::debug;

#[derive(Parser)]
#[command(name = "netmig")]
#[command(author, version, about = "Pre/post migration snapshots for network devices", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Write logs to a file (defaults to the netmig log directory)
    #[arg(long, global = true)]
    log_file: Option<Option<PathBuf>>,

    /// Snapshot directory (overrides config and NETMIG_DATA_DIR)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Capture a snapshot from a list of devices
    Run {
        /// Migration label shared by the pre and post snapshots
        #[arg(short, long)]
        label: String,
        /// Snapshot phase: pre or post
        #[arg(short, long)]
        phase: Phase,
        /// Device list file, one `host [class]` per line
        #[arg(short, long)]
        devices: PathBuf,
        /// Command list file, one command per line (defaults to the configured command sets)
        #[arg(short, long)]
        commands: Option<PathBuf>,
        /// Number of devices captured in parallel
        #[arg(long)]
        concurrency: Option<usize>,
        /// Per-command timeout in seconds
        #[arg(long)]
        timeout: Option<u64>,
        /// Attempts per command, including the first
        #[arg(long)]
        attempts: Option<u32>,
        /// Also write per-device text logs to this directory
        #[arg(long)]
        export_logs: Option<PathBuf>,
        /// Do not print per-device progress
        #[arg(short, long)]
        quiet: bool,
    },
    /// List stored labels, or the snapshots stored under a label
    List {
        /// Migration label
        label: Option<String>,
    },
    /// Show a stored snapshot
    Show {
        #[arg(short, long)]
        label: String,
        #[arg(short, long)]
        phase: Phase,
        /// Snapshot timestamp (latest when omitted)
        #[arg(long)]
        at: Option<String>,
        /// Only this device
        #[arg(short, long)]
        device: Option<String>,
        /// Only this command (requires --device)
        #[arg(short, long, requires = "device")]
        command: Option<String>,
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
    /// Compare the pre and post snapshots of a label
    Diff {
        #[arg(short, long)]
        label: String,
        /// Pre snapshot timestamp (latest when omitted)
        #[arg(long)]
        pre_at: Option<String>,
        /// Post snapshot timestamp (latest when omitted)
        #[arg(long)]
        post_at: Option<String>,
        /// Output format
        #[arg(short, long, value_enum, default_value_t = DiffFormat::Text)]
        format: DiffFormat,
        /// Write the report to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Include unchanged entries in text output
        #[arg(long)]
        all: bool,
        /// Exit with an error when anything differs
        #[arg(long)]
        fail_on_change: bool,
    },
    /// Export a stored snapshot as per-device text logs or a workbook
    Export {
        #[arg(short, long)]
        label: String,
        #[arg(short, long)]
        phase: Phase,
        /// Snapshot timestamp (latest when omitted)
        #[arg(long)]
        at: Option<String>,
        /// Output directory
        #[arg(short, long)]
        output: PathBuf,
        /// Output format
        #[arg(short, long, value_enum, default_value_t = ExportFormat::Text)]
        format: ExportFormat,
    },
    /// Show configuration
    Config,
    /// Print version information
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if let Commands::Version = cli.command {
        print_version();
        return Ok(());
    }

    let cwd = std::env::current_dir()?;
    let (mut config, sources) = Config::load(Some(&cwd)).await?;
    if let Some(dir) = cli.data_dir {
        config.data_dir = Some(dir);
    }

    let log_file = init_logging(cli.verbose, cli.log_file, config.log_level());
    if let Some(path) = &log_file {
        debug!(path = %path.display(), "Logging to file");
    }
    debug!(sources = sources.len(), "Configuration loaded");

    match cli.command {
        Commands::Run {
            label,
            phase,
            devices,
            commands,
            concurrency,
            timeout,
            attempts,
            export_logs,
            quiet,
        } => {
            handle_run(
                &config,
                RunOptions {
                    label,
                    phase,
                    devices,
                    commands,
                    concurrency,
                    timeout,
                    attempts,
                    export_logs,
                    quiet,
                },
            )
            .await
        }
        Commands::List { label } => handle_list(&config, label.as_deref()).await,
        Commands::Show {
            label,
            phase,
            at,
            device,
            command,
            json,
        } => {
            handle_show(
                &config,
                ShowOptions {
                    label,
                    phase,
                    at,
                    device,
                    command,
                    json,
                },
            )
            .await
        }
        Commands::Diff {
            label,
            pre_at,
            post_at,
            format,
            output,
            all,
            fail_on_change,
        } => {
            handle_diff(
                &config,
                DiffOptions {
                    label,
                    pre_at,
                    post_at,
                    format,
                    output,
                    include_unchanged: all,
                    fail_on_change,
                },
            )
            .await
        }
        Commands::Export {
            label,
            phase,
            at,
            output,
            format,
        } => handle_export(&config, &label, phase, at.as_deref(), &output, format).await,
        Commands::Config => show_config(&config, &sources),
        Commands::Version => {
            print_version();
            Ok(())
        }
    }
}

/// Print version information.
fn print_version() {
    println!("netmig {}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("Pre/post migration snapshots for network devices.");
}

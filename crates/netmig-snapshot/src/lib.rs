//! Snapshot capture, storage, and comparison for network migrations.
//!
//! This crate captures "show" command output from a fleet before and after a
//! change and makes the two captures comparable:
//! - [`Runner`] runs command sets against devices with a bounded worker pool
//! - [`SnapshotStore`] persists snapshots, one unit per device and command
//! - [`compare`] produces a deterministic [`DiffReport`]
//!
//! Commands are assumed to be read-only and idempotent. Nothing here
//! enforces that; it is up to whoever writes the command sets.
//!
//! # Example
//!
//! ```no_run
//! use netmig_device::{Device, EnvCredentialResolver, ProcessConnector, TransportConfig};
//! use netmig_snapshot::{compare, CommandSet, Phase, Runner, SnapshotStore};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let connector = ProcessConnector::new(
//!     TransportConfig::default(),
//!     Arc::new(EnvCredentialResolver::default()),
//! );
//! let runner = Runner::new(Arc::new(connector));
//! let store = SnapshotStore::open("/var/lib/netmig");
//!
//! let devices = vec![Device::new("10.0.0.1"), Device::new("10.0.0.2")];
//! let commands = CommandSet::from_text("core", "show version\nshow ip route")?;
//!
//! let pre = runner.run(&devices, &commands, Phase::Pre, "dc1-cutover").await?;
//! store.save(&pre).await?;
//!
//! // ... perform the change ...
//!
//! let post = runner.run(&devices, &commands, Phase::Post, "dc1-cutover").await?;
//! store.save(&post).await?;
//!
//! let report = compare(&pre, &post)?;
//! println!("{}", report.render_text(false));
//! # Ok(())
//! # }
//! ```

mod command;
mod diff;
mod error;
mod events;
mod export;
pub mod retry;
mod runner;
mod snapshot;
mod store;

pub use command::{Command, CommandCatalog, CommandSet};
pub use diff::{
    compare, normalize, DiffEntry, DiffLine, DiffReport, DiffStatus, DiffSummary, Hunk, LineDiff,
    LineTag, Side, SnapshotRef,
};
pub use error::{
    CommandSetError, DiffError, ExportError, RunnerError, StoreError, StoreResult,
};
pub use events::RunEvent;
pub use export::{
    export_text_logs, export_workbook, render_device_log, render_workbook, SheetLayout,
    SEPARATOR, WORKSHEET_NAME,
};
pub use retry::RetryPolicy;
pub use runner::{
    Runner, RunnerConfig, DEFAULT_COMMAND_TIMEOUT_SECS, DEFAULT_CONCURRENCY,
    DEFAULT_CONNECT_TIMEOUT_SECS,
};
pub use snapshot::{
    parse_timestamp_key, timestamp_key, CommandResult, DeviceCapture, FailureKind, Outcome, Phase,
    Snapshot, SnapshotBuilder, SnapshotSummary,
};
pub use store::{decode_component, encode_component, storage_component, Location, SnapshotStore};

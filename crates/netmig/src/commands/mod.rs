//! Command handlers for the netmig CLI.

pub mod diff;
pub mod export;
pub mod info;
pub mod logging;
pub mod run;
pub mod show;

pub use diff::*;
pub use export::*;
pub use info::*;
pub use logging::*;
pub use run::*;
pub use show::*;

use crate::config::Config;
use anyhow::Context;
use netmig_snapshot::SnapshotStore;

/// Open the snapshot store in the configured data directory.
pub(crate) fn open_store(config: &Config) -> anyhow::Result<SnapshotStore> {
    let data_dir = config
        .data_dir()
        .context("Could not determine the data directory; set data_dir or NETMIG_DATA_DIR")?;
    Ok(SnapshotStore::open(data_dir))
}

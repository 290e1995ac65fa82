//! Path utilities.
//!
//! Resolves the netmig configuration, data and log directories.

use std::path::{Path, PathBuf};

/// Environment variable that overrides the data directory.
pub const DATA_DIR_ENV: &str = "NETMIG_DATA_DIR";

/// Get the netmig configuration directory.
///
/// This follows XDG conventions on Linux/macOS:
/// - `$XDG_CONFIG_HOME/netmig` if set
/// - `~/.config/netmig` otherwise
pub fn config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("netmig"))
}

/// Get the netmig data directory where snapshots are stored.
///
/// `NETMIG_DATA_DIR` wins when set and non-empty.
pub fn data_dir() -> Option<PathBuf> {
    if let Ok(dir) = std::env::var(DATA_DIR_ENV) {
        if !dir.trim().is_empty() {
            return Some(PathBuf::from(dir));
        }
    }
    dirs::data_local_dir().map(|p| p.join("netmig"))
}

/// Get the netmig logs directory.
pub fn logs_dir() -> Option<PathBuf> {
    dirs::state_dir()
        .or_else(dirs::data_local_dir)
        .map(|p| p.join("netmig").join("logs"))
}

/// Get the project-local config file path.
pub fn project_config_file(project_root: &Path) -> PathBuf {
    project_root.join("netmig.json")
}

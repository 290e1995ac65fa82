//! Logging initialization.
//!
//! Logs go to stderr unless `--log-file` is given, so stdout stays clean for
//! reports.

use netmig_util::log::{self, LogConfig, LogLevel};
use std::path::PathBuf;

/// Initialize logging from the CLI flags and the configured level.
///
/// `--verbose` wins over the configured level. A bare `--log-file` writes to
/// the default log location. Returns the log file path if logging to file.
pub fn init_logging(
    verbose: bool,
    log_file: Option<Option<PathBuf>>,
    configured: Option<LogLevel>,
) -> Option<PathBuf> {
    let level = if verbose {
        LogLevel::Debug
    } else {
        configured.unwrap_or_default()
    };

    let file = match log_file {
        Some(Some(path)) => Some(path),
        Some(None) => log::default_log_path(),
        None => None,
    };

    log::init(LogConfig {
        level,
        include_location: verbose,
        file,
    })
}

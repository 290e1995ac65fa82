//! Logging setup using tracing.
//!
//! Logs go to stderr by default. When a log file is configured, output is
//! appended to that file without ANSI colors.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Log level configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }

    /// Parse a log level from a string.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "trace" => Some(LogLevel::Trace),
            "debug" => Some(LogLevel::Debug),
            "info" => Some(LogLevel::Info),
            "warn" => Some(LogLevel::Warn),
            "error" => Some(LogLevel::Error),
            _ => None,
        }
    }

    /// Build the default filter directive for the netmig crates at this level.
    pub fn directive(&self) -> String {
        let level = self.as_str();
        format!(
            "netmig={level},netmig_snapshot={level},netmig_device={level},netmig_storage={level}"
        )
    }
}

/// Logging configuration.
#[derive(Debug, Default)]
pub struct LogConfig {
    /// Log level for the netmig crates.
    pub level: LogLevel,
    /// Whether to include file/line info in logs.
    pub include_location: bool,
    /// Append logs to this file instead of stderr.
    pub file: Option<PathBuf>,
}

/// Initialize logging with the given configuration.
///
/// Call once at startup. `RUST_LOG` takes precedence over the configured
/// level. Returns the log file path when logging to a file; if the file
/// cannot be opened, logs fall back to stderr.
pub fn init(config: LogConfig) -> Option<PathBuf> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.directive()));

    let opened = config.file.and_then(|path| match open_log_file(&path) {
        Ok(file) => Some((file, path)),
        Err(e) => {
            eprintln!("Warning: Could not open log file {}: {e}", path.display());
            None
        }
    });

    let (writer, ansi, path) = match opened {
        Some((file, path)) => (BoxMakeWriter::new(file), false, Some(path)),
        None => (BoxMakeWriter::new(std::io::stderr), true, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(writer)
                .with_ansi(ansi)
                .with_target(true)
                .with_file(config.include_location)
                .with_line_number(config.include_location),
        )
        .init();
    path
}

fn open_log_file(path: &Path) -> std::io::Result<File> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    OpenOptions::new().create(true).append(true).open(path)
}

/// Get the default log file path.
pub fn default_log_path() -> Option<PathBuf> {
    crate::path::logs_dir().map(|p| p.join("netmig.log"))
}

/// Create a tracing span for one device within a run.
#[macro_export]
macro_rules! device_span {
    ($device:expr) => {
        tracing::info_span!("device", id = %$device)
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_from_str() {
        assert_eq!(LogLevel::parse("debug"), Some(LogLevel::Debug));
        assert_eq!(LogLevel::parse("DEBUG"), Some(LogLevel::Debug));
        assert_eq!(LogLevel::parse("invalid"), None);
    }

    #[test]
    fn test_log_level_as_str() {
        assert_eq!(LogLevel::Debug.as_str(), "debug");
        assert_eq!(LogLevel::Error.as_str(), "error");
    }

    #[test]
    fn test_directive_covers_workspace_crates() {
        let directive = LogLevel::Debug.directive();
        assert!(directive.contains("netmig=debug"));
        assert!(directive.contains("netmig_snapshot=debug"));
        assert!(directive.contains("netmig_device=debug"));
    }

    #[test]
    fn test_default_log_config() {
        let config = LogConfig::default();
        assert!(config.file.is_none());
        assert_eq!(config.level, LogLevel::Info);
    }
}

//! Snapshot error types.
//!
//! Per-device and per-command failures are data inside a [`crate::Snapshot`]
//! and never show up here. These errors cover configuration, persistence, and
//! comparison only.

use crate::Phase;
use netmig_storage::StorageError;
use thiserror::Error;

/// Result type for snapshot store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Invalid command set definitions.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CommandSetError {
    #[error("Command set '{0}' is empty")]
    Empty(String),

    #[error("Command set '{set}' has duplicate command name '{name}'")]
    DuplicateName { set: String, name: String },

    #[error("Command set '{set}' has a command with an empty name or text")]
    BlankCommand { set: String },
}

/// Configuration errors that prevent a run from starting.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RunnerError {
    #[error("Command set '{0}' is empty")]
    EmptyCommandSet(String),

    #[error("Invalid concurrency limit {0}, must be at least 1")]
    InvalidConcurrency(usize),

    #[error("Device '{0}' appears more than once in the device set")]
    DuplicateDevice(String),

    #[error("No command set for device class '{class}' (device '{device}')")]
    MissingCommandSet { device: String, class: String },
}

/// Errors from the snapshot store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No snapshot (or result) under the requested key.
    #[error("Snapshot not found: {0}")]
    NotFound(String),

    /// A different snapshot already occupies this (label, phase, timestamp).
    #[error("Snapshot key already exists: {label}/{phase}/{timestamp}")]
    DuplicateKey {
        label: String,
        phase: Phase,
        timestamp: String,
    },

    /// The snapshot's save never completed; its data may be partial.
    #[error("Snapshot {0} is incomplete (save did not finish)")]
    Incomplete(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// Backend failure.
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

impl StoreError {
    /// Create a not found error.
    pub fn not_found(key: impl Into<String>) -> Self {
        Self::NotFound(key.into())
    }

    /// Whether the same save may succeed on another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Io(_) | Self::Storage(StorageError::Io(_)))
    }
}

/// Errors writing an export.
#[derive(Debug, Error)]
pub enum ExportError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Workbook error: {0}")]
    Workbook(#[from] rust_xlsxwriter::XlsxError),

    /// More devices or commands than a worksheet holds.
    #[error("Snapshot {0} does not fit in a worksheet")]
    TooLarge(String),
}

/// Errors from the diff engine.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DiffError {
    /// The snapshots share no (device, command) key at all.
    #[error("Snapshots '{pre}' and '{post}' have no device/command in common")]
    IncompatibleSnapshots { pre: String, post: String },
}

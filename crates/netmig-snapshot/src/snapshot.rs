//! Snapshot data model.

use chrono::{DateTime, NaiveDateTime, SubsecRound, Utc};
use netmig_device::ConnectError;
use netmig_util::Identifier;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Format of timestamp keys: sortable, microsecond resolution.
const TIMESTAMP_KEY_FORMAT: &str = "%Y%m%dT%H%M%S%.6fZ";

/// Which side of the migration a snapshot belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Pre,
    Post,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pre => "pre",
            Self::Post => "post",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "pre" => Some(Self::Pre),
            "post" => Some(Self::Post),
            _ => None,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Phase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| format!("invalid phase '{s}', expected 'pre' or 'post'"))
    }
}

/// Why a command produced no output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The device could not be reached.
    Unreachable,
    /// The device rejected the credentials.
    AuthFailed,
    /// The transport misbehaved.
    Protocol,
    /// The device returned an error for the command.
    Command,
    /// The run was cancelled before the command was sent.
    Cancelled,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unreachable => "unreachable",
            Self::AuthFailed => "auth_failed",
            Self::Protocol => "protocol",
            Self::Command => "command",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&ConnectError> for FailureKind {
    fn from(err: &ConnectError) -> Self {
        match err {
            ConnectError::Unreachable(_) => Self::Unreachable,
            ConnectError::AuthFailed(_) => Self::AuthFailed,
            ConnectError::Protocol(_) => Self::Protocol,
        }
    }
}

/// Final outcome of one command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Success { output: String },
    Failure { kind: FailureKind, message: String },
    Timeout { after_ms: u64 },
}

impl Outcome {
    pub fn success(output: impl Into<String>) -> Self {
        Self::Success {
            output: output.into(),
        }
    }

    pub fn failure(kind: FailureKind, message: impl Into<String>) -> Self {
        Self::Failure {
            kind,
            message: message.into(),
        }
    }

    pub fn timeout(after: Duration) -> Self {
        Self::Timeout {
            after_ms: after.as_millis() as u64,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    /// Captured text, if the command succeeded.
    pub fn output(&self) -> Option<&str> {
        match self {
            Self::Success { output } => Some(output),
            _ => None,
        }
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            Self::Failure { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    /// One-line description of a non-successful outcome.
    pub fn describe(&self) -> String {
        match self {
            Self::Success { .. } => "ok".to_string(),
            Self::Failure { kind, message } => format!("{kind}: {message}"),
            Self::Timeout { after_ms } => format!("timed out after {after_ms} ms"),
        }
    }
}

/// Recorded result of one command on one device. Immutable once recorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandResult {
    pub device_id: String,
    pub command_name: String,
    /// Command text as sent.
    pub command: String,
    pub phase: Phase,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    /// Attempts made, including the final one. Zero when never dispatched.
    pub attempts: u32,
    pub outcome: Outcome,
}

impl CommandResult {
    pub fn duration(&self) -> Duration {
        Duration::from_millis(self.duration_ms)
    }
}

/// All results captured for one device, in command order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceCapture {
    pub device_id: String,
    pub class: String,
    /// Prompt reported by the device (e.g. `R1#`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    pub results: Vec<CommandResult>,
}

impl DeviceCapture {
    pub fn new(device_id: impl Into<String>, class: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            class: class.into(),
            prompt: None,
            results: Vec::new(),
        }
    }

    /// Host name derived from the prompt, falling back to the device id.
    pub fn display_name(&self) -> &str {
        self.prompt
            .as_deref()
            .map(|p| p.trim().trim_end_matches(['#', '>', '$']).trim())
            .filter(|p| !p.is_empty())
            .unwrap_or(&self.device_id)
    }

    pub fn result(&self, command_name: &str) -> Option<&CommandResult> {
        self.results.iter().find(|r| r.command_name == command_name)
    }

    /// True when no command produced output.
    pub fn all_failed(&self) -> bool {
        !self.results.iter().any(|r| r.outcome.is_success())
    }
}

/// Counts over a snapshot's results.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SnapshotSummary {
    pub devices: usize,
    pub commands: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub timed_out: usize,
}

/// Complete capture of a device set at one phase.
///
/// Returned frozen by the runner and by the store: there are no mutators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    id: String,
    label: String,
    phase: Phase,
    created_at: DateTime<Utc>,
    devices: Vec<DeviceCapture>,
    #[serde(default)]
    cancelled: bool,
}

impl Snapshot {
    pub fn builder(label: impl Into<String>, phase: Phase) -> SnapshotBuilder {
        SnapshotBuilder::new(label, phase)
    }

    /// Unique identity (`snp_...`).
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Migration label.
    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Storage key for this snapshot's creation time.
    pub fn timestamp_key(&self) -> String {
        timestamp_key(self.created_at)
    }

    /// Devices in device-set order.
    pub fn devices(&self) -> &[DeviceCapture] {
        &self.devices
    }

    pub fn device(&self, device_id: &str) -> Option<&DeviceCapture> {
        self.devices.iter().find(|d| d.device_id == device_id)
    }

    pub fn result(&self, device_id: &str, command_name: &str) -> Option<&CommandResult> {
        self.device(device_id)?.result(command_name)
    }

    /// Every result, grouped by device.
    pub fn results(&self) -> impl Iterator<Item = &CommandResult> {
        self.devices.iter().flat_map(|d| d.results.iter())
    }

    /// Whether the run was cancelled before every command was dispatched.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    pub fn summary(&self) -> SnapshotSummary {
        let mut summary = SnapshotSummary {
            devices: self.devices.len(),
            ..Default::default()
        };
        for result in self.results() {
            summary.commands += 1;
            match result.outcome {
                Outcome::Success { .. } => summary.succeeded += 1,
                Outcome::Failure { .. } => summary.failed += 1,
                Outcome::Timeout { .. } => summary.timed_out += 1,
            }
        }
        summary
    }
}

/// Assembles a [`Snapshot`]. The snapshot is frozen once built.
#[derive(Debug)]
pub struct SnapshotBuilder {
    id: String,
    label: String,
    phase: Phase,
    created_at: DateTime<Utc>,
    devices: Vec<DeviceCapture>,
    cancelled: bool,
}

impl SnapshotBuilder {
    pub fn new(label: impl Into<String>, phase: Phase) -> Self {
        Self {
            id: Identifier::snapshot(),
            label: label.into(),
            phase,
            created_at: Utc::now().trunc_subsecs(6),
            devices: Vec::new(),
            cancelled: false,
        }
    }

    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Creation time, truncated to key resolution.
    pub fn created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at.trunc_subsecs(6);
        self
    }

    pub fn device(mut self, device: DeviceCapture) -> Self {
        self.devices.push(device);
        self
    }

    pub fn devices(mut self, devices: impl IntoIterator<Item = DeviceCapture>) -> Self {
        self.devices.extend(devices);
        self
    }

    pub fn cancelled(mut self, cancelled: bool) -> Self {
        self.cancelled = cancelled;
        self
    }

    pub fn build(self) -> Snapshot {
        Snapshot {
            id: self.id,
            label: self.label,
            phase: self.phase,
            created_at: self.created_at,
            devices: self.devices,
            cancelled: self.cancelled,
        }
    }
}

/// Format a time as a storage timestamp key (`YYYYMMDDTHHMMSS.ffffffZ`).
pub fn timestamp_key(at: DateTime<Utc>) -> String {
    at.format(TIMESTAMP_KEY_FORMAT).to_string()
}

/// Parse a storage timestamp key.
pub fn parse_timestamp_key(key: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(key, "%Y%m%dT%H%M%S%.fZ")
        .ok()
        .map(|naive| naive.and_utc())
}

//! Snapshot persistence.
//!
//! Logical layout, one unit per (label, phase, timestamp, device, command):
//!
//! ```text
//! <label>/<phase>/<timestamp>/manifest
//! <label>/<phase>/<timestamp>/<device>/<command>
//! ```
//!
//! With [`JsonStorage`] every unit is a `.json` file under the data directory,
//! so a device's or a command's output can be opened without reading the rest
//! of the snapshot. Key components are percent-encoded; labels, device ids
//! and command names too long for a file name are shortened with a hash
//! suffix (see [`storage_component`]).
//!
//! Saves are append-only. The manifest is claimed atomically before any
//! result is written and is marked complete last; a save interrupted in
//! between can be resumed by saving the same snapshot again.

use crate::retry::RetryPolicy;
use crate::{CommandResult, DeviceCapture, Phase, Snapshot, StoreError, StoreResult};
use chrono::{DateTime, Utc};
use netmig_storage::{JsonStorage, Storage, StorageError};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::PathBuf;
use tracing::{debug, info, warn};

const MANIFEST: &str = "manifest";

/// Longest key component written to storage, leaving room for the `.json`
/// extension and staging-file decorations within a 255-byte file name.
const MAX_COMPONENT_LEN: usize = 160;

/// Hex digits of the name hash kept in a shortened component.
const HASH_SUFFIX_LEN: usize = 16;

/// Separator before the hash suffix. Never produced by [`encode_component`].
const HASH_MARKER: char = '~';

/// Where a snapshot was stored.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Location {
    pub label: String,
    pub phase: Phase,
    pub timestamp: String,
}

impl Location {
    pub fn of(snapshot: &Snapshot) -> Self {
        Self {
            label: snapshot.label().to_string(),
            phase: snapshot.phase(),
            timestamp: snapshot.timestamp_key(),
        }
    }

    /// Encoded key components of this snapshot's root.
    fn key(&self) -> [String; 3] {
        [
            storage_component(&self.label),
            self.phase.as_str().to_string(),
            encode_component(&self.timestamp),
        ]
    }
}

impl std::fmt::Display for Location {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.label, self.phase, self.timestamp)
    }
}

/// Per-device entry in the manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ManifestDevice {
    device_id: String,
    class: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    prompt: Option<String>,
    /// Command names in capture order.
    commands: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Manifest {
    snapshot_id: String,
    label: String,
    phase: Phase,
    created_at: DateTime<Utc>,
    complete: bool,
    #[serde(default)]
    cancelled: bool,
    devices: Vec<ManifestDevice>,
}

impl Manifest {
    fn of(snapshot: &Snapshot, complete: bool) -> Self {
        Self {
            snapshot_id: snapshot.id().to_string(),
            label: snapshot.label().to_string(),
            phase: snapshot.phase(),
            created_at: snapshot.created_at(),
            complete,
            cancelled: snapshot.is_cancelled(),
            devices: snapshot
                .devices()
                .iter()
                .map(|d| ManifestDevice {
                    device_id: d.device_id.clone(),
                    class: d.class.clone(),
                    prompt: d.prompt.clone(),
                    commands: d.results.iter().map(|r| r.command_name.clone()).collect(),
                })
                .collect(),
        }
    }
}

/// Stores snapshots in a [`Storage`] backend.
pub struct SnapshotStore<S: Storage = JsonStorage> {
    storage: S,
}

impl SnapshotStore<JsonStorage> {
    /// Store rooted at a data directory.
    pub fn open(data_dir: impl Into<PathBuf>) -> Self {
        Self::new(JsonStorage::new(data_dir))
    }

    /// Directory holding a stored snapshot.
    pub fn directory(&self, location: &Location) -> PathBuf {
        let mut path = self.storage.base_path().to_path_buf();
        for component in location.key() {
            path.push(component);
        }
        path
    }
}

impl<S: Storage> SnapshotStore<S> {
    pub fn new(storage: S) -> Self {
        Self { storage }
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    /// Persist a snapshot.
    ///
    /// Fails with [`StoreError::DuplicateKey`] if another snapshot already
    /// holds the same (label, phase, timestamp). Every device is written even
    /// if one fails; the first error is returned and the snapshot stays
    /// incomplete until it is saved again.
    pub async fn save(&self, snapshot: &Snapshot) -> StoreResult<Location> {
        let location = Location::of(snapshot);
        let key = location.key();
        let manifest_key = [key[0].as_str(), key[1].as_str(), key[2].as_str(), MANIFEST];

        match self
            .storage
            .create(&manifest_key, &Manifest::of(snapshot, false))
            .await
        {
            Ok(()) => {}
            Err(StorageError::AlreadyExists(_)) => {
                let existing: Option<Manifest> = self.storage.read(&manifest_key).await?;
                match existing {
                    Some(m) if m.snapshot_id == snapshot.id() && m.complete => {
                        debug!(location = %location, "Snapshot already saved");
                        return Ok(location);
                    }
                    Some(m) if m.snapshot_id == snapshot.id() => {
                        info!(location = %location, "Resuming incomplete save");
                    }
                    _ => {
                        return Err(StoreError::DuplicateKey {
                            label: location.label,
                            phase: location.phase,
                            timestamp: location.timestamp,
                        })
                    }
                }
            }
            Err(e) => return Err(e.into()),
        }

        let writes = snapshot
            .devices()
            .iter()
            .map(|device| self.write_device(&key, device));
        let mut first_error = None;
        for (device, result) in snapshot
            .devices()
            .iter()
            .zip(futures::future::join_all(writes).await)
        {
            if let Err(e) = result {
                warn!(device = %device.device_id, error = %e, "Failed to store device results");
                first_error.get_or_insert(e);
            }
        }
        if let Some(e) = first_error {
            return Err(e);
        }

        self.storage
            .write(&manifest_key, &Manifest::of(snapshot, true))
            .await?;

        info!(
            location = %location,
            snapshot_id = %snapshot.id(),
            devices = snapshot.devices().len(),
            "Snapshot saved"
        );
        Ok(location)
    }

    /// [`save`](Self::save), retrying I/O failures under `policy`.
    ///
    /// Every retry resumes the snapshot's own partial save, so results already
    /// written are not written twice under a new key.
    pub async fn save_with_retry(
        &self,
        snapshot: &Snapshot,
        policy: &RetryPolicy,
    ) -> StoreResult<Location> {
        let mut helper = policy.helper();
        loop {
            match self.save(snapshot).await {
                Ok(location) => return Ok(location),
                Err(e) if e.is_retryable() => match helper.next_attempt() {
                    Some(delay) => {
                        warn!(
                            snapshot_id = %snapshot.id(),
                            attempt = helper.current_attempt(),
                            error = %e,
                            "Save failed, retrying"
                        );
                        tokio::time::sleep(delay).await;
                    }
                    None => return Err(e),
                },
                Err(e) => return Err(e),
            }
        }
    }

    async fn write_device(&self, root: &[String; 3], device: &DeviceCapture) -> StoreResult<()> {
        let device_key = storage_component(&device.device_id);
        for result in &device.results {
            let command_key = storage_component(&result.command_name);
            let key = [
                root[0].as_str(),
                root[1].as_str(),
                root[2].as_str(),
                device_key.as_str(),
                command_key.as_str(),
            ];
            self.storage.write(&key, result).await?;
        }
        Ok(())
    }

    /// Load a snapshot; the most recent complete one when `timestamp` is `None`.
    pub async fn load(
        &self,
        label: &str,
        phase: Phase,
        timestamp: Option<&str>,
    ) -> StoreResult<Snapshot> {
        let (location, manifest) = self.manifest(label, phase, timestamp).await?;

        let mut builder = Snapshot::builder(&manifest.label, manifest.phase)
            .id(&manifest.snapshot_id)
            .created_at(manifest.created_at)
            .cancelled(manifest.cancelled);
        for entry in &manifest.devices {
            builder = builder.device(self.read_device(&location, entry).await?);
        }

        debug!(location = %location, "Snapshot loaded");
        Ok(builder.build())
    }

    /// Load one device's results without reading other devices.
    pub async fn load_device(
        &self,
        label: &str,
        phase: Phase,
        timestamp: Option<&str>,
        device_id: &str,
    ) -> StoreResult<DeviceCapture> {
        let (location, manifest) = self.manifest(label, phase, timestamp).await?;
        let entry = manifest
            .devices
            .iter()
            .find(|d| d.device_id == device_id)
            .ok_or_else(|| StoreError::not_found(format!("{location}/{device_id}")))?;
        self.read_device(&location, entry).await
    }

    /// Load a single (device, command) result.
    pub async fn load_result(
        &self,
        label: &str,
        phase: Phase,
        timestamp: Option<&str>,
        device_id: &str,
        command_name: &str,
    ) -> StoreResult<CommandResult> {
        let location = match timestamp {
            Some(ts) => Location {
                label: label.to_string(),
                phase,
                timestamp: ts.to_string(),
            },
            None => self.manifest(label, phase, None).await?.0,
        };
        self.read_result(&location, device_id, command_name).await
    }

    /// Stored (phase, timestamp) pairs for a label, oldest first.
    ///
    /// Incomplete saves are skipped.
    pub async fn list(&self, label: &str) -> StoreResult<Vec<(Phase, String)>> {
        let mut entries = Vec::new();
        for phase in [Phase::Pre, Phase::Post] {
            for timestamp in self.complete_timestamps(label, phase).await? {
                entries.push((phase, timestamp));
            }
        }
        entries.sort_by(|a, b| a.1.cmp(&b.1).then(a.0.cmp(&b.0)));
        Ok(entries)
    }

    /// Labels with at least one stored snapshot directory.
    pub async fn labels(&self) -> StoreResult<Vec<String>> {
        let mut labels = Vec::new();
        for name in self.storage.children(&[]).await? {
            let label = if name.contains(HASH_MARKER) {
                self.label_from_manifest(&name).await?
            } else {
                decode_component(&name)
            };
            labels.extend(label);
        }
        labels.sort();
        Ok(labels)
    }

    /// Recover a shortened label from any manifest stored under it.
    async fn label_from_manifest(&self, label_key: &str) -> StoreResult<Option<String>> {
        for phase in [Phase::Pre, Phase::Post] {
            for child in self.storage.children(&[label_key, phase.as_str()]).await? {
                let manifest: Option<Manifest> = self
                    .storage
                    .read(&[label_key, phase.as_str(), child.as_str(), MANIFEST])
                    .await?;
                if let Some(manifest) = manifest {
                    return Ok(Some(manifest.label));
                }
            }
        }
        Ok(None)
    }

    async fn complete_timestamps(&self, label: &str, phase: Phase) -> StoreResult<Vec<String>> {
        let label_key = storage_component(label);
        let children = self
            .storage
            .children(&[label_key.as_str(), phase.as_str()])
            .await?;

        let mut complete = Vec::new();
        for child in children {
            let manifest: Option<Manifest> = self
                .storage
                .read(&[label_key.as_str(), phase.as_str(), child.as_str(), MANIFEST])
                .await?;
            match (manifest, decode_component(&child)) {
                (Some(m), Some(ts)) if m.complete => complete.push(ts),
                (Some(_), _) => debug!(label, phase = %phase, timestamp = %child, "Skipping incomplete snapshot"),
                _ => {}
            }
        }
        complete.sort();
        Ok(complete)
    }

    async fn manifest(
        &self,
        label: &str,
        phase: Phase,
        timestamp: Option<&str>,
    ) -> StoreResult<(Location, Manifest)> {
        let timestamp = match timestamp {
            Some(ts) => ts.to_string(),
            None => self
                .complete_timestamps(label, phase)
                .await?
                .pop()
                .ok_or_else(|| StoreError::not_found(format!("{label}/{phase}")))?,
        };
        let location = Location {
            label: label.to_string(),
            phase,
            timestamp,
        };
        let key = location.key();

        let manifest: Manifest = self
            .storage
            .read(&[key[0].as_str(), key[1].as_str(), key[2].as_str(), MANIFEST])
            .await?
            .ok_or_else(|| StoreError::not_found(location.to_string()))?;
        if !manifest.complete {
            return Err(StoreError::Incomplete(manifest.snapshot_id));
        }
        Ok((location, manifest))
    }

    async fn read_device(
        &self,
        location: &Location,
        entry: &ManifestDevice,
    ) -> StoreResult<DeviceCapture> {
        let mut capture = DeviceCapture::new(&entry.device_id, &entry.class);
        capture.prompt = entry.prompt.clone();
        for command in &entry.commands {
            capture
                .results
                .push(self.read_result(location, &entry.device_id, command).await?);
        }
        Ok(capture)
    }

    async fn read_result(
        &self,
        location: &Location,
        device_id: &str,
        command_name: &str,
    ) -> StoreResult<CommandResult> {
        let root = location.key();
        let device_key = storage_component(device_id);
        let command_key = storage_component(command_name);
        let key = [
            root[0].as_str(),
            root[1].as_str(),
            root[2].as_str(),
            device_key.as_str(),
            command_key.as_str(),
        ];
        self.storage.read(&key).await?.ok_or_else(|| {
            StoreError::not_found(format!("{location}/{device_id}/{command_name}"))
        })
    }
}

/// Percent-encode a key component so any device id or command name is a
/// safe single path segment.
pub fn encode_component(raw: &str) -> String {
    let mut encoded = String::with_capacity(raw.len());
    for (i, byte) in raw.bytes().enumerate() {
        let keep = byte.is_ascii_alphanumeric()
            || matches!(byte, b'-' | b'_')
            || (byte == b'.' && i > 0);
        if keep {
            encoded.push(byte as char);
        } else {
            encoded.push_str(&format!("%{byte:02X}"));
        }
    }
    if encoded.is_empty() {
        encoded.push_str("%00");
    }
    encoded
}

/// Storage name for a label, device id or command name.
///
/// Names whose encoding fits in a file name are [`encode_component`]d as-is.
/// Longer ones keep an encoded prefix followed by `~` and a hash of the full
/// name, so distinct names stay distinct and the same name always maps to
/// the same key.
pub fn storage_component(raw: &str) -> String {
    let encoded = encode_component(raw);
    if encoded.len() <= MAX_COMPONENT_LEN {
        return encoded;
    }

    let digest = hex::encode(Sha256::digest(raw.as_bytes()));
    let mut cut = MAX_COMPONENT_LEN - HASH_SUFFIX_LEN - 1;
    // Keep %XX escapes whole.
    if let Some(pos) = encoded[..cut].rfind('%') {
        if pos + 3 > cut {
            cut = pos;
        }
    }
    format!(
        "{}{HASH_MARKER}{}",
        &encoded[..cut],
        &digest[..HASH_SUFFIX_LEN]
    )
}

/// Reverse [`encode_component`]. Returns `None` for malformed input.
pub fn decode_component(encoded: &str) -> Option<String> {
    if encoded == "%00" {
        return Some(String::new());
    }
    let bytes = encoded.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = encoded.get(i + 1..i + 3)?;
            out.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).ok()
}

//! Diff engine.
//!
//! Compares two snapshots key by key, where a key is (device, command). The
//! report is a pure function of the two snapshots: same inputs, same bytes.

use crate::{CommandResult, DeviceCapture, DiffError, Outcome, Snapshot};
use serde::{Deserialize, Serialize};
use similar::{ChangeTag, TextDiff};
use std::collections::{HashMap, HashSet};
use std::fmt::Write as _;

/// Lines of context around each change.
const CONTEXT_LINES: usize = 3;

/// Which argument of [`compare`] a value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Pre,
    Post,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pre => "pre",
            Self::Post => "post",
        }
    }
}

/// Kind of a line in a hunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LineTag {
    Context,
    Removed,
    Added,
}

impl LineTag {
    fn sign(&self) -> char {
        match self {
            Self::Context => ' ',
            Self::Removed => '-',
            Self::Added => '+',
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffLine {
    pub tag: LineTag,
    pub text: String,
}

/// A run of changes with surrounding context. Line numbers are 1-based.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hunk {
    pub old_start: usize,
    pub old_len: usize,
    pub new_start: usize,
    pub new_len: usize,
    pub lines: Vec<DiffLine>,
}

impl Hunk {
    fn header(&self) -> String {
        format!(
            "@@ -{} +{} @@",
            range(self.old_start, self.old_len),
            range(self.new_start, self.new_len)
        )
    }
}

fn range(start: usize, len: usize) -> String {
    if len == 1 {
        start.to_string()
    } else {
        format!("{start},{len}")
    }
}

/// Line-level diff between normalized old and new text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineDiff {
    pub added: usize,
    pub removed: usize,
    pub hunks: Vec<Hunk>,
}

impl LineDiff {
    /// Diff two texts after normalization.
    pub fn compute(old: &str, new: &str) -> Self {
        let old = with_trailing_newline(normalize(old));
        let new = with_trailing_newline(normalize(new));
        let diff = TextDiff::from_lines(&old, &new);

        let mut added = 0;
        let mut removed = 0;
        let mut hunks = Vec::new();

        for group in diff.grouped_ops(CONTEXT_LINES) {
            let (Some(first), Some(last)) = (group.first(), group.last()) else {
                continue;
            };
            let old_range = first.old_range().start..last.old_range().end;
            let new_range = first.new_range().start..last.new_range().end;

            let mut lines = Vec::new();
            for op in &group {
                for change in diff.iter_changes(op) {
                    let tag = match change.tag() {
                        ChangeTag::Delete => {
                            removed += 1;
                            LineTag::Removed
                        }
                        ChangeTag::Insert => {
                            added += 1;
                            LineTag::Added
                        }
                        ChangeTag::Equal => LineTag::Context,
                    };
                    lines.push(DiffLine {
                        tag,
                        text: change.value().trim_end_matches('\n').to_string(),
                    });
                }
            }

            hunks.push(Hunk {
                old_start: hunk_start(old_range.start, old_range.len()),
                old_len: old_range.len(),
                new_start: hunk_start(new_range.start, new_range.len()),
                new_len: new_range.len(),
                lines,
            });
        }

        Self {
            added,
            removed,
            hunks,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.hunks.is_empty()
    }

    /// Unified-diff text with the given file labels.
    pub fn unified(&self, old_name: &str, new_name: &str) -> String {
        let mut output = String::new();
        let _ = writeln!(output, "--- {old_name}");
        let _ = writeln!(output, "+++ {new_name}");
        for hunk in &self.hunks {
            output.push_str(&hunk.header());
            output.push('\n');
            for line in &hunk.lines {
                output.push(line.tag.sign());
                output.push_str(&line.text);
                output.push('\n');
            }
        }
        output
    }
}

// Unified diffs number an empty range by the line before it.
fn hunk_start(start: usize, len: usize) -> usize {
    if len == 0 {
        start
    } else {
        start + 1
    }
}

fn with_trailing_newline(mut text: String) -> String {
    if !text.is_empty() {
        text.push('\n');
    }
    text
}

/// Normalize captured text for comparison.
///
/// Line endings become `\n`, trailing whitespace is removed from every line,
/// and trailing empty lines are dropped.
pub fn normalize(text: &str) -> String {
    let unified = text.replace("\r\n", "\n").replace('\r', "\n");
    let mut lines: Vec<&str> = unified.lines().map(str::trim_end).collect();
    while lines.last().is_some_and(|l| l.is_empty()) {
        lines.pop();
    }
    lines.join("\n")
}

/// Comparison result for one (device, command) key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DiffStatus {
    Unchanged,
    /// Both succeeded with different normalized output. Holds the raw texts.
    Changed {
        old: String,
        new: String,
        diff: LineDiff,
    },
    OnlyInPre,
    OnlyInPost,
    BothFailed {
        pre: String,
        post: String,
    },
    /// One side failed; `failed` names it and `reason` describes the failure.
    OneFailed {
        failed: Side,
        reason: String,
    },
}

impl DiffStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unchanged => "unchanged",
            Self::Changed { .. } => "changed",
            Self::OnlyInPre => "only in pre",
            Self::OnlyInPost => "only in post",
            Self::BothFailed { .. } => "both failed",
            Self::OneFailed { .. } => "one failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffEntry {
    pub device_id: String,
    pub command_name: String,
    pub status: DiffStatus,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffSummary {
    pub unchanged: usize,
    pub changed: usize,
    pub only_in_pre: usize,
    pub only_in_post: usize,
    pub both_failed: usize,
    pub one_failed: usize,
}

impl DiffSummary {
    pub fn total(&self) -> usize {
        self.unchanged
            + self.changed
            + self.only_in_pre
            + self.only_in_post
            + self.both_failed
            + self.one_failed
    }

    /// True when nothing differs between the two sides.
    pub fn is_clean(&self) -> bool {
        self.changed + self.only_in_pre + self.only_in_post + self.one_failed == 0
    }
}

/// Identity of one compared snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotRef {
    pub id: String,
    pub label: String,
    pub phase: crate::Phase,
    pub timestamp: String,
}

impl SnapshotRef {
    fn of(snapshot: &Snapshot) -> Self {
        Self {
            id: snapshot.id().to_string(),
            label: snapshot.label().to_string(),
            phase: snapshot.phase(),
            timestamp: snapshot.timestamp_key(),
        }
    }
}

/// Structured comparison of two snapshots. Derived data, recomputable at any time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffReport {
    pub label: String,
    pub pre: SnapshotRef,
    pub post: SnapshotRef,
    pub entries: Vec<DiffEntry>,
}

impl DiffReport {
    pub fn summary(&self) -> DiffSummary {
        let mut summary = DiffSummary::default();
        for entry in &self.entries {
            match entry.status {
                DiffStatus::Unchanged => summary.unchanged += 1,
                DiffStatus::Changed { .. } => summary.changed += 1,
                DiffStatus::OnlyInPre => summary.only_in_pre += 1,
                DiffStatus::OnlyInPost => summary.only_in_post += 1,
                DiffStatus::BothFailed { .. } => summary.both_failed += 1,
                DiffStatus::OneFailed { .. } => summary.one_failed += 1,
            }
        }
        summary
    }

    pub fn entry(&self, device_id: &str, command_name: &str) -> Option<&DiffEntry> {
        self.entries
            .iter()
            .find(|e| e.device_id == device_id && e.command_name == command_name)
    }

    /// Entries that are not `Unchanged`.
    pub fn differences(&self) -> impl Iterator<Item = &DiffEntry> {
        self.entries
            .iter()
            .filter(|e| !matches!(e.status, DiffStatus::Unchanged))
    }

    /// Human-readable report, grouped by device.
    pub fn render_text(&self, include_unchanged: bool) -> String {
        let summary = self.summary();
        let mut out = String::new();
        let _ = writeln!(
            out,
            "Diff {}: {} {} ({}) -> {} {} ({})",
            self.label,
            self.pre.phase,
            self.pre.timestamp,
            self.pre.id,
            self.post.phase,
            self.post.timestamp,
            self.post.id
        );
        let _ = writeln!(
            out,
            "{} unchanged, {} changed, {} only in pre, {} only in post, {} both failed, {} one failed",
            summary.unchanged,
            summary.changed,
            summary.only_in_pre,
            summary.only_in_post,
            summary.both_failed,
            summary.one_failed
        );

        let mut current_device: Option<&str> = None;
        for entry in &self.entries {
            if !include_unchanged && matches!(entry.status, DiffStatus::Unchanged) {
                continue;
            }
            if current_device != Some(entry.device_id.as_str()) {
                let _ = writeln!(out, "\n== {} ==", entry.device_id);
                current_device = Some(entry.device_id.as_str());
            }

            match &entry.status {
                DiffStatus::Changed { diff, .. } => {
                    let _ = writeln!(out, "[changed] {}", entry.command_name);
                    out.push_str(&diff.unified(
                        &format!("{}/{}/{}", self.pre.phase, entry.device_id, entry.command_name),
                        &format!("{}/{}/{}", self.post.phase, entry.device_id, entry.command_name),
                    ));
                }
                DiffStatus::BothFailed { pre, post } => {
                    let _ = writeln!(
                        out,
                        "[both failed] {} (pre: {}; post: {})",
                        entry.command_name, pre, post
                    );
                }
                DiffStatus::OneFailed { failed, reason } => {
                    let _ = writeln!(
                        out,
                        "[one failed] {} ({}: {})",
                        entry.command_name,
                        failed.as_str(),
                        reason
                    );
                }
                status => {
                    let _ = writeln!(out, "[{}] {}", status.as_str(), entry.command_name);
                }
            }
        }
        out
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

/// Compare a pre and a post snapshot.
///
/// Entries are grouped by device in `pre`'s device order followed by devices
/// only in `post`; within a device, commands follow capture order the same
/// way. Fails only when both snapshots hold data but share no key.
pub fn compare(pre: &Snapshot, post: &Snapshot) -> Result<DiffReport, DiffError> {
    let (pre_index, post_index) = (ResultIndex::of(pre), ResultIndex::of(post));
    let keys = ordered_keys(pre, post, &pre_index, &post_index);
    let common = keys
        .iter()
        .filter(|(d, c)| pre_index.result(d, c).is_some() && post_index.result(d, c).is_some())
        .count();
    if common == 0 && !keys.is_empty() {
        return Err(DiffError::IncompatibleSnapshots {
            pre: pre.id().to_string(),
            post: post.id().to_string(),
        });
    }

    let entries = keys
        .into_iter()
        .map(|(device_id, command_name)| {
            let status = match (
                pre_index.result(&device_id, &command_name),
                post_index.result(&device_id, &command_name),
            ) {
                (Some(a), Some(b)) => compare_outcomes(&a.outcome, &b.outcome),
                (Some(_), None) => DiffStatus::OnlyInPre,
                (None, Some(_)) => DiffStatus::OnlyInPost,
                (None, None) => DiffStatus::Unchanged,
            };
            DiffEntry {
                device_id,
                command_name,
                status,
            }
        })
        .collect();

    Ok(DiffReport {
        label: pre.label().to_string(),
        pre: SnapshotRef::of(pre),
        post: SnapshotRef::of(post),
        entries,
    })
}

fn compare_outcomes(pre: &Outcome, post: &Outcome) -> DiffStatus {
    match (pre.output(), post.output()) {
        (Some(old), Some(new)) => {
            if normalize(old) == normalize(new) {
                DiffStatus::Unchanged
            } else {
                DiffStatus::Changed {
                    old: old.to_string(),
                    new: new.to_string(),
                    diff: LineDiff::compute(old, new),
                }
            }
        }
        (None, None) => DiffStatus::BothFailed {
            pre: pre.describe(),
            post: post.describe(),
        },
        (Some(_), None) => DiffStatus::OneFailed {
            failed: Side::Post,
            reason: post.describe(),
        },
        (None, Some(_)) => DiffStatus::OneFailed {
            failed: Side::Pre,
            reason: pre.describe(),
        },
    }
}

/// Union of (device, command) keys in deterministic order.
/// Captures and results of one snapshot, keyed for constant-time lookup.
struct ResultIndex<'a> {
    captures: HashMap<&'a str, &'a DeviceCapture>,
    results: HashMap<(&'a str, &'a str), &'a CommandResult>,
}

impl<'a> ResultIndex<'a> {
    fn of(snapshot: &'a Snapshot) -> Self {
        let mut captures = HashMap::new();
        let mut results = HashMap::new();
        for capture in snapshot.devices() {
            let device_id = capture.device_id.as_str();
            if captures.contains_key(device_id) {
                continue;
            }
            captures.insert(device_id, capture);
            for result in &capture.results {
                results
                    .entry((device_id, result.command_name.as_str()))
                    .or_insert(result);
            }
        }
        Self { captures, results }
    }

    fn capture(&self, device_id: &str) -> Option<&'a DeviceCapture> {
        self.captures.get(device_id).copied()
    }

    fn result(&self, device_id: &str, command_name: &str) -> Option<&'a CommandResult> {
        self.results.get(&(device_id, command_name)).copied()
    }
}

fn ordered_keys(
    pre: &Snapshot,
    post: &Snapshot,
    pre_index: &ResultIndex<'_>,
    post_index: &ResultIndex<'_>,
) -> Vec<(String, String)> {
    let mut devices: Vec<&str> = Vec::new();
    let mut seen_devices = HashSet::new();
    for capture in pre.devices().iter().chain(post.devices()) {
        if seen_devices.insert(capture.device_id.as_str()) {
            devices.push(&capture.device_id);
        }
    }

    let mut keys = Vec::new();
    for device in devices {
        let mut seen_commands = HashSet::new();
        let commands = pre_index
            .capture(device)
            .into_iter()
            .chain(post_index.capture(device))
            .flat_map(|capture| capture.results.iter());
        for result in commands {
            if seen_commands.insert(result.command_name.as_str()) {
                keys.push((device.to_string(), result.command_name.clone()));
            }
        }
    }
    keys
}

//! Snapshot export.
//!
//! - Text logs: one file per device, `<name>_<YYYY-MM-DD>.txt`, holding every
//!   command as the operator would have seen it on the console.
//! - Workbook: one `.xlsx` file with a single worksheet, a row per device and a
//!   column per command.

use crate::{DeviceCapture, ExportError, Outcome, Snapshot};
use rust_xlsxwriter::{Format, Workbook};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};

/// Separator between commands in a device log.
pub const SEPARATOR: &str =
    "-------------------------------------------------------------------------------";

/// Render one device's log.
///
/// Each command appears as `<prompt><command>`, then its output (or
/// `% <failure>`), then a separator line.
pub fn render_device_log(capture: &DeviceCapture) -> String {
    let prompt = capture
        .prompt
        .clone()
        .unwrap_or_else(|| format!("{}#", capture.device_id));

    let mut out = String::new();
    for result in &capture.results {
        out.push_str(&prompt);
        out.push_str(&result.command);
        out.push('\n');
        match &result.outcome {
            Outcome::Success { output } => {
                out.push_str(output.trim_end_matches(['\r', '\n']));
            }
            failure => {
                out.push_str("% ");
                out.push_str(&failure.describe());
            }
        }
        out.push('\n');
        out.push_str(SEPARATOR);
        out.push('\n');
    }
    out
}

/// Write every device's log into `dir`, returning the files in device order.
pub async fn export_text_logs(snapshot: &Snapshot, dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    fs::create_dir_all(dir).await?;
    let date = snapshot.created_at().format("%Y-%m-%d").to_string();

    let mut used = HashSet::new();
    let mut written = Vec::with_capacity(snapshot.devices().len());
    for capture in snapshot.devices() {
        let mut stem = sanitize(capture.display_name());
        if !used.insert(stem.clone()) {
            stem = format!("{}_{}", stem, sanitize(&capture.device_id));
            used.insert(stem.clone());
        }

        let path = dir.join(format!("{stem}_{date}.txt"));
        fs::write(&path, render_device_log(capture)).await?;
        debug!(device = %capture.device_id, path = %path.display(), "Wrote device log");
        written.push(path);
    }

    info!(
        snapshot_id = %snapshot.id(),
        dir = %dir.display(),
        files = written.len(),
        "Exported text logs"
    );
    Ok(written)
}

/// Worksheet holding the snapshot in a workbook export.
pub const WORKSHEET_NAME: &str = "Snapshot";

/// Longest text a workbook cell accepts.
const MAX_CELL_CHARS: usize = 32_767;

/// Cells of a workbook export: a header row and one row per device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SheetLayout {
    /// `Device`, then command names in order of first appearance.
    pub header: Vec<String>,
    /// Per device: display name, then one cell per header column. Commands
    /// the device did not run stay empty.
    pub rows: Vec<Vec<String>>,
}

impl SheetLayout {
    pub fn of(snapshot: &Snapshot) -> Self {
        let mut header = vec!["Device".to_string()];
        let mut column_of: HashMap<&str, usize> = HashMap::new();
        for capture in snapshot.devices() {
            for result in &capture.results {
                column_of
                    .entry(result.command_name.as_str())
                    .or_insert_with(|| {
                        header.push(result.command_name.clone());
                        header.len() - 1
                    });
            }
        }

        let rows = snapshot
            .devices()
            .iter()
            .map(|capture| {
                let mut row = vec![String::new(); header.len()];
                row[0] = capture.display_name().to_string();
                for result in &capture.results {
                    if let Some(&column) = column_of.get(result.command_name.as_str()) {
                        row[column] = cell_text(&result.outcome);
                    }
                }
                row
            })
            .collect();

        Self { header, rows }
    }
}

fn cell_text(outcome: &Outcome) -> String {
    let text = match outcome {
        Outcome::Success { output } => output.trim_end_matches(['\r', '\n']).to_string(),
        failure => format!("% {}", failure.describe()),
    };
    if text.chars().count() > MAX_CELL_CHARS {
        text.chars().take(MAX_CELL_CHARS).collect()
    } else {
        text
    }
}

/// Render the snapshot as `.xlsx` bytes.
///
/// Output longer than a cell can hold is truncated.
pub fn render_workbook(snapshot: &Snapshot) -> Result<Vec<u8>, ExportError> {
    let layout = SheetLayout::of(snapshot);
    let too_large = || ExportError::TooLarge(snapshot.id().to_string());

    let mut workbook = Workbook::new();
    let bold = Format::new().set_bold();
    let sheet = workbook.add_worksheet();
    sheet.set_name(WORKSHEET_NAME)?;

    for (col, name) in layout.header.iter().enumerate() {
        let col = u16::try_from(col).map_err(|_| too_large())?;
        sheet.write_string_with_format(0, col, name, &bold)?;
    }
    for (row, cells) in layout.rows.iter().enumerate() {
        let row = u32::try_from(row + 1).map_err(|_| too_large())?;
        for (col, text) in cells.iter().enumerate() {
            if text.is_empty() {
                continue;
            }
            let col = u16::try_from(col).map_err(|_| too_large())?;
            sheet.write_string(row, col, text)?;
        }
    }

    Ok(workbook.save_to_buffer()?)
}

/// Write the snapshot as a workbook into `dir` and return the file path.
pub async fn export_workbook(snapshot: &Snapshot, dir: &Path) -> Result<PathBuf, ExportError> {
    let body = render_workbook(snapshot)?;
    fs::create_dir_all(dir).await?;

    let path = dir.join(format!(
        "{}_{}_{}.xlsx",
        sanitize(snapshot.label()),
        snapshot.phase(),
        snapshot.timestamp_key()
    ));
    fs::write(&path, body).await?;

    info!(
        snapshot_id = %snapshot.id(),
        path = %path.display(),
        devices = snapshot.devices().len(),
        "Exported workbook"
    );
    Ok(path)
}

fn sanitize(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_start_matches('.');
    if cleaned.is_empty() {
        "device".to_string()
    } else {
        cleaned.to_string()
    }
}

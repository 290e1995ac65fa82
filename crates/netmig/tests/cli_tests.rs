//! CLI integration tests.
//!
//! These tests run the built binary end-to-end. Devices are reached through
//! `sh -c`, so every "device" runs its commands locally in the test's
//! working directory.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tempfile::TempDir;

/// Get the path to the netmig binary.
fn binary_path() -> String {
    // In test mode, the binary might be in target/debug or target/release
    let mut path = std::env::current_exe()
        .expect("Failed to get current exe")
        .parent()
        .expect("Failed to get parent directory")
        .to_path_buf();

    // Go up from deps directory
    if path.ends_with("deps") {
        path.pop();
    }

    path.join("netmig").to_string_lossy().to_string()
}

const PROJECT_CONFIG: &str = r#"{
    "transport": { "program": "sh", "args": ["-c", "{command}"] },
    "runner": { "concurrency": 2, "retry": { "max_attempts": 1 } }
}"#;

/// Isolated working directory with its own config, home and data dir.
struct Workspace {
    dir: TempDir,
}

impl Workspace {
    fn new() -> Self {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        std::fs::create_dir_all(dir.path().join("home")).expect("Failed to create home");
        std::fs::write(dir.path().join("netmig.json"), PROJECT_CONFIG)
            .expect("Failed to write config");
        std::fs::write(dir.path().join("devices.txt"), "r1\nr2\n\n")
            .expect("Failed to write devices");
        std::fs::write(dir.path().join("commands.txt"), "cat version.txt\necho up\n")
            .expect("Failed to write commands");
        Self { dir }
    }

    fn path(&self) -> &Path {
        self.dir.path()
    }

    fn write(&self, name: &str, content: &str) {
        std::fs::write(self.path().join(name), content).expect("Failed to write file");
    }

    fn data_dir(&self) -> PathBuf {
        self.path().join("data")
    }

    fn netmig(&self, args: &[&str]) -> Output {
        let home = self.path().join("home");
        Command::new(binary_path())
            .args(args)
            .current_dir(self.path())
            .env("HOME", &home)
            .env("XDG_CONFIG_HOME", home.join(".config"))
            .env("NETMIG_DATA_DIR", self.data_dir())
            .env_remove("NETMIG_CONCURRENCY")
            .env_remove("NETMIG_COMMAND_TIMEOUT_SECS")
            .env_remove("RUST_LOG")
            .output()
            .expect("Failed to execute command")
    }

    fn run(&self, phase: &str) -> Output {
        self.netmig(&[
            "run",
            "--label",
            "cutover",
            "--phase",
            phase,
            "--devices",
            "devices.txt",
            "--commands",
            "commands.txt",
            "--quiet",
        ])
    }
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).to_string()
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).to_string()
}

#[test]
fn test_version_command() {
    let output = Command::new(binary_path())
        .arg("version")
        .output()
        .expect("Failed to execute command");

    assert!(output.status.success());
    assert!(stdout(&output).contains("netmig"));
}

#[test]
fn test_help_command() {
    let output = Command::new(binary_path())
        .arg("--help")
        .output()
        .expect("Failed to execute command");

    assert!(output.status.success());
    let stdout = stdout(&output);
    assert!(stdout.contains("Pre/post migration snapshots"));
    assert!(stdout.contains("run"));
    assert!(stdout.contains("diff"));
}

#[test]
fn test_config_command_lists_project_file() {
    let ws = Workspace::new();
    let output = ws.netmig(&["config"]);

    assert!(output.status.success(), "stderr: {}", stderr(&output));
    let stdout = stdout(&output);
    assert!(stdout.contains("netmig.json"));
    assert!(stdout.contains("\"program\": \"sh\""));
}

#[test]
fn test_invalid_project_config_fails() {
    let ws = Workspace::new();
    ws.write("netmig.json", "{ not json");

    let output = ws.netmig(&["list"]);
    assert!(!output.status.success());
    assert!(stderr(&output).contains("invalid config"));
}

#[test]
fn test_list_empty_data_dir() {
    let ws = Workspace::new();
    let output = ws.netmig(&["list"]);

    assert!(output.status.success(), "stderr: {}", stderr(&output));
    assert!(stdout(&output).contains("No snapshots found"));
}

#[test]
fn test_diff_without_snapshots_fails() {
    let ws = Workspace::new();
    let output = ws.netmig(&["diff", "--label", "cutover"]);

    assert!(!output.status.success());
    assert!(stderr(&output).contains("pre snapshot"));
}

#[test]
fn test_run_requires_commands() {
    let ws = Workspace::new();
    let output = ws.netmig(&[
        "run",
        "--label",
        "cutover",
        "--phase",
        "pre",
        "--devices",
        "devices.txt",
    ]);

    assert!(!output.status.success());
    assert!(stderr(&output).contains("No commands to run"));
}

#[test]
fn test_run_rejects_invalid_phase() {
    let ws = Workspace::new();
    let output = ws.netmig(&[
        "run", "--label", "cutover", "--phase", "during", "--devices", "devices.txt",
    ]);

    assert!(!output.status.success());
    assert!(stderr(&output).contains("invalid phase"));
}

#[test]
fn test_pre_post_diff_end_to_end() {
    let ws = Workspace::new();

    ws.write("version.txt", "IOS 15.1\n");
    let pre = ws.run("pre");
    assert!(pre.status.success(), "stderr: {}", stderr(&pre));
    assert!(stdout(&pre).contains("2 device(s), 4 command(s): 4 succeeded"));

    ws.write("version.txt", "IOS 15.2\n");
    let post = ws.run("post");
    assert!(post.status.success(), "stderr: {}", stderr(&post));

    let list = ws.netmig(&["list", "cutover"]);
    assert!(list.status.success());
    let listing = stdout(&list);
    assert!(listing.contains("pre"));
    assert!(listing.contains("post"));

    let diff = ws.netmig(&["diff", "--label", "cutover"]);
    assert!(diff.status.success(), "stderr: {}", stderr(&diff));
    let report = stdout(&diff);
    assert!(report.contains("2 unchanged, 2 changed"));
    assert!(report.contains("-IOS 15.1"));
    assert!(report.contains("+IOS 15.2"));
    assert!(!report.contains("echo up"));

    let strict = ws.netmig(&["diff", "--label", "cutover", "--fail-on-change"]);
    assert!(!strict.status.success());
    assert!(stderr(&strict).contains("2 of 4 entries differ"));
}

#[test]
fn test_diff_json_to_file() {
    let ws = Workspace::new();
    ws.write("version.txt", "IOS 15.1\n");
    assert!(ws.run("pre").status.success());
    assert!(ws.run("post").status.success());

    let output = ws.netmig(&[
        "diff", "--label", "cutover", "--format", "json", "--output", "report.json",
    ]);
    assert!(output.status.success(), "stderr: {}", stderr(&output));

    let content = std::fs::read_to_string(ws.path().join("report.json")).unwrap();
    let report: serde_json::Value = serde_json::from_str(&content).unwrap();
    assert_eq!(report["label"], "cutover");
    let entries = report["entries"].as_array().unwrap();
    assert_eq!(entries.len(), 4);
    assert!(entries.iter().all(|e| e["status"]["status"] == "unchanged"));
}

#[test]
fn test_diff_rejects_unknown_format() {
    let ws = Workspace::new();
    let output = ws.netmig(&["diff", "--label", "cutover", "--format", "yaml"]);

    assert!(!output.status.success());
    assert!(stderr(&output).contains("invalid value 'yaml'"));
}

#[test]
fn test_failed_command_is_recorded_not_fatal() {
    let ws = Workspace::new();
    ws.write("commands.txt", "echo ok\nexit 3\n");

    let output = ws.run("pre");
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    assert!(stdout(&output).contains("2 succeeded, 2 failed"));

    let show = ws.netmig(&[
        "show", "--label", "cutover", "--phase", "pre", "--device", "r1", "--command", "exit 3",
    ]);
    assert!(show.status.success());
    assert!(stdout(&show).starts_with("% command:"));
}

#[test]
fn test_show_and_export() {
    let ws = Workspace::new();
    ws.write("version.txt", "IOS 15.1\n");
    assert!(ws.run("pre").status.success());

    let show = ws.netmig(&[
        "show", "--label", "cutover", "--phase", "pre", "--device", "r1", "--command",
        "cat version.txt",
    ]);
    assert!(show.status.success(), "stderr: {}", stderr(&show));
    assert_eq!(stdout(&show), "IOS 15.1\n");

    let summary = ws.netmig(&["show", "--label", "cutover", "--phase", "pre"]);
    assert!(summary.status.success());
    assert!(stdout(&summary).contains("r2 [default]"));

    let export = ws.netmig(&[
        "export", "--label", "cutover", "--phase", "pre", "--output", "logs",
    ]);
    assert!(export.status.success(), "stderr: {}", stderr(&export));

    let mut names: Vec<String> = std::fs::read_dir(ws.path().join("logs"))
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
        .collect();
    names.sort();
    assert_eq!(names.len(), 2);
    assert!(names[0].starts_with("r1_") && names[0].ends_with(".txt"));

    let log = std::fs::read_to_string(ws.path().join("logs").join(&names[0])).unwrap();
    assert!(log.starts_with("r1#cat version.txt\nIOS 15.1\n"));
}

#[test]
fn test_failed_save_keeps_captured_results() {
    let ws = Workspace::new();
    ws.write("version.txt", "IOS 15.1\n");
    // A regular file where the data directory should be makes every save fail.
    std::fs::write(ws.data_dir(), "not a directory").unwrap();

    let output = ws.netmig(&[
        "run",
        "--label",
        "cutover",
        "--phase",
        "pre",
        "--devices",
        "devices.txt",
        "--commands",
        "commands.txt",
        "--export-logs",
        "logs",
        "--quiet",
    ]);
    assert!(!output.status.success());
    let stderr = stderr(&output);
    assert!(stderr.contains("Failed to save snapshot"), "stderr: {stderr}");
    assert!(stderr.contains("Captured results kept in"));

    let unsaved: Vec<PathBuf> = std::fs::read_dir(ws.path())
        .unwrap()
        .map(|e| e.unwrap().path())
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with("netmig-unsaved-snp_"))
        })
        .collect();
    assert_eq!(unsaved.len(), 1);
    let body: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&unsaved[0]).unwrap()).unwrap();
    assert_eq!(body["label"], "cutover");

    assert_eq!(std::fs::read_dir(ws.path().join("logs")).unwrap().count(), 2);
}

#[test]
fn test_export_workbook() {
    let ws = Workspace::new();
    ws.write("version.txt", "IOS 15.1\n");
    assert!(ws.run("pre").status.success());

    let export = ws.netmig(&[
        "export", "--label", "cutover", "--phase", "pre", "--output", "reports", "--format", "xlsx",
    ]);
    assert!(export.status.success(), "stderr: {}", stderr(&export));
    assert!(stdout(&export).contains("Exported 2 device(s)"));

    let files: Vec<PathBuf> = std::fs::read_dir(ws.path().join("reports"))
        .unwrap()
        .map(|e| e.unwrap().path())
        .collect();
    assert_eq!(files.len(), 1);
    let name = files[0].file_name().unwrap().to_string_lossy().to_string();
    assert!(name.starts_with("cutover_pre_") && name.ends_with(".xlsx"));
    assert_eq!(&std::fs::read(&files[0]).unwrap()[..2], b"PK");
}

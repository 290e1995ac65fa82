//! Test fixtures for fleets and data directories.

use netmig_device::Device;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// `count` devices named `r1`..`rN` of the default class.
pub fn fleet(count: usize) -> Vec<Device> {
    (1..=count).map(|i| Device::new(format!("r{i}"))).collect()
}

/// A temporary snapshot data directory, removed on drop.
pub struct TestDataDir {
    temp_dir: TempDir,
}

impl TestDataDir {
    /// # Panics
    ///
    /// Panics if the temporary directory cannot be created.
    pub fn new() -> Self {
        Self {
            temp_dir: TempDir::new().expect("Failed to create temp directory"),
        }
    }

    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Path of a file inside the directory.
    pub fn file(&self, name: &str) -> PathBuf {
        self.temp_dir.path().join(name)
    }

    /// Write a text file (e.g. a device or command list) and return its path.
    ///
    /// # Panics
    ///
    /// Panics if the file cannot be written.
    pub fn write_file(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.file(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("Failed to create parent directory");
        }
        std::fs::write(&path, contents).expect("Failed to write file");
        path
    }
}

impl Default for TestDataDir {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fleet_names() {
        let ids: Vec<_> = fleet(3).into_iter().map(|d| d.id).collect();
        assert_eq!(ids, vec!["r1", "r2", "r3"]);
    }

    #[test]
    fn test_data_dir_write_file() {
        let dir = TestDataDir::new();
        let path = dir.write_file("lists/devices.txt", "r1\nr2\n");
        assert_eq!(std::fs::read_to_string(path).unwrap(), "r1\nr2\n");
    }
}

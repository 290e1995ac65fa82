//! File-per-document storage.
//!
//! `["dc1", "pre", "20240101T000000.000000Z", "manifest"]` is stored at
//! `<root>/dc1/pre/20240101T000000.000000Z/manifest.json`.
//!
//! Every document is first written to a uniquely named hidden file next to
//! its target and then moved into place, so readers never see a partial
//! document.

use crate::error::check_segment;
use crate::{Storage, StorageError, StorageResult};
use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, trace};

static STAGING_COUNTER: AtomicU64 = AtomicU64::new(0);

/// JSON documents in a directory tree.
#[derive(Debug, Clone)]
pub struct JsonStorage {
    root: PathBuf,
}

impl JsonStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root directory of this storage.
    pub fn base_path(&self) -> &Path {
        &self.root
    }

    fn dir_for(&self, prefix: &[&str]) -> StorageResult<PathBuf> {
        let mut dir = self.root.clone();
        for segment in prefix {
            check_segment(segment)?;
            dir.push(segment);
        }
        Ok(dir)
    }

    fn file_for(&self, key: &[&str]) -> StorageResult<PathBuf> {
        let Some((name, parents)) = key.split_last() else {
            return Err(StorageError::invalid_key("", "empty key"));
        };
        check_segment(name)?;
        Ok(self.dir_for(parents)?.join(format!("{name}.json")))
    }

    /// Write `value` to a fresh hidden file beside `target` and return its path.
    async fn stage<T: Serialize + Sync>(&self, target: &Path, value: &T) -> StorageResult<PathBuf> {
        let body = serde_json::to_vec_pretty(value)?;
        let dir = target.parent().unwrap_or(&self.root);
        fs::create_dir_all(dir).await?;

        let stem = target
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        let staged = dir.join(format!(
            ".{stem}.{}.{}.tmp",
            std::process::id(),
            STAGING_COUNTER.fetch_add(1, Ordering::Relaxed)
        ));

        let mut file = fs::File::create(&staged).await?;
        file.write_all(&body).await?;
        file.sync_data().await?;
        trace!(path = %staged.display(), bytes = body.len(), "Staged document");
        Ok(staged)
    }
}

#[async_trait]
impl Storage for JsonStorage {
    async fn read<T: DeserializeOwned + Send>(&self, key: &[&str]) -> StorageResult<Option<T>> {
        let path = self.file_for(key)?;
        match fs::read(&path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn write<T: Serialize + Send + Sync>(
        &self,
        key: &[&str],
        value: &T,
    ) -> StorageResult<()> {
        let path = self.file_for(key)?;
        let staged = self.stage(&path, value).await?;
        if let Err(e) = fs::rename(&staged, &path).await {
            let _ = fs::remove_file(&staged).await;
            return Err(e.into());
        }
        debug!(path = %path.display(), "Document written");
        Ok(())
    }

    async fn create<T: Serialize + Send + Sync>(
        &self,
        key: &[&str],
        value: &T,
    ) -> StorageResult<()> {
        let path = self.file_for(key)?;
        let staged = self.stage(&path, value).await?;

        // Linking fails if the target exists, unlike rename.
        let linked = fs::hard_link(&staged, &path).await;
        let _ = fs::remove_file(&staged).await;
        match linked {
            Ok(()) => {
                debug!(path = %path.display(), "Document created");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Err(StorageError::already_exists(key)),
            Err(e) => Err(e.into()),
        }
    }

    async fn children(&self, prefix: &[&str]) -> StorageResult<Vec<String>> {
        let dir = self.dir_for(prefix)?;
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            if let Ok(name) = entry.file_name().into_string() {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }
}

//! Document storage for netmig snapshots.
//!
//! Values are JSON documents addressed by a path of key segments, e.g.
//! `["dc1-cutover", "pre", "20240101T000000.000000Z", "manifest"]`.
//!
//! Backends:
//! - [`JsonStorage`]: one file per document under a root directory
//! - [`MemoryStorage`]: a process-local map, for tests

pub mod error;
pub mod json;
pub mod memory;

pub use error::{StorageError, StorageResult};
pub use json::JsonStorage;
pub use memory::MemoryStorage;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};

/// A backend that stores JSON documents under segmented keys.
///
/// Documents under distinct keys are independent: concurrent writers to
/// different keys need no coordination.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Read a document, or `None` when the key holds nothing.
    async fn read<T: DeserializeOwned + Send>(&self, key: &[&str]) -> StorageResult<Option<T>>;

    /// Store a document, replacing whatever the key held.
    async fn write<T: Serialize + Send + Sync>(&self, key: &[&str], value: &T)
        -> StorageResult<()>;

    /// Store a document only if the key holds nothing yet.
    ///
    /// Of several concurrent callers for one key exactly one succeeds; the
    /// others get [`StorageError::AlreadyExists`].
    async fn create<T: Serialize + Send + Sync>(
        &self,
        key: &[&str],
        value: &T,
    ) -> StorageResult<()>;

    /// Sorted names of the sub-prefixes directly below `prefix`.
    ///
    /// Documents stored directly at `prefix` are not included.
    async fn children(&self, prefix: &[&str]) -> StorageResult<Vec<String>>;
}

//! In-memory storage for tests.

use crate::error::check_segment;
use crate::{Storage, StorageError, StorageResult};
use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Documents held in a map from key path to JSON value. Not persistent.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    docs: RwLock<BTreeMap<Vec<String>, serde_json::Value>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored documents.
    pub fn len(&self) -> usize {
        self.docs.read().map(|docs| docs.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn owned_key(key: &[&str]) -> StorageResult<Vec<String>> {
        if key.is_empty() {
            return Err(StorageError::invalid_key("", "empty key"));
        }
        key.iter()
            .map(|segment| check_segment(segment).map(|()| segment.to_string()))
            .collect()
    }

    fn docs(&self) -> StorageResult<RwLockReadGuard<'_, BTreeMap<Vec<String>, serde_json::Value>>> {
        self.docs
            .read()
            .map_err(|e| StorageError::LockPoisoned(e.to_string()))
    }

    fn docs_mut(
        &self,
    ) -> StorageResult<RwLockWriteGuard<'_, BTreeMap<Vec<String>, serde_json::Value>>> {
        self.docs
            .write()
            .map_err(|e| StorageError::LockPoisoned(e.to_string()))
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn read<T: DeserializeOwned + Send>(&self, key: &[&str]) -> StorageResult<Option<T>> {
        let key = Self::owned_key(key)?;
        let value = self.docs()?.get(&key).cloned();
        Ok(value.map(serde_json::from_value).transpose()?)
    }

    async fn write<T: Serialize + Send + Sync>(
        &self,
        key: &[&str],
        value: &T,
    ) -> StorageResult<()> {
        let owned = Self::owned_key(key)?;
        let value = serde_json::to_value(value)?;
        self.docs_mut()?.insert(owned, value);
        Ok(())
    }

    async fn create<T: Serialize + Send + Sync>(
        &self,
        key: &[&str],
        value: &T,
    ) -> StorageResult<()> {
        let owned = Self::owned_key(key)?;
        let value = serde_json::to_value(value)?;
        let mut docs = self.docs_mut()?;
        if docs.contains_key(&owned) {
            return Err(StorageError::already_exists(key));
        }
        docs.insert(owned, value);
        Ok(())
    }

    async fn children(&self, prefix: &[&str]) -> StorageResult<Vec<String>> {
        for segment in prefix {
            check_segment(segment)?;
        }
        let depth = prefix.len();
        let names: BTreeSet<String> = self
            .docs()?
            .keys()
            .filter(|key| {
                key.len() > depth + 1
                    && key.iter().zip(prefix).all(|(have, want)| have.as_str() == *want)
            })
            .map(|key| key[depth].clone())
            .collect();
        Ok(names.into_iter().collect())
    }
}

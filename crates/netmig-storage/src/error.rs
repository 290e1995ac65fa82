//! Storage error types.

use thiserror::Error;

pub type StorageResult<T> = Result<T, StorageError>;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("stored document is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// `create` found the key taken.
    #[error("key {0} is already taken")]
    AlreadyExists(String),

    #[error("invalid key segment '{segment}': {reason}")]
    InvalidKey {
        segment: String,
        reason: &'static str,
    },

    /// Another thread panicked while holding the lock.
    #[error("storage lock poisoned: {0}")]
    LockPoisoned(String),
}

impl StorageError {
    pub fn already_exists(key: &[&str]) -> Self {
        Self::AlreadyExists(key.join("/"))
    }

    pub fn invalid_key(segment: impl Into<String>, reason: &'static str) -> Self {
        Self::InvalidKey {
            segment: segment.into(),
            reason,
        }
    }
}

/// Reject segments that would escape or confuse a hierarchical layout.
pub(crate) fn check_segment(segment: &str) -> StorageResult<()> {
    let reason = if segment.is_empty() {
        "empty segment"
    } else if segment == "." || segment == ".." {
        "relative segment"
    } else if segment.contains(['/', '\\', '\0']) {
        "contains a path separator"
    } else {
        return Ok(());
    };
    Err(StorageError::invalid_key(segment, reason))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_already_exists_joins_key() {
        let err = StorageError::already_exists(&["dc1-cutover", "pre", "manifest"]);
        assert_eq!(err.to_string(), "key dc1-cutover/pre/manifest is already taken");
    }

    #[test]
    fn test_check_segment() {
        assert!(check_segment("show ip route").is_ok());
        assert!(check_segment("10.0.0.1").is_ok());
        assert!(check_segment("%2Fvar").is_ok());

        for (segment, reason) in [
            ("", "empty segment"),
            ("..", "relative segment"),
            ("a/b", "contains a path separator"),
            ("a\\b", "contains a path separator"),
        ] {
            let err = check_segment(segment).unwrap_err();
            assert!(
                matches!(err, StorageError::InvalidKey { reason: r, .. } if r == reason),
                "{segment:?}"
            );
        }
    }

    #[test]
    fn test_json_error_converts() {
        let json_err = serde_json::from_str::<String>("nope").unwrap_err();
        assert!(matches!(StorageError::from(json_err), StorageError::Json(_)));
    }
}

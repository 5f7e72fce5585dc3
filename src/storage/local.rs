//! Local filesystem store.
//!
//! ## Layout
//!
//! ```text
//! {root}/
//! ├── roster.sort_by_name.json
//! └── feed.history.json
//! ```
//!
//! Writes go to a temp file that is renamed over the target, so a crash
//! never leaves a half-written value behind.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::AsyncWriteExt;

use crate::error::{AppError, Result};
use crate::storage::KeyValueStore;

/// Filesystem-backed key-value store.
#[derive(Debug, Clone)]
pub struct LocalStore {
    root_dir: PathBuf,
}

impl LocalStore {
    /// Create a new LocalStore rooted at the given directory.
    pub fn new(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root_dir
    }

    /// File path for a key. Keys are restricted to a safe character set.
    fn path(&self, key: &str) -> Result<PathBuf> {
        let valid = !key.is_empty()
            && !key.starts_with('.')
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
        if !valid {
            return Err(AppError::validation(format!("invalid storage key '{key}'")));
        }
        Ok(self.root_dir.join(format!("{key}.json")))
    }

    /// Write bytes atomically (write to temp, then rename).
    async fn write_bytes(&self, path: &Path, bytes: &[u8]) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let tmp = path.with_extension("json.tmp");
        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(bytes).await?;
        file.flush().await?;
        drop(file);

        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }

    /// Read bytes, returning None if file doesn't exist.
    async fn read_bytes(&self, path: &Path) -> Result<Option<Vec<u8>>> {
        match tokio::fs::read(path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(AppError::Io(e)),
        }
    }
}

#[async_trait(?Send)]
impl KeyValueStore for LocalStore {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        let path = self.path(key)?;
        match self.read_bytes(&path).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: Value) -> Result<()> {
        let path = self.path(key)?;
        let bytes = serde_json::to_vec_pretty(&value)?;
        self.write_bytes(&path, &bytes).await?;
        log::debug!("Stored {} ({} bytes)", key, bytes.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_write_and_read() {
        let tmp = TempDir::new().unwrap();
        let store = LocalStore::new(tmp.path());

        store.set("feed.history", json!([{ "a": 1 }])).await.unwrap();
        let value = store.get("feed.history").await.unwrap();
        assert_eq!(value, Some(json!([{ "a": 1 }])));
        assert!(tmp.path().join("feed.history.json").exists());
        assert!(!tmp.path().join("feed.history.json.tmp").exists());
    }

    #[tokio::test]
    async fn test_read_nonexistent() {
        let tmp = TempDir::new().unwrap();
        let store = LocalStore::new(tmp.path());
        assert!(store.get("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_overwrite() {
        let tmp = TempDir::new().unwrap();
        let store = LocalStore::new(tmp.path().join("nested"));

        store.set("roster.sort_by_name", json!({ "online": true })).await.unwrap();
        store.set("roster.sort_by_name", json!({ "online": false })).await.unwrap();
        assert_eq!(
            store.get("roster.sort_by_name").await.unwrap(),
            Some(json!({ "online": false }))
        );
    }

    #[tokio::test]
    async fn test_rejects_path_keys() {
        let tmp = TempDir::new().unwrap();
        let store = LocalStore::new(tmp.path());
        assert!(store.set("../escape", json!(1)).await.is_err());
        assert!(store.get("a/b").await.is_err());
        assert!(store.get("").await.is_err());
    }

    #[tokio::test]
    async fn test_corrupt_file_is_error() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("broken.json"), b"{not json").unwrap();
        let store = LocalStore::new(tmp.path());
        assert!(store.get("broken").await.is_err());
    }
}

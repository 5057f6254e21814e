//! Directory-backed JSON document store.

use super::{validate_key, DocumentStore};
use crate::errors::StorageError;
use async_trait::async_trait;
use std::path::{Path, PathBuf};

/// A store that keeps one pretty-printed JSON file per record under
/// `<root>/<collection>/<key>.json`.
#[derive(Debug, Clone)]
pub struct JsonDirStore {
    root: PathBuf,
}

impl JsonDirStore {
    /// Creates a store rooted at the given directory.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Returns the store root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn record_path(&self, collection: &str, key: &str) -> PathBuf {
        self.root.join(collection).join(format!("{key}.json"))
    }
}

#[async_trait]
impl DocumentStore for JsonDirStore {
    async fn upsert(
        &self,
        collection: &str,
        key: &str,
        document: serde_json::Value,
    ) -> Result<(), StorageError> {
        validate_key(key)?;
        let dir = self.root.join(collection);
        tokio::fs::create_dir_all(&dir).await?;
        let body = serde_json::to_vec_pretty(&document)?;
        tokio::fs::write(self.record_path(collection, key), body).await?;
        Ok(())
    }

    async fn find_by_key(
        &self,
        collection: &str,
        key: &str,
    ) -> Result<Option<serde_json::Value>, StorageError> {
        validate_key(key)?;
        let path = self.record_path(collection, key);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    async fn list_keys(&self, collection: &str) -> Result<Vec<String>, StorageError> {
        let dir = self.root.join(collection);
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };

        let mut keys = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            if let Some(name) = name.to_str() {
                if let Some(stem) = name.strip_suffix(".json") {
                    keys.push(stem.to_string());
                }
            }
        }
        keys.sort();
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_round_trip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = JsonDirStore::new(dir.path());

        store
            .upsert("resumes", "HRC resume 10.pdf", serde_json::json!({"score": 8}))
            .await
            .expect("upsert");

        let doc = store
            .find_by_key("resumes", "HRC resume 10.pdf")
            .await
            .expect("find")
            .expect("present");
        assert_eq!(doc["score"], 8);

        let keys = store.list_keys("resumes").await.expect("list");
        assert_eq!(keys, vec!["HRC resume 10.pdf"]);
    }

    #[tokio::test]
    async fn test_missing_record_is_none() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = JsonDirStore::new(dir.path());
        assert!(store
            .find_by_key("resumes", "nope.pdf")
            .await
            .expect("find")
            .is_none());
    }

    #[tokio::test]
    async fn test_traversal_key_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = JsonDirStore::new(dir.path());
        let err = store
            .upsert("col", "../../etc/passwd", serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::InvalidKey(_)));
    }
}

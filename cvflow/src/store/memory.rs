//! In-memory document store.

use super::{validate_key, DocumentStore};
use crate::errors::StorageError;
use async_trait::async_trait;
use dashmap::DashMap;

/// A concurrent in-memory store.
///
/// Used as the embedding-cache backend and throughout the test suite; safe
/// for concurrent use across files if a caller parallelizes the batch.
#[derive(Debug, Default)]
pub struct MemoryStore {
    collections: DashMap<String, DashMap<String, serde_json::Value>>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of documents in a collection.
    #[must_use]
    pub fn len(&self, collection: &str) -> usize {
        self.collections
            .get(collection)
            .map_or(0, |c| c.len())
    }

    /// Returns true when the collection has no documents.
    #[must_use]
    pub fn is_empty(&self, collection: &str) -> bool {
        self.len(collection) == 0
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn upsert(
        &self,
        collection: &str,
        key: &str,
        document: serde_json::Value,
    ) -> Result<(), StorageError> {
        validate_key(key)?;
        self.collections
            .entry(collection.to_string())
            .or_default()
            .insert(key.to_string(), document);
        Ok(())
    }

    async fn find_by_key(
        &self,
        collection: &str,
        key: &str,
    ) -> Result<Option<serde_json::Value>, StorageError> {
        Ok(self
            .collections
            .get(collection)
            .and_then(|c| c.get(key).map(|v| v.value().clone())))
    }

    async fn list_keys(&self, collection: &str) -> Result<Vec<String>, StorageError> {
        let mut keys: Vec<String> = self
            .collections
            .get(collection)
            .map(|c| c.iter().map(|entry| entry.key().clone()).collect())
            .unwrap_or_default();
        keys.sort();
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_upsert_replaces() {
        let store = MemoryStore::new();
        store
            .upsert("resumes", "a.pdf", serde_json::json!({"v": 1}))
            .await
            .expect("upsert");
        store
            .upsert("resumes", "a.pdf", serde_json::json!({"v": 2}))
            .await
            .expect("upsert");

        let doc = store
            .find_by_key("resumes", "a.pdf")
            .await
            .expect("find")
            .expect("present");
        assert_eq!(doc["v"], 2);
        assert_eq!(store.len("resumes"), 1);
    }

    #[tokio::test]
    async fn test_list_keys_sorted() {
        let store = MemoryStore::new();
        for key in ["b", "a", "c"] {
            store
                .upsert("col", key, serde_json::json!({}))
                .await
                .expect("upsert");
        }
        let keys = store.list_keys("col").await.expect("list");
        assert_eq!(keys, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_missing_collection_is_empty() {
        let store = MemoryStore::new();
        assert!(store
            .find_by_key("none", "x")
            .await
            .expect("find")
            .is_none());
        assert!(store.list_keys("none").await.expect("list").is_empty());
    }

    #[tokio::test]
    async fn test_invalid_key_rejected() {
        let store = MemoryStore::new();
        let err = store
            .upsert("col", "../escape", serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::InvalidKey(_)));
    }
}

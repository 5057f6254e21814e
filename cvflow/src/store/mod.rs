//! The persistence collaborator contract.
//!
//! Drivers persist records through [`DocumentStore`] only: upsert a JSON
//! document under a collection/key pair, fetch it back, list a collection's
//! keys. Store instances are constructed by the caller and injected —
//! there is no ambient global client.

mod disk;
mod memory;

pub use disk::JsonDirStore;
pub use memory::MemoryStore;

use crate::errors::StorageError;
use async_trait::async_trait;

/// The persistent store capability.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Inserts or replaces the document stored under `(collection, key)`.
    async fn upsert(
        &self,
        collection: &str,
        key: &str,
        document: serde_json::Value,
    ) -> Result<(), StorageError>;

    /// Fetches the document stored under `(collection, key)`.
    async fn find_by_key(
        &self,
        collection: &str,
        key: &str,
    ) -> Result<Option<serde_json::Value>, StorageError>;

    /// Lists every key in a collection.
    async fn list_keys(&self, collection: &str) -> Result<Vec<String>, StorageError>;
}

/// Rejects keys that could escape a collection namespace.
pub(crate) fn validate_key(key: &str) -> Result<(), StorageError> {
    if key.is_empty()
        || key.contains('/')
        || key.contains('\\')
        || key == "."
        || key == ".."
    {
        return Err(StorageError::InvalidKey(key.to_string()));
    }
    Ok(())
}

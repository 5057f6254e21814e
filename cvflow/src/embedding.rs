//! Text embeddings and similarity.
//!
//! Embeddings are produced through the [`TextEmbedder`] collaborator and
//! cached in the document store keyed by a content hash, so repeated
//! similarity checks over the same text cost one transport call. Cache
//! failures degrade to recomputation, never to an error.

use crate::errors::TransportError;
use crate::store::DocumentStore;
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{debug, warn};

/// Collection holding cached embedding vectors.
pub const EMBEDDING_CACHE_COLLECTION: &str = "embedding_cache";

/// The task an embedding is generated for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbeddingTask {
    /// Indexing a document for retrieval.
    RetrievalDocument,
    /// Embedding a retrieval query.
    RetrievalQuery,
    /// Comparing two texts for similarity.
    SemanticSimilarity,
}

impl EmbeddingTask {
    /// The wire name of the task.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::RetrievalDocument => "RETRIEVAL_DOCUMENT",
            Self::RetrievalQuery => "RETRIEVAL_QUERY",
            Self::SemanticSimilarity => "SEMANTIC_SIMILARITY",
        }
    }
}

/// The embedding collaborator capability.
#[async_trait]
pub trait TextEmbedder: Send + Sync {
    /// The embedding model identifier (part of the cache key).
    fn model_name(&self) -> &str;

    /// Embeds one text for the given task.
    async fn embed(&self, text: &str, task: EmbeddingTask) -> Result<Vec<f32>, TransportError>;
}

/// Cosine similarity between two vectors.
///
/// Returns 0.0 for empty, mismatched, or zero-magnitude inputs.
#[must_use]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }
    let mut dot = 0.0_f64;
    let mut norm_a = 0.0_f64;
    let mut norm_b = 0.0_f64;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += f64::from(*x) * f64::from(*y);
        norm_a += f64::from(*x) * f64::from(*x);
        norm_b += f64::from(*y) * f64::from(*y);
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// Cache key for one text/task/model combination.
#[must_use]
pub fn cache_key(text: &str, task: EmbeddingTask, model: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hasher.update(b":");
    hasher.update(task.as_str().as_bytes());
    hasher.update(b":");
    hasher.update(model.as_bytes());
    hex::encode(hasher.finalize())
}

/// An embedder decorator that caches vectors in the document store.
pub struct CachingEmbedder<E> {
    inner: E,
    store: Arc<dyn DocumentStore>,
    collection: String,
}

impl<E: TextEmbedder> CachingEmbedder<E> {
    /// Wraps an embedder with a store-backed cache.
    #[must_use]
    pub fn new(inner: E, store: Arc<dyn DocumentStore>) -> Self {
        Self {
            inner,
            store,
            collection: EMBEDDING_CACHE_COLLECTION.to_string(),
        }
    }

    /// Overrides the cache collection name.
    #[must_use]
    pub fn with_collection(mut self, collection: impl Into<String>) -> Self {
        self.collection = collection.into();
        self
    }

    async fn lookup(&self, key: &str) -> Option<Vec<f32>> {
        match self.store.find_by_key(&self.collection, key).await {
            Ok(Some(doc)) => doc
                .get("embedding")
                .and_then(|v| v.as_array())
                .map(|values| {
                    values
                        .iter()
                        .filter_map(serde_json::Value::as_f64)
                        .map(|v| v as f32)
                        .collect()
                }),
            Ok(None) => None,
            Err(err) => {
                warn!(error = %err, "Embedding cache lookup failed, recomputing");
                None
            }
        }
    }

    async fn save(&self, key: &str, task: EmbeddingTask, vector: &[f32]) {
        let doc = serde_json::json!({
            "text_hash": key,
            "model_name": self.inner.model_name(),
            "task_type": task.as_str(),
            "embedding": vector,
            "created_at": chrono::Utc::now().to_rfc3339(),
        });
        if let Err(err) = self.store.upsert(&self.collection, key, doc).await {
            warn!(error = %err, "Failed to save embedding to cache");
        }
    }
}

#[async_trait]
impl<E: TextEmbedder> TextEmbedder for CachingEmbedder<E> {
    fn model_name(&self) -> &str {
        self.inner.model_name()
    }

    async fn embed(&self, text: &str, task: EmbeddingTask) -> Result<Vec<f32>, TransportError> {
        let key = cache_key(text, task, self.inner.model_name());
        if let Some(cached) = self.lookup(&key).await {
            debug!(key = &key[..16], "Embedding cache hit");
            return Ok(cached);
        }

        let vector = self.inner.embed(text, task).await?;
        self.save(&key, task, &vector).await;
        Ok(vector)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::testing::ScriptedEmbedder;

    #[test]
    fn test_cosine_similarity_identical() {
        let v = vec![0.5, 0.2, 0.8];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_cosine_similarity_orthogonal() {
        let a = vec![1.0, 0.0];
        let b = vec![0.0, 1.0];
        assert!(cosine_similarity(&a, &b).abs() < 1e-9);
    }

    #[test]
    fn test_cosine_similarity_degenerate_inputs() {
        assert!(cosine_similarity(&[], &[]).abs() < f64::EPSILON);
        assert!(cosine_similarity(&[1.0], &[1.0, 2.0]).abs() < f64::EPSILON);
        assert!(cosine_similarity(&[0.0, 0.0], &[1.0, 2.0]).abs() < f64::EPSILON);
    }

    #[test]
    fn test_cache_key_varies_by_task_and_model() {
        let a = cache_key("text", EmbeddingTask::SemanticSimilarity, "m1");
        let b = cache_key("text", EmbeddingTask::RetrievalDocument, "m1");
        let c = cache_key("text", EmbeddingTask::SemanticSimilarity, "m2");
        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
    }

    #[tokio::test]
    async fn test_second_embed_hits_cache() {
        let store = Arc::new(MemoryStore::new());
        let inner = ScriptedEmbedder::new();
        let caching = CachingEmbedder::new(inner, store.clone());

        let first = caching
            .embed("the summary", EmbeddingTask::SemanticSimilarity)
            .await
            .expect("embed");
        let second = caching
            .embed("the summary", EmbeddingTask::SemanticSimilarity)
            .await
            .expect("embed");

        assert_eq!(first, second);
        // The inner embedder ran exactly once; the second call was served
        // from the store.
        assert_eq!(caching.inner.embed_calls(), 1);
        assert_eq!(store.len(EMBEDDING_CACHE_COLLECTION), 1);
    }
}

//! Scripted collaborator doubles and fixtures for tests.
//!
//! These doubles queue canned replies and count calls; they carry no
//! network or filesystem behavior.

use crate::embedding::{EmbeddingTask, TextEmbedder};
use crate::errors::{TransportError, UploadError};
use crate::llm::{
    DocumentHandle, GenerationReply, GenerationRequest, LanguageModel,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Debug, Clone)]
enum ScriptedReply {
    Text(String),
    Blocked(String),
    TransportFailure,
}

/// A language-model double that replays a scripted sequence of replies.
///
/// When the script runs out, every further call answers with the default
/// reply (`{}` unless overridden), so multi-stage tests only script the
/// attempts they care about.
#[derive(Debug, Default)]
pub struct ScriptedModel {
    replies: Mutex<VecDeque<ScriptedReply>>,
    default_reply: Mutex<String>,
    requests: Mutex<Vec<GenerationRequest>>,
    generate_calls: AtomicUsize,
    upload_calls: AtomicUsize,
    released: Mutex<Vec<String>>,
    fail_uploads: bool,
}

impl ScriptedModel {
    /// Creates a double with an empty script.
    #[must_use]
    pub fn new() -> Self {
        Self {
            default_reply: Mutex::new("{}".to_string()),
            ..Self::default()
        }
    }

    /// Queues a text reply.
    #[must_use]
    pub fn with_text_reply(self, text: impl Into<String>) -> Self {
        self.replies
            .lock()
            .push_back(ScriptedReply::Text(text.into()));
        self
    }

    /// Queues a blocked (empty) reply with the given block reason.
    #[must_use]
    pub fn with_blocked_reply(self, reason: impl Into<String>) -> Self {
        self.replies
            .lock()
            .push_back(ScriptedReply::Blocked(reason.into()));
        self
    }

    /// Queues a transport failure.
    #[must_use]
    pub fn with_transport_failure(self) -> Self {
        self.replies.lock().push_back(ScriptedReply::TransportFailure);
        self
    }

    /// Sets the reply used once the script is exhausted.
    #[must_use]
    pub fn with_default_reply(self, text: impl Into<String>) -> Self {
        *self.default_reply.lock() = text.into();
        self
    }

    /// Makes every upload fail.
    #[must_use]
    pub fn with_failing_uploads(mut self) -> Self {
        self.fail_uploads = true;
        self
    }

    /// Number of generate calls seen.
    #[must_use]
    pub fn generate_calls(&self) -> usize {
        self.generate_calls.load(Ordering::SeqCst)
    }

    /// Number of upload calls seen.
    #[must_use]
    pub fn upload_calls(&self) -> usize {
        self.upload_calls.load(Ordering::SeqCst)
    }

    /// The most recent generation request.
    #[must_use]
    pub fn last_request(&self) -> Option<GenerationRequest> {
        self.requests.lock().last().cloned()
    }

    /// Every generation request seen, in order.
    #[must_use]
    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.requests.lock().clone()
    }

    /// Names of released handles, in release order.
    #[must_use]
    pub fn released(&self) -> Vec<String> {
        self.released.lock().clone()
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    async fn upload(&self, path: &Path) -> Result<DocumentHandle, UploadError> {
        self.upload_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_uploads {
            return Err(UploadError::Transport(TransportError::api(
                403,
                "upload rejected",
            )));
        }
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("document");
        Ok(DocumentHandle::new(
            format!("files/{name}"),
            format!("scripted://{name}"),
        ))
    }

    async fn generate(
        &self,
        request: GenerationRequest,
    ) -> Result<GenerationReply, TransportError> {
        self.generate_calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().push(request);

        let next = self.replies.lock().pop_front();
        match next {
            Some(ScriptedReply::Text(text)) => Ok(GenerationReply::with_text(text)),
            Some(ScriptedReply::Blocked(reason)) => {
                Ok(GenerationReply::blocked(Some(reason)))
            }
            Some(ScriptedReply::TransportFailure) => {
                Err(TransportError::api(503, "scripted transport failure"))
            }
            None => Ok(GenerationReply::with_text(self.default_reply.lock().clone())),
        }
    }

    async fn release(&self, handle: &DocumentHandle) -> Result<(), TransportError> {
        self.released.lock().push(handle.name.clone());
        Ok(())
    }
}

/// An embedder double replaying queued vectors.
///
/// When the queue is empty, the vector is derived deterministically from
/// the text, so identical texts embed identically (cosine 1.0).
#[derive(Debug, Default)]
pub struct ScriptedEmbedder {
    vectors: Mutex<VecDeque<Vec<f32>>>,
    embed_calls: AtomicUsize,
}

impl ScriptedEmbedder {
    /// Creates a double with an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a vector to return on the next embed call.
    #[must_use]
    pub fn with_vector(self, vector: Vec<f32>) -> Self {
        self.vectors.lock().push_back(vector);
        self
    }

    /// Number of embed calls seen.
    #[must_use]
    pub fn embed_calls(&self) -> usize {
        self.embed_calls.load(Ordering::SeqCst)
    }
}

fn derived_vector(text: &str) -> Vec<f32> {
    let mut vector = vec![0.0_f32; 8];
    for (i, byte) in text.bytes().enumerate() {
        vector[i % 8] += f32::from(byte) / 255.0;
    }
    vector
}

#[async_trait]
impl TextEmbedder for ScriptedEmbedder {
    fn model_name(&self) -> &str {
        "scripted-embedder"
    }

    async fn embed(&self, text: &str, _task: EmbeddingTask) -> Result<Vec<f32>, TransportError> {
        self.embed_calls.fetch_add(1, Ordering::SeqCst);
        let queued = self.vectors.lock().pop_front();
        Ok(queued.unwrap_or_else(|| derived_vector(text)))
    }
}

/// A standardized resume document in the shape the extraction stage emits.
#[must_use]
pub fn sample_resume() -> serde_json::Value {
    serde_json::json!({
        "resume_data": {
            "basics": {
                "name": "A. Candidate",
                "summary": "Operations professional with a decade of logistics experience."
            },
            "work_experience": [
                {
                    "company": "Northbridge Logistics",
                    "location": "Rotterdam",
                    "position": "Operations Lead",
                    "highlights": [
                        "Cut fulfilment latency by a third",
                        "Ran a team of twelve dispatchers"
                    ]
                },
                {
                    "company": "Harbor Freight Lines",
                    "location": "Hamburg",
                    "position": "Dispatcher",
                    "highlights": ["Scheduled 40 weekly routes"]
                }
            ],
            "education": [
                {"institution": "Erasmus University", "area": "Supply Chain"}
            ]
        }
    })
}

/// Company mappings in the shape the research stage emits.
#[must_use]
pub fn sample_company_mappings() -> serde_json::Value {
    serde_json::json!([
        {
            "Original_company": "Northbridge Logistics",
            "Similar companies": [
                {"Type_I": "Lakeside Logistics"},
                {"Type_II": "Crosstown Freight"},
                {"Type_III": "Beacon Supply Co"}
            ]
        },
        {
            "Original_company": "Harbor Freight Lines",
            "Similar companies": [
                {"Type_I": "Quayside Shipping"},
                {"Type_II": "Portside Carriers"},
                {"Type_III": "Anchor Freight"}
            ]
        }
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_model_replays_in_order() {
        let model = ScriptedModel::new()
            .with_text_reply("first")
            .with_blocked_reply("SAFETY");

        let one = model
            .generate(GenerationRequest::new("m", "p"))
            .await
            .expect("reply");
        assert_eq!(one.text.as_deref(), Some("first"));

        let two = model
            .generate(GenerationRequest::new("m", "p"))
            .await
            .expect("reply");
        assert!(two.text.is_none());

        // Script exhausted: default reply.
        let three = model
            .generate(GenerationRequest::new("m", "p"))
            .await
            .expect("reply");
        assert_eq!(three.text.as_deref(), Some("{}"));
        assert_eq!(model.generate_calls(), 3);
    }

    #[tokio::test]
    async fn test_derived_vectors_are_deterministic() {
        let embedder = ScriptedEmbedder::new();
        let a = embedder
            .embed("same text", EmbeddingTask::SemanticSimilarity)
            .await
            .expect("embed");
        let b = embedder
            .embed("same text", EmbeddingTask::SemanticSimilarity)
            .await
            .expect("embed");
        assert_eq!(a, b);
    }
}

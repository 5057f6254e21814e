//! The language-model collaborator contract.
//!
//! The pipeline core talks to the model through [`LanguageModel`] only:
//! upload a source document, generate text for a prompt, release the upload.
//! Replies are a plain tagged struct — presence of text, block reasons, and
//! usage are ordinary fields, never probed attributes.

mod gemini;

pub use gemini::GeminiClient;

use crate::errors::{TransportError, UploadError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Handle to a document uploaded to the model collaborator.
///
/// Shared read-only by every stage of one pipeline run; the batch driver
/// owns the upload/release lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentHandle {
    /// Collaborator-side resource name (used for release).
    pub name: String,
    /// URI referenced from generation requests.
    pub uri: String,
    /// MIME type, when known.
    pub mime_type: Option<String>,
}

impl DocumentHandle {
    /// Creates a new handle.
    #[must_use]
    pub fn new(name: impl Into<String>, uri: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            uri: uri.into(),
            mime_type: None,
        }
    }

    /// Sets the MIME type.
    #[must_use]
    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }
}

/// Tools a stage may enable on its model calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelTool {
    /// Server-side web search grounding.
    WebSearch,
}

/// Token accounting for one generation call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Tokens in the prompt.
    #[serde(default)]
    pub prompt_tokens: u32,
    /// Tokens spent on internal reasoning, when reported.
    #[serde(default)]
    pub thoughts_tokens: u32,
    /// Total tokens for the call.
    #[serde(default)]
    pub total_tokens: u32,
}

impl TokenUsage {
    /// Adds another usage record into this one.
    pub fn absorb(&mut self, other: &Self) {
        self.prompt_tokens += other.prompt_tokens;
        self.thoughts_tokens += other.thoughts_tokens;
        self.total_tokens += other.total_tokens;
    }
}

/// One generation request.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    /// The full prompt text.
    pub prompt: String,
    /// Optional uploaded document attached to the call.
    pub attachment: Option<DocumentHandle>,
    /// Sampling temperature.
    pub temperature: f32,
    /// Enabled tools.
    pub tools: Vec<ModelTool>,
    /// Model to invoke.
    pub model: String,
}

impl GenerationRequest {
    /// Creates a request for the given model and prompt.
    #[must_use]
    pub fn new(model: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            attachment: None,
            temperature: 0.4,
            tools: Vec::new(),
            model: model.into(),
        }
    }

    /// Attaches an uploaded document.
    #[must_use]
    pub fn with_attachment(mut self, handle: DocumentHandle) -> Self {
        self.attachment = Some(handle);
        self
    }

    /// Sets the sampling temperature.
    #[must_use]
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Enables a tool.
    #[must_use]
    pub fn with_tool(mut self, tool: ModelTool) -> Self {
        self.tools.push(tool);
        self
    }
}

/// The reply to one generation call.
///
/// A call that completed at the transport level may still carry no text
/// (safety block, empty candidate); that case is represented by `text:
/// None` with `block_reason` preserved for diagnostics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenerationReply {
    /// The generated text, absent when the model produced none.
    pub text: Option<String>,
    /// Why the prompt or response was blocked, when reported.
    pub block_reason: Option<String>,
    /// The concrete model version that answered.
    pub model_version: Option<String>,
    /// Token accounting.
    pub usage: TokenUsage,
}

impl GenerationReply {
    /// Creates a reply carrying text.
    #[must_use]
    pub fn with_text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Self::default()
        }
    }

    /// Creates an empty reply with an optional block reason.
    #[must_use]
    pub fn blocked(reason: Option<String>) -> Self {
        Self {
            text: None,
            block_reason: reason,
            ..Self::default()
        }
    }

    /// Returns true when the reply carries non-empty text.
    #[must_use]
    pub fn has_text(&self) -> bool {
        self.text.as_deref().is_some_and(|t| !t.trim().is_empty())
    }
}

/// The LLM collaborator capability.
///
/// Implementations must be safe for concurrent use; drivers hold them as
/// `Arc<dyn LanguageModel>`.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Uploads a source document, returning a shareable handle.
    async fn upload(&self, path: &Path) -> Result<DocumentHandle, UploadError>;

    /// Runs one generation call. No retry, no parsing.
    async fn generate(&self, request: GenerationRequest)
        -> Result<GenerationReply, TransportError>;

    /// Releases an uploaded document. Idempotent: releasing an
    /// already-released handle succeeds.
    async fn release(&self, handle: &DocumentHandle) -> Result<(), TransportError>;
}

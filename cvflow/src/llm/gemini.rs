//! Gemini REST transport.
//!
//! All Gemini API traffic goes through [`GeminiClient`]; no other module
//! touches the wire format. The client implements [`LanguageModel`] for
//! upload/generate/release and [`TextEmbedder`] for embedding calls.

use super::{
    DocumentHandle, GenerationReply, GenerationRequest, LanguageModel, ModelTool, TokenUsage,
};
use crate::embedding::{EmbeddingTask, TextEmbedder};
use crate::errors::{TransportError, UploadError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, warn};

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";
const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-004";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Client for the Gemini REST API.
#[derive(Debug, Clone)]
pub struct GeminiClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    embedding_model: String,
}

impl GeminiClient {
    /// Creates a client with an explicit API key.
    pub fn new(api_key: impl Into<String>) -> Result<Self, TransportError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            http,
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            embedding_model: DEFAULT_EMBEDDING_MODEL.to_string(),
        })
    }

    /// Creates a client from the `GEMINI_API_KEY` environment variable.
    pub fn from_env() -> Result<Self, TransportError> {
        let api_key = std::env::var("GEMINI_API_KEY").map_err(|_| {
            TransportError::Credentials("GEMINI_API_KEY not set in environment".to_string())
        })?;
        Self::new(api_key)
    }

    /// Overrides the API base URL (test servers).
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Overrides the embedding model.
    #[must_use]
    pub fn with_embedding_model(mut self, model: impl Into<String>) -> Self {
        self.embedding_model = model.into();
        self
    }

    async fn error_from_response(response: reqwest::Response) -> TransportError {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ApiErrorBody>(&body)
            .map(|e| e.error.message)
            .unwrap_or(body);
        TransportError::Api { status, message }
    }
}

fn guess_mime_type(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("pdf") => "application/pdf",
        Some("docx") => {
            "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
        }
        Some("txt") | Some("md") => "text/plain",
        _ => "application/octet-stream",
    }
}

#[async_trait]
impl LanguageModel for GeminiClient {
    async fn upload(&self, path: &Path) -> Result<DocumentHandle, UploadError> {
        let bytes = tokio::fs::read(path).await.map_err(|source| UploadError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mime_type = guess_mime_type(path);
        let display_name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("document")
            .to_string();

        // Resumable upload, step 1: request an upload session.
        let start = self
            .http
            .post(format!("{}/upload/v1beta/files", self.base_url))
            .header("x-goog-api-key", &self.api_key)
            .header("X-Goog-Upload-Protocol", "resumable")
            .header("X-Goog-Upload-Command", "start")
            .header("X-Goog-Upload-Header-Content-Length", bytes.len().to_string())
            .header("X-Goog-Upload-Header-Content-Type", mime_type)
            .json(&UploadStartBody {
                file: UploadStartFile { display_name },
            })
            .send()
            .await
            .map_err(TransportError::from)?;

        if !start.status().is_success() {
            return Err(Self::error_from_response(start).await.into());
        }
        let upload_url = start
            .headers()
            .get("x-goog-upload-url")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| {
                TransportError::InvalidResponse("upload session missing upload url".to_string())
            })?;

        // Step 2: send the bytes and finalize.
        let finish = self
            .http
            .post(upload_url)
            .header("X-Goog-Upload-Offset", "0")
            .header("X-Goog-Upload-Command", "upload, finalize")
            .body(bytes)
            .send()
            .await
            .map_err(TransportError::from)?;

        if !finish.status().is_success() {
            return Err(Self::error_from_response(finish).await.into());
        }
        let uploaded: UploadFinishBody = finish
            .json()
            .await
            .map_err(TransportError::from)?;

        debug!(file = %uploaded.file.name, "Uploaded document");
        Ok(DocumentHandle::new(uploaded.file.name, uploaded.file.uri)
            .with_mime_type(uploaded.file.mime_type.unwrap_or_else(|| mime_type.to_string())))
    }

    async fn generate(
        &self,
        request: GenerationRequest,
    ) -> Result<GenerationReply, TransportError> {
        let mut parts = vec![Part::text(request.prompt.clone())];
        if let Some(ref attachment) = request.attachment {
            parts.push(Part::file(
                attachment
                    .mime_type
                    .clone()
                    .unwrap_or_else(|| "application/pdf".to_string()),
                attachment.uri.clone(),
            ));
        }

        let tools: Vec<ToolBody> = request
            .tools
            .iter()
            .map(|tool| match tool {
                ModelTool::WebSearch => ToolBody {
                    google_search: serde_json::json!({}),
                },
            })
            .collect();

        let body = GenerateBody {
            contents: vec![Content { parts }],
            generation_config: GenerationConfig {
                temperature: request.temperature,
            },
            tools: if tools.is_empty() { None } else { Some(tools) },
        };

        let response = self
            .http
            .post(format!(
                "{}/v1beta/models/{}:generateContent",
                self.base_url, request.model
            ))
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::error_from_response(response).await);
        }

        let payload: GenerateResponse = response.json().await?;
        let text = payload
            .candidates
            .as_ref()
            .and_then(|c| c.first())
            .and_then(|c| c.content.as_ref())
            .and_then(|c| c.parts.as_ref())
            .map(|parts| {
                parts
                    .iter()
                    .filter_map(|p| p.text.as_deref())
                    .collect::<Vec<_>>()
                    .join("")
            })
            .filter(|t| !t.is_empty());

        let block_reason = payload
            .prompt_feedback
            .and_then(|f| f.block_reason)
            .or_else(|| {
                payload
                    .candidates
                    .as_ref()
                    .and_then(|c| c.first())
                    .and_then(|c| c.finish_reason.clone())
                    .filter(|reason| reason != "STOP")
            });

        if text.is_none() {
            warn!(?block_reason, "Generation returned no text");
        }

        let usage = payload.usage_metadata.map(|u| TokenUsage {
            prompt_tokens: u.prompt_token_count,
            thoughts_tokens: u.thoughts_token_count,
            total_tokens: u.total_token_count,
        });

        Ok(GenerationReply {
            text,
            block_reason,
            model_version: payload.model_version,
            usage: usage.unwrap_or_default(),
        })
    }

    async fn release(&self, handle: &DocumentHandle) -> Result<(), TransportError> {
        let response = self
            .http
            .delete(format!("{}/v1beta/{}", self.base_url, handle.name))
            .header("x-goog-api-key", &self.api_key)
            .send()
            .await?;

        // Releasing an already-released handle is a success.
        if response.status().is_success() || response.status().as_u16() == 404 {
            debug!(file = %handle.name, "Released document");
            return Ok(());
        }
        Err(Self::error_from_response(response).await)
    }
}

#[async_trait]
impl TextEmbedder for GeminiClient {
    fn model_name(&self) -> &str {
        &self.embedding_model
    }

    async fn embed(&self, text: &str, task: EmbeddingTask) -> Result<Vec<f32>, TransportError> {
        let body = EmbedBody {
            content: Content {
                parts: vec![Part::text(text.to_string())],
            },
            task_type: task.as_str(),
        };

        let response = self
            .http
            .post(format!(
                "{}/v1beta/models/{}:embedContent",
                self.base_url, self.embedding_model
            ))
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::error_from_response(response).await);
        }

        let payload: EmbedResponse = response.json().await?;
        Ok(payload.embedding.values)
    }
}

#[derive(Debug, Serialize)]
struct UploadStartBody {
    file: UploadStartFile,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct UploadStartFile {
    display_name: String,
}

#[derive(Debug, Deserialize)]
struct UploadFinishBody {
    file: UploadedFile,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UploadedFile {
    name: String,
    uri: String,
    mime_type: Option<String>,
}

#[derive(Debug, Serialize)]
struct GenerateBody {
    contents: Vec<Content>,
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<ToolBody>>,
}

#[derive(Debug, Serialize)]
struct Content {
    parts: Vec<Part>,
}

#[derive(Debug, Serialize)]
struct Part {
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(rename = "fileData", skip_serializing_if = "Option::is_none")]
    file_data: Option<FileData>,
}

impl Part {
    fn text(text: String) -> Self {
        Self {
            text: Some(text),
            file_data: None,
        }
    }

    fn file(mime_type: String, file_uri: String) -> Self {
        Self {
            text: None,
            file_data: Some(FileData {
                mime_type,
                file_uri,
            }),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct FileData {
    mime_type: String,
    file_uri: String,
}

#[derive(Debug, Serialize)]
struct GenerationConfig {
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ToolBody {
    google_search: serde_json::Value,
}

#[derive(Debug, Serialize)]
struct EmbedBody {
    content: Content,
    #[serde(rename = "taskType")]
    task_type: &'static str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    candidates: Option<Vec<Candidate>>,
    prompt_feedback: Option<PromptFeedback>,
    usage_metadata: Option<UsageMetadata>,
    model_version: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<CandidateContent>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    parts: Option<Vec<CandidatePart>>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct UsageMetadata {
    prompt_token_count: u32,
    thoughts_token_count: u32,
    total_token_count: u32,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embedding: EmbeddingValues,
}

#[derive(Debug, Deserialize)]
struct EmbeddingValues {
    values: Vec<f32>,
}

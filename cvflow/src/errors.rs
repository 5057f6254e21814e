//! Error types for the cvflow pipeline.
//!
//! Per-stage LLM failures are never represented here: unusable model output
//! is a [`Classification`](crate::parse::Classification), not an error.
//! These types cover the hard failures that escape the retry loops —
//! transport, upload, storage, conversion, and templating.

use std::path::PathBuf;
use thiserror::Error;

/// Failure of a single LLM transport call.
///
/// Covers network, auth, rate-limit, and malformed-payload failures from the
/// model collaborator. Distinct from `Malformed`/`Empty` outcomes, which are
/// successful calls with unusable content.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The HTTP request itself failed (connect, timeout, TLS).
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The API answered with a non-success status.
    #[error("API error (status {status}): {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Error message from the response body.
        message: String,
    },

    /// No usable credentials were available.
    #[error("Missing credentials: {0}")]
    Credentials(String),

    /// The response body did not have the expected shape.
    #[error("Invalid response payload: {0}")]
    InvalidResponse(String),
}

impl TransportError {
    /// Creates an API error.
    #[must_use]
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
        }
    }

    /// Returns true if the failure is a rate-limit or server-side error.
    #[must_use]
    pub fn is_throttle(&self) -> bool {
        matches!(self, Self::Api { status, .. } if *status == 429 || *status >= 500)
    }
}

/// Failure to upload a source document to the model collaborator.
///
/// Not retried by the pipeline core; the batch driver decides file-level
/// fallback (skip-and-log).
#[derive(Debug, Error)]
pub enum UploadError {
    /// The file does not exist or cannot be read.
    #[error("Cannot read file {}: {source}", path.display())]
    Io {
        /// Path of the file that failed.
        path: PathBuf,
        /// Underlying IO error.
        source: std::io::Error,
    },

    /// The upload call failed at the transport level.
    #[error("Upload transport failure: {0}")]
    Transport(#[from] TransportError),
}

/// Failure of the persistence collaborator.
#[derive(Debug, Error)]
pub enum StorageError {
    /// IO error while reading or writing a record.
    #[error("Storage IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A record could not be serialized or deserialized.
    #[error("Storage serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A record key contained path separators or other invalid characters.
    #[error("Invalid record key: {0}")]
    InvalidKey(String),

    /// Backend-specific failure.
    #[error("Storage backend error: {0}")]
    Backend(String),
}

/// Failure of the document conversion step (docx to pdf).
#[derive(Debug, Error)]
pub enum ConvertError {
    /// IO error while moving or inspecting files.
    #[error("Conversion IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The external conversion tool failed.
    #[error("Converter exited with {status}: {stderr}")]
    Tool {
        /// Exit status description.
        status: String,
        /// Captured stderr.
        stderr: String,
    },

    /// The input extension is not convertible.
    #[error("Unsupported input format: {extension}")]
    Unsupported {
        /// The offending extension.
        extension: String,
    },

    /// The converter reported success but produced no output file.
    #[error("Converter produced no output for {}", path.display())]
    MissingOutput {
        /// The expected output path.
        path: PathBuf,
    },
}

/// Failure while loading or rendering a prompt template.
#[derive(Debug, Error)]
pub enum TemplateError {
    /// The template file could not be read.
    #[error("Cannot read template {}: {source}", path.display())]
    Io {
        /// Path of the template file.
        path: PathBuf,
        /// Underlying IO error.
        source: std::io::Error,
    },

    /// A declared placeholder was not supplied in the render mapping.
    #[error("Missing value for placeholder '{name}'")]
    MissingPlaceholder {
        /// The placeholder name.
        name: String,
    },
}

/// Failures specific to the treatment-generation workflow.
#[derive(Debug, Error)]
pub enum TreatmentError {
    /// The catalog has too few treatments of a kind for the sector.
    #[error("Not enough {kind} treatments for sampling: need {needed}, have {available}")]
    NotEnoughTreatments {
        /// Treatment kind (education or work).
        kind: String,
        /// How many were required.
        needed: usize,
        /// How many were available.
        available: usize,
    },

    /// Fewer style modifiers than treated variants.
    #[error("Not enough style modifiers: need {needed}, have {available}")]
    NotEnoughStyles {
        /// How many were required.
        needed: usize,
        /// How many were available.
        available: usize,
    },

    /// The source record lacks a usable `resume_data` object.
    #[error("No resume data found for '{file_id}'")]
    MissingResumeData {
        /// Source record key.
        file_id: String,
    },

    /// Control refinement never produced a usable resume.
    #[error("Control refinement failed for '{file_id}'")]
    RefinementFailed {
        /// Source record key.
        file_id: String,
    },

    /// Company research never produced usable mappings.
    #[error("Company research failed for '{file_id}'")]
    ResearchFailed {
        /// Source record key.
        file_id: String,
    },

    /// A variant never reached the similarity threshold within its budget.
    #[error("Similarity budget exhausted for '{file_id}' variant {variant} (last score {last_score})")]
    SimilarityExhausted {
        /// Source record key.
        file_id: String,
        /// Variant label.
        variant: String,
        /// Best score observed on the final attempt.
        last_score: f64,
    },

    /// Company-mapping generation was vetoed by the review hook.
    #[error("Company mapping aborted for '{file_id}'")]
    MappingAborted {
        /// Source record key.
        file_id: String,
    },

    /// Template rendering failed.
    #[error("{0}")]
    Template(#[from] TemplateError),

    /// Persistence failed.
    #[error("{0}")]
    Storage(#[from] StorageError),

    /// Embedding transport failed.
    #[error("{0}")]
    Transport(#[from] TransportError),
}

/// Failure while loading configuration or catalog files.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("Cannot read {}: {source}", path.display())]
    Io {
        /// Path of the offending file.
        path: PathBuf,
        /// Underlying IO error.
        source: std::io::Error,
    },

    /// The file contents did not parse.
    #[error("Cannot parse configuration: {0}")]
    Parse(#[from] serde_json::Error),
}

/// The aggregating error type for driver-level operations.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Upload failure.
    #[error("{0}")]
    Upload(#[from] UploadError),

    /// Storage failure.
    #[error("{0}")]
    Storage(#[from] StorageError),

    /// Conversion failure.
    #[error("{0}")]
    Convert(#[from] ConvertError),

    /// Template failure.
    #[error("{0}")]
    Template(#[from] TemplateError),

    /// Transport failure outside any retry loop.
    #[error("{0}")]
    Transport(#[from] TransportError),

    /// Treatment workflow failure.
    #[error("{0}")]
    Treatment(#[from] TreatmentError),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_error_throttle_detection() {
        assert!(TransportError::api(429, "rate limited").is_throttle());
        assert!(TransportError::api(503, "overloaded").is_throttle());
        assert!(!TransportError::api(400, "bad request").is_throttle());
        assert!(!TransportError::Credentials("no key".to_string()).is_throttle());
    }

    #[test]
    fn test_upload_error_wraps_transport() {
        let err: UploadError = TransportError::api(401, "unauthorized").into();
        assert!(err.to_string().contains("401"));
    }

    #[test]
    fn test_template_error_names_placeholder() {
        let err = TemplateError::MissingPlaceholder {
            name: "style_guide".to_string(),
        };
        assert!(err.to_string().contains("style_guide"));
    }

    #[test]
    fn test_pipeline_error_aggregation() {
        let err: PipelineError = StorageError::InvalidKey("a/b".to_string()).into();
        assert!(matches!(err, PipelineError::Storage(_)));
    }
}

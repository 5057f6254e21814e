//! # cvflow
//!
//! A multi-agent LLM pipeline for resume documents: structured extraction,
//! secondary analysis, and validation with bounded per-stage retries and
//! score-gated whole-pipeline re-runs, plus a treatment-generation workflow
//! producing synthetic resume variants for a correspondence study.
//!
//! External collaborators — the language model, the document store, format
//! conversion, and embeddings — are traits injected at construction time;
//! the orchestration core never touches a vendor API directly.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use cvflow::prelude::*;
//! use std::sync::Arc;
//!
//! let model = Arc::new(GeminiClient::from_env()?);
//! let store = Arc::new(JsonDirStore::new("data/store"));
//! let templates = StageTemplates::load_from_dir("prompts")?;
//!
//! let driver = BatchDriver::new(
//!     model,
//!     store,
//!     Arc::new(SofficeConverter::new()),
//!     templates,
//!     BatchConfig::default(),
//! );
//! let summary = driver.run().await?;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod batch;
pub mod config;
pub mod embedding;
pub mod errors;
pub mod llm;
pub mod observability;
pub mod parse;
pub mod pipeline;
pub mod stages;
pub mod store;
pub mod template;
pub mod testing;
pub mod treatment;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::batch::{
        BatchDriver, BatchSummary, DocumentConverter, FileFailure, PdfPassthrough,
        SofficeConverter,
    };
    pub use crate::config::{BatchConfig, PipelineSettings, TreatmentConfig};
    pub use crate::embedding::{
        cosine_similarity, CachingEmbedder, EmbeddingTask, TextEmbedder,
    };
    pub use crate::errors::{
        ConfigError, ConvertError, PipelineError, StorageError, TemplateError,
        TransportError, TreatmentError, UploadError,
    };
    pub use crate::llm::{
        DocumentHandle, GeminiClient, GenerationReply, GenerationRequest, LanguageModel,
        ModelTool, TokenUsage,
    };
    pub use crate::observability::init_tracing;
    pub use crate::parse::{parse_response, Classification, ParsedResponse};
    pub use crate::pipeline::{
        PipelineOutcome, PipelineRun, ReRunController, ReRunPolicy, RunRecord, StageSpec,
        StageTemplates,
    };
    pub use crate::stages::{AgentStage, RetryingStage, StageConfig, StageOutcome, StageResult};
    pub use crate::store::{DocumentStore, JsonDirStore, MemoryStore};
    pub use crate::template::PromptTemplate;
    pub use crate::treatment::{
        AcceptAll, MappingDecision, MappingReview, TreatmentCatalog, TreatmentGenerator,
        TreatmentSummary, TreatmentTemplates, TreatmentType,
    };
}

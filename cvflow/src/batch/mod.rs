//! The extraction batch driver.
//!
//! Drives one [`ReRunController`] execution per input file, persists the
//! aggregated record, and archives the file once the run reaches a terminal
//! state. Per-stage failures never abort a file — a record is produced even
//! when every stage failed — while upload and conversion failures skip the
//! file with a logged reason.

mod convert;

pub use convert::{DocumentConverter, PdfPassthrough, SofficeConverter};

use crate::config::BatchConfig;
use crate::errors::PipelineError;
use crate::llm::{LanguageModel, TokenUsage};
use crate::observability::RunTimer;
use crate::pipeline::{PipelineRun, ReRunController, RunRecord, StageTemplates};
use crate::store::DocumentStore;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};

/// One skipped or failed file in a batch summary.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct FileFailure {
    /// The file name.
    pub file: String,
    /// Why it failed.
    pub reason: String,
}

/// Result of one batch execution.
#[derive(Debug, Clone)]
pub struct BatchSummary {
    /// Identity of this batch run.
    pub run_id: uuid::Uuid,
    /// When the batch started.
    pub started_at: chrono::DateTime<chrono::Utc>,
    /// When the batch finished.
    pub finished_at: chrono::DateTime<chrono::Utc>,
    /// Files processed to a terminal state and archived.
    pub processed: Vec<String>,
    /// Files skipped or failed, with reasons.
    pub failed: Vec<FileFailure>,
}

/// Moves `src` to `dst`, suffixing a timestamp when `dst` already exists.
///
/// Returns the final destination path.
pub async fn safe_move(src: &Path, dst: &Path) -> Result<PathBuf, std::io::Error> {
    let mut target = dst.to_path_buf();
    if tokio::fs::try_exists(&target).await? {
        let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
        let stem = dst
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("file");
        let suffix = dst
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| format!(".{e}"))
            .unwrap_or_default();
        target = dst.with_file_name(format!("{stem}_{stamp}{suffix}"));
    }

    match tokio::fs::rename(src, &target).await {
        Ok(()) => Ok(target),
        // Cross-device moves fall back to copy + remove.
        Err(_) => {
            tokio::fs::copy(src, &target).await?;
            tokio::fs::remove_file(src).await?;
            Ok(target)
        }
    }
}

/// Derives the industry prefix from a file name (its first token).
#[must_use]
pub fn industry_prefix(file_name: &str) -> &str {
    file_name.split_whitespace().next().unwrap_or(file_name)
}

/// The batch driver.
pub struct BatchDriver {
    model: Arc<dyn LanguageModel>,
    store: Arc<dyn DocumentStore>,
    converter: Arc<dyn DocumentConverter>,
    templates: StageTemplates,
    config: BatchConfig,
}

impl std::fmt::Debug for BatchDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchDriver")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl BatchDriver {
    /// Creates a driver over injected collaborators.
    #[must_use]
    pub fn new(
        model: Arc<dyn LanguageModel>,
        store: Arc<dyn DocumentStore>,
        converter: Arc<dyn DocumentConverter>,
        templates: StageTemplates,
        config: BatchConfig,
    ) -> Self {
        Self {
            model,
            store,
            converter,
            templates,
            config,
        }
    }

    /// Processes every file in the input directory.
    ///
    /// Files are handled strictly one at a time; a failure on one file is
    /// recorded and the batch moves on.
    pub async fn run(&self) -> Result<BatchSummary, PipelineError> {
        let run_id = uuid::Uuid::new_v4();
        let started_at = chrono::Utc::now();
        info!(%run_id, input = %self.config.input_dir.display(), "Starting batch");

        let mut files = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.config.input_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_file() {
                files.push(entry.path());
            }
        }
        files.sort();

        let mut processed = Vec::new();
        let mut failed = Vec::new();
        for path in files {
            let file_name = path
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or("unknown")
                .to_string();
            let timer = RunTimer::start();
            match self.process_file(&path).await {
                Ok(file_id) => {
                    info!(file = %file_id, elapsed_ms = timer.elapsed_ms(), "File processed");
                    processed.push(file_id);
                }
                Err(err) => {
                    error!(file = %file_name, error = %err, "File failed");
                    failed.push(FileFailure {
                        file: file_name,
                        reason: err.to_string(),
                    });
                }
            }
        }

        Ok(BatchSummary {
            run_id,
            started_at,
            finished_at: chrono::Utc::now(),
            processed,
            failed,
        })
    }

    /// Processes a single file to a terminal state.
    pub async fn process_file(&self, path: &Path) -> Result<String, PipelineError> {
        let mut path = path.to_path_buf();

        let is_docx = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("docx") || e.eq_ignore_ascii_case("doc"));
        if is_docx {
            let archive_dir = self.config.input_dir.join(&self.config.archive_dir_name);
            path = self
                .converter
                .convert_to_pdf(&path, Some(&archive_dir))
                .await?;
        }

        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("unknown")
            .to_string();
        let bytes = tokio::fs::read(&path).await?;
        let file_hash = hex::encode(Sha256::digest(&bytes));

        // The upload is shared read-only by every stage of this file's
        // pipeline and released exactly once after the controller terminates.
        let handle = self.model.upload(&path).await?;

        let pipeline = PipelineRun::standard(
            self.model.clone(),
            self.templates.clone(),
            self.config.pipeline.extraction.clone(),
            self.config.pipeline.analysis.clone(),
            self.config.pipeline.validation.clone(),
            self.config.pipeline.max_retries,
        );
        let controller = ReRunController::new(pipeline, self.config.pipeline.rerun);
        let record = controller.run(Some(&handle)).await;

        let document = build_record(&file_name, bytes.len(), &file_hash, &record);
        let storage_result = self
            .store
            .upsert(&self.config.collection, &file_name, document)
            .await;
        if let Err(ref err) = storage_result {
            error!(file = %file_name, error = %err, "Persistence failed, dumping raw outputs");
            self.dump_raw_outputs(&file_name, &record).await;
        }

        if let Err(err) = self.model.release(&handle).await {
            warn!(file = %file_name, error = %err, "Failed to release uploaded document");
        }

        tokio::fs::create_dir_all(&self.config.processed_dir).await?;
        let archived = safe_move(&path, &self.config.processed_dir.join(&file_name)).await?;
        info!(file = %file_name, archived = %archived.display(), "File archived");

        storage_result?;
        Ok(file_name)
    }

    /// Writes each stage's raw text to the raw-failure directory so an
    /// operator can inspect output that could not be persisted.
    async fn dump_raw_outputs(&self, file_name: &str, record: &RunRecord) {
        if let Err(err) = tokio::fs::create_dir_all(&self.config.raw_failure_dir).await {
            error!(error = %err, "Cannot create raw-failure directory");
            return;
        }
        for stage in &record.final_outcome().stages {
            let dump_path = self
                .config
                .raw_failure_dir
                .join(format!("{file_name}_{}_raw.txt", stage.stage));
            if let Err(err) = tokio::fs::write(&dump_path, &stage.outcome.raw_text).await {
                error!(path = %dump_path.display(), error = %err, "Cannot dump raw output");
            }
        }
    }
}

/// Builds the persisted record for one file from its run record.
#[must_use]
pub fn build_record(
    file_name: &str,
    file_size_bytes: usize,
    file_hash: &str,
    record: &RunRecord,
) -> serde_json::Value {
    let final_outcome = record.final_outcome();

    let mut usage_total = TokenUsage::default();
    let mut usage_by_stage = serde_json::Map::new();
    let mut retries_by_stage = serde_json::Map::new();
    let mut model_names = std::collections::BTreeSet::new();
    let mut stage_payloads = serde_json::Map::new();

    for stage in &final_outcome.stages {
        usage_total.absorb(&stage.outcome.usage);
        usage_by_stage.insert(stage.stage.clone(), serde_json::json!(stage.outcome.usage));
        retries_by_stage.insert(stage.stage.clone(), serde_json::json!(stage.retries_used));
        if let Some(ref version) = stage.outcome.model_version {
            model_names.insert(version.clone());
        }
        stage_payloads.insert(stage.stage.clone(), stage.record_value());
    }

    let mut document = serde_json::Map::new();
    document.insert("file_id".to_string(), serde_json::json!(file_name));
    document.insert(
        "industry_prefix".to_string(),
        serde_json::json!(industry_prefix(file_name)),
    );
    document.insert(
        "file_size_bytes".to_string(),
        serde_json::json!(file_size_bytes),
    );
    document.insert("file_hash".to_string(), serde_json::json!(file_hash));
    document.insert(
        "model_names".to_string(),
        serde_json::json!(model_names.into_iter().collect::<Vec<_>>()),
    );
    document.insert(
        "num_agents".to_string(),
        serde_json::json!(final_outcome.stages.len()),
    );
    document.insert(
        "usage_tokens".to_string(),
        serde_json::json!({
            "prompt_token_count": usage_total.prompt_tokens,
            "thoughts_token_count": usage_total.thoughts_tokens,
            "total_token_count": usage_total.total_tokens,
            "usage_by_agent": usage_by_stage,
        }),
    );
    document.insert(
        "rerun_count".to_string(),
        serde_json::json!(record.rerun_count),
    );
    document.insert(
        "retries_by_stage".to_string(),
        serde_json::Value::Object(retries_by_stage),
    );
    document.insert(
        "validation_score".to_string(),
        serde_json::json!(final_outcome.quality_score),
    );
    document.insert(
        "timestamp".to_string(),
        serde_json::json!(chrono::Utc::now().to_rfc3339()),
    );
    for (stage, payload) in stage_payloads {
        document.insert(stage, payload);
    }

    serde_json::Value::Object(document)
}

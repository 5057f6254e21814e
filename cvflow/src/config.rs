//! Configuration for the batch and treatment drivers.
//!
//! Defaults mirror the study's operating values: two retries per stage, two
//! re-runs per file at a validation threshold of 7, and a focused-similarity
//! threshold of 0.60 for treatment variants. All collaborator instances are
//! constructed by the caller and injected; configuration carries data only.

use crate::errors::ConfigError;
use crate::pipeline::ReRunPolicy;
use crate::stages::StageConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(serde_json::from_str(&text)?)
}

/// Settings shared by every pipeline execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    /// Per-stage retry cap.
    pub max_retries: u32,
    /// Whole-pipeline re-run policy.
    pub rerun: ReRunPolicy,
    /// Extraction stage parameters.
    pub extraction: StageConfig,
    /// Analysis stage parameters.
    pub analysis: StageConfig,
    /// Validation stage parameters.
    pub validation: StageConfig,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            max_retries: 2,
            rerun: ReRunPolicy::default(),
            // Extraction may ground itself with web search; validation runs
            // on the stronger model.
            extraction: StageConfig::default().with_web_search(),
            analysis: StageConfig::default(),
            validation: StageConfig::default().with_model("gemini-2.5-pro"),
        }
    }
}

/// Configuration of the extraction batch driver.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Directory scanned for input resumes.
    pub input_dir: PathBuf,
    /// Directory processed files are moved into.
    pub processed_dir: PathBuf,
    /// Directory for raw model output dumped on persistence failure.
    pub raw_failure_dir: PathBuf,
    /// Subdirectory of `input_dir` where pre-conversion originals go.
    pub archive_dir_name: String,
    /// Store collection receiving one record per file.
    pub collection: String,
    /// Directory holding the stage prompt templates.
    pub prompt_dir: PathBuf,
    /// Pipeline settings.
    pub pipeline: PipelineSettings,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            input_dir: PathBuf::from("resume_inputs"),
            processed_dir: PathBuf::from("data/processed_resumes"),
            raw_failure_dir: PathBuf::from("data/raw_failed_responses"),
            archive_dir_name: "base_docx_pre-conversion".to_string(),
            collection: "standardized_resume_data".to_string(),
            prompt_dir: PathBuf::from("prompts"),
            pipeline: PipelineSettings::default(),
        }
    }
}

impl BatchConfig {
    /// Loads a batch configuration from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        read_json(path.as_ref())
    }
}

/// Configuration of the treatment-generation driver.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TreatmentConfig {
    /// Industry prefix selecting the files to treat (matched against keys).
    pub sector: String,
    /// Collection holding standardized source resumes.
    pub source_collection: String,
    /// Collection receiving treated resume documents.
    pub target_collection: String,
    /// Minimum focused similarity between control and treated rephrasings.
    pub similarity_threshold: f64,
    /// Attempt cap per variant (generation + similarity gate combined).
    pub max_retries: u32,
    /// Variant generation stage parameters.
    pub generation: StageConfig,
    /// Company research stage parameters.
    pub research: StageConfig,
    /// Control refinement stage parameters.
    pub refiner: StageConfig,
    /// Rephrasing style instructions; three are drawn per file.
    pub style_modifiers: Vec<String>,
}

impl Default for TreatmentConfig {
    fn default() -> Self {
        Self {
            sector: String::new(),
            source_collection: "standardized_resume_data".to_string(),
            target_collection: "treated_resumes".to_string(),
            similarity_threshold: 0.60,
            max_retries: 2,
            generation: StageConfig::default().with_temperature(0.6),
            research: StageConfig::default().with_temperature(0.6).with_web_search(),
            refiner: StageConfig::default().with_temperature(0.6),
            style_modifiers: default_style_modifiers(),
        }
    }
}

impl TreatmentConfig {
    /// Creates a configuration for one sector, upper-cased like the store
    /// keys it is matched against.
    #[must_use]
    pub fn for_sector(sector: impl AsRef<str>) -> Self {
        Self {
            sector: sector.as_ref().trim().to_uppercase(),
            ..Self::default()
        }
    }

    /// Loads a treatment configuration from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        read_json(path.as_ref())
    }
}

/// The default rephrasing style instructions.
#[must_use]
pub fn default_style_modifiers() -> Vec<String> {
    [
        "using strong, action-oriented verbs and focusing on quantifiable outcomes",
        "using a direct, concise, and professional tone, prioritizing clarity and brevity",
        "by emphasizing collaborative efforts and cross-functional teamwork",
        "by describing the technical aspects of the work with more precision and detail",
        "by framing the accomplishments as a narrative of challenges, actions, and results",
    ]
    .into_iter()
    .map(str::to_string)
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pipeline_settings_defaults() {
        let settings = PipelineSettings::default();
        assert_eq!(settings.max_retries, 2);
        assert_eq!(settings.rerun.max_reruns, 2);
        assert!((settings.rerun.score_threshold - 7.0).abs() < f64::EPSILON);
        assert!(settings.extraction.web_search);
        assert_eq!(settings.validation.model, "gemini-2.5-pro");
    }

    #[test]
    fn test_treatment_config_for_sector_normalizes() {
        let config = TreatmentConfig::for_sector(" itc ");
        assert_eq!(config.sector, "ITC");
        assert_eq!(config.style_modifiers.len(), 5);
        assert!((config.similarity_threshold - 0.60).abs() < f64::EPSILON);
    }

    #[test]
    fn test_batch_config_round_trips_through_json() {
        let config = BatchConfig::default();
        let json = serde_json::to_string(&config).expect("serialize");
        let back: BatchConfig = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back.collection, config.collection);
        assert_eq!(back.pipeline.max_retries, config.pipeline.max_retries);
    }

    #[test]
    fn test_partial_json_falls_back_to_defaults() {
        let config: BatchConfig =
            serde_json::from_str("{\"collection\": \"custom\"}").expect("deserialize");
        assert_eq!(config.collection, "custom");
        assert_eq!(config.archive_dir_name, "base_docx_pre-conversion");
    }
}

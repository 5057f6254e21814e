//! The document pipeline: an ordered sequence of retrying agent stages.
//!
//! One [`PipelineRun`] executes its stages strictly in order, threading
//! every earlier stage's raw text into the next stage's prompt. A broken
//! upstream stage still propagates its (possibly empty) text downstream —
//! fault propagation, not fault masking — and the validation score on the
//! final stage gates whole-pipeline re-runs.

mod rerun;

pub use rerun::{ReRunController, ReRunPolicy, RunRecord};

use crate::llm::{DocumentHandle, LanguageModel};
use crate::stages::{AgentStage, RetryingStage, StageConfig, StageResult};
use crate::template::PromptTemplate;
use std::sync::Arc;
use tracing::info;

/// Name of the extraction stage in the standard pipeline.
pub const EXTRACTION_STAGE: &str = "extraction";
/// Name of the secondary-analysis stage in the standard pipeline.
pub const ANALYSIS_STAGE: &str = "analysis";
/// Name of the validation stage in the standard pipeline.
pub const VALIDATION_STAGE: &str = "validation";

/// Configuration of one pipeline stage: its prompt, how its output is
/// labeled when fed to later stages, and its model parameters.
#[derive(Debug, Clone)]
pub struct StageSpec {
    /// Stage name.
    pub name: String,
    /// The stage's prompt template.
    pub template: PromptTemplate,
    /// Label prefixed to this stage's raw text when later stages consume it.
    pub feed_label: String,
    /// Model parameters.
    pub config: StageConfig,
}

impl StageSpec {
    /// Creates a stage spec.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        template: PromptTemplate,
        feed_label: impl Into<String>,
        config: StageConfig,
    ) -> Self {
        Self {
            name: name.into(),
            template,
            feed_label: feed_label.into(),
            config,
        }
    }
}

/// The prompt templates of the standard three-stage pipeline.
#[derive(Debug, Clone)]
pub struct StageTemplates {
    /// Extraction prompt.
    pub extraction: PromptTemplate,
    /// Secondary-analysis prompt.
    pub analysis: PromptTemplate,
    /// Validation prompt.
    pub validation: PromptTemplate,
}

impl StageTemplates {
    /// Loads `extraction.md`, `analysis.md`, and `validation.md` from a
    /// prompt directory.
    pub fn load_from_dir(
        dir: impl AsRef<std::path::Path>,
    ) -> Result<Self, crate::errors::TemplateError> {
        let dir = dir.as_ref();
        Ok(Self {
            extraction: PromptTemplate::from_file(dir.join("extraction.md"))?,
            analysis: PromptTemplate::from_file(dir.join("analysis.md"))?,
            validation: PromptTemplate::from_file(dir.join("validation.md"))?,
        })
    }
}

/// Aggregated result of one full pipeline execution.
#[derive(Debug, Clone)]
pub struct PipelineOutcome {
    /// Stage results in execution order.
    pub stages: Vec<StageResult>,
    /// The quality score parsed from the final stage, when present.
    pub quality_score: Option<f64>,
    /// The quality flags parsed from the final stage, when present.
    pub quality_flags: Option<serde_json::Value>,
}

impl PipelineOutcome {
    /// Looks up a stage result by name.
    #[must_use]
    pub fn stage(&self, name: &str) -> Option<&StageResult> {
        self.stages.iter().find(|s| s.stage == name)
    }

    /// The extraction stage result of a standard pipeline.
    #[must_use]
    pub fn extraction(&self) -> Option<&StageResult> {
        self.stage(EXTRACTION_STAGE)
    }

    /// The analysis stage result of a standard pipeline.
    #[must_use]
    pub fn analysis(&self) -> Option<&StageResult> {
        self.stage(ANALYSIS_STAGE)
    }

    /// The validation stage result of a standard pipeline.
    #[must_use]
    pub fn validation(&self) -> Option<&StageResult> {
        self.stage(VALIDATION_STAGE)
    }

    /// True when every stage produced a `Valid` outcome.
    #[must_use]
    pub fn all_succeeded(&self) -> bool {
        self.stages.iter().all(|s| s.succeeded)
    }
}

/// Coerces a JSON value into a score: numbers directly, numeric strings by
/// parsing, anything else absent.
#[must_use]
pub fn coerce_score(value: &serde_json::Value) -> Option<f64> {
    match value {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

fn extract_quality(last: Option<&StageResult>) -> (Option<f64>, Option<serde_json::Value>) {
    let Some(parsed) = last.and_then(|result| result.outcome.parsed.as_ref()) else {
        return (None, None);
    };
    let score = parsed.get("validation_score").and_then(coerce_score);
    let flags = parsed.get("validation_flags").cloned();
    (score, flags)
}

/// One parameterized pipeline over an ordered list of stage specs.
#[derive(Clone)]
pub struct PipelineRun {
    model: Arc<dyn LanguageModel>,
    specs: Vec<StageSpec>,
    max_retries: u32,
}

impl std::fmt::Debug for PipelineRun {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineRun")
            .field("stages", &self.specs.iter().map(|s| &s.name).collect::<Vec<_>>())
            .field("max_retries", &self.max_retries)
            .finish_non_exhaustive()
    }
}

impl PipelineRun {
    /// Creates a pipeline from stage specs.
    #[must_use]
    pub fn new(model: Arc<dyn LanguageModel>, specs: Vec<StageSpec>, max_retries: u32) -> Self {
        Self {
            model,
            specs,
            max_retries,
        }
    }

    /// Builds the standard extraction → analysis → validation pipeline.
    #[must_use]
    pub fn standard(
        model: Arc<dyn LanguageModel>,
        templates: StageTemplates,
        extraction: StageConfig,
        analysis: StageConfig,
        validation: StageConfig,
        max_retries: u32,
    ) -> Self {
        let specs = vec![
            StageSpec::new(
                EXTRACTION_STAGE,
                templates.extraction,
                "Resume Data Response",
                extraction,
            ),
            StageSpec::new(
                ANALYSIS_STAGE,
                templates.analysis,
                "Analysis Response",
                analysis,
            ),
            StageSpec::new(
                VALIDATION_STAGE,
                templates.validation,
                "Validation Response",
                validation,
            ),
        ];
        Self::new(model, specs, max_retries)
    }

    /// Returns the stage names in execution order.
    #[must_use]
    pub fn stage_names(&self) -> Vec<&str> {
        self.specs.iter().map(|s| s.name.as_str()).collect()
    }

    /// Executes every stage in order against the shared artifact.
    ///
    /// Stage N's prompt is its template followed by each earlier stage's
    /// `\n{feed_label}:{raw_text}`, even when the earlier stage failed.
    pub async fn run(&self, artifact: Option<&DocumentHandle>) -> PipelineOutcome {
        let mut results: Vec<StageResult> = Vec::with_capacity(self.specs.len());

        for spec in &self.specs {
            let mut prompt = spec.template.text().to_string();
            for (earlier, result) in self.specs.iter().zip(results.iter()) {
                prompt.push('\n');
                prompt.push_str(&earlier.feed_label);
                prompt.push(':');
                prompt.push_str(&result.outcome.raw_text);
            }

            let stage = RetryingStage::new(
                AgentStage::new(&spec.name, spec.config.clone(), self.model.clone()),
                self.max_retries,
            );
            info!(stage = %spec.name, "Running pipeline stage");
            let result = stage.run(|| prompt.clone(), artifact).await;
            results.push(result);
        }

        let (quality_score, quality_flags) = extract_quality(results.last());
        PipelineOutcome {
            stages: results,
            quality_score,
            quality_flags,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedModel;
    use pretty_assertions::assert_eq;

    fn spec(name: &str, label: &str, text: &str) -> StageSpec {
        StageSpec::new(
            name,
            PromptTemplate::new(text),
            label,
            StageConfig::default(),
        )
    }

    fn standard_specs() -> Vec<StageSpec> {
        vec![
            spec(EXTRACTION_STAGE, "Resume Data Response", "Extract the resume."),
            spec(ANALYSIS_STAGE, "Analysis Response", "Analyze the extraction."),
            spec(VALIDATION_STAGE, "Validation Response", "Validate both passes."),
        ]
    }

    #[tokio::test]
    async fn test_prompts_thread_prior_raw_text() {
        let model = Arc::new(
            ScriptedModel::new()
                .with_text_reply("{\"resume\": 1}")
                .with_text_reply("{\"analysis\": 2}")
                .with_text_reply("{\"validation_score\": 9}"),
        );
        let pipeline = PipelineRun::new(model.clone(), standard_specs(), 2);
        let outcome = pipeline.run(None).await;

        assert!(outcome.all_succeeded());
        let requests = model.requests();
        assert_eq!(requests.len(), 3);
        assert_eq!(requests[0].prompt, "Extract the resume.");
        assert_eq!(
            requests[1].prompt,
            "Analyze the extraction.\nResume Data Response:{\"resume\": 1}"
        );
        assert_eq!(
            requests[2].prompt,
            "Validate both passes.\nResume Data Response:{\"resume\": 1}\nAnalysis Response:{\"analysis\": 2}"
        );
        assert_eq!(outcome.quality_score, Some(9.0));
    }

    #[tokio::test]
    async fn test_failed_extraction_still_feeds_downstream() {
        // Extraction exhausts its budget with malformed text; analysis still
        // receives the separator plus the last malformed text.
        let model = Arc::new(
            ScriptedModel::new()
                .with_text_reply("{bad")
                .with_text_reply("{worse")
                .with_text_reply("{\"analysis\": true}")
                .with_text_reply("{\"validation_score\": 3}"),
        );
        let pipeline = PipelineRun::new(model.clone(), standard_specs(), 1);
        let outcome = pipeline.run(None).await;

        let extraction = outcome.extraction().expect("extraction result");
        assert!(!extraction.succeeded);
        assert_eq!(extraction.retries_used, 1);

        let requests = model.requests();
        assert_eq!(
            requests[2].prompt,
            "Analyze the extraction.\nResume Data Response:{worse"
        );
        assert_eq!(outcome.quality_score, Some(3.0));
    }

    #[tokio::test]
    async fn test_quality_score_from_numeric_string() {
        let model = Arc::new(
            ScriptedModel::new().with_text_reply("{\"validation_score\": \"7.5\", \"validation_flags\": [\"dates\"]}"),
        );
        let pipeline = PipelineRun::new(
            model,
            vec![spec(VALIDATION_STAGE, "Validation Response", "Validate.")],
            0,
        );
        let outcome = pipeline.run(None).await;
        assert_eq!(outcome.quality_score, Some(7.5));
        assert_eq!(
            outcome.quality_flags,
            Some(serde_json::json!(["dates"]))
        );
    }

    #[tokio::test]
    async fn test_quality_score_absent_when_not_numeric() {
        let model = Arc::new(
            ScriptedModel::new().with_text_reply("{\"validation_score\": \"high\"}"),
        );
        let pipeline = PipelineRun::new(
            model,
            vec![spec(VALIDATION_STAGE, "Validation Response", "Validate.")],
            0,
        );
        let outcome = pipeline.run(None).await;
        assert_eq!(outcome.quality_score, None);
    }

    #[test]
    fn test_coerce_score() {
        assert_eq!(coerce_score(&serde_json::json!(8)), Some(8.0));
        assert_eq!(coerce_score(&serde_json::json!(6.5)), Some(6.5));
        assert_eq!(coerce_score(&serde_json::json!(" 7 ")), Some(7.0));
        assert_eq!(coerce_score(&serde_json::json!("n/a")), None);
        assert_eq!(coerce_score(&serde_json::json!(null)), None);
        assert_eq!(coerce_score(&serde_json::json!([7])), None);
    }
}

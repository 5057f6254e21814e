//! Treatment generation for the correspondence study.
//!
//! For each standardized control resume this workflow produces four
//! documents: a refined control and three treated variants (added
//! education, added work experience, both). Generation shares the
//! extraction pipeline's retry/validate shape, layered with the study's
//! business rules — treatment sampling without replacement, per-variant
//! style modifiers, a focused-similarity gate against the control, and
//! company-name substitution.

mod catalog;
mod company;
mod similarity;

pub use catalog::{TreatmentCatalog, TreatmentDraw};
pub use company::{
    company_location_pairs, replace_companies, AcceptAll, MappingDecision, MappingReview,
};
pub use similarity::{focused_similarity, rephrased_text};

use crate::batch::FileFailure;
use crate::config::TreatmentConfig;
use crate::embedding::TextEmbedder;
use crate::errors::{TemplateError, TreatmentError};
use crate::llm::LanguageModel;
use crate::observability::RunTimer;
use crate::stages::{AgentStage, RetryingStage, StageOutcome};
use crate::store::DocumentStore;
use crate::template::PromptTemplate;
use rand::seq::SliceRandom;
use rand::Rng;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info, warn};

/// The four generated versions of one source resume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TreatmentType {
    /// Rephrased only; the study baseline.
    Control,
    /// Added education credential.
    TypeI,
    /// Added work experience.
    TypeII,
    /// Added education and work experience.
    TypeIII,
}

impl TreatmentType {
    /// The label used in document ids, mappings, and prompts.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Control => "control",
            Self::TypeI => "Type_I",
            Self::TypeII => "Type_II",
            Self::TypeIII => "Type_III",
        }
    }

}

impl std::fmt::Display for TreatmentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The prompt templates of the treatment workflow.
#[derive(Debug, Clone)]
pub struct TreatmentTemplates {
    /// Variant generation prompt; placeholders `JSON_resume_object`,
    /// `Treatment_object`, `treatment_type`, `style_guide`.
    pub generation: PromptTemplate,
    /// Control refinement prompt; placeholder `JSON_resume_object`.
    pub refiner: PromptTemplate,
    /// Company research prompt; placeholder `company_names`.
    pub research: PromptTemplate,
}

impl TreatmentTemplates {
    /// Loads `treatment_generation.md`, `control_refiner.md`, and
    /// `company_research.md` from a prompt directory.
    pub fn load_from_dir(dir: impl AsRef<Path>) -> Result<Self, TemplateError> {
        let dir = dir.as_ref();
        Ok(Self {
            generation: PromptTemplate::from_file_with_placeholders(
                dir.join("treatment_generation.md"),
                ["JSON_resume_object", "Treatment_object", "treatment_type", "style_guide"],
            )?,
            refiner: PromptTemplate::from_file_with_placeholders(
                dir.join("control_refiner.md"),
                ["JSON_resume_object"],
            )?,
            research: PromptTemplate::from_file_with_placeholders(
                dir.join("company_research.md"),
                ["company_names"],
            )?,
        })
    }
}

/// One fully prepared treated variant: its rendered prompt plus the
/// metadata persisted alongside the generated resume.
#[derive(Debug, Clone)]
pub struct PreparedTreatment {
    /// Which variant this is.
    pub treatment_type: TreatmentType,
    /// The fully rendered generation prompt.
    pub prompt: String,
    /// The style instruction assigned to this variant.
    pub style_guide: String,
    /// The treatment payload(s) applied, for the audit trail.
    pub treatment_applied: serde_json::Value,
}

/// Prepares the three treated variants for one resume.
///
/// Each variant gets a distinct style modifier. The combined variant uses
/// the education and work treatments *not* used by the single-treatment
/// variants, so no treatment repeats within one resume set.
pub fn prepare_treatments(
    template: &PromptTemplate,
    resume: &serde_json::Value,
    draw: &TreatmentDraw,
    styles: &[String],
    rng: &mut impl Rng,
) -> Result<Vec<PreparedTreatment>, TreatmentError> {
    if styles.len() < 3 {
        return Err(TreatmentError::NotEnoughStyles {
            needed: 3,
            available: styles.len(),
        });
    }
    let mut assigned: Vec<String> = styles.choose_multiple(rng, 3).cloned().collect();
    let resume_text = serde_json::to_string(resume).unwrap_or_default();

    let education_idx = rng.gen_range(0..2_usize);
    let work_idx = rng.gen_range(0..2_usize);

    let render = |treatment: &serde_json::Value,
                  treatment_type: TreatmentType,
                  style: &str|
     -> Result<String, TemplateError> {
        let mut values = HashMap::new();
        values.insert("JSON_resume_object".to_string(), resume_text.clone());
        values.insert(
            "Treatment_object".to_string(),
            serde_json::to_string(treatment).unwrap_or_default(),
        );
        values.insert(
            "treatment_type".to_string(),
            treatment_type.as_str().to_string(),
        );
        values.insert("style_guide".to_string(), style.to_string());
        template.render(&values)
    };

    let mut prepared = Vec::with_capacity(3);

    let education = &draw.education[education_idx];
    let style = assigned.pop().unwrap_or_default();
    prepared.push(PreparedTreatment {
        treatment_type: TreatmentType::TypeI,
        prompt: render(education, TreatmentType::TypeI, &style)?,
        style_guide: style,
        treatment_applied: serde_json::json!({ "education": education }),
    });

    let work = &draw.work[work_idx];
    let style = assigned.pop().unwrap_or_default();
    prepared.push(PreparedTreatment {
        treatment_type: TreatmentType::TypeII,
        prompt: render(work, TreatmentType::TypeII, &style)?,
        style_guide: style,
        treatment_applied: serde_json::json!({ "work_experience": work }),
    });

    let other_education = &draw.education[1 - education_idx];
    let other_work = &draw.work[1 - work_idx];
    let combined = serde_json::json!({
        "task": "ADD_EDUCATION_AND_EXPERIENCE",
        "payload": {
            "education": other_education,
            "experience": other_work,
        }
    });
    let style = assigned.pop().unwrap_or_default();
    prepared.push(PreparedTreatment {
        treatment_type: TreatmentType::TypeIII,
        prompt: render(&combined, TreatmentType::TypeIII, &style)?,
        style_guide: style,
        treatment_applied: serde_json::json!({
            "education": other_education,
            "work_experience": other_work,
        }),
    });

    Ok(prepared)
}

/// Result of one treatment batch.
#[derive(Debug, Clone, Default)]
pub struct TreatmentSummary {
    /// Files whose four documents were persisted.
    pub processed: Vec<String>,
    /// Files abandoned, with reasons. Nothing is persisted for these.
    pub failed: Vec<FileFailure>,
}

fn has_resume_data(value: &serde_json::Value) -> bool {
    value.get("resume_data").is_some_and(serde_json::Value::is_object)
}

/// The treatment-generation driver.
pub struct TreatmentGenerator {
    model: Arc<dyn LanguageModel>,
    store: Arc<dyn DocumentStore>,
    embedder: Arc<dyn TextEmbedder>,
    review: Arc<dyn MappingReview>,
    catalog: TreatmentCatalog,
    templates: TreatmentTemplates,
    config: TreatmentConfig,
}

impl std::fmt::Debug for TreatmentGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TreatmentGenerator")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl TreatmentGenerator {
    /// Creates a generator over injected collaborators.
    #[must_use]
    pub fn new(
        model: Arc<dyn LanguageModel>,
        store: Arc<dyn DocumentStore>,
        embedder: Arc<dyn TextEmbedder>,
        review: Arc<dyn MappingReview>,
        catalog: TreatmentCatalog,
        templates: TreatmentTemplates,
        config: TreatmentConfig,
    ) -> Self {
        Self {
            model,
            store,
            embedder,
            review,
            catalog,
            templates,
            config,
        }
    }

    /// Treats every matching file in the source collection, or only the
    /// requested files (unknown keys are dropped).
    pub async fn run(&self, files: Option<&[String]>) -> Result<TreatmentSummary, TreatmentError> {
        let known = self
            .store
            .list_keys(&self.config.source_collection)
            .await?;
        let selected: Vec<String> = match files {
            Some(requested) => requested
                .iter()
                .filter(|f| known.contains(*f))
                .cloned()
                .collect(),
            None => known
                .into_iter()
                .filter(|key| key.contains(&self.config.sector))
                .collect(),
        };
        info!(
            count = selected.len(),
            sector = %self.config.sector,
            "Generating treatments"
        );

        let mut summary = TreatmentSummary::default();
        for file_id in selected {
            let timer = RunTimer::start();
            match self.generate_for_file(&file_id).await {
                Ok(saved) => {
                    info!(file = %file_id, saved, elapsed_ms = timer.elapsed_ms(), "File treated");
                    summary.processed.push(file_id);
                }
                Err(err) => {
                    error!(file = %file_id, error = %err, "Treatment failed");
                    summary.failed.push(FileFailure {
                        file: file_id,
                        reason: err.to_string(),
                    });
                }
            }
        }
        Ok(summary)
    }

    /// Generates and persists the control plus all three variants for one
    /// file. Nothing is persisted unless every variant succeeds.
    pub async fn generate_for_file(&self, file_id: &str) -> Result<usize, TreatmentError> {
        let source_doc = self
            .store
            .find_by_key(&self.config.source_collection, file_id)
            .await?
            .ok_or_else(|| TreatmentError::MissingResumeData {
                file_id: file_id.to_string(),
            })?;
        if !has_resume_data(&source_doc) {
            return Err(TreatmentError::MissingResumeData {
                file_id: file_id.to_string(),
            });
        }
        let source_payload = serde_json::json!({
            "resume_data": source_doc["resume_data"].clone()
        });

        let control = self.refine_control(file_id, &source_payload).await?;

        let prepared = {
            let mut rng = rand::thread_rng();
            let draw = self
                .catalog
                .for_sector(&self.config.sector)
                .draw_pairs(&mut rng)?;
            prepare_treatments(
                &self.templates.generation,
                &control,
                &draw,
                &self.config.style_modifiers,
                &mut rng,
            )?
        };

        let mappings = self.research_companies(file_id, &control).await?;

        let file_stem = file_id.strip_suffix(".pdf").unwrap_or(file_id);
        let common = serde_json::json!({
            "original_file_id": file_id,
            "industry_prefix": source_doc.get("industry_prefix").cloned().unwrap_or_default(),
            "file_size_bytes": source_doc.get("file_size_bytes").cloned().unwrap_or_default(),
            "source_file_hash": source_doc.get("file_hash").cloned().unwrap_or_default(),
        });

        let mut documents: Vec<(String, serde_json::Value)> = Vec::with_capacity(4);
        documents.push((
            format!("{file_stem}_control"),
            build_document(
                &common,
                &format!("{file_stem}_control"),
                TreatmentType::Control,
                None,
                serde_json::json!("N/A"),
                None,
                control["resume_data"].clone(),
            ),
        ));

        for variant in &prepared {
            let (treated, score) = self.generate_variant(file_id, &control, variant).await?;
            let replaced = replace_companies(&treated, &mappings, variant.treatment_type);
            let document_id = format!("{file_stem}_{}", variant.treatment_type);
            documents.push((
                document_id.clone(),
                build_document(
                    &common,
                    &document_id,
                    variant.treatment_type,
                    Some(score),
                    variant.treatment_applied.clone(),
                    Some(variant.style_guide.clone()),
                    replaced["resume_data"].clone(),
                ),
            ));
        }

        for (key, document) in &documents {
            self.store
                .upsert(&self.config.target_collection, key, document.clone())
                .await?;
        }
        Ok(documents.len())
    }

    /// Rewrites the source resume to strip region-identifying elements.
    async fn refine_control(
        &self,
        file_id: &str,
        source_payload: &serde_json::Value,
    ) -> Result<serde_json::Value, TreatmentError> {
        let mut values = HashMap::new();
        values.insert(
            "JSON_resume_object".to_string(),
            serde_json::to_string(source_payload).unwrap_or_default(),
        );
        let prompt = self.templates.refiner.render(&values)?;

        let stage = RetryingStage::new(
            AgentStage::new("control_refiner", self.config.refiner.clone(), self.model.clone()),
            self.config.max_retries,
        );
        let result = stage.run(|| prompt.clone(), None).await;
        result
            .outcome
            .parsed
            .filter(has_resume_data)
            .ok_or_else(|| TreatmentError::RefinementFailed {
                file_id: file_id.to_string(),
            })
    }

    /// Produces reviewed company mappings for the control resume.
    async fn research_companies(
        &self,
        file_id: &str,
        control: &serde_json::Value,
    ) -> Result<serde_json::Value, TreatmentError> {
        let mut values = HashMap::new();
        values.insert(
            "company_names".to_string(),
            serde_json::to_string(&company_location_pairs(control)).unwrap_or_default(),
        );
        let prompt = self.templates.research.render(&values)?;

        let stage = RetryingStage::new(
            AgentStage::new("company_research", self.config.research.clone(), self.model.clone()),
            self.config.max_retries,
        );

        // The review hook may ask for regeneration a bounded number of
        // times before the file is abandoned.
        for _ in 0..=self.config.max_retries {
            let result = stage.run(|| prompt.clone(), None).await;
            let Some(proposed) = result.outcome.parsed else {
                return Err(TreatmentError::ResearchFailed {
                    file_id: file_id.to_string(),
                });
            };
            match self.review.review(&proposed).await {
                MappingDecision::Accept(mappings) => return Ok(mappings),
                MappingDecision::Retry => {
                    info!(file = %file_id, "Mapping review requested regeneration");
                }
                MappingDecision::Abort => {
                    return Err(TreatmentError::MappingAborted {
                        file_id: file_id.to_string(),
                    })
                }
            }
        }
        Err(TreatmentError::MappingAborted {
            file_id: file_id.to_string(),
        })
    }

    /// Generates one treated variant, gated on focused similarity against
    /// the control. The attempt budget covers generation failures,
    /// structural failures, and low-similarity results alike.
    async fn generate_variant(
        &self,
        file_id: &str,
        control: &serde_json::Value,
        variant: &PreparedTreatment,
    ) -> Result<(serde_json::Value, f64), TreatmentError> {
        let stage = AgentStage::new(
            "treatment_generation",
            self.config.generation.clone(),
            self.model.clone(),
        );

        let mut attempt: u32 = 0;
        let mut last_score = 0.0_f64;
        while attempt < self.config.max_retries {
            let outcome = match stage.invoke(&variant.prompt, None).await {
                Ok(reply) => StageOutcome::from_reply(&reply, attempt),
                Err(err) => {
                    warn!(file = %file_id, attempt, error = %err, "Generation transport failure");
                    attempt += 1;
                    continue;
                }
            };
            let Some(candidate) = outcome.parsed else {
                warn!(
                    file = %file_id,
                    variant = %variant.treatment_type,
                    attempt,
                    classification = ?outcome.classification,
                    "Unusable variant response"
                );
                attempt += 1;
                continue;
            };
            if !has_resume_data(&candidate) {
                warn!(
                    file = %file_id,
                    variant = %variant.treatment_type,
                    attempt,
                    "Variant response missing resume data"
                );
                attempt += 1;
                continue;
            }

            let score = match focused_similarity(
                self.embedder.as_ref(),
                &control["resume_data"],
                &candidate["resume_data"],
            )
            .await
            {
                Ok(score) => score,
                Err(err) => {
                    warn!(file = %file_id, error = %err, "Similarity scoring failed");
                    0.0
                }
            };
            last_score = score;

            if score >= self.config.similarity_threshold {
                return Ok((candidate, score));
            }
            warn!(
                file = %file_id,
                variant = %variant.treatment_type,
                score,
                style = %variant.style_guide,
                attempt,
                "Low similarity, retrying variant"
            );
            attempt += 1;
        }

        Err(TreatmentError::SimilarityExhausted {
            file_id: file_id.to_string(),
            variant: variant.treatment_type.as_str().to_string(),
            last_score,
        })
    }
}

fn build_document(
    common: &serde_json::Value,
    document_id: &str,
    treatment_type: TreatmentType,
    similarity_score: Option<f64>,
    treatment_applied: serde_json::Value,
    style_guide: Option<String>,
    resume_data: serde_json::Value,
) -> serde_json::Value {
    let mut document = common
        .as_object()
        .cloned()
        .unwrap_or_default();
    document.insert("document_id".to_string(), serde_json::json!(document_id));
    document.insert(
        "treatment_type".to_string(),
        serde_json::json!(treatment_type.as_str()),
    );
    document.insert(
        "generation_timestamp".to_string(),
        serde_json::json!(chrono::Utc::now().to_rfc3339()),
    );
    document.insert(
        "validation".to_string(),
        match similarity_score {
            Some(score) => serde_json::json!({
                "focused_similarity_score": score,
                "passed_threshold": true,
            }),
            None => serde_json::json!({
                "focused_similarity_score": serde_json::Value::Null,
                "passed_threshold": "N/A",
            }),
        },
    );
    if let Some(style_guide) = style_guide {
        document.insert("style_guide".to_string(), serde_json::json!(style_guide));
    }
    document.insert("treatment_applied".to_string(), treatment_applied);
    document.insert("resume_data".to_string(), resume_data);
    serde_json::Value::Object(document)
}

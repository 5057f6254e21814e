//! Score-gated whole-pipeline re-runs.
//!
//! When the validation score of a completed pipeline run falls below the
//! acceptance threshold, the controller re-runs the entire pipeline — a
//! fresh attempt at every stage, not just validation — up to a fixed cap.
//! The loop is an explicit state machine; `rerun_count` increments on every
//! entry to the Rerun state, so the controller always terminates within
//! `1 + max_reruns` pipeline executions.

use super::{PipelineOutcome, PipelineRun};
use crate::llm::DocumentHandle;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Re-run policy: cap and acceptance threshold.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ReRunPolicy {
    /// Maximum number of whole-pipeline re-runs.
    pub max_reruns: u32,
    /// Scores at or above this value are accepted; "below threshold" is
    /// strict less-than.
    pub score_threshold: f64,
}

impl Default for ReRunPolicy {
    fn default() -> Self {
        Self {
            max_reruns: 2,
            score_threshold: 7.0,
        }
    }
}

/// Final per-document result of a controller execution.
#[derive(Debug, Clone)]
pub struct RunRecord {
    /// Every pipeline outcome in order; the first entry is the initial run.
    pub pipeline_outcomes: Vec<PipelineOutcome>,
    /// How many re-runs were taken, `0..=max_reruns`.
    pub rerun_count: u32,
}

impl RunRecord {
    /// The last pipeline outcome — the one the controller accepted.
    #[must_use]
    pub fn final_outcome(&self) -> &PipelineOutcome {
        self.pipeline_outcomes
            .last()
            .unwrap_or_else(|| unreachable!("a run record holds at least the initial run"))
    }

    /// The accepted quality score, when one was parsed.
    #[must_use]
    pub fn final_score(&self) -> Option<f64> {
        self.final_outcome().quality_score
    }
}

enum ControllerState {
    Evaluate,
    Rerun,
    Terminal,
}

/// Drives a pipeline to a terminal state under a re-run policy.
#[derive(Debug, Clone)]
pub struct ReRunController {
    pipeline: PipelineRun,
    policy: ReRunPolicy,
}

impl ReRunController {
    /// Creates a controller.
    #[must_use]
    pub fn new(pipeline: PipelineRun, policy: ReRunPolicy) -> Self {
        Self { pipeline, policy }
    }

    /// Runs the pipeline to a terminal state.
    ///
    /// Terminal conditions, in evaluation order: the score could not be
    /// parsed (accept as-is rather than loop forever); the score meets the
    /// threshold; the re-run budget is exhausted (accept the last outcome
    /// regardless of its score).
    pub async fn run(&self, artifact: Option<&DocumentHandle>) -> RunRecord {
        let mut outcomes = vec![self.pipeline.run(artifact).await];
        let mut rerun_count: u32 = 0;
        let mut state = ControllerState::Evaluate;

        loop {
            state = match state {
                ControllerState::Evaluate => {
                    let last = outcomes
                        .last()
                        .unwrap_or_else(|| unreachable!("initial run recorded"));
                    match last.quality_score {
                        None => {
                            info!("Validation score absent, accepting outcome as-is");
                            ControllerState::Terminal
                        }
                        Some(score) if score < self.policy.score_threshold => {
                            if rerun_count < self.policy.max_reruns {
                                warn!(
                                    score,
                                    threshold = self.policy.score_threshold,
                                    flags = ?last.quality_flags,
                                    "Validation score below threshold, re-running pipeline"
                                );
                                ControllerState::Rerun
                            } else {
                                warn!(
                                    score,
                                    rerun_count,
                                    "Re-run budget exhausted, accepting last outcome"
                                );
                                ControllerState::Terminal
                            }
                        }
                        Some(score) => {
                            info!(score, "Validation score accepted");
                            ControllerState::Terminal
                        }
                    }
                }
                ControllerState::Rerun => {
                    rerun_count += 1;
                    info!(rerun = rerun_count, "Starting pipeline re-run");
                    outcomes.push(self.pipeline.run(artifact).await);
                    ControllerState::Evaluate
                }
                ControllerState::Terminal => break,
            };
        }

        RunRecord {
            pipeline_outcomes: outcomes,
            rerun_count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{StageSpec, VALIDATION_STAGE};
    use crate::stages::StageConfig;
    use crate::template::PromptTemplate;
    use crate::testing::ScriptedModel;
    use std::sync::Arc;

    fn validation_only(model: Arc<ScriptedModel>) -> PipelineRun {
        PipelineRun::new(
            model,
            vec![StageSpec::new(
                VALIDATION_STAGE,
                PromptTemplate::new("Validate."),
                "Validation Response",
                StageConfig::default(),
            )],
            0,
        )
    }

    #[tokio::test]
    async fn test_passing_score_terminates_without_rerun() {
        let model = Arc::new(
            ScriptedModel::new().with_text_reply("{\"validation_score\": 9}"),
        );
        let controller =
            ReRunController::new(validation_only(model.clone()), ReRunPolicy::default());
        let record = controller.run(None).await;

        assert_eq!(record.rerun_count, 0);
        assert_eq!(record.pipeline_outcomes.len(), 1);
        assert_eq!(record.final_score(), Some(9.0));
        assert_eq!(model.generate_calls(), 1);
    }

    #[tokio::test]
    async fn test_score_equal_to_threshold_is_accepted() {
        // Strict less-than semantics: exactly-at-threshold must not re-run.
        let model = Arc::new(
            ScriptedModel::new().with_text_reply("{\"validation_score\": 7}"),
        );
        let controller =
            ReRunController::new(validation_only(model.clone()), ReRunPolicy::default());
        let record = controller.run(None).await;

        assert_eq!(record.rerun_count, 0);
        assert_eq!(model.generate_calls(), 1);
    }

    #[tokio::test]
    async fn test_absent_score_terminates_immediately() {
        let model = Arc::new(
            ScriptedModel::new().with_text_reply("{\"summary\": \"no score field\"}"),
        );
        let controller = ReRunController::new(
            validation_only(model.clone()),
            ReRunPolicy {
                max_reruns: 5,
                score_threshold: 7.0,
            },
        );
        let record = controller.run(None).await;

        assert_eq!(record.rerun_count, 0);
        assert_eq!(record.final_score(), None);
        assert_eq!(model.generate_calls(), 1);
    }

    #[tokio::test]
    async fn test_low_score_reruns_until_acceptance() {
        let model = Arc::new(
            ScriptedModel::new()
                .with_text_reply("{\"validation_score\": 5, \"validation_flags\": [\"gaps\"]}")
                .with_text_reply("{\"validation_score\": 8}"),
        );
        let controller =
            ReRunController::new(validation_only(model.clone()), ReRunPolicy::default());
        let record = controller.run(None).await;

        assert_eq!(record.rerun_count, 1);
        assert_eq!(record.pipeline_outcomes.len(), 2);
        assert_eq!(record.final_score(), Some(8.0));
    }

    #[tokio::test]
    async fn test_budget_exhaustion_accepts_low_score() {
        let model = Arc::new(
            ScriptedModel::new()
                .with_text_reply("{\"validation_score\": 5}")
                .with_text_reply("{\"validation_score\": 6}")
                .with_text_reply("{\"validation_score\": 6}"),
        );
        let controller =
            ReRunController::new(validation_only(model.clone()), ReRunPolicy::default());
        let record = controller.run(None).await;

        assert_eq!(record.rerun_count, 2);
        assert_eq!(record.pipeline_outcomes.len(), 3);
        assert_eq!(record.final_score(), Some(6.0));
        assert!(record.final_outcome().all_succeeded());
        assert_eq!(model.generate_calls(), 3);
    }

    #[tokio::test]
    async fn test_unparseable_rerun_validation_still_terminates() {
        // A re-run whose validation never parses terminates via the
        // score-absent rule instead of looping forever.
        let model = Arc::new(
            ScriptedModel::new()
                .with_text_reply("{\"validation_score\": 2}")
                .with_text_reply("{never valid"),
        );
        let controller = ReRunController::new(
            validation_only(model.clone()),
            ReRunPolicy::default(),
        );
        let record = controller.run(None).await;

        assert_eq!(record.rerun_count, 1);
        assert_eq!(record.final_score(), None);
        assert!(!record.final_outcome().all_succeeded());
        // Initial run, one re-run attempt (retry budget 0), nothing more.
        assert_eq!(model.generate_calls(), 2);
    }

    #[tokio::test]
    async fn test_rerun_count_bounded_by_policy() {
        let model = Arc::new(ScriptedModel::new().with_default_reply("{\"validation_score\": 1}"));
        let policy = ReRunPolicy {
            max_reruns: 3,
            score_threshold: 7.0,
        };
        let controller = ReRunController::new(validation_only(model.clone()), policy);
        let record = controller.run(None).await;

        assert_eq!(record.rerun_count, 3);
        assert_eq!(record.pipeline_outcomes.len(), 4);
    }
}

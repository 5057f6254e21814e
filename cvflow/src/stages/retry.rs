//! Bounded retry loop over a single agent stage.

use super::{AgentStage, StageOutcome, StageResult};
use crate::llm::DocumentHandle;
use crate::parse::Classification;
use tracing::{info, warn};

/// Wraps an [`AgentStage`] with a bounded-retry policy.
///
/// Each attempt is invoke → parse → classify. `Malformed` and `Empty`
/// outcomes consume retry budget; a transport failure is treated as `Empty`
/// so a flaky call cannot abort the pipeline before the budget is spent.
/// The last outcome is always returned — callers can salvage partial text
/// from a failed stage.
#[derive(Debug, Clone)]
pub struct RetryingStage {
    stage: AgentStage,
    max_retries: u32,
}

impl RetryingStage {
    /// Creates a retrying wrapper with the given retry cap.
    #[must_use]
    pub fn new(stage: AgentStage, max_retries: u32) -> Self {
        Self { stage, max_retries }
    }

    /// Returns the wrapped stage's name.
    #[must_use]
    pub fn name(&self) -> &str {
        self.stage.name()
    }

    /// Returns the retry cap.
    #[must_use]
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Runs the stage until it yields a `Valid` outcome or the retry budget
    /// is exhausted.
    ///
    /// The prompt is rebuilt on every attempt. Invariants on the returned
    /// result: `retries_used <= max_retries`, and `retries_used <
    /// max_retries` only when the final classification is `Valid`.
    pub async fn run<F>(
        &self,
        build_prompt: F,
        artifact: Option<&DocumentHandle>,
    ) -> StageResult
    where
        F: Fn() -> String,
    {
        let mut attempt: u32 = 0;
        loop {
            let prompt = build_prompt();
            let outcome = match self.stage.invoke(&prompt, artifact).await {
                Ok(reply) => StageOutcome::from_reply(&reply, attempt),
                Err(err) => {
                    warn!(
                        stage = self.stage.name(),
                        attempt,
                        error = %err,
                        "Transport failure, treating as empty outcome"
                    );
                    StageOutcome::transport_failure(err.to_string(), attempt)
                }
            };

            if outcome.classification == Classification::Valid {
                if attempt > 0 {
                    info!(
                        stage = self.stage.name(),
                        retries = attempt,
                        "Stage succeeded after retries"
                    );
                }
                return StageResult {
                    stage: self.stage.name().to_string(),
                    outcome,
                    retries_used: attempt,
                    succeeded: true,
                };
            }

            if attempt < self.max_retries {
                warn!(
                    stage = self.stage.name(),
                    attempt,
                    classification = ?outcome.classification,
                    "Unusable response, retrying"
                );
                attempt += 1;
                continue;
            }

            warn!(
                stage = self.stage.name(),
                max_retries = self.max_retries,
                classification = ?outcome.classification,
                "Retry budget exhausted, returning last outcome"
            );
            return StageResult {
                stage: self.stage.name().to_string(),
                outcome,
                retries_used: self.max_retries,
                succeeded: false,
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::StageConfig;
    use crate::testing::ScriptedModel;
    use std::sync::Arc;

    fn retrying(model: Arc<ScriptedModel>, max_retries: u32) -> RetryingStage {
        RetryingStage::new(
            AgentStage::new("extraction", StageConfig::default(), model),
            max_retries,
        )
    }

    #[tokio::test]
    async fn test_first_attempt_success_uses_no_retries() {
        let model = Arc::new(ScriptedModel::new().with_text_reply("{\"ok\": 1}"));
        let result = retrying(model.clone(), 2)
            .run(|| "prompt".to_string(), None)
            .await;

        assert!(result.succeeded);
        assert_eq!(result.retries_used, 0);
        assert_eq!(model.generate_calls(), 1);
    }

    #[tokio::test]
    async fn test_two_malformed_then_valid() {
        let model = Arc::new(
            ScriptedModel::new()
                .with_text_reply("{broken")
                .with_text_reply("{still broken")
                .with_text_reply("{\"ok\": 1}"),
        );
        let result = retrying(model.clone(), 2)
            .run(|| "prompt".to_string(), None)
            .await;

        assert!(result.succeeded);
        assert_eq!(result.retries_used, 2);
        assert_eq!(result.outcome.attempt_index, 2);
        assert_eq!(model.generate_calls(), 3);
    }

    #[tokio::test]
    async fn test_budget_exhaustion_returns_last_outcome() {
        let model = Arc::new(
            ScriptedModel::new()
                .with_text_reply("{a")
                .with_text_reply("{b")
                .with_text_reply("{c"),
        );
        let result = retrying(model.clone(), 2)
            .run(|| "prompt".to_string(), None)
            .await;

        assert!(!result.succeeded);
        assert_eq!(result.retries_used, 2);
        assert_eq!(result.outcome.raw_text, "{c");
        assert_eq!(model.generate_calls(), 3);
    }

    #[tokio::test]
    async fn test_transport_failure_consumes_budget_as_empty() {
        let model = Arc::new(
            ScriptedModel::new()
                .with_transport_failure()
                .with_text_reply("{\"ok\": 1}"),
        );
        let result = retrying(model.clone(), 2)
            .run(|| "prompt".to_string(), None)
            .await;

        assert!(result.succeeded);
        assert_eq!(result.retries_used, 1);
        assert_eq!(model.generate_calls(), 2);
    }

    #[tokio::test]
    async fn test_blocked_reply_keeps_block_reason() {
        let model = Arc::new(
            ScriptedModel::new()
                .with_blocked_reply("SAFETY")
                .with_blocked_reply("SAFETY"),
        );
        let result = retrying(model, 1).run(|| "prompt".to_string(), None).await;

        assert!(!result.succeeded);
        assert_eq!(result.outcome.classification, Classification::Empty);
        assert_eq!(result.outcome.block_reason.as_deref(), Some("SAFETY"));
    }

    #[tokio::test]
    async fn test_retry_cap_invariant() {
        // retries_used < max_retries only when the final outcome is Valid.
        let model = Arc::new(ScriptedModel::new().with_text_reply("{x").with_text_reply("{y"));
        let result = retrying(model, 1).run(|| "prompt".to_string(), None).await;
        assert_eq!(result.retries_used, 1);
        assert!(result.retries_used <= 1);
        assert!(!result.succeeded);
    }
}

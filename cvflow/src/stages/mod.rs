//! Agent stages.
//!
//! An [`AgentStage`] is one LLM-backed step with a role-specific
//! configuration: one call, no retry, no parsing. [`RetryingStage`] layers
//! the bounded retry loop on top.

mod result;
mod retry;

pub use result::{StageOutcome, StageResult};
pub use retry::RetryingStage;

use crate::errors::TransportError;
use crate::llm::{
    DocumentHandle, GenerationReply, GenerationRequest, LanguageModel, ModelTool,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Model parameters for one stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageConfig {
    /// Model name to invoke.
    pub model: String,
    /// Sampling temperature.
    pub temperature: f32,
    /// Whether the stage may use web search grounding.
    pub web_search: bool,
}

impl Default for StageConfig {
    fn default() -> Self {
        Self {
            model: "gemini-2.5-flash".to_string(),
            temperature: 0.4,
            web_search: false,
        }
    }
}

impl StageConfig {
    /// Sets the model name.
    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Sets the temperature.
    #[must_use]
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Enables web search grounding.
    #[must_use]
    pub fn with_web_search(mut self) -> Self {
        self.web_search = true;
        self
    }
}

/// One LLM-backed pipeline step.
#[derive(Clone)]
pub struct AgentStage {
    name: String,
    config: StageConfig,
    model: Arc<dyn LanguageModel>,
}

impl std::fmt::Debug for AgentStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentStage")
            .field("name", &self.name)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl AgentStage {
    /// Creates a stage bound to a model collaborator.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        config: StageConfig,
        model: Arc<dyn LanguageModel>,
    ) -> Self {
        Self {
            name: name.into(),
            config,
            model,
        }
    }

    /// Returns the stage name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the stage configuration.
    #[must_use]
    pub fn config(&self) -> &StageConfig {
        &self.config
    }

    /// Runs a single generation call for this stage.
    ///
    /// Side effect free beyond the external call: retry and parsing are the
    /// caller's concern.
    pub async fn invoke(
        &self,
        prompt: &str,
        artifact: Option<&DocumentHandle>,
    ) -> Result<GenerationReply, TransportError> {
        let mut request = GenerationRequest::new(&self.config.model, prompt)
            .with_temperature(self.config.temperature);
        if self.config.web_search {
            request = request.with_tool(ModelTool::WebSearch);
        }
        if let Some(handle) = artifact {
            request = request.with_attachment(handle.clone());
        }
        self.model.generate(request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedModel;

    #[test]
    fn test_stage_config_builder() {
        let config = StageConfig::default()
            .with_model("gemini-2.5-pro")
            .with_temperature(0.6)
            .with_web_search();
        assert_eq!(config.model, "gemini-2.5-pro");
        assert!(config.web_search);
    }

    #[tokio::test]
    async fn test_invoke_passes_stage_parameters() {
        let model = Arc::new(ScriptedModel::new().with_text_reply("{\"ok\": true}"));
        let stage = AgentStage::new(
            "extraction",
            StageConfig::default().with_web_search(),
            model.clone(),
        );

        let reply = stage.invoke("extract this", None).await.expect("invoke");
        assert!(reply.has_text());
        assert_eq!(model.generate_calls(), 1);

        let request = model.last_request().expect("request recorded");
        assert_eq!(request.model, "gemini-2.5-flash");
        assert_eq!(request.tools, vec![ModelTool::WebSearch]);
        assert!(request.attachment.is_none());
    }
}

//! Stage outcome and result types.

use crate::llm::{GenerationReply, TokenUsage};
use crate::parse::{parse_response, Classification};
use serde::{Deserialize, Serialize};

/// How much raw text is kept in diagnostic records.
const RAW_TEXT_DIAGNOSTIC_LIMIT: usize = 5000;

/// The result of one LLM invocation attempt, after cleaning and
/// classification. Immutable once produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageOutcome {
    /// The raw reply text (empty when the model produced none).
    pub raw_text: String,
    /// The parsed JSON document, present only when `Valid`.
    pub parsed: Option<serde_json::Value>,
    /// Classification of this attempt.
    pub classification: Classification,
    /// Zero-based index of the attempt that produced this outcome.
    pub attempt_index: u32,
    /// Parse error diagnostics, present when `Malformed`.
    pub parse_error: Option<String>,
    /// Block-reason metadata, present on blocked or failed calls.
    pub block_reason: Option<String>,
    /// Token accounting for the attempt.
    pub usage: TokenUsage,
    /// The model version that answered, when reported.
    pub model_version: Option<String>,
}

impl StageOutcome {
    /// Builds an outcome from a completed generation reply.
    #[must_use]
    pub fn from_reply(reply: &GenerationReply, attempt_index: u32) -> Self {
        let raw_text = reply.text.clone().unwrap_or_default();
        let parsed_response = parse_response(&raw_text);
        Self {
            raw_text,
            parsed: parsed_response.parsed,
            classification: parsed_response.classification,
            attempt_index,
            parse_error: parsed_response.parse_error,
            block_reason: reply.block_reason.clone(),
            usage: reply.usage,
            model_version: reply.model_version.clone(),
        }
    }

    /// Builds the Empty outcome used when the transport call itself failed.
    #[must_use]
    pub fn transport_failure(reason: impl Into<String>, attempt_index: u32) -> Self {
        Self {
            raw_text: String::new(),
            parsed: None,
            classification: Classification::Empty,
            attempt_index,
            parse_error: None,
            block_reason: Some(reason.into()),
            usage: TokenUsage::default(),
            model_version: None,
        }
    }
}

/// The accepted result of a retrying stage after its loop terminates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageResult {
    /// The stage name.
    pub stage: String,
    /// The last attempt, whether successful or not.
    pub outcome: StageOutcome,
    /// Number of failed attempts that preceded the returned outcome,
    /// capped at the stage's retry budget.
    pub retries_used: u32,
    /// True iff the outcome classification is `Valid`.
    pub succeeded: bool,
}

impl StageResult {
    /// The value persisted for this stage: the parsed document on success,
    /// or a diagnostic object retaining the error and truncated raw text.
    #[must_use]
    pub fn record_value(&self) -> serde_json::Value {
        if let Some(ref parsed) = self.outcome.parsed {
            return parsed.clone();
        }
        let truncated: String = self
            .outcome
            .raw_text
            .chars()
            .take(RAW_TEXT_DIAGNOSTIC_LIMIT)
            .collect();
        serde_json::json!({
            "error": format!("Unusable response from stage '{}'", self.stage),
            "classification": self.outcome.classification,
            "parse_error": self.outcome.parse_error,
            "block_reason": self.outcome.block_reason,
            "raw_text": truncated,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::GenerationReply;

    #[test]
    fn test_outcome_from_valid_reply() {
        let reply = GenerationReply::with_text("```json\n{\"validation_score\": 8}\n```");
        let outcome = StageOutcome::from_reply(&reply, 1);
        assert_eq!(outcome.classification, Classification::Valid);
        assert_eq!(outcome.attempt_index, 1);
        assert_eq!(
            outcome.parsed.expect("parsed")["validation_score"],
            serde_json::json!(8)
        );
    }

    #[test]
    fn test_outcome_from_blocked_reply() {
        let reply = GenerationReply::blocked(Some("SAFETY".to_string()));
        let outcome = StageOutcome::from_reply(&reply, 0);
        assert_eq!(outcome.classification, Classification::Empty);
        assert_eq!(outcome.block_reason.as_deref(), Some("SAFETY"));
    }

    #[test]
    fn test_transport_failure_is_empty() {
        let outcome = StageOutcome::transport_failure("connect timeout", 2);
        assert_eq!(outcome.classification, Classification::Empty);
        assert_eq!(outcome.attempt_index, 2);
        assert!(outcome.raw_text.is_empty());
    }

    #[test]
    fn test_record_value_keeps_diagnostics() {
        let reply = GenerationReply::with_text("{broken");
        let result = StageResult {
            stage: "extraction".to_string(),
            outcome: StageOutcome::from_reply(&reply, 0),
            retries_used: 2,
            succeeded: false,
        };
        let value = result.record_value();
        assert_eq!(value["raw_text"], "{broken");
        assert!(value["parse_error"].is_string());
    }
}

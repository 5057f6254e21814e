//! Response cleaning and classification.
//!
//! Models frequently wrap JSON answers in markdown code fences. This module
//! strips exactly one fence layer, attempts a JSON parse, and classifies the
//! result. Parse failure is a classification, never a fault: the stripped
//! text and the parse error are retained for diagnostics.

use serde::{Deserialize, Serialize};

/// How a raw model response was classified after cleaning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    /// The cleaned text parsed as a JSON document.
    Valid,
    /// The cleaned text was non-empty but did not parse.
    Malformed,
    /// The response carried no text at all.
    Empty,
}

impl Classification {
    /// Returns true for [`Classification::Valid`].
    #[must_use]
    pub fn is_valid(self) -> bool {
        matches!(self, Self::Valid)
    }
}

/// The outcome of cleaning and parsing one raw response.
#[derive(Debug, Clone)]
pub struct ParsedResponse {
    /// The fence-stripped text (empty for [`Classification::Empty`]).
    pub text: String,
    /// The parsed JSON document, present only when `Valid`.
    pub parsed: Option<serde_json::Value>,
    /// The classification of this response.
    pub classification: Classification,
    /// The parse error message, present only when `Malformed`.
    pub parse_error: Option<String>,
}

/// Strips one layer of markdown code fences from model output.
///
/// Accepts a language-tagged (` ```json `) or bare (` ``` `) opener and a
/// trailing ` ``` ` closer, trimming surrounding whitespace. Exactly one
/// strip pass: nested fences are left alone.
#[must_use]
pub fn strip_fences(text: &str) -> &str {
    let text = text.trim();
    if let Some(stripped) = text.strip_prefix("```json") {
        stripped
            .trim_start()
            .strip_suffix("```")
            .map(str::trim)
            .unwrap_or_else(|| stripped.trim_start())
    } else if let Some(stripped) = text.strip_prefix("```") {
        stripped
            .trim_start()
            .strip_suffix("```")
            .map(str::trim)
            .unwrap_or_else(|| stripped.trim_start())
    } else {
        text
    }
}

/// Cleans and classifies a raw model response.
///
/// Empty or whitespace-only input is `Empty`. Otherwise the text is
/// fence-stripped once and parsed as JSON: success is `Valid` with the
/// parsed document, failure is `Malformed` with the error retained.
#[must_use]
pub fn parse_response(raw: &str) -> ParsedResponse {
    if raw.trim().is_empty() {
        return ParsedResponse {
            text: String::new(),
            parsed: None,
            classification: Classification::Empty,
            parse_error: None,
        };
    }

    let cleaned = strip_fences(raw);
    match serde_json::from_str::<serde_json::Value>(cleaned) {
        Ok(value) => ParsedResponse {
            text: cleaned.to_string(),
            parsed: Some(value),
            classification: Classification::Valid,
            parse_error: None,
        },
        Err(err) => ParsedResponse {
            text: cleaned.to_string(),
            parsed: None,
            classification: Classification::Malformed,
            parse_error: Some(err.to_string()),
        },
    }
}

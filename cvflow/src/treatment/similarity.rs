//! Focused similarity between control and treated resumes.
//!
//! The gate compares only the rephrased free text (summary plus work
//! highlights), not the whole document, so added treatments do not dilute
//! the comparison.

use crate::embedding::{cosine_similarity, EmbeddingTask, TextEmbedder};
use crate::errors::TransportError;

/// Concatenates the rephrased free text of a resume payload: the basics
/// summary followed by each job's highlights.
#[must_use]
pub fn rephrased_text(resume_data: &serde_json::Value) -> String {
    let mut parts: Vec<String> = Vec::new();

    if let Some(summary) = resume_data
        .pointer("/basics/summary")
        .and_then(|s| s.as_str())
    {
        parts.push(summary.to_string());
    }
    if let Some(jobs) = resume_data.get("work_experience").and_then(|v| v.as_array()) {
        for job in jobs {
            if let Some(highlights) = job.get("highlights").and_then(|h| h.as_array()) {
                let joined = highlights
                    .iter()
                    .filter_map(|h| h.as_str())
                    .collect::<Vec<_>>()
                    .join(" ");
                if !joined.is_empty() {
                    parts.push(joined);
                }
            }
        }
    }
    parts.join(" ")
}

/// Cosine similarity between the rephrased text of two resume payloads.
///
/// Both arguments are the inner `resume_data` objects. Returns 0.0 when
/// either side has no comparable text.
pub async fn focused_similarity(
    embedder: &dyn TextEmbedder,
    control: &serde_json::Value,
    treated: &serde_json::Value,
) -> Result<f64, TransportError> {
    let control_text = rephrased_text(control);
    let treated_text = rephrased_text(treated);
    if control_text.is_empty() || treated_text.is_empty() {
        return Ok(0.0);
    }

    let control_vector = embedder
        .embed(&control_text, EmbeddingTask::SemanticSimilarity)
        .await?;
    let treated_vector = embedder
        .embed(&treated_text, EmbeddingTask::SemanticSimilarity)
        .await?;
    Ok(cosine_similarity(&control_vector, &treated_vector))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{sample_resume, ScriptedEmbedder};

    #[test]
    fn test_rephrased_text_joins_summary_and_highlights() {
        let resume = sample_resume();
        let text = rephrased_text(&resume["resume_data"]);
        assert!(text.starts_with("Operations professional"));
        assert!(text.contains("Cut fulfilment latency"));
        assert!(text.contains("Scheduled 40 weekly routes"));
    }

    #[test]
    fn test_rephrased_text_empty_resume() {
        assert_eq!(rephrased_text(&serde_json::json!({})), "");
    }

    #[tokio::test]
    async fn test_identical_payloads_score_one() {
        let embedder = ScriptedEmbedder::new();
        let resume = sample_resume();
        let score = focused_similarity(
            &embedder,
            &resume["resume_data"],
            &resume["resume_data"],
        )
        .await
        .expect("similarity");
        assert!((score - 1.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_missing_text_scores_zero_without_embedding() {
        let embedder = ScriptedEmbedder::new();
        let resume = sample_resume();
        let score = focused_similarity(
            &embedder,
            &resume["resume_data"],
            &serde_json::json!({}),
        )
        .await
        .expect("similarity");
        assert!(score.abs() < f64::EPSILON);
        assert_eq!(embedder.embed_calls(), 0);
    }

    #[tokio::test]
    async fn test_orthogonal_vectors_score_zero() {
        let embedder = ScriptedEmbedder::new()
            .with_vector(vec![1.0, 0.0])
            .with_vector(vec![0.0, 1.0]);
        let resume = sample_resume();
        let score = focused_similarity(
            &embedder,
            &resume["resume_data"],
            &resume["resume_data"],
        )
        .await
        .expect("similarity");
        assert!(score.abs() < 1e-9);
    }
}

//! Treatment catalog: sector-scoped education and work-experience
//! treatments, sampled without replacement.

use crate::errors::{ConfigError, TreatmentError};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// The treatment pools for one study.
///
/// Each entry is a JSON object carrying at least a `sector` field; the rest
/// of the shape is opaque to the pipeline and passed verbatim into prompts.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TreatmentCatalog {
    /// Education treatments.
    #[serde(default)]
    pub education: Vec<serde_json::Value>,
    /// Work-experience treatments.
    #[serde(default)]
    pub work: Vec<serde_json::Value>,
}

/// One draw from the catalog: two unique treatments of each kind.
///
/// Each pair is split between the single-treatment variant and the
/// combined variant, so no treatment repeats within one resume set.
#[derive(Debug, Clone)]
pub struct TreatmentDraw {
    /// Two unique education treatments.
    pub education: [serde_json::Value; 2],
    /// Two unique work-experience treatments.
    pub work: [serde_json::Value; 2],
}

impl TreatmentCatalog {
    /// Loads a catalog from a JSON file of shape
    /// `{"education": [...], "work": [...]}`.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Returns the subset of treatments whose `sector` field matches.
    #[must_use]
    pub fn for_sector(&self, sector: &str) -> Self {
        let matches = |entry: &serde_json::Value| {
            entry
                .get("sector")
                .and_then(|s| s.as_str())
                .is_some_and(|s| s.eq_ignore_ascii_case(sector))
        };
        Self {
            education: self.education.iter().filter(|e| matches(e)).cloned().collect(),
            work: self.work.iter().filter(|e| matches(e)).cloned().collect(),
        }
    }

    /// Draws two unique treatments of each kind.
    pub fn draw_pairs(&self, rng: &mut impl Rng) -> Result<TreatmentDraw, TreatmentError> {
        let education = sample_pair(&self.education, "education", rng)?;
        let work = sample_pair(&self.work, "work", rng)?;
        Ok(TreatmentDraw { education, work })
    }
}

fn sample_pair(
    pool: &[serde_json::Value],
    kind: &str,
    rng: &mut impl Rng,
) -> Result<[serde_json::Value; 2], TreatmentError> {
    if pool.len() < 2 {
        return Err(TreatmentError::NotEnoughTreatments {
            kind: kind.to_string(),
            needed: 2,
            available: pool.len(),
        });
    }
    let mut drawn: Vec<serde_json::Value> =
        pool.choose_multiple(rng, 2).cloned().collect();
    let second = drawn.pop().unwrap_or_default();
    let first = drawn.pop().unwrap_or_default();
    Ok([first, second])
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn catalog() -> TreatmentCatalog {
        TreatmentCatalog {
            education: vec![
                serde_json::json!({"sector": "ITC", "institution": "College A"}),
                serde_json::json!({"sector": "ITC", "institution": "College B"}),
                serde_json::json!({"sector": "FIN", "institution": "College C"}),
            ],
            work: vec![
                serde_json::json!({"sector": "ITC", "company": "Firm A"}),
                serde_json::json!({"sector": "itc", "company": "Firm B"}),
                serde_json::json!({"sector": "FIN", "company": "Firm C"}),
            ],
        }
    }

    #[test]
    fn test_for_sector_filters_case_insensitively() {
        let scoped = catalog().for_sector("ITC");
        assert_eq!(scoped.education.len(), 2);
        assert_eq!(scoped.work.len(), 2);
    }

    #[test]
    fn test_draw_pairs_are_unique() {
        let scoped = catalog().for_sector("ITC");
        let mut rng = StdRng::seed_from_u64(7);
        let draw = scoped.draw_pairs(&mut rng).expect("draw");
        assert_ne!(draw.education[0], draw.education[1]);
        assert_ne!(draw.work[0], draw.work[1]);
    }

    #[test]
    fn test_draw_fails_on_thin_pool() {
        let scoped = catalog().for_sector("FIN");
        let mut rng = StdRng::seed_from_u64(7);
        let err = scoped.draw_pairs(&mut rng).unwrap_err();
        assert!(matches!(
            err,
            TreatmentError::NotEnoughTreatments { needed: 2, available: 1, .. }
        ));
    }
}

//! Company-name substitution.
//!
//! Treated resumes swap each work-experience company for a researched
//! similar company, one replacement list per treatment type, to reduce the
//! risk of study detection by screening systems. Matching is
//! case-insensitive on the original name; companies without a mapping keep
//! their original name.

use super::TreatmentType;
use async_trait::async_trait;
use std::collections::HashMap;
use tracing::{info, warn};

/// The caller's decision on a proposed company mapping.
#[derive(Debug, Clone)]
pub enum MappingDecision {
    /// Use this (possibly edited) mapping.
    Accept(serde_json::Value),
    /// Regenerate the mapping.
    Retry,
    /// Abandon the file.
    Abort,
}

/// Review hook for proposed company mappings.
///
/// The interactive review step of the original workflow; implementations
/// may veto or edit mappings programmatically.
#[async_trait]
pub trait MappingReview: Send + Sync {
    /// Reviews a proposed mapping.
    async fn review(&self, proposed: &serde_json::Value) -> MappingDecision;
}

/// Accepts every proposed mapping unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAll;

#[async_trait]
impl MappingReview for AcceptAll {
    async fn review(&self, proposed: &serde_json::Value) -> MappingDecision {
        MappingDecision::Accept(proposed.clone())
    }
}

/// Extracts the company/location pairs a research prompt works from.
#[must_use]
pub fn company_location_pairs(resume: &serde_json::Value) -> serde_json::Value {
    let pairs: Vec<serde_json::Value> = resume
        .pointer("/resume_data/work_experience")
        .and_then(|v| v.as_array())
        .map(|jobs| {
            jobs.iter()
                .filter_map(|job| {
                    let company = job.get("company").and_then(|c| c.as_str());
                    let location = job.get("location").and_then(|l| l.as_str());
                    if company.is_none() && location.is_none() {
                        return None;
                    }
                    Some(serde_json::json!({
                        "company": company,
                        "location": location,
                    }))
                })
                .collect()
        })
        .unwrap_or_default();

    serde_json::json!({ "company_location_pairs": pairs })
}

/// Builds the per-type lookup from a mapping document.
///
/// Mapping shape: an array of
/// `{"Original_company": ..., "Similar companies": [{"Type_I": ...}, ...]}`.
fn build_lookup(
    mappings: &serde_json::Value,
    treatment_type: TreatmentType,
) -> HashMap<String, String> {
    let mut lookup = HashMap::new();
    let Some(entries) = mappings.as_array() else {
        warn!("Company mappings are not an array, keeping originals");
        return lookup;
    };

    for entry in entries {
        let Some(original) = entry.get("Original_company").and_then(|c| c.as_str()) else {
            warn!("Mapping entry without 'Original_company', skipping");
            continue;
        };
        let replacement = entry
            .get("Similar companies")
            .and_then(|s| s.as_array())
            .and_then(|candidates| {
                candidates.iter().find_map(|candidate| {
                    candidate
                        .get(treatment_type.as_str())
                        .and_then(|v| v.as_str())
                })
            });
        match replacement {
            Some(replacement) => {
                lookup.insert(original.to_lowercase(), replacement.to_string());
            }
            None => warn!(
                company = original,
                treatment = treatment_type.as_str(),
                "No replacement for treatment type, keeping original"
            ),
        }
    }
    lookup
}

/// Replaces each work-experience company with its mapped similar company.
///
/// Returns a new resume document; companies without a mapping are kept.
#[must_use]
pub fn replace_companies(
    resume: &serde_json::Value,
    mappings: &serde_json::Value,
    treatment_type: TreatmentType,
) -> serde_json::Value {
    let lookup = build_lookup(mappings, treatment_type);
    let mut treated = resume.clone();

    let Some(jobs) = treated
        .pointer_mut("/resume_data/work_experience")
        .and_then(|v| v.as_array_mut())
    else {
        warn!("Resume has no work experience to rewrite");
        return treated;
    };

    let mut replaced = 0_usize;
    for job in jobs {
        let Some(company) = job.get("company").and_then(|c| c.as_str()) else {
            continue;
        };
        if let Some(replacement) = lookup.get(&company.to_lowercase()) {
            job["company"] = serde_json::json!(replacement);
            replaced += 1;
        }
    }
    info!(replaced, treatment = treatment_type.as_str(), "Company replacement done");
    treated
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{sample_company_mappings, sample_resume};
    use pretty_assertions::assert_eq;

    #[test]
    fn test_company_location_pairs() {
        let pairs = company_location_pairs(&sample_resume());
        let list = pairs["company_location_pairs"].as_array().expect("array");
        assert_eq!(list.len(), 2);
        assert_eq!(list[0]["company"], "Northbridge Logistics");
        assert_eq!(list[0]["location"], "Rotterdam");
    }

    #[test]
    fn test_replace_companies_is_case_insensitive() {
        let mut resume = sample_resume();
        resume["resume_data"]["work_experience"][0]["company"] =
            serde_json::json!("NORTHBRIDGE LOGISTICS");

        let treated =
            replace_companies(&resume, &sample_company_mappings(), TreatmentType::TypeI);
        assert_eq!(
            treated["resume_data"]["work_experience"][0]["company"],
            "Lakeside Logistics"
        );
        assert_eq!(
            treated["resume_data"]["work_experience"][1]["company"],
            "Quayside Shipping"
        );
    }

    #[test]
    fn test_replacement_varies_by_treatment_type() {
        let resume = sample_resume();
        let mappings = sample_company_mappings();
        let type_ii = replace_companies(&resume, &mappings, TreatmentType::TypeII);
        let type_iii = replace_companies(&resume, &mappings, TreatmentType::TypeIII);
        assert_eq!(
            type_ii["resume_data"]["work_experience"][0]["company"],
            "Crosstown Freight"
        );
        assert_eq!(
            type_iii["resume_data"]["work_experience"][0]["company"],
            "Beacon Supply Co"
        );
    }

    #[test]
    fn test_unmapped_company_is_kept() {
        let mut resume = sample_resume();
        resume["resume_data"]["work_experience"][1]["company"] =
            serde_json::json!("Unknown Ventures");

        let treated =
            replace_companies(&resume, &sample_company_mappings(), TreatmentType::TypeI);
        assert_eq!(
            treated["resume_data"]["work_experience"][1]["company"],
            "Unknown Ventures"
        );
    }

    #[test]
    fn test_original_resume_is_untouched() {
        let resume = sample_resume();
        let _treated =
            replace_companies(&resume, &sample_company_mappings(), TreatmentType::TypeI);
        assert_eq!(
            resume["resume_data"]["work_experience"][0]["company"],
            "Northbridge Logistics"
        );
    }
}

use super::hard::TUMOR_LOG_10_ODDS_KEY;
use super::{max_element_index, posterior_probability_of_error, required_floats, ArtifactFilter};
use crate::state::FilteringState;
use crate::{VariantRecord, VfilterResult};

pub const SEQUENCING_QUAL_KEY: &str = "SEQQ";

/// Weak tumor evidence: the tumor log odds do not overcome the somatic prior
#[derive(Debug, Default)]
pub struct TumorEvidenceFilter;

impl TumorEvidenceFilter {
    pub fn new() -> Self {
        TumorEvidenceFilter
    }
}

impl ArtifactFilter for TumorEvidenceFilter {
    fn filter_name(&self) -> &str {
        "weak_evidence"
    }

    fn is_technical_artifact(&self) -> bool {
        true
    }

    fn required_annotations(&self) -> &[&str] {
        &[TUMOR_LOG_10_ODDS_KEY]
    }

    fn phred_scaled_posterior_annotation_name(&self) -> Option<&str> {
        Some(SEQUENCING_QUAL_KEY)
    }

    fn description(&self) -> &str {
        "Mutation does not meet likelihood threshold"
    }

    fn calculate_artifact_probability(
        &self,
        record: &VariantRecord,
        state: &FilteringState,
    ) -> VfilterResult<f64> {
        let tumor_lods = required_floats(record, TUMOR_LOG_10_ODDS_KEY)?;
        let tumor_log10_odds = tumor_lods[max_element_index(&tumor_lods)];
        Ok(posterior_probability_of_error(
            tumor_log10_odds,
            state.log10_prior_of_somatic_variant(record),
        ))
    }
}

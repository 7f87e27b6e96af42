use super::ArtifactFilter;
use crate::state::FilteringState;
use crate::{VariantRecord, VfilterResult};

/// Calls phased with a filtered call nearby are likely on the same bad haplotype
pub struct FilteredHaplotypeFilter {
    max_distance_to_filtered_call_on_same_haplotype: u32,
}

impl FilteredHaplotypeFilter {
    pub fn new(max_distance_to_filtered_call_on_same_haplotype: u32) -> Self {
        Self {
            max_distance_to_filtered_call_on_same_haplotype,
        }
    }
}

impl ArtifactFilter for FilteredHaplotypeFilter {
    fn filter_name(&self) -> &str {
        "haplotype"
    }

    fn is_technical_artifact(&self) -> bool {
        false
    }

    fn description(&self) -> &str {
        "Variant near filtered variant on same haplotype."
    }

    fn calculate_artifact_probability(
        &self,
        record: &VariantRecord,
        state: &FilteringState,
    ) -> VfilterResult<f64> {
        let filtered_calls = state.filtered_phased_calls();
        if filtered_calls.is_empty() {
            return Ok(0.0);
        }

        for genotype in state.tumor_genotypes(record) {
            let (phase_id, phased_gt) = match (genotype.phasing_id(), genotype.phased_genotype()) {
                (Some(phase_id), Some(phased_gt)) => (phase_id, phased_gt),
                _ => continue,
            };

            if let Some(filtered_call) = filtered_calls.get(phase_id) {
                if filtered_call.position.abs_diff(record.position())
                    <= self.max_distance_to_filtered_call_on_same_haplotype
                    && filtered_call.phased_genotypes.contains(phased_gt)
                {
                    return Ok(1.0);
                }
            }
        }

        Ok(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_utils::*;
    use super::*;

    #[test]
    fn test_phased_with_filtered_call() {
        let mut state = tumor_normal_state();
        let filter = FilteredHaplotypeFilter::new(100);

        let mut bad = snv_record(&[]);
        bad.variant.pos = 950;
        bad.genotypes = vec![genotype("tumor", &[("PID", "950_A_T"), ("PGT", "0|1")])];

        let mut same_haplotype = snv_record(&[]);
        same_haplotype.genotypes = vec![genotype("tumor", &[("PID", "950_A_T"), ("PGT", "0|1")])];
        assert_eq!(filter.artifact_probability(&same_haplotype, &state), 0.0);

        state.record_filtered_haplotypes(&bad);
        assert_eq!(filter.artifact_probability(&same_haplotype, &state), 1.0);

        let mut other_haplotype = same_haplotype.clone();
        other_haplotype.genotypes = vec![genotype("tumor", &[("PID", "950_A_T"), ("PGT", "1|0")])];
        assert_eq!(filter.artifact_probability(&other_haplotype, &state), 0.0);

        let mut far_away = same_haplotype.clone();
        far_away.variant.pos = 2000;
        assert_eq!(filter.artifact_probability(&far_away, &state), 0.0);
    }
}

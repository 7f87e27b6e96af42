//! Strand artifact filter with a strand artifact prior learned from the calls

use super::{binomial_probability, tumor_strand_counts, ArtifactFilter};
use crate::state::FilteringState;
use crate::{VariantRecord, VfilterResult};

pub const STRAND_QUAL_KEY: &str = "STRANDQ";

/// Fraction of alt reads on the wrong strand under the artifact hypothesis
const ARTIFACT_STRAND_ERROR: f64 = 0.01;
const INITIAL_STRAND_ARTIFACT_PRIOR: f64 = 0.01;
const EM_ITERATIONS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq)]
struct StrandCounts {
    ref_forward: u64,
    ref_reverse: u64,
    alt_forward: u64,
    alt_reverse: u64,
}

impl StrandCounts {
    fn alt_count(&self) -> u64 {
        self.alt_forward + self.alt_reverse
    }

    fn artifact_likelihood(&self) -> f64 {
        let n = self.alt_count();
        0.5 * (binomial_probability(n, self.alt_forward, 1.0 - ARTIFACT_STRAND_ERROR)
            + binomial_probability(n, self.alt_forward, ARTIFACT_STRAND_ERROR))
    }

    /// Real alt reads follow the strand balance of the ref reads
    fn real_likelihood(&self) -> f64 {
        let forward_fraction =
            (self.ref_forward + 1) as f64 / (self.ref_forward + self.ref_reverse + 2) as f64;
        binomial_probability(self.alt_count(), self.alt_forward, forward_fraction)
    }

    fn posterior(&self, prior: f64) -> f64 {
        let artifact = prior * self.artifact_likelihood();
        let real = (1.0 - prior) * self.real_likelihood();
        if artifact + real <= 0.0 {
            return 0.0;
        }
        artifact / (artifact + real)
    }
}

pub struct StrandArtifactFilter {
    strand_artifact_prior: Option<f64>,
    accumulated: Vec<StrandCounts>,
}

impl StrandArtifactFilter {
    pub fn new() -> Self {
        Self {
            strand_artifact_prior: None,
            accumulated: Vec::new(),
        }
    }

    /// Learned prior, if any pass has completed
    pub fn strand_artifact_prior(&self) -> Option<f64> {
        self.strand_artifact_prior
    }

    fn strand_counts(record: &VariantRecord, state: &FilteringState) -> Option<StrandCounts> {
        let [ref_forward, ref_reverse, alt_forward, alt_reverse] =
            tumor_strand_counts(record, state)?;
        let counts = StrandCounts {
            ref_forward: ref_forward.max(0) as u64,
            ref_reverse: ref_reverse.max(0) as u64,
            alt_forward: alt_forward.max(0) as u64,
            alt_reverse: alt_reverse.max(0) as u64,
        };
        (counts.alt_count() > 0).then_some(counts)
    }
}

impl Default for StrandArtifactFilter {
    fn default() -> Self {
        Self::new()
    }
}

impl ArtifactFilter for StrandArtifactFilter {
    fn filter_name(&self) -> &str {
        "strand_bias"
    }

    fn is_technical_artifact(&self) -> bool {
        true
    }

    fn phred_scaled_posterior_annotation_name(&self) -> Option<&str> {
        Some(STRAND_QUAL_KEY)
    }

    fn description(&self) -> &str {
        "Evidence for alt allele comes from one read direction only"
    }

    fn calculate_artifact_probability(
        &self,
        record: &VariantRecord,
        state: &FilteringState,
    ) -> VfilterResult<f64> {
        let prior = self
            .strand_artifact_prior
            .unwrap_or_else(|| state.prior_prob_of_artifact_versus_variant());
        Ok(Self::strand_counts(record, state)
            .map(|counts| counts.posterior(prior))
            .unwrap_or(0.0))
    }

    fn accumulate_data_for_learning(&mut self, record: &VariantRecord, state: &FilteringState) {
        if let Some(counts) = Self::strand_counts(record, state) {
            self.accumulated.push(counts);
        }
    }

    /// EM over this pass's strand counts, always from the same starting prior
    fn learn_parameters(&mut self) {
        if self.accumulated.is_empty() {
            return;
        }

        let mut prior = INITIAL_STRAND_ARTIFACT_PRIOR;
        for _ in 0..EM_ITERATIONS {
            let expected_artifacts: f64 = self.accumulated.iter().map(|c| c.posterior(prior)).sum();
            prior = (expected_artifacts + 1.0) / (self.accumulated.len() as f64 + 2.0);
        }

        log::debug!(
            "Learned strand artifact prior {:.4} from {} calls",
            prior,
            self.accumulated.len()
        );
        self.strand_artifact_prior = Some(prior);
    }

    fn clear_accumulated_data(&mut self) {
        self.accumulated.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_utils::*;
    use super::*;

    fn record_with_sb(sb: &str) -> VariantRecord {
        let mut record = snv_record(&[]);
        record.genotypes = vec![genotype("tumor", &[("SB", sb)])];
        record
    }

    #[test]
    fn test_one_sided_alt_reads_look_like_artifact() {
        let state = tumor_normal_state();
        let filter = StrandArtifactFilter::new();
        let one_sided = filter.artifact_probability(&record_with_sb("20,20,15,0"), &state);
        let balanced = filter.artifact_probability(&record_with_sb("20,20,8,7"), &state);
        assert!(one_sided > 0.5);
        assert!(balanced < 0.01);
        assert!(one_sided > balanced);
    }

    #[test]
    fn test_no_alt_reads() {
        let state = tumor_normal_state();
        let filter = StrandArtifactFilter::new();
        assert_eq!(filter.artifact_probability(&record_with_sb("20,20,0,0"), &state), 0.0);
        assert_eq!(filter.artifact_probability(&snv_record(&[]), &state), 0.0);
    }

    #[test]
    fn test_learning_is_idempotent_after_clear() {
        let state = tumor_normal_state();
        let records = vec![
            record_with_sb("20,20,15,0"),
            record_with_sb("20,20,8,7"),
            record_with_sb("30,10,9,3"),
            record_with_sb("20,20,0,12"),
        ];
        let mut filter = StrandArtifactFilter::new();

        let mut learned = Vec::new();
        for _ in 0..2 {
            filter.clear_accumulated_data();
            for record in &records {
                filter.accumulate_data_for_learning(record, &state);
            }
            filter.learn_parameters();
            learned.push(filter.strand_artifact_prior().unwrap());
        }

        assert_eq!(learned[0], learned[1]);
        // half the calls are one-sided
        assert!(learned[0] > 0.2 && learned[0] < 0.8);
    }

    #[test]
    fn test_learning_without_data_keeps_prior() {
        let mut filter = StrandArtifactFilter::new();
        filter.learn_parameters();
        assert_eq!(filter.strand_artifact_prior(), None);
    }
}

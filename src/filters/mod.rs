//! Artifact filters: each turns one line of evidence into an artifact probability

mod contamination;
mod hard;
mod haplotype;
mod strand;
mod tumor_evidence;

pub use contamination::{read_contamination_table, ContaminationFilter};
pub use hard::{
    BaseQualityFilter, ClusteredEventsFilter, DuplicatedAltReadFilter, MappingQualityFilter,
    MultiallelicFilter, NRatioFilter, PanelOfNormalsFilter, ReadPositionFilter,
    StrictStrandBiasFilter,
};
pub use haplotype::FilteredHaplotypeFilter;
pub use strand::StrandArtifactFilter;
pub use tumor_evidence::TumorEvidenceFilter;

use crate::state::FilteringState;
use crate::{FilterConfig, VariantRecord, VfilterError, VfilterResult};
use statrs::function::factorial::ln_binomial;

/// Per-sample strand counts: ref forward, ref reverse, alt forward, alt reverse
pub const STRAND_BIAS_BY_SAMPLE_KEY: &str = "SB";
pub const ALLELE_DEPTH_KEY: &str = "AD";
pub const ALLELE_FRACTION_KEY: &str = "AF";

/// A filter for one artifact hypothesis.
///
/// Probabilities are pure given the filter's learned state and the run state.
/// Filters that learn from the data override the accumulate / learn / clear
/// hooks; the engine calls `learn_parameters` once after every learning pass,
/// followed by `clear_accumulated_data`.
pub trait ArtifactFilter {
    /// Name written to the FILTER column of rejected records
    fn filter_name(&self) -> &str;

    /// Sequencing or mapping defect, as opposed to a biological confounder
    fn is_technical_artifact(&self) -> bool;

    /// INFO keys that must be present for the probability to be computed
    fn required_annotations(&self) -> &[&str] {
        &[]
    }

    /// INFO key receiving the Phred-scaled artifact probability
    fn phred_scaled_posterior_annotation_name(&self) -> Option<&str> {
        None
    }

    /// Description for the `##FILTER` header line
    fn description(&self) -> &str;

    fn calculate_artifact_probability(
        &self,
        record: &VariantRecord,
        state: &FilteringState,
    ) -> VfilterResult<f64>;

    fn accumulate_data_for_learning(&mut self, _record: &VariantRecord, _state: &FilteringState) {}

    fn learn_parameters(&mut self) {}

    fn clear_accumulated_data(&mut self) {}

    fn has_required_annotations(&self, record: &VariantRecord) -> bool {
        self.required_annotations()
            .iter()
            .all(|key| record.has_attribute(key))
    }

    /// Artifact probability as seen by the engine: zero when the record lacks
    /// the evidence this filter needs
    fn artifact_probability(&self, record: &VariantRecord, state: &FilteringState) -> f64 {
        if !self.has_required_annotations(record) {
            return 0.0;
        }

        match self.calculate_artifact_probability(record, state) {
            Ok(probability) => probability.clamp(0.0, 1.0),
            Err(e) => {
                log::debug!(
                    "{} filter skipped at {}:{}: {}",
                    self.filter_name(),
                    record.variant.chrom,
                    record.variant.pos,
                    e
                );
                0.0
            }
        }
    }
}

/// Build the default filter ensemble
pub fn build_filters(config: &FilterConfig) -> VfilterResult<Vec<Box<dyn ArtifactFilter>>> {
    let contamination =
        ContaminationFilter::from_tables(&config.contamination_tables, config.contamination_estimate)?;

    let filters: Vec<Box<dyn ArtifactFilter>> = vec![
        Box::new(TumorEvidenceFilter::new()),
        Box::new(BaseQualityFilter::new(config.min_median_base_quality)),
        Box::new(MappingQualityFilter::new(config.min_median_mapping_quality)),
        Box::new(DuplicatedAltReadFilter::new(config.unique_alt_read_count)),
        Box::new(StrandArtifactFilter::new()),
        Box::new(contamination),
        Box::new(PanelOfNormalsFilter::new()),
        Box::new(NRatioFilter::new(config.max_n_ratio)),
        Box::new(StrictStrandBiasFilter::new(config.min_reads_on_each_strand)),
        Box::new(ReadPositionFilter::new(config.min_median_read_position)),
        Box::new(ClusteredEventsFilter::new(config.max_events_in_region)),
        Box::new(MultiallelicFilter::new(
            config.num_alt_alleles_threshold,
            config.tumor_lod_to_emit,
        )),
        Box::new(FilteredHaplotypeFilter::new(
            config.max_distance_to_filtered_call_on_same_haplotype,
        )),
    ];

    Ok(filters)
}

/// Probability that a call is a sequencing error given the log10 odds of a
/// real variant and the log10 prior of a variant
pub fn posterior_probability_of_error(log10_odds: f64, log10_prior_of_variant: f64) -> f64 {
    1.0 / (1.0 + 10f64.powf(log10_odds + log10_prior_of_variant))
}

/// Binomial probability of `k` successes in `n` trials
pub fn binomial_probability(n: u64, k: u64, p: f64) -> f64 {
    if k > n {
        return 0.0;
    }
    if p <= 0.0 {
        return if k == 0 { 1.0 } else { 0.0 };
    }
    if p >= 1.0 {
        return if k == n { 1.0 } else { 0.0 };
    }
    (ln_binomial(n, k) + k as f64 * p.ln() + (n - k) as f64 * (1.0 - p).ln()).exp()
}

/// Median of the posteriors, each weighted by its depth
pub fn weighted_median_posterior_probability(depths_and_posteriors: &mut [(u64, f64)]) -> f64 {
    let total_depth: u64 = depths_and_posteriors.iter().map(|(depth, _)| depth).sum();
    if depths_and_posteriors.is_empty() {
        return 0.0;
    }
    depths_and_posteriors.sort_by(|a, b| a.1.total_cmp(&b.1));

    let mut cumulative_depth = 0;
    for &(depth, posterior) in depths_and_posteriors.iter() {
        cumulative_depth += depth;
        if 2 * cumulative_depth >= total_depth {
            return posterior;
        }
    }
    depths_and_posteriors[depths_and_posteriors.len() - 1].1
}

/// Read an INFO list attribute, failing when it is absent or malformed
pub(crate) fn required_floats(record: &VariantRecord, key: &str) -> VfilterResult<Vec<f64>> {
    record
        .attribute_as_floats(key)
        .filter(|values| !values.is_empty())
        .ok_or_else(|| VfilterError::MissingAnnotation(key.to_string()))
}

pub(crate) fn required_ints(record: &VariantRecord, key: &str) -> VfilterResult<Vec<i64>> {
    record
        .attribute_as_ints(key)
        .filter(|values| !values.is_empty())
        .ok_or_else(|| VfilterError::MissingAnnotation(key.to_string()))
}

/// Index of the largest value, ties going to the first
pub(crate) fn max_element_index(values: &[f64]) -> usize {
    values
        .iter()
        .enumerate()
        .fold((0, f64::NEG_INFINITY), |(best, best_value), (i, &v)| {
            if v > best_value {
                (i, v)
            } else {
                (best, best_value)
            }
        })
        .0
}

/// Sum SB over tumor samples
pub(crate) fn tumor_strand_counts(record: &VariantRecord, state: &FilteringState) -> Option<[i64; 4]> {
    let mut totals = [0i64; 4];
    let mut found = false;
    for genotype in state.tumor_genotypes(record) {
        if let Some(counts) = genotype.get_ints(STRAND_BIAS_BY_SAMPLE_KEY) {
            if counts.len() == 4 {
                for (total, count) in totals.iter_mut().zip(counts) {
                    *total += count;
                }
                found = true;
            }
        }
    }
    found.then_some(totals)
}

#[cfg(test)]
pub(crate) mod test_utils {
    use crate::{FilterConfig, Genotype, Variant, VariantRecord};
    use crate::state::FilteringState;
    use std::collections::HashMap;

    pub fn snv_record(info: &[(&str, &str)]) -> VariantRecord {
        let mut record = VariantRecord::new(Variant::new(
            "chr1".to_string(),
            1000,
            "A".to_string(),
            vec!["T".to_string()],
        ));
        for (key, value) in info {
            record.set_attribute(key, Some(value.to_string()));
        }
        record
    }

    pub fn genotype(sample: &str, fields: &[(&str, &str)]) -> Genotype {
        let fields: HashMap<String, String> = fields
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Genotype::new(sample.to_string(), fields)
    }

    pub fn tumor_normal_state() -> FilteringState {
        FilteringState::new(
            &FilterConfig::default(),
            ["normal".to_string()].into_iter().collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::test_utils::*;
    use super::*;

    struct NeedsTlod;

    impl ArtifactFilter for NeedsTlod {
        fn filter_name(&self) -> &str {
            "needs_tlod"
        }
        fn is_technical_artifact(&self) -> bool {
            true
        }
        fn required_annotations(&self) -> &[&str] {
            &["TLOD"]
        }
        fn description(&self) -> &str {
            "test"
        }
        fn calculate_artifact_probability(
            &self,
            _record: &VariantRecord,
            _state: &FilteringState,
        ) -> VfilterResult<f64> {
            Ok(1.5)
        }
    }

    #[test]
    fn test_missing_required_annotation_gives_zero() {
        let state = tumor_normal_state();
        let filter = NeedsTlod;
        assert_eq!(filter.artifact_probability(&snv_record(&[]), &state), 0.0);
        // probabilities are clamped to [0, 1]
        assert_eq!(
            filter.artifact_probability(&snv_record(&[("TLOD", "5.0")]), &state),
            1.0
        );
    }

    #[test]
    fn test_posterior_probability_of_error() {
        assert!((posterior_probability_of_error(0.0, 0.0) - 0.5).abs() < 1e-12);
        assert!(posterior_probability_of_error(10.0, -6.0) < 1e-3);
        assert!(posterior_probability_of_error(2.0, -6.0) > 0.99);
    }

    #[test]
    fn test_binomial_probability() {
        assert!((binomial_probability(2, 1, 0.5) - 0.5).abs() < 1e-12);
        assert!((binomial_probability(10, 0, 0.1) - 0.9f64.powi(10)).abs() < 1e-12);
        assert_eq!(binomial_probability(3, 4, 0.5), 0.0);
        assert_eq!(binomial_probability(5, 0, 0.0), 1.0);
        assert_eq!(binomial_probability(5, 5, 1.0), 1.0);
    }

    #[test]
    fn test_weighted_median() {
        assert_eq!(weighted_median_posterior_probability(&mut []), 0.0);
        let mut data = vec![(10, 0.9), (1, 0.1), (1, 0.2)];
        assert_eq!(weighted_median_posterior_probability(&mut data), 0.9);
        let mut data = vec![(5, 0.1), (5, 0.8)];
        assert_eq!(weighted_median_posterior_probability(&mut data), 0.1);
    }

    #[test]
    fn test_max_element_index() {
        assert_eq!(max_element_index(&[1.0, 3.0, 2.0]), 1);
        assert_eq!(max_element_index(&[2.0, 2.0]), 0);
    }

    #[test]
    fn test_tumor_strand_counts_skips_normals() {
        let state = tumor_normal_state();
        let mut record = snv_record(&[]);
        assert_eq!(tumor_strand_counts(&record, &state), None);

        record.genotypes = vec![
            genotype("tumor", &[("SB", "10,12,3,4")]),
            genotype("normal", &[("SB", "20,20,0,0")]),
        ];
        assert_eq!(tumor_strand_counts(&record, &state), Some([10, 12, 3, 4]));
    }

    #[test]
    fn test_build_filters() {
        let filters = build_filters(&FilterConfig::default()).unwrap();
        let names: Vec<&str> = filters.iter().map(|f| f.filter_name()).collect();
        assert_eq!(names.len(), 13);
        assert!(names.contains(&"weak_evidence"));
        assert!(names.contains(&"contamination"));
        assert!(names.contains(&"haplotype"));
        assert!(names.contains(&"panel_of_normals"));
        assert!(names.contains(&"n_ratio"));
    }
}

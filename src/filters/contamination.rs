//! Cross-sample contamination filter

use super::{
    binomial_probability, weighted_median_posterior_probability, ArtifactFilter,
    ALLELE_DEPTH_KEY, ALLELE_FRACTION_KEY,
};
use crate::state::FilteringState;
use crate::utils::validate_file_readable;
use crate::{VariantRecord, VfilterError, VfilterResult};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Negative log10 population allele frequencies, one per alt allele
pub const POPULATION_AF_KEY: &str = "POPAF";
pub const CONTAMINATION_QUAL_KEY: &str = "CONTQ";

/// One row of a contamination table
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ContaminationRecord {
    pub sample: String,
    pub contamination: f64,
    pub error: f64,
}

/// Read the first record of a tab-separated contamination table
pub fn read_contamination_table<P: AsRef<Path>>(path: P) -> VfilterResult<ContaminationRecord> {
    validate_file_readable(&path)?;

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .comment(Some(b'#'))
        .from_path(&path)?;

    match reader.deserialize::<ContaminationRecord>().next() {
        Some(record) => Ok(record?),
        None => Err(VfilterError::InvalidStatistics(format!(
            "contamination table {} has no records",
            path.as_ref().display()
        ))),
    }
}

pub struct ContaminationFilter {
    contamination_by_sample: HashMap<String, f64>,
    default_contamination: f64,
}

impl ContaminationFilter {
    pub fn new(contamination_by_sample: HashMap<String, f64>, default_contamination: f64) -> Self {
        Self {
            contamination_by_sample,
            default_contamination,
        }
    }

    pub fn from_tables(tables: &[PathBuf], default_contamination: f64) -> VfilterResult<Self> {
        let mut contamination_by_sample = HashMap::new();
        for table in tables {
            let record = read_contamination_table(table)?;
            log::info!(
                "Contamination of sample {}: {:.4} (error {:.4})",
                record.sample,
                record.contamination,
                record.error
            );
            contamination_by_sample.insert(record.sample, record.contamination);
        }
        Ok(Self::new(contamination_by_sample, default_contamination))
    }
}

impl ArtifactFilter for ContaminationFilter {
    fn filter_name(&self) -> &str {
        "contamination"
    }

    fn is_technical_artifact(&self) -> bool {
        false
    }

    fn required_annotations(&self) -> &[&str] {
        &[POPULATION_AF_KEY]
    }

    fn phred_scaled_posterior_annotation_name(&self) -> Option<&str> {
        Some(CONTAMINATION_QUAL_KEY)
    }

    fn description(&self) -> &str {
        "contamination"
    }

    fn calculate_artifact_probability(
        &self,
        record: &VariantRecord,
        state: &FilteringState,
    ) -> VfilterResult<f64> {
        let somatic_prior_prob = 10f64.powf(state.log10_prior_of_somatic_variant(record));
        let negative_log10_allele_frequencies = record
            .attribute_as_floats(POPULATION_AF_KEY)
            .ok_or_else(|| VfilterError::MissingAnnotation(POPULATION_AF_KEY.to_string()))?;

        let mut depths_and_posteriors = Vec::new();

        for genotype in state.tumor_genotypes(record) {
            let ads = match genotype.get_ints(ALLELE_DEPTH_KEY) {
                Some(ads) if ads.len() > 1 => ads,
                _ => continue,
            };
            let contamination = self
                .contamination_by_sample
                .get(&genotype.sample)
                .copied()
                .unwrap_or(self.default_contamination);

            let allele_fractions = genotype
                .get_floats(ALLELE_FRACTION_KEY)
                .unwrap_or_else(|| vec![1.0]);
            let max_fraction_index = super::max_element_index(&allele_fractions);

            // AD covers all alleles, AF only the alts
            let alt_count = ads.get(max_fraction_index + 1).copied().unwrap_or(0).max(0) as u64;
            let depth = ads.iter().map(|&ad| ad.max(0) as u64).sum::<u64>();
            let allele_frequency = negative_log10_allele_frequencies
                .get(max_fraction_index)
                .map(|x| 10f64.powf(-x))
                .unwrap_or(0.0);

            let somatic_likelihood = 1.0 / (depth + 1) as f64;

            let single_contaminant_likelihood = 2.0
                * allele_frequency
                * (1.0 - allele_frequency)
                * binomial_probability(depth, alt_count, contamination / 2.0)
                + allele_frequency.powi(2) * binomial_probability(depth, alt_count, contamination);
            let many_contaminant_likelihood =
                binomial_probability(depth, alt_count, contamination * allele_frequency);
            let contaminant_likelihood =
                single_contaminant_likelihood.max(many_contaminant_likelihood);

            let contaminant_weight = (1.0 - somatic_prior_prob) * contaminant_likelihood;
            let posterior_prob_of_contamination =
                contaminant_weight / (contaminant_weight + somatic_prior_prob * somatic_likelihood);

            depths_and_posteriors.push((alt_count, posterior_prob_of_contamination));
        }

        Ok(weighted_median_posterior_probability(
            &mut depths_and_posteriors,
        ))
    }
}

//! Run state shared with every filter: configuration, learned parameters,
//! per-pass accumulators and the register of filtered phased calls

use crate::threshold::{
    calculate_threshold_based_on_false_discovery_rate, calculate_threshold_based_on_optimal_f_score,
};
use crate::{
    FilterConfig, Genotype, SampleRole, ThresholdStrategy, VariantRecord, VariantType,
    VfilterError, VfilterResult, FIRST_PASS_THRESHOLD,
};
use std::collections::{BTreeSet, HashMap, HashSet};

/// log10(1/3): a somatic SNV prior is spread over the three possible alt bases
const LOG10_ONE_THIRD: f64 = -0.47712125471966244;

/// Position and phased genotypes of a filtered call within one phase group
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilteredPhasedCall {
    pub position: u32,
    pub phased_genotypes: BTreeSet<String>,
}

#[derive(Debug, Clone, Default)]
struct PassAccumulator {
    artifact_probabilities: Vec<f64>,
    real_variant_count: f64,
    real_snv_count: f64,
    real_indel_count: f64,
    technical_artifact_count: f64,
}

/// Mutable state of one filtering run.
///
/// Learned parameters survive across passes and are only overwritten by
/// [`FilteringState::learn_parameters`]; the accumulated counts start from
/// zero on every pass.
#[derive(Debug, Clone)]
pub struct FilteringState {
    threshold_strategy: ThresholdStrategy,
    posterior_threshold: f64,
    max_false_discovery_rate: f64,
    f_score_beta: f64,
    normal_samples: HashSet<String>,
    total_callable_sites: Option<u64>,

    log10_prior_of_somatic_snv: f64,
    log10_prior_of_somatic_indel: f64,
    prior_prob_of_artifact_versus_variant: f64,
    artifact_probability_threshold: f64,

    // for each phase id, the position and phased genotypes of the last filtered call
    filtered_phased_calls: HashMap<String, FilteredPhasedCall>,

    accumulator: PassAccumulator,
}

impl FilteringState {
    pub fn new(config: &FilterConfig, normal_samples: HashSet<String>) -> Self {
        Self {
            threshold_strategy: config.threshold_strategy,
            posterior_threshold: config.posterior_threshold,
            max_false_discovery_rate: config.max_false_discovery_rate,
            f_score_beta: config.f_score_beta,
            normal_samples,
            total_callable_sites: None,
            log10_prior_of_somatic_snv: config.log10_prior_of_somatic_snv,
            log10_prior_of_somatic_indel: config.log10_prior_of_somatic_indel,
            prior_prob_of_artifact_versus_variant: config.initial_prior_of_artifact_versus_variant,
            artifact_probability_threshold: FIRST_PASS_THRESHOLD,
            filtered_phased_calls: HashMap::new(),
            accumulator: PassAccumulator::default(),
        }
    }

    /// Enable re-estimation of the somatic priors from the number of callable sites
    pub fn set_total_callable_sites(&mut self, callable_sites: u64) -> VfilterResult<()> {
        if callable_sites == 0 {
            return Err(VfilterError::InvalidStatistics(
                "number of callable sites must be positive".to_string(),
            ));
        }
        self.total_callable_sites = Some(callable_sites);
        Ok(())
    }

    pub fn total_callable_sites(&self) -> Option<u64> {
        self.total_callable_sites
    }

    pub fn normal_samples(&self) -> &HashSet<String> {
        &self.normal_samples
    }

    pub fn sample_role(&self, genotype: &Genotype) -> SampleRole {
        if self.normal_samples.contains(&genotype.sample) {
            SampleRole::Normal
        } else {
            SampleRole::Tumor
        }
    }

    pub fn is_normal(&self, genotype: &Genotype) -> bool {
        self.sample_role(genotype) == SampleRole::Normal
    }

    pub fn tumor_genotypes<'a>(
        &'a self,
        record: &'a VariantRecord,
    ) -> impl Iterator<Item = &'a Genotype> + 'a {
        record.genotypes.iter().filter(move |g| !self.is_normal(g))
    }

    pub fn artifact_probability_threshold(&self) -> f64 {
        self.artifact_probability_threshold
    }

    pub fn prior_prob_of_artifact_versus_variant(&self) -> f64 {
        self.prior_prob_of_artifact_versus_variant
    }

    pub fn log10_prior_of_somatic_snv(&self) -> f64 {
        self.log10_prior_of_somatic_snv
    }

    pub fn log10_prior_of_somatic_indel(&self) -> f64 {
        self.log10_prior_of_somatic_indel
    }

    pub fn log10_prior_of_somatic_variant(&self, record: &VariantRecord) -> f64 {
        match record.variant.variant_type() {
            VariantType::Snv => LOG10_ONE_THIRD + self.log10_prior_of_somatic_snv,
            VariantType::Indel => self.log10_prior_of_somatic_indel,
        }
    }

    pub fn filtered_phased_calls(&self) -> &HashMap<String, FilteredPhasedCall> {
        &self.filtered_phased_calls
    }

    /// Remember the phased tumor genotypes of a call that currently fails filtering
    pub fn record_filtered_haplotypes(&mut self, record: &VariantRecord) {
        let mut phased_gts_by_phase_id: HashMap<String, BTreeSet<String>> = HashMap::new();

        for genotype in record.genotypes.iter() {
            if self.normal_samples.contains(&genotype.sample) {
                continue;
            }
            if let (Some(phase_id), Some(phased_gt)) =
                (genotype.phasing_id(), genotype.phased_genotype())
            {
                phased_gts_by_phase_id
                    .entry(phase_id.to_string())
                    .or_default()
                    .insert(phased_gt.to_string());
            }
        }

        for (phase_id, phased_genotypes) in phased_gts_by_phase_id {
            self.filtered_phased_calls.insert(
                phase_id,
                FilteredPhasedCall {
                    position: record.position(),
                    phased_genotypes,
                },
            );
        }
    }

    pub fn add_artifact_probability(&mut self, probability: f64) {
        self.accumulator.artifact_probabilities.push(probability);
    }

    pub fn add_real_variant_count(&mut self, count: f64, variant_type: VariantType) {
        self.accumulator.real_variant_count += count;
        match variant_type {
            VariantType::Snv => self.accumulator.real_snv_count += count,
            VariantType::Indel => self.accumulator.real_indel_count += count,
        }
    }

    pub fn add_technical_artifact_count(&mut self, count: f64) {
        self.accumulator.technical_artifact_count += count;
    }

    pub fn real_variant_count(&self) -> f64 {
        self.accumulator.real_variant_count
    }

    pub fn technical_artifact_count(&self) -> f64 {
        self.accumulator.technical_artifact_count
    }

    pub fn accumulated_artifact_probabilities(&self) -> &[f64] {
        &self.accumulator.artifact_probabilities
    }

    /// Update the global parameters from this pass and recalibrate the threshold
    pub fn learn_parameters(&mut self) -> VfilterResult<()> {
        let acc = &self.accumulator;
        self.prior_prob_of_artifact_versus_variant = (acc.technical_artifact_count + 1.0)
            / (acc.real_variant_count + acc.technical_artifact_count + 2.0);

        if let Some(callable_sites) = self.total_callable_sites {
            let callable_sites = callable_sites as f64;
            // a pass without real variants of a type keeps that type's prior
            if acc.real_snv_count > 0.0 {
                self.log10_prior_of_somatic_snv = (acc.real_snv_count / callable_sites).log10();
            } else {
                log::warn!("No real SNVs in this pass; keeping the log10 SNV prior");
            }
            if acc.real_indel_count > 0.0 {
                self.log10_prior_of_somatic_indel = (acc.real_indel_count / callable_sites).log10();
            } else {
                log::warn!("No real indels in this pass; keeping the log10 indel prior");
            }
        }

        self.adjust_threshold()?;

        log::debug!(
            "Learned prior of artifact {:.4}, log10 SNV prior {:.3}, log10 indel prior {:.3}, threshold {:.4}",
            self.prior_prob_of_artifact_versus_variant,
            self.log10_prior_of_somatic_snv,
            self.log10_prior_of_somatic_indel,
            self.artifact_probability_threshold
        );

        Ok(())
    }

    fn adjust_threshold(&mut self) -> VfilterResult<()> {
        let posteriors = &mut self.accumulator.artifact_probabilities;
        self.artifact_probability_threshold = match self.threshold_strategy {
            ThresholdStrategy::Constant => self.posterior_threshold,
            ThresholdStrategy::FalseDiscoveryRate => {
                calculate_threshold_based_on_false_discovery_rate(
                    posteriors,
                    self.max_false_discovery_rate,
                )?
            }
            ThresholdStrategy::OptimalFScore => {
                calculate_threshold_based_on_optimal_f_score(posteriors, self.f_score_beta)?
            }
        };
        Ok(())
    }

    /// Reset the per-pass accumulators; the next pass must not see this pass's data
    pub fn clear_accumulated_data(&mut self) {
        self.accumulator = PassAccumulator::default();
    }
}

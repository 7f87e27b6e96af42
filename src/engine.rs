//! The filtering engine: learning passes over all calls followed by a
//! decision pass that applies the calibrated threshold

use crate::combine::{combine_artifact_probabilities, ArtifactProbabilities};
use crate::filters::{build_filters, ArtifactFilter};
use crate::state::FilteringState;
use crate::stats::{write_filtering_stats, FilteringSummary, OutputStats};
use crate::utils::{error_prob_to_qual, log_progress, Timer};
use crate::vcf::{RecordSink, RecordSource, VcfFile, VcfHeader, VcfWriter};
use crate::{FilterConfig, VariantRecord, VfilterError, VfilterResult, EPSILON};
use std::path::Path;

const FILTERING_STATUS_KEY: &str = "filtering_status";

/// Validate filtering configuration parameters
pub fn validate_filter_config(config: &FilterConfig) -> VfilterResult<()> {
    if !(0.0..=1.0).contains(&config.posterior_threshold) {
        return Err(VfilterError::InvalidConfig(
            "posterior threshold must be between 0 and 1".to_string(),
        ));
    }

    if !(config.max_false_discovery_rate >= 0.0) {
        return Err(VfilterError::InvalidConfig(
            "maximum false discovery rate must be non-negative".to_string(),
        ));
    }

    if !(config.f_score_beta >= 0.0) {
        return Err(VfilterError::InvalidConfig(
            "F-score beta must be non-negative".to_string(),
        ));
    }

    if config.initial_prior_of_artifact_versus_variant <= 0.0
        || config.initial_prior_of_artifact_versus_variant >= 1.0
    {
        return Err(VfilterError::InvalidConfig(
            "initial prior of artifact versus variant must be between 0 and 1".to_string(),
        ));
    }

    if config.log10_prior_of_somatic_snv > 0.0 || config.log10_prior_of_somatic_indel > 0.0 {
        return Err(VfilterError::InvalidConfig(
            "log10 somatic priors must not be positive".to_string(),
        ));
    }

    if !(0.0..=1.0).contains(&config.contamination_estimate) {
        return Err(VfilterError::InvalidConfig(
            "contamination estimate must be between 0 and 1".to_string(),
        ));
    }

    if !(config.max_n_ratio > 0.0) {
        return Err(VfilterError::InvalidConfig(
            "maximum N ratio must be positive".to_string(),
        ));
    }

    if config.num_learning_passes == 0 {
        return Err(VfilterError::InvalidConfig(
            "at least one learning pass is required".to_string(),
        ));
    }

    Ok(())
}

/// Owns the filters and the run state for the duration of a run
pub struct FilteringEngine {
    filters: Vec<Box<dyn ArtifactFilter>>,
    state: FilteringState,
    output_stats: OutputStats,
}

impl FilteringEngine {
    pub fn new(filters: Vec<Box<dyn ArtifactFilter>>, state: FilteringState) -> Self {
        let output_stats = OutputStats::new(filters.len());
        Self {
            filters,
            state,
            output_stats,
        }
    }

    /// Build the default filter ensemble; normal samples come from the header
    pub fn from_config(config: &FilterConfig, header: &VcfHeader) -> VfilterResult<Self> {
        validate_filter_config(config)?;

        let normal_samples = header.normal_samples();
        if normal_samples.is_empty() {
            log::info!("No normal samples declared in the VCF header; treating all samples as tumor");
        } else {
            log::info!("Normal samples: {:?}", normal_samples);
        }

        let filters = build_filters(config)?;
        let state = FilteringState::new(config, normal_samples);
        Ok(Self::new(filters, state))
    }

    pub fn filter_names(&self) -> Vec<&str> {
        self.filters.iter().map(|f| f.filter_name()).collect()
    }

    pub fn state(&self) -> &FilteringState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut FilteringState {
        &mut self.state
    }

    pub fn output_stats(&self) -> &OutputStats {
        &self.output_stats
    }

    /// Artifact probability of every filter, in filter order
    fn artifact_probabilities(&self, record: &VariantRecord) -> Vec<f64> {
        self.filters
            .iter()
            .map(|f| f.artifact_probability(record, &self.state))
            .collect()
    }

    fn combine(&self, probabilities: &[f64]) -> ArtifactProbabilities {
        combine_artifact_probabilities(
            self.filters
                .iter()
                .zip(probabilities)
                .map(|(f, &p)| (f.is_technical_artifact(), p)),
        )
    }

    /// Learning-pass step for one record
    pub fn accumulate_data(&mut self, record: &VariantRecord) {
        for filter in self.filters.iter_mut() {
            filter.accumulate_data_for_learning(record, &self.state);
        }

        let probabilities = self.artifact_probabilities(record);
        let combined = self.combine(&probabilities);

        self.state
            .add_real_variant_count(1.0 - combined.overall, record.variant.variant_type());
        self.state.add_technical_artifact_count(combined.technical);

        if combined.overall > self.state.artifact_probability_threshold() - EPSILON {
            self.state.record_filtered_haplotypes(record);
        }

        self.state.add_artifact_probability(combined.overall);
    }

    /// End of a learning pass: learn filter and global parameters, recalibrate
    /// the threshold, then drop everything accumulated during the pass
    pub fn learn_parameters(&mut self) -> VfilterResult<()> {
        for filter in self.filters.iter_mut() {
            filter.learn_parameters();
        }

        self.state.learn_parameters()?;
        self.clear_accumulated_data();
        Ok(())
    }

    pub fn clear_accumulated_data(&mut self) {
        for filter in self.filters.iter_mut() {
            filter.clear_accumulated_data();
        }
        self.state.clear_accumulated_data();
    }

    /// Decide one record and return the annotated copy
    pub fn apply_filters(&mut self, record: &VariantRecord) -> VariantRecord {
        let mut output = record.clone();
        output.filters = Vec::new();

        let probabilities = self.artifact_probabilities(record);
        let overall = self.combine(&probabilities).overall;
        let threshold = self.state.artifact_probability_threshold();
        let filtered = overall > threshold - EPSILON;

        self.output_stats
            .record_call(filtered, overall, &probabilities, threshold);

        for (filter, &probability) in self.filters.iter().zip(&probabilities) {
            if let Some(annotation) = filter.phred_scaled_posterior_annotation_name() {
                if filter.has_required_annotations(record) {
                    let qual = error_prob_to_qual(probability) as i64;
                    output.set_attribute(annotation, Some(qual.to_string()));
                }
            }

            // a filter clearing the threshold implies the record is filtered,
            // since the overall probability is at least every filter's probability
            if filtered && probability > EPSILON && probability > threshold - EPSILON {
                output.filters.push(filter.filter_name().to_string());
            }
        }

        output
    }

    /// One learning pass over all records; returns the number of records seen
    pub fn learning_pass<S: RecordSource + ?Sized>(&mut self, source: &S) -> VfilterResult<usize> {
        self.clear_accumulated_data();

        let mut count = 0;
        for record in source.records()? {
            self.accumulate_data(&record?);
            count += 1;
        }

        self.learn_parameters()?;
        Ok(count)
    }

    /// The decision pass; learned parameters are no longer updated
    pub fn decision_pass<S, W>(&mut self, source: &S, sink: &mut W) -> VfilterResult<usize>
    where
        S: RecordSource + ?Sized,
        W: RecordSink + ?Sized,
    {
        self.output_stats.clear();

        let mut count = 0;
        for record in source.records()? {
            let filtered = self.apply_filters(&record?);
            sink.write_record(&filtered)?;
            count += 1;
        }
        Ok(count)
    }

    /// Run all learning passes and the decision pass
    pub fn run<S, W>(
        &mut self,
        source: &S,
        sink: &mut W,
        num_learning_passes: usize,
    ) -> VfilterResult<FilteringSummary>
    where
        S: RecordSource + ?Sized,
        W: RecordSink + ?Sized,
    {
        let total_passes = num_learning_passes + 1;

        for pass in 0..num_learning_passes {
            let count = self.learning_pass(source)?;
            log::info!(
                "Learning pass {} over {} calls: threshold {:.4}, prior of artifact {:.4}",
                pass + 1,
                count,
                self.state.artifact_probability_threshold(),
                self.state.prior_prob_of_artifact_versus_variant()
            );
            log_progress(pass + 1, total_passes, "Filtering passes");
        }

        let count = self.decision_pass(source, sink)?;
        log_progress(total_passes, total_passes, "Filtering passes");

        let summary = self.filtering_summary();
        log::info!(
            "Filtered {} calls: {} pass at threshold {:.4}",
            count,
            summary.passing_calls,
            summary.threshold
        );
        Ok(summary)
    }

    pub fn filtering_summary(&self) -> FilteringSummary {
        self.output_stats.summarize(
            &self.filter_names(),
            self.state.artifact_probability_threshold(),
        )
    }

    pub fn write_filtering_stats(&self, output_path: &Path) -> VfilterResult<()> {
        write_filtering_stats(&self.filtering_summary(), output_path)
    }

    /// Input header plus the FILTER and INFO lines written by the decision pass
    pub fn output_header(&self, header: &VcfHeader) -> VcfHeader {
        let mut output = header.clone();
        for filter in &self.filters {
            output.add_filter_line(filter.filter_name(), filter.description());
            if let Some(annotation) = filter.phred_scaled_posterior_annotation_name() {
                output.add_info_line(
                    annotation,
                    "1",
                    "Integer",
                    &format!(
                        "Phred-scaled quality that the call is not a {} artifact",
                        filter.filter_name()
                    ),
                );
            }
        }
        output.add_meta_line(
            FILTERING_STATUS_KEY,
            "Calls are labeled with the list of failed filters, or PASS",
        );
        output
    }
}

/// Filter a VCF on disk, writing the filtered VCF to `output_path`.
///
/// The input is reopened for each pass. When `callable_sites` is given the
/// somatic priors are re-estimated after every learning pass.
pub fn filter_vcf<P: AsRef<Path>, Q: AsRef<Path>>(
    input_path: P,
    output_path: Q,
    config: &FilterConfig,
    callable_sites: Option<u64>,
) -> VfilterResult<FilteringEngine> {
    let input = VcfFile::open(&input_path)?;
    let mut engine = FilteringEngine::from_config(config, input.header())?;
    if let Some(callable_sites) = callable_sites {
        engine.state_mut().set_total_callable_sites(callable_sites)?;
    }

    let header = engine.output_header(input.header());
    let mut writer = VcfWriter::create(&output_path, &header)?;

    {
        let _timer = Timer::new("Filtering variant calls");
        engine.run(&input, &mut writer, config.num_learning_passes)?;
    }
    writer.finish()?;

    Ok(engine)
}

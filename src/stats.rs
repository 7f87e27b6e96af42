//! Filtering statistics: the callable-sites input table and the summary of the decision pass

use crate::utils::{validate_file_readable, TextWriter};
use crate::{VfilterError, VfilterResult, EPSILON};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::Path;

/// Statistic holding the number of callable sites
pub const CALLABLE_SITES_NAME: &str = "callable";

#[derive(Debug, Deserialize)]
struct StatisticRecord {
    statistic: String,
    value: f64,
}

/// Read the total number of callable sites from a `statistic\tvalue` table
pub fn read_callable_sites<P: AsRef<Path>>(path: P) -> VfilterResult<u64> {
    validate_file_readable(&path)?;

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .comment(Some(b'#'))
        .from_path(&path)?;

    for result in reader.deserialize::<StatisticRecord>() {
        let record = result?;
        if record.statistic == CALLABLE_SITES_NAME {
            if !record.value.is_finite() || record.value < 1.0 {
                return Err(VfilterError::InvalidStatistics(format!(
                    "invalid number of callable sites: {}",
                    record.value
                )));
            }
            return Ok(record.value.round() as u64);
        }
    }

    Err(VfilterError::InvalidStatistics(format!(
        "statistic '{}' not found in {}",
        CALLABLE_SITES_NAME,
        path.as_ref().display()
    )))
}

/// Expected true positives, false positives and false negatives of the
/// decision pass, overall and attributed to each filter
#[derive(Debug, Clone, PartialEq)]
pub struct OutputStats {
    pass: usize,
    true_positives: f64,
    false_positives: f64,
    false_negatives: f64,
    filter_false_positives: Vec<f64>,
    filter_false_negatives: Vec<f64>,
}

impl OutputStats {
    pub fn new(num_filters: usize) -> Self {
        Self {
            pass: 0,
            true_positives: 0.0,
            false_positives: 0.0,
            false_negatives: 0.0,
            filter_false_positives: vec![0.0; num_filters],
            filter_false_negatives: vec![0.0; num_filters],
        }
    }

    pub fn clear(&mut self) {
        *self = Self::new(self.filter_false_positives.len());
    }

    /// Record one call; `filter_probabilities` follows the engine's filter order
    pub fn record_call(
        &mut self,
        filtered: bool,
        artifact_probability: f64,
        filter_probabilities: &[f64],
        threshold: f64,
    ) {
        if filtered {
            self.false_negatives += 1.0 - artifact_probability;
        } else {
            self.pass += 1;
            self.false_positives += artifact_probability;
            self.true_positives += 1.0 - artifact_probability;
        }

        for (i, &filter_probability) in filter_probabilities.iter().enumerate() {
            if filter_probability > EPSILON && filter_probability > threshold - EPSILON {
                self.filter_false_negatives[i] += 1.0 - artifact_probability;
            } else if !filtered {
                self.filter_false_positives[i] += filter_probability;
            }
        }
    }

    pub fn passing_calls(&self) -> usize {
        self.pass
    }

    pub fn true_positives(&self) -> f64 {
        self.true_positives
    }

    pub fn false_positives(&self) -> f64 {
        self.false_positives
    }

    pub fn false_negatives(&self) -> f64 {
        self.false_negatives
    }

    pub fn filter_false_positives(&self) -> &[f64] {
        &self.filter_false_positives
    }

    pub fn filter_false_negatives(&self) -> &[f64] {
        &self.filter_false_negatives
    }

    /// Summarize, keeping only filters with a non-zero false positive or false negative tally
    pub fn summarize(&self, filter_names: &[&str], threshold: f64) -> FilteringSummary {
        let total_true_variants = self.true_positives + self.false_negatives;

        let filters = filter_names
            .iter()
            .enumerate()
            .map(|(i, name)| {
                let fp = self.filter_false_positives[i];
                let fn_count = self.filter_false_negatives[i];
                FilterStats {
                    filter: name.to_string(),
                    false_positive_count: fp,
                    false_positive_rate: rate(fp, self.pass as f64),
                    false_negative_count: fn_count,
                    false_negative_rate: rate(fn_count, total_true_variants),
                }
            })
            .filter(|stats| stats.false_positive_count > 0.0 || stats.false_negative_count > 0.0)
            .collect::<Vec<_>>();

        for stats in &filters {
            if stats.false_positive_rate.is_nan() || stats.false_negative_rate.is_nan() {
                log::warn!(
                    "Filter {} has non-zero error counts but an empty denominator; rates are undefined",
                    stats.filter
                );
            }
        }

        FilteringSummary {
            threshold,
            passing_calls: self.pass,
            true_positives: self.true_positives,
            false_positives: self.false_positives,
            false_negatives: self.false_negatives,
            filters,
        }
    }
}

fn rate(count: f64, denominator: f64) -> f64 {
    if denominator > 0.0 {
        count / denominator
    } else {
        f64::NAN
    }
}

/// Error attribution for one filter
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FilterStats {
    pub filter: String,
    pub false_positive_count: f64,
    pub false_positive_rate: f64,
    pub false_negative_count: f64,
    pub false_negative_rate: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FilteringSummary {
    pub threshold: f64,
    pub passing_calls: usize,
    pub true_positives: f64,
    pub false_positives: f64,
    pub false_negatives: f64,
    pub filters: Vec<FilterStats>,
}

/// Write the filtering summary as a tab-separated table with `#` metadata lines
pub fn write_filtering_stats(summary: &FilteringSummary, output_path: &Path) -> VfilterResult<()> {
    let mut writer = TextWriter::create(output_path)?;

    writeln!(writer, "#threshold\t{}", summary.threshold)?;
    writeln!(writer, "#the number of passing calls\t{}", summary.passing_calls)?;
    writeln!(writer, "#expected true positives\t{}", summary.true_positives)?;
    writeln!(writer, "#expected false positives\t{}", summary.false_positives)?;
    writeln!(writer, "#expected false negatives\t{}", summary.false_negatives)?;

    let mut csv_writer = csv::WriterBuilder::new()
        .delimiter(b'\t')
        .from_writer(writer);
    if summary.filters.is_empty() {
        csv_writer.write_record([
            "filter",
            "false_positive_count",
            "false_positive_rate",
            "false_negative_count",
            "false_negative_rate",
        ])?;
    }
    for stats in &summary.filters {
        csv_writer.serialize(stats)?;
    }
    let writer = csv_writer.into_inner().map_err(|e| e.into_error())?;
    writer.finish()
}

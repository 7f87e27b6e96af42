//! # vfilter - artifact filtering for somatic variant calls
//!
//! Classifies candidate variant records from a VCF as real variants or artifacts.
//! An ensemble of artifact filters turns each line of evidence into an artifact
//! probability, the probabilities are combined per record, and the decision
//! threshold is calibrated over repeated passes through the calls.

pub mod combine;
pub mod engine;
pub mod filters;
pub mod state;
pub mod stats;
pub mod threshold;
pub mod utils;
pub mod vcf;

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Tolerance for comparisons against the artifact probability threshold
pub const EPSILON: f64 = 1.0e-10;

/// Threshold used before any pass has calibrated one
pub const FIRST_PASS_THRESHOLD: f64 = 0.5;

/// Represents a genomic variant with its position and alleles
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Variant {
    pub chrom: String,
    pub pos: u32,
    pub ref_allele: String,
    pub alt_alleles: Vec<String>,
}

impl Variant {
    pub fn new(chrom: String, pos: u32, ref_allele: String, alt_alleles: Vec<String>) -> Self {
        Self {
            chrom,
            pos,
            ref_allele,
            alt_alleles,
        }
    }

    /// Single-base substitution in every alt allele
    pub fn is_snv(&self) -> bool {
        self.ref_allele.len() == 1 && self.alt_alleles.iter().all(|alt| alt.len() == 1)
    }

    pub fn variant_type(&self) -> VariantType {
        if self.is_snv() {
            VariantType::Snv
        } else {
            VariantType::Indel
        }
    }
}

/// Variant class used to select the somatic prior
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VariantType {
    Snv,
    Indel,
}

/// Role of a sample within a run, fixed once from the VCF header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleRole {
    Normal,
    Tumor,
}

/// Per-sample genotype call with its FORMAT fields
#[derive(Debug, Clone, PartialEq)]
pub struct Genotype {
    pub sample: String,
    pub fields: HashMap<String, String>,
}

impl Genotype {
    pub fn new(sample: String, fields: HashMap<String, String>) -> Self {
        Self { sample, fields }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields
            .get(key)
            .map(|s| s.as_str())
            .filter(|s| *s != ".")
    }

    pub fn get_ints(&self, key: &str) -> Option<Vec<i64>> {
        self.get(key).and_then(parse_list)
    }

    pub fn get_floats(&self, key: &str) -> Option<Vec<f64>> {
        self.get(key).and_then(parse_list)
    }

    /// Phase group identifier (`PID`)
    pub fn phasing_id(&self) -> Option<&str> {
        self.get(vcf::PHASING_ID_KEY)
    }

    /// Phased genotype string (`PGT`)
    pub fn phased_genotype(&self) -> Option<&str> {
        self.get(vcf::PHASING_GT_KEY)
    }

    pub fn has_phase_info(&self) -> bool {
        self.phasing_id().is_some() && self.phased_genotype().is_some()
    }
}

/// A candidate variant call as read from the input
#[derive(Debug, Clone, PartialEq)]
pub struct VariantRecord {
    pub variant: Variant,
    pub id: String,
    pub qual: String,
    pub filters: Vec<String>,
    /// INFO entries in input order; flags carry no value
    pub info: Vec<(String, Option<String>)>,
    pub format: Vec<String>,
    pub genotypes: Vec<Genotype>,
}

impl VariantRecord {
    pub fn new(variant: Variant) -> Self {
        Self {
            variant,
            id: ".".to_string(),
            qual: ".".to_string(),
            filters: Vec::new(),
            info: Vec::new(),
            format: Vec::new(),
            genotypes: Vec::new(),
        }
    }

    pub fn has_attribute(&self, key: &str) -> bool {
        self.info.iter().any(|(k, _)| k == key)
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.info
            .iter()
            .find(|(k, _)| k == key)
            .and_then(|(_, v)| v.as_deref())
    }

    pub fn attribute_as_ints(&self, key: &str) -> Option<Vec<i64>> {
        self.attribute(key).and_then(parse_list)
    }

    pub fn attribute_as_floats(&self, key: &str) -> Option<Vec<f64>> {
        self.attribute(key).and_then(parse_list)
    }

    /// Set an INFO attribute, replacing an existing value for the key
    pub fn set_attribute(&mut self, key: &str, value: Option<String>) {
        match self.info.iter_mut().find(|(k, _)| k == key) {
            Some(entry) => entry.1 = value,
            None => self.info.push((key.to_string(), value)),
        }
    }

    pub fn is_snv(&self) -> bool {
        self.variant.is_snv()
    }

    pub fn position(&self) -> u32 {
        self.variant.pos
    }
}

fn parse_list<T: FromStr>(value: &str) -> Option<Vec<T>> {
    value
        .split(',')
        .map(|v| v.trim().parse::<T>().ok())
        .collect()
}

/// How the artifact probability threshold is chosen at the end of a pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThresholdStrategy {
    Constant,
    FalseDiscoveryRate,
    OptimalFScore,
}

impl FromStr for ThresholdStrategy {
    type Err = VfilterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('_', "-").as_str() {
            "constant" => Ok(ThresholdStrategy::Constant),
            "false-discovery-rate" | "fdr" => Ok(ThresholdStrategy::FalseDiscoveryRate),
            "optimal-f-score" | "f-score" => Ok(ThresholdStrategy::OptimalFScore),
            _ => Err(VfilterError::InvalidConfig(format!(
                "Invalid threshold strategy type: {}",
                s
            ))),
        }
    }
}

impl fmt::Display for ThresholdStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ThresholdStrategy::Constant => "constant",
            ThresholdStrategy::FalseDiscoveryRate => "false-discovery-rate",
            ThresholdStrategy::OptimalFScore => "optimal-f-score",
        };
        write!(f, "{}", name)
    }
}

/// Configuration parameters for filtering
#[derive(Debug, Clone)]
pub struct FilterConfig {
    pub threshold_strategy: ThresholdStrategy,
    /// Threshold for the constant strategy
    pub posterior_threshold: f64,
    pub max_false_discovery_rate: f64,
    pub f_score_beta: f64,
    pub log10_prior_of_somatic_snv: f64,
    pub log10_prior_of_somatic_indel: f64,
    pub initial_prior_of_artifact_versus_variant: f64,
    pub num_learning_passes: usize,

    pub contamination_tables: Vec<PathBuf>,
    pub contamination_estimate: f64,
    pub min_median_base_quality: i64,
    pub min_median_mapping_quality: i64,
    pub unique_alt_read_count: i64,
    pub min_reads_on_each_strand: i64,
    pub min_median_read_position: i64,
    pub max_events_in_region: i64,
    pub num_alt_alleles_threshold: usize,
    pub tumor_lod_to_emit: f64,
    pub max_distance_to_filtered_call_on_same_haplotype: u32,
    /// Maximum ratio of N bases to tumor alt reads
    pub max_n_ratio: f64,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            threshold_strategy: ThresholdStrategy::OptimalFScore,
            posterior_threshold: 0.1,
            max_false_discovery_rate: 0.05,
            f_score_beta: 1.0,
            log10_prior_of_somatic_snv: -6.0,
            log10_prior_of_somatic_indel: -7.0,
            initial_prior_of_artifact_versus_variant: 0.01,
            num_learning_passes: 2,
            contamination_tables: Vec::new(),
            contamination_estimate: 0.0,
            min_median_base_quality: 20,
            min_median_mapping_quality: 30,
            unique_alt_read_count: 0,
            min_reads_on_each_strand: 0,
            min_median_read_position: 1,
            max_events_in_region: 2,
            num_alt_alleles_threshold: 1,
            tumor_lod_to_emit: 3.0,
            max_distance_to_filtered_call_on_same_haplotype: 100,
            max_n_ratio: f64::INFINITY,
        }
    }
}

/// Error types for the vfilter library
#[derive(Debug, thiserror::Error)]
pub enum VfilterError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Invalid variant format: {0}")]
    InvalidVariant(String),

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Required annotation {0} missing from record")]
    MissingAnnotation(String),

    #[error("Invalid statistics table: {0}")]
    InvalidStatistics(String),
}

pub type VfilterResult<T> = Result<T, VfilterError>;

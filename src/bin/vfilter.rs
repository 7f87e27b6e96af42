//! CLI binary for vfilter - filters somatic variant calls for artifacts

use clap::Parser;
use env_logger::Env;
use std::path::PathBuf;
use vfilter_rs::{
    engine::{filter_vcf, validate_filter_config},
    stats::read_callable_sites,
    utils::{ensure_parent_dirs, format_file_size, validate_file_readable},
    FilterConfig, ThresholdStrategy, VfilterError, VfilterResult,
};

#[derive(Parser)]
#[command(name = "vfilter")]
#[command(about = "vfilter - artifact filtering of somatic variant calls")]
#[command(long_about = "
vfilter classifies the candidate variants of a somatic VCF as real variants or
artifacts. Each filter computes the probability that a call is a specific kind
of artifact from the INFO and FORMAT annotations of the call, and the
probabilities are combined into one artifact probability per call.

The calls are read several times:
1. Learning passes estimate the prior of artifacts, the somatic priors and
   the parameters of the learning filters, and calibrate the threshold
2. The final pass writes every call, with the FILTER column replaced by the
   failed filters or PASS

Phred-scaled filter qualities (SEQQ, STRANDQ, CONTQ) are added to INFO, and
the expected true and false positives are written to the filtering stats file.
")]
struct Args {
    /// Path to the input VCF file
    #[arg(long, value_name = "FILE")]
    input_vcf: PathBuf,

    /// Path to the output filtered VCF file
    #[arg(long, value_name = "FILE")]
    output: PathBuf,

    /// Path to the filtering stats output [default: <OUTPUT>.filteringStats.tsv]
    #[arg(long, value_name = "FILE")]
    filtering_stats: Option<PathBuf>,

    /// Statistics table holding the number of callable sites
    #[arg(long, value_name = "FILE")]
    stats: Option<PathBuf>,

    /// Contamination table of a tumor sample, may be given more than once
    #[arg(long, value_name = "FILE")]
    contamination_table: Vec<PathBuf>,

    /// Contamination of samples without a contamination table
    #[arg(long, default_value = "0.0")]
    contamination_estimate: f64,

    /// Threshold strategy: constant, false-discovery-rate or optimal-f-score
    #[arg(long, default_value = "optimal-f-score")]
    threshold_strategy: String,

    /// Artifact probability threshold of the constant strategy
    #[arg(long, default_value = "0.1")]
    posterior_threshold: f64,

    /// Maximum expected false discovery rate
    #[arg(long, default_value = "0.05")]
    false_discovery_rate: f64,

    /// Relative weight of recall to precision
    #[arg(long, default_value = "1.0")]
    f_score_beta: f64,

    /// Log10 prior probability that a site has a somatic SNV
    #[arg(long, default_value = "-6.0", allow_hyphen_values = true)]
    log_snv_prior: f64,

    /// Log10 prior probability that a site has a somatic indel
    #[arg(long, default_value = "-7.0", allow_hyphen_values = true)]
    log_indel_prior: f64,

    /// Initial prior probability that a call is an artifact
    #[arg(long, default_value = "0.01")]
    initial_artifact_prior: f64,

    /// Number of passes over the calls before the final decision pass
    #[arg(long, default_value = "2")]
    num_learning_passes: usize,

    /// Minimum median base quality of alt reads
    #[arg(long, default_value = "20")]
    min_median_base_quality: i64,

    /// Minimum median mapping quality of alt reads
    #[arg(long, default_value = "30")]
    min_median_mapping_quality: i64,

    /// Minimum number of unique alt read start positions
    #[arg(long, default_value = "0")]
    unique_alt_read_count: i64,

    /// Minimum alt reads on each strand; 0 disables the strict strand filter
    #[arg(long, default_value = "0")]
    min_reads_per_strand: i64,

    /// Minimum median distance of the variant from the read ends
    #[arg(long, default_value = "1")]
    min_median_read_position: i64,

    /// Maximum number of events in an active region
    #[arg(long, default_value = "2")]
    max_events_in_region: i64,

    /// Maximum number of alt alleles with sufficient tumor evidence
    #[arg(long, default_value = "1")]
    max_alt_allele_count: usize,

    /// Tumor log odds for an alt allele to count towards the alt allele limit
    #[arg(long, default_value = "3.0")]
    tumor_lod_to_emit: f64,

    /// Maximum distance to a filtered call on the same haplotype
    #[arg(long, default_value = "100")]
    distance_on_haplotype: u32,

    /// Maximum ratio of N bases to alt reads
    #[arg(long, default_value = "inf")]
    max_n_ratio: f64,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Force overwrite of output file if it exists
    #[arg(short, long)]
    force: bool,
}

impl Args {
    fn filter_config(&self) -> VfilterResult<FilterConfig> {
        Ok(FilterConfig {
            threshold_strategy: self.threshold_strategy.parse::<ThresholdStrategy>()?,
            posterior_threshold: self.posterior_threshold,
            max_false_discovery_rate: self.false_discovery_rate,
            f_score_beta: self.f_score_beta,
            log10_prior_of_somatic_snv: self.log_snv_prior,
            log10_prior_of_somatic_indel: self.log_indel_prior,
            initial_prior_of_artifact_versus_variant: self.initial_artifact_prior,
            num_learning_passes: self.num_learning_passes,
            contamination_tables: self.contamination_table.clone(),
            contamination_estimate: self.contamination_estimate,
            min_median_base_quality: self.min_median_base_quality,
            min_median_mapping_quality: self.min_median_mapping_quality,
            unique_alt_read_count: self.unique_alt_read_count,
            min_reads_on_each_strand: self.min_reads_per_strand,
            min_median_read_position: self.min_median_read_position,
            max_events_in_region: self.max_events_in_region,
            num_alt_alleles_threshold: self.max_alt_allele_count,
            tumor_lod_to_emit: self.tumor_lod_to_emit,
            max_distance_to_filtered_call_on_same_haplotype: self.distance_on_haplotype,
            max_n_ratio: self.max_n_ratio,
        })
    }

    fn filtering_stats_path(&self) -> PathBuf {
        self.filtering_stats.clone().unwrap_or_else(|| {
            let mut path = self.output.clone().into_os_string();
            path.push(".filteringStats.tsv");
            PathBuf::from(path)
        })
    }
}

fn run() -> VfilterResult<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.debug {
        "debug"
    } else if args.verbose {
        "info"
    } else {
        "warn"
    };

    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_timestamp_secs()
        .init();

    log::info!("Starting vfilter");
    log::info!("Input VCF: {:?}", args.input_vcf);
    log::info!("Output VCF: {:?}", args.output);

    validate_file_readable(&args.input_vcf)?;
    for table in &args.contamination_table {
        validate_file_readable(table)?;
    }

    if args.output.exists() && !args.force {
        return Err(VfilterError::Io(std::io::Error::new(
            std::io::ErrorKind::AlreadyExists,
            format!("Output file {:?} already exists. Use --force to overwrite.", args.output),
        )));
    }
    ensure_parent_dirs(&args.output)?;

    let config = args.filter_config()?;
    validate_filter_config(&config)?;
    log::info!(
        "Configuration: strategy={}, learning passes={}",
        config.threshold_strategy,
        config.num_learning_passes
    );

    let callable_sites = match &args.stats {
        Some(path) => {
            let callable_sites = read_callable_sites(path)?;
            log::info!("Callable sites: {}", callable_sites);
            Some(callable_sites)
        }
        None => None,
    };

    let engine = filter_vcf(&args.input_vcf, &args.output, &config, callable_sites)?;

    let summary = engine.filtering_summary();
    log::info!("Filtering summary:");
    log::info!("  Threshold: {:.4}", summary.threshold);
    log::info!("  Passing calls: {}", summary.passing_calls);
    log::info!("  Expected false positives: {:.2}", summary.false_positives);
    log::info!("  Expected false negatives: {:.2}", summary.false_negatives);

    let stats_path = args.filtering_stats_path();
    engine.write_filtering_stats(&stats_path)?;

    log::info!("Filtered VCF written to: {:?}", args.output);
    log::info!("Filtering stats written to: {:?}", stats_path);

    if let Ok(input_size) = std::fs::metadata(&args.input_vcf).map(|m| m.len()) {
        if let Ok(output_size) = std::fs::metadata(&args.output).map(|m| m.len()) {
            log::info!("Input VCF size: {}", format_file_size(input_size));
            log::info!("Output VCF size: {}", format_file_size(output_size));
        }
    }

    Ok(())
}

/// Handle application errors and provide user-friendly messages
fn handle_error(error: VfilterError) -> ! {
    match error {
        VfilterError::FileNotFound(path) => {
            eprintln!("Error: File not found: {}", path);
            eprintln!("Please check that the file exists and is readable.");
        }
        VfilterError::InvalidVariant(msg) => {
            eprintln!("Error: Invalid variant data: {}", msg);
            eprintln!("Please check that your VCF file is properly formatted.");
        }
        VfilterError::InvalidConfig(msg) => {
            eprintln!("Error: Invalid configuration: {}", msg);
            eprintln!("Please check the threshold strategy and the filtering parameters.");
        }
        VfilterError::MissingAnnotation(key) => {
            eprintln!("Error: Required annotation {} missing", key);
            eprintln!("Please check that the VCF was produced by a somatic caller emitting {}.", key);
        }
        VfilterError::InvalidStatistics(msg) => {
            eprintln!("Error: Invalid statistics table: {}", msg);
            eprintln!("Please check the callable sites and contamination tables.");
        }
        VfilterError::Io(ref e) => {
            eprintln!("Error: I/O error: {}", e);
            eprintln!("Please check file permissions and disk space.");
        }
        VfilterError::Csv(ref e) => {
            eprintln!("Error: Table parsing error: {}", e);
            eprintln!("Please check that the tables are tab-separated with a header line.");
        }
    }
    std::process::exit(1);
}

fn main() {
    if let Err(e) = run() {
        handle_error(e);
    }
}

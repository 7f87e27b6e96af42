//! Hard filters: the evidence either rules the call out or it does not

use super::{
    required_floats, required_ints, tumor_strand_counts, ArtifactFilter, ALLELE_DEPTH_KEY,
};
use crate::state::FilteringState;
use crate::{VariantRecord, VfilterResult};

pub const MEDIAN_BASE_QUALITY_KEY: &str = "MBQ";
pub const MEDIAN_MAPPING_QUALITY_KEY: &str = "MMQ";
pub const UNIQUE_ALT_READ_SET_COUNT_KEY: &str = "UNIQ_ALT_READ_COUNT";
pub const MEDIAN_READ_POSITION_KEY: &str = "MPOS";
pub const EVENT_COUNT_IN_HAPLOTYPE_KEY: &str = "ECNT";
pub const TUMOR_LOG_10_ODDS_KEY: &str = "TLOD";
pub const IN_PON_KEY: &str = "PON";
pub const N_COUNT_KEY: &str = "NCount";

fn hard(fails: bool) -> f64 {
    if fails {
        1.0
    } else {
        0.0
    }
}

/// Alt values of a Number=R attribute; the first value belongs to the reference
fn alt_values(values: &[i64]) -> &[i64] {
    if values.len() > 1 {
        &values[1..]
    } else {
        values
    }
}

pub struct BaseQualityFilter {
    min_median_base_quality: i64,
}

impl BaseQualityFilter {
    pub fn new(min_median_base_quality: i64) -> Self {
        Self {
            min_median_base_quality,
        }
    }
}

impl ArtifactFilter for BaseQualityFilter {
    fn filter_name(&self) -> &str {
        "base_qual"
    }

    fn is_technical_artifact(&self) -> bool {
        true
    }

    fn required_annotations(&self) -> &[&str] {
        &[MEDIAN_BASE_QUALITY_KEY]
    }

    fn description(&self) -> &str {
        "alt median base quality"
    }

    fn calculate_artifact_probability(
        &self,
        record: &VariantRecord,
        _state: &FilteringState,
    ) -> VfilterResult<f64> {
        let qualities = required_ints(record, MEDIAN_BASE_QUALITY_KEY)?;
        let alt_median = alt_values(&qualities).iter().copied().max().unwrap_or(0);
        Ok(hard(alt_median < self.min_median_base_quality))
    }
}

pub struct MappingQualityFilter {
    min_median_mapping_quality: i64,
}

impl MappingQualityFilter {
    pub fn new(min_median_mapping_quality: i64) -> Self {
        Self {
            min_median_mapping_quality,
        }
    }
}

impl ArtifactFilter for MappingQualityFilter {
    fn filter_name(&self) -> &str {
        "map_qual"
    }

    fn is_technical_artifact(&self) -> bool {
        true
    }

    fn required_annotations(&self) -> &[&str] {
        &[MEDIAN_MAPPING_QUALITY_KEY]
    }

    fn description(&self) -> &str {
        "ref and alt reads have mapping quality discrepancy"
    }

    fn calculate_artifact_probability(
        &self,
        record: &VariantRecord,
        _state: &FilteringState,
    ) -> VfilterResult<f64> {
        let qualities = required_ints(record, MEDIAN_MAPPING_QUALITY_KEY)?;
        let alt_median = alt_values(&qualities).iter().copied().max().unwrap_or(0);
        Ok(hard(alt_median < self.min_median_mapping_quality))
    }
}

pub struct DuplicatedAltReadFilter {
    unique_alt_read_count: i64,
}

impl DuplicatedAltReadFilter {
    pub fn new(unique_alt_read_count: i64) -> Self {
        Self {
            unique_alt_read_count,
        }
    }
}

impl ArtifactFilter for DuplicatedAltReadFilter {
    fn filter_name(&self) -> &str {
        "duplicate"
    }

    fn is_technical_artifact(&self) -> bool {
        true
    }

    fn required_annotations(&self) -> &[&str] {
        &[UNIQUE_ALT_READ_SET_COUNT_KEY]
    }

    fn description(&self) -> &str {
        "evidence for alt allele is overrepresented by apparent duplicates"
    }

    fn calculate_artifact_probability(
        &self,
        record: &VariantRecord,
        _state: &FilteringState,
    ) -> VfilterResult<f64> {
        let count = required_ints(record, UNIQUE_ALT_READ_SET_COUNT_KEY)?[0];
        Ok(hard(count < self.unique_alt_read_count))
    }
}

pub struct StrictStrandBiasFilter {
    min_reads_on_each_strand: i64,
}

impl StrictStrandBiasFilter {
    pub fn new(min_reads_on_each_strand: i64) -> Self {
        Self {
            min_reads_on_each_strand,
        }
    }
}

impl ArtifactFilter for StrictStrandBiasFilter {
    fn filter_name(&self) -> &str {
        "strict_strand"
    }

    fn is_technical_artifact(&self) -> bool {
        true
    }

    fn description(&self) -> &str {
        "evidence for alt allele is not represented in both directions"
    }

    fn calculate_artifact_probability(
        &self,
        record: &VariantRecord,
        state: &FilteringState,
    ) -> VfilterResult<f64> {
        if self.min_reads_on_each_strand == 0 {
            return Ok(0.0);
        }
        Ok(match tumor_strand_counts(record, state) {
            Some([_, _, alt_forward, alt_reverse]) => hard(
                alt_forward < self.min_reads_on_each_strand
                    || alt_reverse < self.min_reads_on_each_strand,
            ),
            None => 0.0,
        })
    }
}

pub struct ReadPositionFilter {
    min_median_read_position: i64,
}

impl ReadPositionFilter {
    pub fn new(min_median_read_position: i64) -> Self {
        Self {
            min_median_read_position,
        }
    }
}

impl ArtifactFilter for ReadPositionFilter {
    fn filter_name(&self) -> &str {
        "position"
    }

    fn is_technical_artifact(&self) -> bool {
        true
    }

    fn required_annotations(&self) -> &[&str] {
        &[MEDIAN_READ_POSITION_KEY]
    }

    fn description(&self) -> &str {
        "median distance of alt variants from end of reads"
    }

    fn calculate_artifact_probability(
        &self,
        record: &VariantRecord,
        _state: &FilteringState,
    ) -> VfilterResult<f64> {
        // MPOS has one value per alt allele
        let positions = required_ints(record, MEDIAN_READ_POSITION_KEY)?;
        let median_position = positions.iter().copied().max().unwrap_or(0);
        Ok(hard(median_position < self.min_median_read_position))
    }
}

pub struct ClusteredEventsFilter {
    max_events_in_region: i64,
}

impl ClusteredEventsFilter {
    pub fn new(max_events_in_region: i64) -> Self {
        Self {
            max_events_in_region,
        }
    }
}

impl ArtifactFilter for ClusteredEventsFilter {
    fn filter_name(&self) -> &str {
        "clustered_events"
    }

    fn is_technical_artifact(&self) -> bool {
        false
    }

    fn required_annotations(&self) -> &[&str] {
        &[EVENT_COUNT_IN_HAPLOTYPE_KEY]
    }

    fn description(&self) -> &str {
        "Clustered events observed in the tumor"
    }

    fn calculate_artifact_probability(
        &self,
        record: &VariantRecord,
        _state: &FilteringState,
    ) -> VfilterResult<f64> {
        let event_count = required_ints(record, EVENT_COUNT_IN_HAPLOTYPE_KEY)?[0];
        Ok(hard(event_count > self.max_events_in_region))
    }
}

pub struct MultiallelicFilter {
    num_alt_alleles_threshold: usize,
    tumor_lod_to_emit: f64,
}

impl MultiallelicFilter {
    pub fn new(num_alt_alleles_threshold: usize, tumor_lod_to_emit: f64) -> Self {
        Self {
            num_alt_alleles_threshold,
            tumor_lod_to_emit,
        }
    }
}

impl ArtifactFilter for MultiallelicFilter {
    fn filter_name(&self) -> &str {
        "multiallelic"
    }

    fn is_technical_artifact(&self) -> bool {
        false
    }

    fn required_annotations(&self) -> &[&str] {
        &[TUMOR_LOG_10_ODDS_KEY]
    }

    fn description(&self) -> &str {
        "Site filtered because too many alt alleles pass tumor LOD"
    }

    fn calculate_artifact_probability(
        &self,
        record: &VariantRecord,
        _state: &FilteringState,
    ) -> VfilterResult<f64> {
        let tumor_lods = required_floats(record, TUMOR_LOG_10_ODDS_KEY)?;
        let passing_alt_alleles = tumor_lods
            .iter()
            .filter(|&&lod| lod > self.tumor_lod_to_emit)
            .count();
        Ok(hard(passing_alt_alleles > self.num_alt_alleles_threshold))
    }
}

/// Site flagged by a panel of normals
#[derive(Debug, Default)]
pub struct PanelOfNormalsFilter;

impl PanelOfNormalsFilter {
    pub fn new() -> Self {
        PanelOfNormalsFilter
    }
}

impl ArtifactFilter for PanelOfNormalsFilter {
    fn filter_name(&self) -> &str {
        "panel_of_normals"
    }

    fn is_technical_artifact(&self) -> bool {
        false
    }

    fn required_annotations(&self) -> &[&str] {
        &[IN_PON_KEY]
    }

    fn description(&self) -> &str {
        "Blacklisted site in panel of normals"
    }

    fn calculate_artifact_probability(
        &self,
        _record: &VariantRecord,
        _state: &FilteringState,
    ) -> VfilterResult<f64> {
        Ok(1.0)
    }
}

pub struct NRatioFilter {
    max_n_ratio: f64,
}

impl NRatioFilter {
    pub fn new(max_n_ratio: f64) -> Self {
        Self { max_n_ratio }
    }
}

impl ArtifactFilter for NRatioFilter {
    fn filter_name(&self) -> &str {
        "n_ratio"
    }

    fn is_technical_artifact(&self) -> bool {
        true
    }

    fn required_annotations(&self) -> &[&str] {
        &[N_COUNT_KEY]
    }

    fn description(&self) -> &str {
        "Ratio of N to alt exceeds specified ratio"
    }

    fn calculate_artifact_probability(
        &self,
        record: &VariantRecord,
        state: &FilteringState,
    ) -> VfilterResult<f64> {
        if self.max_n_ratio.is_infinite() {
            return Ok(0.0);
        }
        let n_count = required_ints(record, N_COUNT_KEY)?[0];

        // alt depth summed over tumor samples
        let alt_count: i64 = state
            .tumor_genotypes(record)
            .filter_map(|genotype| genotype.get_ints(ALLELE_DEPTH_KEY))
            .map(|depths| depths.iter().skip(1).sum::<i64>())
            .sum();

        if alt_count <= 0 {
            return Ok(hard(n_count > 0));
        }
        Ok(hard(n_count as f64 / alt_count as f64 >= self.max_n_ratio))
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_utils::*;
    use super::*;

    #[test]
    fn test_base_quality() {
        let state = tumor_normal_state();
        let filter = BaseQualityFilter::new(20);
        assert_eq!(filter.artifact_probability(&snv_record(&[("MBQ", "30,15")]), &state), 1.0);
        assert_eq!(filter.artifact_probability(&snv_record(&[("MBQ", "10,25")]), &state), 0.0);
        assert_eq!(filter.artifact_probability(&snv_record(&[]), &state), 0.0);
    }

    #[test]
    fn test_mapping_quality() {
        let state = tumor_normal_state();
        let filter = MappingQualityFilter::new(30);
        assert_eq!(filter.artifact_probability(&snv_record(&[("MMQ", "60,20")]), &state), 1.0);
        assert_eq!(filter.artifact_probability(&snv_record(&[("MMQ", "60,60")]), &state), 0.0);
    }

    #[test]
    fn test_duplicated_alt_reads() {
        let state = tumor_normal_state();
        let filter = DuplicatedAltReadFilter::new(2);
        let record = snv_record(&[("UNIQ_ALT_READ_COUNT", "1")]);
        assert_eq!(filter.artifact_probability(&record, &state), 1.0);
        let record = snv_record(&[("UNIQ_ALT_READ_COUNT", "3")]);
        assert_eq!(filter.artifact_probability(&record, &state), 0.0);
    }

    #[test]
    fn test_strict_strand_bias() {
        let state = tumor_normal_state();
        let mut record = snv_record(&[]);
        record.genotypes = vec![genotype("tumor", &[("SB", "10,10,5,0")])];

        assert_eq!(StrictStrandBiasFilter::new(0).artifact_probability(&record, &state), 0.0);
        assert_eq!(StrictStrandBiasFilter::new(1).artifact_probability(&record, &state), 1.0);

        record.genotypes = vec![genotype("tumor", &[("SB", "10,10,5,2")])];
        assert_eq!(StrictStrandBiasFilter::new(2).artifact_probability(&record, &state), 0.0);
    }

    #[test]
    fn test_read_position() {
        let state = tumor_normal_state();
        let filter = ReadPositionFilter::new(5);
        assert_eq!(filter.artifact_probability(&snv_record(&[("MPOS", "3")]), &state), 1.0);
        assert_eq!(filter.artifact_probability(&snv_record(&[("MPOS", "12")]), &state), 0.0);
    }

    #[test]
    fn test_clustered_events() {
        let state = tumor_normal_state();
        let filter = ClusteredEventsFilter::new(2);
        assert_eq!(filter.artifact_probability(&snv_record(&[("ECNT", "3")]), &state), 1.0);
        assert_eq!(filter.artifact_probability(&snv_record(&[("ECNT", "2")]), &state), 0.0);
        assert!(!filter.is_technical_artifact());
    }

    #[test]
    fn test_multiallelic() {
        let state = tumor_normal_state();
        let filter = MultiallelicFilter::new(1, 3.0);
        let record = snv_record(&[("TLOD", "10.0,8.5")]);
        assert_eq!(filter.artifact_probability(&record, &state), 1.0);
        let record = snv_record(&[("TLOD", "10.0,1.5")]);
        assert_eq!(filter.artifact_probability(&record, &state), 0.0);
    }

    #[test]
    fn test_panel_of_normals() {
        let state = tumor_normal_state();
        let filter = PanelOfNormalsFilter::new();
        let mut record = snv_record(&[]);
        assert_eq!(filter.artifact_probability(&record, &state), 0.0);

        record.set_attribute("PON", None);
        assert_eq!(filter.artifact_probability(&record, &state), 1.0);
        assert!(!filter.is_technical_artifact());
    }

    #[test]
    fn test_n_ratio() {
        let state = tumor_normal_state();
        let filter = NRatioFilter::new(0.5);
        let mut record = snv_record(&[("NCount", "3")]);
        record.genotypes = vec![
            genotype("tumor", &[("AD", "20,4")]),
            genotype("normal", &[("AD", "30,10")]),
        ];
        // 3 Ns against 4 tumor alt reads
        assert_eq!(filter.artifact_probability(&record, &state), 1.0);

        record.set_attribute("NCount", Some("1".to_string()));
        assert_eq!(filter.artifact_probability(&record, &state), 0.0);

        record.set_attribute("NCount", Some("2".to_string()));
        assert_eq!(filter.artifact_probability(&record, &state), 1.0);

        assert_eq!(NRatioFilter::new(f64::INFINITY).artifact_probability(&record, &state), 0.0);

        // Ns without any tumor alt read
        record.genotypes = vec![genotype("tumor", &[("AD", "20,0")])];
        assert_eq!(filter.artifact_probability(&record, &state), 1.0);
        record.set_attribute("NCount", Some("0".to_string()));
        assert_eq!(filter.artifact_probability(&record, &state), 0.0);
    }
}

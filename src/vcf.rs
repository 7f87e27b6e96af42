//! VCF file processing: header metadata, record parsing and writing, and
//! the re-iterable record sources the filtering passes scan

use crate::utils::{open_text_reader, TextWriter};
use crate::{Genotype, Variant, VariantRecord, VfilterError, VfilterResult};
use std::collections::{HashMap, HashSet};
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};

/// Header key naming a normal sample
pub const NORMAL_SAMPLE_KEY: &str = "normal_sample";
pub const PHASING_ID_KEY: &str = "PID";
pub const PHASING_GT_KEY: &str = "PGT";

const FIXED_COLUMNS: usize = 8;

/// Meta lines and sample names of a VCF
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VcfHeader {
    pub meta_lines: Vec<String>,
    pub column_line: String,
    pub samples: Vec<String>,
}

impl VcfHeader {
    pub fn from_lines(lines: &[String]) -> VfilterResult<Self> {
        let mut header = VcfHeader::default();
        for line in lines {
            if line.starts_with("##") {
                header.meta_lines.push(line.clone());
            } else if line.starts_with('#') {
                let fields: Vec<&str> = line.split('\t').collect();
                if fields.len() < FIXED_COLUMNS || fields[0] != "#CHROM" {
                    return Err(VfilterError::InvalidVariant(format!(
                        "Invalid VCF column header: {}",
                        line
                    )));
                }
                header.samples = fields
                    .iter()
                    .skip(FIXED_COLUMNS + 1)
                    .map(|s| s.to_string())
                    .collect();
                header.column_line = line.clone();
            }
        }

        if header.column_line.is_empty() {
            return Err(VfilterError::InvalidVariant(
                "#CHROM column header not found in VCF".to_string(),
            ));
        }
        Ok(header)
    }

    /// Samples flagged with `##normal_sample=` lines
    pub fn normal_samples(&self) -> HashSet<String> {
        let prefix = format!("##{}=", NORMAL_SAMPLE_KEY);
        self.meta_lines
            .iter()
            .filter_map(|line| line.strip_prefix(&prefix))
            .map(|sample| sample.trim().to_string())
            .collect()
    }

    fn has_meta_id(&self, kind: &str, id: &str) -> bool {
        let prefix = format!("##{}=<ID={},", kind, id);
        self.meta_lines.iter().any(|line| line.starts_with(&prefix))
    }

    pub fn add_filter_line(&mut self, id: &str, description: &str) {
        if !self.has_meta_id("FILTER", id) {
            self.meta_lines.push(format!(
                "##FILTER=<ID={},Description=\"{}\">",
                id, description
            ));
        }
    }

    pub fn add_info_line(&mut self, id: &str, number: &str, kind: &str, description: &str) {
        if !self.has_meta_id("INFO", id) {
            self.meta_lines.push(format!(
                "##INFO=<ID={},Number={},Type={},Description=\"{}\">",
                id, number, kind, description
            ));
        }
    }

    pub fn add_meta_line(&mut self, key: &str, value: &str) {
        self.meta_lines.push(format!("##{}={}", key, value));
    }

    pub fn lines(&self) -> impl Iterator<Item = &str> {
        self.meta_lines
            .iter()
            .map(|s| s.as_str())
            .chain(std::iter::once(self.column_line.as_str()))
    }
}

impl VariantRecord {
    /// Parse a VCF data line; `samples` names the sample columns in order
    pub fn from_line(line: &str, samples: &[String]) -> VfilterResult<Self> {
        let fields: Vec<&str> = line.split('\t').collect();

        if fields.len() < FIXED_COLUMNS {
            return Err(VfilterError::InvalidVariant(format!(
                "Invalid VCF line format - not enough columns: {}",
                line
            )));
        }

        let pos = fields[1]
            .parse::<u32>()
            .map_err(|_| VfilterError::InvalidVariant(format!("Invalid position: {}", fields[1])))?;
        let alt_alleles = if fields[4] == "." {
            Vec::new()
        } else {
            fields[4].split(',').map(|s| s.to_string()).collect()
        };
        let variant = Variant::new(
            fields[0].to_string(),
            pos,
            fields[3].to_string(),
            alt_alleles,
        );

        let filters = match fields[6] {
            "." | "PASS" => Vec::new(),
            filters => filters.split(';').map(|s| s.to_string()).collect(),
        };

        let info = if fields[7] == "." {
            Vec::new()
        } else {
            fields[7]
                .split(';')
                .filter(|entry| !entry.is_empty())
                .map(|entry| match entry.split_once('=') {
                    Some((key, value)) => (key.to_string(), Some(value.to_string())),
                    None => (entry.to_string(), None),
                })
                .collect()
        };

        let format: Vec<String> = fields
            .get(FIXED_COLUMNS)
            .map(|f| f.split(':').map(|s| s.to_string()).collect())
            .unwrap_or_default();

        let genotypes = fields
            .iter()
            .skip(FIXED_COLUMNS + 1)
            .enumerate()
            .map(|(i, column)| {
                let sample = samples
                    .get(i)
                    .cloned()
                    .unwrap_or_else(|| format!("sample{}", i + 1));
                let values: HashMap<String, String> = format
                    .iter()
                    .cloned()
                    .zip(column.split(':').map(|s| s.to_string()))
                    .collect();
                Genotype::new(sample, values)
            })
            .collect();

        Ok(VariantRecord {
            variant,
            id: fields[2].to_string(),
            qual: fields[5].to_string(),
            filters,
            info,
            format,
            genotypes,
        })
    }

    pub fn to_line(&self) -> String {
        let alts = if self.variant.alt_alleles.is_empty() {
            ".".to_string()
        } else {
            self.variant.alt_alleles.join(",")
        };
        let filters = if self.filters.is_empty() {
            "PASS".to_string()
        } else {
            self.filters.join(";")
        };
        let info = if self.info.is_empty() {
            ".".to_string()
        } else {
            self.info
                .iter()
                .map(|(key, value)| match value {
                    Some(value) => format!("{}={}", key, value),
                    None => key.clone(),
                })
                .collect::<Vec<_>>()
                .join(";")
        };

        let mut line = format!(
            "{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}",
            self.variant.chrom,
            self.variant.pos,
            self.id,
            self.variant.ref_allele,
            alts,
            self.qual,
            filters,
            info
        );

        if !self.format.is_empty() {
            line.push('\t');
            line.push_str(&self.format.join(":"));

            for genotype in &self.genotypes {
                let values: Vec<&str> = self
                    .format
                    .iter()
                    .map(|key| genotype.fields.get(key).map(|v| v.as_str()).unwrap_or("."))
                    .collect();
                line.push('\t');
                line.push_str(&values.join(":"));
            }
        }

        line
    }
}

/// VCF file reader that handles both compressed and uncompressed files
pub struct VcfReader {
    reader: Box<dyn BufRead>,
    header: VcfHeader,
}

impl VcfReader {
    pub fn new<P: AsRef<Path>>(path: P) -> VfilterResult<Self> {
        let mut reader = open_text_reader(&path)?;
        let mut header_lines = Vec::new();
        let mut line = String::new();

        // stop at the first data line without consuming it
        loop {
            let starts_with_hash = {
                let buffer = reader.fill_buf()?;
                !buffer.is_empty() && buffer[0] == b'#'
            };
            if !starts_with_hash {
                break;
            }
            line.clear();
            reader.read_line(&mut line)?;
            header_lines.push(line.trim_end().to_string());
        }

        let header = VcfHeader::from_lines(&header_lines)?;
        Ok(VcfReader { reader, header })
    }

    pub fn header(&self) -> &VcfHeader {
        &self.header
    }

    pub fn into_records(self) -> VcfRecordIterator {
        VcfRecordIterator {
            reader: self.reader,
            samples: self.header.samples,
            line: String::new(),
        }
    }
}

/// Iterator over VCF records
pub struct VcfRecordIterator {
    reader: Box<dyn BufRead>,
    samples: Vec<String>,
    line: String,
}

impl Iterator for VcfRecordIterator {
    type Item = VfilterResult<VariantRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            self.line.clear();
            match self.reader.read_line(&mut self.line) {
                Ok(0) => return None,
                Ok(_) => {
                    let line = self.line.trim_end();
                    if line.is_empty() || line.starts_with('#') {
                        continue;
                    }
                    return Some(VariantRecord::from_line(line, &self.samples));
                }
                Err(e) => return Some(Err(VfilterError::Io(e))),
            }
        }
    }
}

pub type RecordIter<'a> = Box<dyn Iterator<Item = VfilterResult<VariantRecord>> + 'a>;

/// A sequence of records that can be scanned once per pass
pub trait RecordSource {
    fn records(&self) -> VfilterResult<RecordIter<'_>>;
}

impl RecordSource for [VariantRecord] {
    fn records(&self) -> VfilterResult<RecordIter<'_>> {
        Ok(Box::new(self.iter().cloned().map(Ok)))
    }
}

impl RecordSource for Vec<VariantRecord> {
    fn records(&self) -> VfilterResult<RecordIter<'_>> {
        self.as_slice().records()
    }
}

/// A VCF on disk, reopened for every pass
#[derive(Debug, Clone)]
pub struct VcfFile {
    path: PathBuf,
    header: VcfHeader,
}

impl VcfFile {
    pub fn open<P: AsRef<Path>>(path: P) -> VfilterResult<Self> {
        let header = VcfReader::new(&path)?.header;
        Ok(VcfFile {
            path: path.as_ref().to_path_buf(),
            header,
        })
    }

    pub fn header(&self) -> &VcfHeader {
        &self.header
    }
}

impl RecordSource for VcfFile {
    fn records(&self) -> VfilterResult<RecordIter<'_>> {
        Ok(Box::new(VcfReader::new(&self.path)?.into_records()))
    }
}

/// Receiver of the records produced by the decision pass
pub trait RecordSink {
    fn write_record(&mut self, record: &VariantRecord) -> VfilterResult<()>;
}

impl RecordSink for Vec<VariantRecord> {
    fn write_record(&mut self, record: &VariantRecord) -> VfilterResult<()> {
        self.push(record.clone());
        Ok(())
    }
}

/// VCF writer, gzip compressed when the output ends in `.gz`
pub struct VcfWriter {
    writer: TextWriter,
}

impl VcfWriter {
    pub fn create<P: AsRef<Path>>(path: P, header: &VcfHeader) -> VfilterResult<Self> {
        let mut vcf_writer = VcfWriter {
            writer: TextWriter::create(path)?,
        };
        for line in header.lines() {
            writeln!(vcf_writer.writer, "{}", line)?;
        }
        Ok(vcf_writer)
    }

    /// Flush and complete the output; must be called once all records are written
    pub fn finish(self) -> VfilterResult<()> {
        self.writer.finish()
    }
}

impl RecordSink for VcfWriter {
    fn write_record(&mut self, record: &VariantRecord) -> VfilterResult<()> {
        writeln!(self.writer, "{}", record.to_line())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::is_gzipped;
    use flate2::read::MultiGzDecoder;
    use std::fs::File;
    use std::io::Read;
    use tempfile::NamedTempFile;

    const HEADER: &str = "##fileformat=VCFv4.2\n\
##normal_sample=NORMAL\n\
##INFO=<ID=TLOD,Number=A,Type=Float,Description=\"Log 10 likelihood ratio score of variant existing versus not existing\">\n\
#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\tFORMAT\tTUMOR\tNORMAL\n";

    fn write_vcf(lines: &[&str]) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{}", HEADER).unwrap();
        for line in lines {
            writeln!(file, "{}", line).unwrap();
        }
        file
    }

    #[test]
    fn test_record_from_line() {
        let samples = vec!["TUMOR".to_string(), "NORMAL".to_string()];
        let line = "chr1\t100\t.\tA\tT,G\t.\t.\tDP=30;TLOD=6.2,1.1;PON\tGT:AD:PID\t0/1:20,5,1:100_A_T\t0/0:30,0,0";
        let record = VariantRecord::from_line(line, &samples).unwrap();

        assert_eq!(record.variant.chrom, "chr1");
        assert_eq!(record.variant.pos, 100);
        assert_eq!(record.variant.alt_alleles, vec!["T", "G"]);
        assert!(record.filters.is_empty());
        assert_eq!(record.attribute_as_floats("TLOD"), Some(vec![6.2, 1.1]));
        assert!(record.has_attribute("PON"));
        assert_eq!(record.genotypes.len(), 2);
        assert_eq!(record.genotypes[0].sample, "TUMOR");
        assert_eq!(record.genotypes[0].get_ints("AD"), Some(vec![20, 5, 1]));
        assert_eq!(record.genotypes[0].phasing_id(), Some("100_A_T"));
        assert_eq!(record.genotypes[1].phasing_id(), None);
    }

    #[test]
    fn test_record_from_line_invalid() {
        assert!(VariantRecord::from_line("chr1\t100\t.\tA", &[]).is_err());
        assert!(VariantRecord::from_line("chr1\tabc\t.\tA\tT\t.\t.\t.", &[]).is_err());
    }

    #[test]
    fn test_record_to_line() {
        let samples = vec!["TUMOR".to_string()];
        let line = "chr1\t100\trs1\tA\tT\t50\tPASS\tDP=30;PON\tGT:AD\t0/1:20,5";
        let mut record = VariantRecord::from_line(line, &samples).unwrap();
        assert_eq!(record.to_line(), line);

        record.filters = vec!["weak_evidence".to_string(), "base_qual".to_string()];
        record.set_attribute("SEQQ", Some("3".to_string()));
        assert_eq!(
            record.to_line(),
            "chr1\t100\trs1\tA\tT\t50\tweak_evidence;base_qual\tDP=30;PON;SEQQ=3\tGT:AD\t0/1:20,5"
        );
    }

    #[test]
    fn test_header() {
        let file = write_vcf(&["chr1\t100\t.\tA\tT\t.\tPASS\tDP=30\tGT\t0/1\t0/0"]);
        let vcf = VcfFile::open(file.path()).unwrap();
        let header = vcf.header();

        assert_eq!(header.samples, vec!["TUMOR", "NORMAL"]);
        assert_eq!(header.meta_lines.len(), 3);
        let normals = header.normal_samples();
        assert_eq!(normals.len(), 1);
        assert!(normals.contains("NORMAL"));
    }

    #[test]
    fn test_header_without_column_line() {
        let lines = vec!["##fileformat=VCFv4.2".to_string()];
        assert!(VcfHeader::from_lines(&lines).is_err());
    }

    #[test]
    fn test_add_header_lines_skips_duplicates() {
        let file = write_vcf(&[]);
        let mut header = VcfFile::open(file.path()).unwrap().header().clone();
        header.add_info_line("TLOD", "A", "Float", "duplicate");
        header.add_info_line("SEQQ", "1", "Integer", "sequencing quality");
        header.add_filter_line("weak_evidence", "weak");
        header.add_filter_line("weak_evidence", "weak");

        let lines: Vec<&str> = header.lines().collect();
        assert_eq!(lines.len(), 6);
        assert_eq!(lines.last(), Some(&header.column_line.as_str()));
        assert!(lines.contains(&"##FILTER=<ID=weak_evidence,Description=\"weak\">"));
    }

    #[test]
    fn test_vcf_file_is_reiterable() {
        let file = write_vcf(&[
            "chr1\t100\t.\tA\tT\t.\tPASS\tDP=30\tGT\t0/1\t0/0",
            "",
            "chr2\t200\t.\tG\tGC\t.\tPASS\tDP=40\tGT\t0/1\t0/0",
        ]);
        let vcf = VcfFile::open(file.path()).unwrap();

        for _ in 0..2 {
            let records: Vec<VariantRecord> = vcf
                .records()
                .unwrap()
                .collect::<VfilterResult<Vec<_>>>()
                .unwrap();
            assert_eq!(records.len(), 2);
            assert_eq!(records[0].variant.chrom, "chr1");
            assert!(!records[1].is_snv());
        }
    }

    #[test]
    fn test_gzipped_vcf_round_trip() {
        let input = write_vcf(&["chr1\t100\t.\tA\tT\t.\tPASS\tDP=30\tGT\t0/1\t0/0"]);
        let vcf = VcfFile::open(input.path()).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let output_path = dir.path().join("filtered.vcf.gz");
        let mut writer = VcfWriter::create(&output_path, vcf.header()).unwrap();
        for record in vcf.records().unwrap() {
            writer.write_record(&record.unwrap()).unwrap();
        }
        writer.finish().unwrap();

        assert!(is_gzipped(&output_path).unwrap());
        let mut content = String::new();
        MultiGzDecoder::new(File::open(&output_path).unwrap())
            .read_to_string(&mut content)
            .unwrap();
        assert!(content.starts_with("##fileformat=VCFv4.2"));
        assert!(content.contains("chr1\t100\t.\tA\tT\t.\tPASS\tDP=30\tGT\t0/1\t0/0"));

        let reread = VcfFile::open(&output_path).unwrap();
        assert_eq!(reread.records().unwrap().count(), 1);
    }
}

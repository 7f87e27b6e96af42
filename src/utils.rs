//! Helpers shared by the VCF and table I/O and the command line

use crate::{VfilterError, VfilterResult};
use flate2::read::MultiGzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::Path;
use std::time::{Duration, Instant};

/// Cap for Phred-scaled annotations of zero probabilities
pub const MAX_PHRED_QUALITY: f64 = 254.0;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Convert an error probability to a rounded Phred-scaled quality
pub fn error_prob_to_qual(error_probability: f64) -> f64 {
    if error_probability <= 0.0 {
        return MAX_PHRED_QUALITY;
    }
    (-10.0 * error_probability.log10()).round().min(MAX_PHRED_QUALITY)
}

/// Detect gzip (and bgzip) input from the magic bytes rather than the name
pub fn is_gzipped<P: AsRef<Path>>(path: P) -> VfilterResult<bool> {
    let mut magic = [0u8; 2];
    match File::open(path)?.read_exact(&mut magic) {
        Ok(()) => Ok(magic == GZIP_MAGIC),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(VfilterError::Io(e)),
    }
}

/// Open a plain or gzip compressed text file for line reading
pub fn open_text_reader<P: AsRef<Path>>(path: P) -> VfilterResult<Box<dyn BufRead>> {
    let path = path.as_ref();
    let file = File::open(path)
        .map_err(|_| VfilterError::FileNotFound(path.to_string_lossy().to_string()))?;

    if is_gzipped(path)? {
        Ok(Box::new(BufReader::new(MultiGzDecoder::new(file))))
    } else {
        Ok(Box::new(BufReader::new(file)))
    }
}

/// Buffered text output, gzip compressed when the path ends in `.gz`.
///
/// Call `finish` once writing is done: a gzip stream is only complete after
/// its trailer is written, and errors are lost if that happens on drop.
pub enum TextWriter {
    Plain(BufWriter<File>),
    Gzip(BufWriter<GzEncoder<File>>),
}

impl TextWriter {
    pub fn create<P: AsRef<Path>>(path: P) -> VfilterResult<Self> {
        let path = path.as_ref();
        let file = File::create(path)?;

        if has_extension(path, "gz") {
            Ok(TextWriter::Gzip(BufWriter::new(GzEncoder::new(
                file,
                Compression::default(),
            ))))
        } else {
            Ok(TextWriter::Plain(BufWriter::new(file)))
        }
    }

    /// Flush all buffered output and complete the gzip stream
    pub fn finish(self) -> VfilterResult<()> {
        match self {
            TextWriter::Plain(mut writer) => writer.flush()?,
            TextWriter::Gzip(writer) => {
                let encoder = writer.into_inner().map_err(|e| e.into_error())?;
                encoder.finish()?.flush()?;
            }
        }
        Ok(())
    }
}

impl Write for TextWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match self {
            TextWriter::Plain(writer) => writer.write(buf),
            TextWriter::Gzip(writer) => writer.write(buf),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match self {
            TextWriter::Plain(writer) => writer.flush(),
            TextWriter::Gzip(writer) => writer.flush(),
        }
    }
}

/// Fail with `FileNotFound` unless the file exists and can be opened
pub fn validate_file_readable<P: AsRef<Path>>(path: P) -> VfilterResult<()> {
    let path = path.as_ref();
    if !path.is_file() || File::open(path).is_err() {
        return Err(VfilterError::FileNotFound(path.to_string_lossy().to_string()));
    }
    Ok(())
}

pub fn has_extension<P: AsRef<Path>>(path: P, extension: &str) -> bool {
    path.as_ref()
        .extension()
        .and_then(|s| s.to_str())
        .is_some_and(|s| s.eq_ignore_ascii_case(extension))
}

/// Human-readable file size, e.g. `1.50 KB`
pub fn format_file_size(size: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    let mut value = size as f64;
    let mut unit = 0;

    while value >= 1024.0 && unit + 1 < UNITS.len() {
        value /= 1024.0;
        unit += 1;
    }

    format!("{:.2} {}", value, UNITS[unit])
}

pub fn ensure_parent_dirs<P: AsRef<Path>>(path: P) -> VfilterResult<()> {
    match path.as_ref().parent() {
        Some(parent) if !parent.as_os_str().is_empty() => Ok(std::fs::create_dir_all(parent)?),
        _ => Ok(()),
    }
}

/// Log how far a multi-pass run has progressed
pub fn log_progress(current: usize, total: usize, message: &str) {
    if total == 0 {
        return;
    }
    let percentage = current as f64 * 100.0 / total as f64;
    log::info!("{}: {} / {} ({:.1}%)", message, current, total, percentage);
}

/// Logs the wall time of a stage when dropped
pub struct Timer {
    stage: String,
    start: Instant,
}

impl Timer {
    pub fn new(stage: &str) -> Self {
        log::info!("{}...", stage);
        Timer {
            stage: stage.to_string(),
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        log::info!("{} finished in {:.2?}", self.stage, self.elapsed());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn test_error_prob_to_qual() {
        assert_eq!(error_prob_to_qual(0.1), 10.0);
        assert_eq!(error_prob_to_qual(0.001), 30.0);
        assert_eq!(error_prob_to_qual(1.0), 0.0);
        assert_eq!(error_prob_to_qual(0.0), MAX_PHRED_QUALITY);
        assert_eq!(error_prob_to_qual(1e-40), MAX_PHRED_QUALITY);
    }

    #[test]
    fn test_is_gzipped() {
        let mut plain = NamedTempFile::new().unwrap();
        writeln!(plain, "##fileformat=VCFv4.2").unwrap();
        assert!(!is_gzipped(plain.path()).unwrap());

        let empty = NamedTempFile::new().unwrap();
        assert!(!is_gzipped(empty.path()).unwrap());
    }

    #[test]
    fn test_text_writer_and_reader() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["out.tsv", "out.tsv.gz"] {
            let path = dir.path().join(name);
            let mut writer = TextWriter::create(&path).unwrap();
            writeln!(writer, "statistic\tvalue").unwrap();
            writer.finish().unwrap();
            assert_eq!(is_gzipped(&path).unwrap(), name.ends_with(".gz"));

            let mut line = String::new();
            open_text_reader(&path).unwrap().read_line(&mut line).unwrap();
            assert_eq!(line, "statistic\tvalue\n");
        }
    }

    #[test]
    fn test_finished_gzip_stream_is_complete() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("calls.vcf.gz");

        let mut writer = TextWriter::create(&path).unwrap();
        for i in 0..1000 {
            writeln!(writer, "chr1\t{}\t.\tA\tT", i).unwrap();
        }
        writer.finish().unwrap();

        // the whole stream decodes, trailer included
        let mut content = String::new();
        MultiGzDecoder::new(File::open(&path).unwrap())
            .read_to_string(&mut content)
            .unwrap();
        assert_eq!(content.lines().count(), 1000);
        assert!(content.ends_with("chr1\t999\t.\tA\tT\n"));
    }

    #[test]
    fn test_validate_file_readable() {
        let file = NamedTempFile::new().unwrap();
        assert!(validate_file_readable(file.path()).is_ok());
        assert!(matches!(
            validate_file_readable("/nonexistent/file"),
            Err(VfilterError::FileNotFound(_))
        ));
        let dir = tempfile::tempdir().unwrap();
        assert!(validate_file_readable(dir.path()).is_err());
    }

    #[test]
    fn test_has_extension() {
        assert!(has_extension("calls.vcf", "vcf"));
        assert!(has_extension("calls.VCF", "vcf"));
        assert!(has_extension("calls.vcf.gz", "gz"));
        assert!(!has_extension("calls", "vcf"));
    }

    #[test]
    fn test_format_file_size() {
        assert_eq!(format_file_size(512), "512.00 B");
        assert_eq!(format_file_size(1536), "1.50 KB");
        assert_eq!(format_file_size(1024 * 1024), "1.00 MB");
    }

    #[test]
    fn test_ensure_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a").join("b").join("out.vcf");
        ensure_parent_dirs(&nested).unwrap();
        assert!(nested.parent().unwrap().exists());
        assert!(ensure_parent_dirs("out.vcf").is_ok());
    }

    #[test]
    fn test_timer() {
        let timer = Timer::new("test stage");
        std::thread::sleep(Duration::from_millis(1));
        assert!(timer.elapsed() >= Duration::from_millis(1));
    }
}

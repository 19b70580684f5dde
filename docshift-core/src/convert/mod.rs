//! Conversion dispatch.
//!
//! [`Operation`] names what a job does and carries its static contract
//! (form field, accepted input kind, upload limits). [`Dispatcher`] routes a
//! validated job to the module implementing that operation and translates
//! every failure into a [`ConvertError`]. The modules themselves only
//! prepare inputs, call the external library or process, and register
//! their outputs with the job.

mod compress;
mod image_convert;
mod image_pdf;
mod merge;
mod office;
pub(crate) mod pdf;
mod pdf_word;
mod raster;

pub use pdf_word::{is_heading, segment_lines, Block};

use crate::config::ServiceConfig;
use crate::error::{ConvertError, Result};
use crate::job::{ConversionJob, JobState};
use crate::options::ConversionRequest;
use crate::upload::{validate_batch, FileKind, ImageFormat, UploadLimits};
use std::fmt;
use tracing::{error, info, Instrument};

/// Document kinds that have a preview endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PreviewKind {
    Pdf,
    Word,
    Image,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Merge,
    Compress,
    /// Rasterize pages to JPEG or PNG.
    PdfToImage(ImageFormat),
    ImageToPdf,
    ImageToImage { from: ImageFormat, to: ImageFormat },
    OfficeToPdf,
    PdfToWord,
    Preview(PreviewKind),
}

impl Operation {
    /// Parses the `{from}-to-{to}` path segment of the image conversion route.
    pub fn image_conversion(pair: &str) -> Result<Self> {
        let invalid = |reason: &str| ConvertError::invalid_option("conversion", pair, reason);
        let (from, to) = pair
            .split_once("-to-")
            .ok_or_else(|| invalid("expected '<source>-to-<target>'"))?;
        let from = ImageFormat::parse(from).ok_or_else(|| invalid("unsupported source format"))?;
        let to = ImageFormat::parse(to).ok_or_else(|| invalid("unsupported target format"))?;
        if from == to {
            return Err(invalid("source and target formats are the same"));
        }
        Ok(Operation::ImageToImage { from, to })
    }

    /// Short name used for logging and scratch directory names.
    pub fn name(&self) -> String {
        match self {
            Operation::Merge => "merge".to_string(),
            Operation::Compress => "compress".to_string(),
            Operation::PdfToImage(format) => format!("pdf-to-{}", format.extension()),
            Operation::ImageToPdf => "image-to-pdf".to_string(),
            Operation::ImageToImage { from, to } => format!("{}-to-{}", from.extension(), to.extension()),
            Operation::OfficeToPdf => "word-to-pdf".to_string(),
            Operation::PdfToWord => "pdf-to-word".to_string(),
            Operation::Preview(PreviewKind::Pdf) => "preview-pdf".to_string(),
            Operation::Preview(PreviewKind::Word) => "preview-word".to_string(),
            Operation::Preview(PreviewKind::Image) => "preview-image".to_string(),
        }
    }

    /// Multipart field that carries the input files.
    pub fn file_field(&self) -> &'static str {
        match self {
            Operation::Merge | Operation::ImageToImage { .. } => "files",
            Operation::Compress | Operation::PdfToImage(_) | Operation::PdfToWord => "pdf",
            Operation::ImageToPdf => "images",
            Operation::OfficeToPdf => "word",
            Operation::Preview(_) => "file",
        }
    }

    pub fn input_kind(&self) -> FileKind {
        match self {
            Operation::Merge
            | Operation::Compress
            | Operation::PdfToImage(_)
            | Operation::PdfToWord
            | Operation::Preview(PreviewKind::Pdf) => FileKind::Pdf,
            Operation::ImageToPdf | Operation::Preview(PreviewKind::Image) => FileKind::AnyImage,
            Operation::ImageToImage { from, .. } => FileKind::Image(*from),
            Operation::OfficeToPdf | Operation::Preview(PreviewKind::Word) => FileKind::Word,
        }
    }

    pub fn default_limits(&self) -> UploadLimits {
        match self {
            Operation::Merge => UploadLimits::batch(100, 2, 10),
            Operation::Compress | Operation::Preview(PreviewKind::Pdf) => UploadLimits::single(100),
            Operation::ImageToPdf | Operation::ImageToImage { .. } => UploadLimits::batch(50, 1, 10),
            Operation::PdfToImage(_)
            | Operation::OfficeToPdf
            | Operation::PdfToWord
            | Operation::Preview(_) => UploadLimits::single(50),
        }
    }

    /// Default limits with the configured overrides applied.
    pub fn limits(&self, config: &ServiceConfig) -> UploadLimits {
        let mut limits = self.default_limits();
        if let Some(max_file_bytes) = config.max_file_bytes {
            limits.max_file_bytes = max_file_bytes;
        }
        if let Some(max_files) = config.max_files {
            if limits.max_files > 1 {
                limits.max_files = max_files.max(limits.min_files);
            }
        }
        limits
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

/// Informational response headers produced alongside the outputs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConversionReport {
    pub headers: Vec<(&'static str, String)>,
}

impl ConversionReport {
    pub fn with_header(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.headers.push((name, value.into()));
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// Runs CPU-bound library work off the async executor.
pub(crate) async fn blocking<T, F>(work: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| ConvertError::Internal(format!("conversion task failed: {e}")))?
}

/// Routes jobs to their operation.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    config: ServiceConfig,
}

impl Dispatcher {
    pub fn new(config: ServiceConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// Checks the job's inputs against its operation's count and format
    /// rules. Either every file passes or the job does not proceed.
    pub fn validate(&self, job: &mut ConversionJob) -> Result<()> {
        if job.state() == JobState::Created {
            job.advance(JobState::Validating)?;
        }
        let operation = job.operation();
        operation
            .limits(&self.config)
            .check_count(job.inputs().len(), operation.file_field())?;
        validate_batch(job.inputs(), operation.input_kind())
    }

    /// Runs the conversion, leaving the outputs registered on the job.
    pub async fn convert(&self, job: &mut ConversionJob, request: &ConversionRequest) -> Result<ConversionReport> {
        job.advance(JobState::Converting)?;
        if job.inputs().is_empty() {
            return Err(ConvertError::MissingFile {
                field: job.operation().file_field().to_string(),
            });
        }

        let span = tracing::info_span!("convert", job = %job.id(), operation = %job.operation());
        let result = async {
            match request {
                ConversionRequest::Merge => merge::run(job).await,
                ConversionRequest::Compress(options) => compress::run(job, *options).await,
                ConversionRequest::PdfToImage(options) => raster::run(job, options, &self.config.rasterizer).await,
                ConversionRequest::ImageToPdf(options) => image_pdf::run(job, *options).await,
                ConversionRequest::ImageToImage(options) => image_convert::run(job, *options).await,
                ConversionRequest::OfficeToPdf => office::run(job, &self.config.office).await,
                ConversionRequest::PdfToWord(options) => pdf_word::run(job, *options).await,
                ConversionRequest::Preview => Err(ConvertError::Internal(
                    "preview jobs are not dispatched for conversion".to_string(),
                )),
            }
        }
        .instrument(span)
        .await;

        match result {
            Ok(report) if job.outputs().is_empty() => Err(ConvertError::Internal(format!(
                "{} produced no output (report: {report:?})",
                job.operation()
            ))),
            Ok(report) => {
                info!(job = %job.id(), outputs = job.outputs().len(), "conversion finished");
                Ok(report)
            }
            Err(err) => {
                error!(job = %job.id(), operation = %job.operation(), error = %err, "conversion failed");
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn image_conversion_routes() {
        assert_eq!(
            Operation::image_conversion("png-to-webp").unwrap(),
            Operation::ImageToImage {
                from: ImageFormat::Png,
                to: ImageFormat::Webp
            }
        );
        assert_eq!(
            Operation::image_conversion("jpeg-to-png").unwrap().name(),
            "jpg-to-png"
        );
        assert!(Operation::image_conversion("png-to-png").is_err());
        assert!(Operation::image_conversion("gif-to-png").is_err());
        assert!(Operation::image_conversion("png2webp").is_err());
    }

    #[test]
    fn limits_follow_the_operation() {
        let config = ServiceConfig::default();
        let merge = Operation::Merge.limits(&config);
        assert_eq!((merge.min_files, merge.max_files), (2, 10));
        assert_eq!(merge.max_file_bytes, 100 * 1024 * 1024);

        let raster = Operation::PdfToImage(ImageFormat::Png).limits(&config);
        assert_eq!(raster.max_files, 1);
        assert_eq!(raster.max_file_bytes, 50 * 1024 * 1024);
    }

    #[test]
    fn overrides_do_not_turn_single_file_operations_into_batches() {
        let config = ServiceConfig {
            max_files: Some(3),
            max_file_bytes: Some(10),
            ..ServiceConfig::default()
        };
        assert_eq!(Operation::Compress.limits(&config).max_files, 1);
        assert_eq!(Operation::ImageToPdf.limits(&config).max_files, 3);
        assert_eq!(Operation::Merge.limits(&config).max_file_bytes, 10);
    }

    #[test]
    fn field_names() {
        assert_eq!(Operation::Merge.file_field(), "files");
        assert_eq!(Operation::OfficeToPdf.file_field(), "word");
        assert_eq!(Operation::ImageToPdf.file_field(), "images");
        assert_eq!(Operation::PdfToImage(ImageFormat::Jpeg).file_field(), "pdf");
    }

    #[test]
    fn report_headers_are_case_insensitive() {
        let report = ConversionReport::default().with_header("X-Page-Count", "3");
        assert_eq!(report.header("x-page-count"), Some("3"));
        assert_eq!(report.header("x-other"), None);
    }
}

//! Uploaded file records and input validation.
//!
//! Parsing the multipart body is the HTTP layer's job; it streams each part
//! to a path handed out by [`crate::ConversionJob::stage_input`] and then
//! registers the finished file here as an [`UploadedFile`]. Everything that
//! decides whether a batch may proceed lives in this module.

use crate::error::{ConvertError, Result};
use serde::Serialize;
use std::fmt;
use std::io::Read;
use std::path::{Path, PathBuf};

const MB: u64 = 1024 * 1024;

/// A client file that has been fully written into a job's scratch directory.
#[derive(Debug, Clone, Serialize)]
pub struct UploadedFile {
    /// Client-supplied name, reduced to its final path component.
    pub original_name: String,
    /// Absolute path inside the job's scratch directory.
    pub stored_path: PathBuf,
    pub size_bytes: u64,
    pub declared_mime_type: String,
}

impl UploadedFile {
    /// Lowercased extension of the original name, if any.
    pub fn extension(&self) -> Option<String> {
        extension_of(&self.original_name)
    }

    /// Original name without its extension, used to name outputs.
    pub fn stem(&self) -> String {
        let stem = Path::new(&self.original_name)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("document")
            .trim();
        if stem.is_empty() {
            "document".to_string()
        } else {
            stem.to_string()
        }
    }
}

/// Raster formats the service reads and writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    Png,
    Jpeg,
    Webp,
}

impl ImageFormat {
    pub const ALL: [ImageFormat; 3] = [ImageFormat::Png, ImageFormat::Jpeg, ImageFormat::Webp];

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "png" => Some(ImageFormat::Png),
            "jpg" | "jpeg" => Some(ImageFormat::Jpeg),
            "webp" => Some(ImageFormat::Webp),
            _ => None,
        }
    }

    /// Canonical file extension.
    pub fn extension(self) -> &'static str {
        match self {
            ImageFormat::Png => "png",
            ImageFormat::Jpeg => "jpg",
            ImageFormat::Webp => "webp",
        }
    }

    pub fn mime_type(self) -> &'static str {
        match self {
            ImageFormat::Png => "image/png",
            ImageFormat::Jpeg => "image/jpeg",
            ImageFormat::Webp => "image/webp",
        }
    }

    fn accepts_extension(self, ext: &str) -> bool {
        match self {
            ImageFormat::Jpeg => ext == "jpg" || ext == "jpeg",
            other => ext == other.extension(),
        }
    }

    fn accepts_mime(self, mime: &str) -> bool {
        match self {
            ImageFormat::Jpeg => mime == "image/jpeg" || mime == "image/jpg",
            other => mime == other.mime_type(),
        }
    }

    pub fn to_image_crate(self) -> image::ImageFormat {
        match self {
            ImageFormat::Png => image::ImageFormat::Png,
            ImageFormat::Jpeg => image::ImageFormat::Jpeg,
            ImageFormat::Webp => image::ImageFormat::WebP,
        }
    }

    pub fn from_image_crate(format: image::ImageFormat) -> Option<Self> {
        match format {
            image::ImageFormat::Png => Some(ImageFormat::Png),
            image::ImageFormat::Jpeg => Some(ImageFormat::Jpeg),
            image::ImageFormat::WebP => Some(ImageFormat::Webp),
            _ => None,
        }
    }
}

impl fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ImageFormat::Png => "PNG",
            ImageFormat::Jpeg => "JPEG",
            ImageFormat::Webp => "WebP",
        };
        f.write_str(name)
    }
}

/// What kind of file an operation expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Pdf,
    /// `.doc` or `.docx`.
    Word,
    /// Exactly this raster format.
    Image(ImageFormat),
    /// Any supported raster format, as long as name and content agree.
    AnyImage,
}

impl FileKind {
    fn label(self) -> String {
        match self {
            FileKind::Pdf => "PDF".to_string(),
            FileKind::Word => "Word".to_string(),
            FileKind::Image(format) => format.to_string(),
            FileKind::AnyImage => "image (PNG, JPEG or WebP)".to_string(),
        }
    }
}

/// Size and count ceilings for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadLimits {
    pub max_file_bytes: u64,
    pub min_files: usize,
    pub max_files: usize,
}

impl UploadLimits {
    pub const fn single(max_file_mb: u64) -> Self {
        Self {
            max_file_bytes: max_file_mb * MB,
            min_files: 1,
            max_files: 1,
        }
    }

    pub const fn batch(max_file_mb: u64, min_files: usize, max_files: usize) -> Self {
        Self {
            max_file_bytes: max_file_mb * MB,
            min_files,
            max_files,
        }
    }

    /// Checks the number of files once the whole body has been read.
    pub fn check_count(&self, actual: usize, field: &str) -> Result<()> {
        if actual == 0 {
            return Err(ConvertError::MissingFile {
                field: field.to_string(),
            });
        }
        if actual < self.min_files {
            return Err(ConvertError::TooFewFiles {
                required: self.min_files,
                actual,
            });
        }
        if actual > self.max_files {
            return Err(ConvertError::TooManyFiles {
                max: self.max_files,
                actual,
            });
        }
        Ok(())
    }
}

/// Reduces a client-supplied file name to its last path component.
pub fn sanitize_file_name(raw: &str) -> String {
    let last = raw
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .trim()
        .trim_matches('"');
    let cleaned: String = last.chars().filter(|c| !c.is_control()).collect();
    if cleaned.is_empty() || cleaned == "." || cleaned == ".." {
        "upload".to_string()
    } else {
        cleaned
    }
}

/// Name under which the `index`-th input is stored on disk.
///
/// Only the extension survives from the client name, filtered to ASCII
/// alphanumerics, so nothing the client sends can escape the scratch dir.
pub fn stored_input_name(index: usize, original_name: &str) -> String {
    match extension_of(original_name) {
        Some(ext) if !ext.is_empty() && ext.len() <= 8 && ext.chars().all(|c| c.is_ascii_alphanumeric()) => {
            format!("input-{index}.{ext}")
        }
        _ => format!("input-{index}"),
    }
}

fn extension_of(name: &str) -> Option<String> {
    Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

fn is_generic_mime(mime: &str) -> bool {
    mime.is_empty() || mime == "application/octet-stream"
}

/// Reads up to 16 leading bytes for format sniffing.
fn read_magic(path: &Path) -> Result<Vec<u8>> {
    let mut file = std::fs::File::open(path).map_err(|e| ConvertError::workspace("read_magic", path, e))?;
    let mut buf = [0u8; 16];
    let mut filled = 0;
    while filled < buf.len() {
        let n = file
            .read(&mut buf[filled..])
            .map_err(|e| ConvertError::workspace("read_magic", path, e))?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(buf[..filled].to_vec())
}

/// Checks one uploaded file against the kind an operation expects.
///
/// For image kinds the extension, the declared mime type (unless generic)
/// and the sniffed content must all agree.
pub fn validate_file(file: &UploadedFile, kind: FileKind) -> Result<()> {
    let expected = kind.label();
    let reject = |reason: String| ConvertError::unsupported_format(&file.original_name, &expected, reason);

    if file.size_bytes == 0 {
        return Err(reject("file is empty".to_string()));
    }

    let ext = file.extension().unwrap_or_default();
    let mime = file.declared_mime_type.trim().to_ascii_lowercase();
    let magic = read_magic(&file.stored_path)?;

    match kind {
        FileKind::Pdf => {
            if ext != "pdf" {
                return Err(reject(format!("extension '.{ext}' is not .pdf")));
            }
            if !is_generic_mime(&mime) && mime != "application/pdf" {
                return Err(reject(format!("declared type '{mime}' is not application/pdf")));
            }
            if !magic.starts_with(b"%PDF-") {
                return Err(reject("content does not start with a PDF header".to_string()));
            }
        }
        FileKind::Word => {
            let content_ok = match ext.as_str() {
                "docx" => magic.starts_with(b"PK\x03\x04"),
                "doc" => magic.starts_with(&[0xD0, 0xCF, 0x11, 0xE0]),
                _ => return Err(reject(format!("extension '.{ext}' is not .doc or .docx"))),
            };
            const WORD_MIMES: [&str; 2] = [
                "application/msword",
                "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
            ];
            if !is_generic_mime(&mime) && !WORD_MIMES.contains(&mime.as_str()) {
                return Err(reject(format!("declared type '{mime}' is not a Word document type")));
            }
            if !content_ok {
                return Err(reject(format!("content is not a .{ext} document")));
            }
        }
        FileKind::Image(format) => {
            if !format.accepts_extension(&ext) {
                return Err(reject(format!("extension '.{ext}' does not match {format}")));
            }
            if !is_generic_mime(&mime) && !format.accepts_mime(&mime) {
                return Err(reject(format!("declared type '{mime}' does not match {format}")));
            }
            let sniffed = sniff_image(&magic);
            if sniffed != Some(format) {
                return Err(reject(format!("content is {}", describe_sniffed(sniffed))));
            }
        }
        FileKind::AnyImage => {
            let Some(by_ext) = ImageFormat::ALL.into_iter().find(|f| f.accepts_extension(&ext)) else {
                return Err(reject(format!("extension '.{ext}' is not a supported image type")));
            };
            if !is_generic_mime(&mime) && !by_ext.accepts_mime(&mime) {
                return Err(reject(format!("declared type '{mime}' does not match {by_ext}")));
            }
            let sniffed = sniff_image(&magic);
            if sniffed != Some(by_ext) {
                return Err(reject(format!("content is {}", describe_sniffed(sniffed))));
            }
        }
    }
    Ok(())
}

/// Validates a whole batch; any failure rejects all of it.
pub fn validate_batch(files: &[UploadedFile], kind: FileKind) -> Result<()> {
    files.iter().try_for_each(|file| validate_file(file, kind))
}

fn sniff_image(magic: &[u8]) -> Option<ImageFormat> {
    image::guess_format(magic).ok().and_then(ImageFormat::from_image_crate)
}

fn describe_sniffed(sniffed: Option<ImageFormat>) -> String {
    match sniffed {
        Some(format) => format!("actually {format}"),
        None => "not a recognised image".to_string(),
    }
}

//! Operation-specific options parsed from form fields.
//!
//! A missing field takes its documented default. A field that is present
//! but malformed or out of range is rejected, naming the field.

use crate::convert::Operation;
use crate::error::{ConvertError, Result};
use crate::page_range::PageSelection;
use crate::upload::ImageFormat;
use std::collections::BTreeMap;

/// Raw scalar form fields, keyed by field name.
pub type FormFields = BTreeMap<String, String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompressionLevel {
    Low,
    #[default]
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CompressOptions {
    pub level: CompressionLevel,
    pub remove_metadata: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RasterOptions {
    pub format: ImageFormat,
    pub dpi: u32,
    pub jpeg_quality: u8,
    pub pages: PageSelection,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PageSize {
    #[default]
    A4,
    Letter,
    Legal,
    A3,
    A5,
}

impl PageSize {
    /// Portrait width and height in points.
    pub fn dimensions(self) -> (f64, f64) {
        match self {
            PageSize::A4 => (595.0, 842.0),
            PageSize::Letter => (612.0, 792.0),
            PageSize::Legal => (612.0, 1008.0),
            PageSize::A3 => (842.0, 1191.0),
            PageSize::A5 => (420.0, 595.0),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Orientation {
    #[default]
    Portrait,
    Landscape,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Layout {
    /// Scale to the largest size that fits inside the margins, centered.
    #[default]
    Fit,
    /// Stretch to the full page, ignoring aspect ratio.
    Fill,
    /// Native pixel size (one pixel per point), shrunk only if too large.
    Original,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ImagePdfOptions {
    pub page_size: PageSize,
    pub orientation: Orientation,
    pub layout: Layout,
}

impl ImagePdfOptions {
    /// Page width and height after applying the orientation.
    pub fn page_dimensions(&self) -> (f64, f64) {
        let (w, h) = self.page_size.dimensions();
        match self.orientation {
            Orientation::Portrait => (w, h),
            Orientation::Landscape => (h, w),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageConvertOptions {
    pub from: ImageFormat,
    pub to: ImageFormat,
    pub quality: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WordOptions {
    pub preserve_layout: bool,
}

/// Fully parsed, defaulted options for one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConversionRequest {
    Merge,
    Compress(CompressOptions),
    PdfToImage(RasterOptions),
    ImageToPdf(ImagePdfOptions),
    ImageToImage(ImageConvertOptions),
    OfficeToPdf,
    PdfToWord(WordOptions),
    Preview,
}

struct Fields<'a>(&'a FormFields);

impl Fields<'_> {
    fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(|v| v.trim()).filter(|v| !v.is_empty())
    }

    fn choice<T: Copy>(&self, name: &str, default: T, choices: &[(&str, T)]) -> Result<T> {
        let Some(raw) = self.get(name) else {
            return Ok(default);
        };
        choices
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(raw))
            .map(|(_, value)| *value)
            .ok_or_else(|| {
                let expected = choices.iter().map(|(k, _)| *k).collect::<Vec<_>>().join(", ");
                ConvertError::invalid_option(name, raw, format!("expected one of: {expected}"))
            })
    }

    fn number(&self, name: &str, default: u32, min: u32, max: u32) -> Result<u32> {
        let Some(raw) = self.get(name) else {
            return Ok(default);
        };
        let value = raw
            .parse::<u32>()
            .map_err(|_| ConvertError::invalid_option(name, raw, "expected a whole number"))?;
        if !(min..=max).contains(&value) {
            return Err(ConvertError::invalid_option(
                name,
                raw,
                format!("must be between {min} and {max}"),
            ));
        }
        Ok(value)
    }

    fn flag(&self, name: &str) -> Result<bool> {
        let Some(raw) = self.get(name) else {
            return Ok(false);
        };
        match raw.to_ascii_lowercase().as_str() {
            "true" | "1" | "on" | "yes" => Ok(true),
            "false" | "0" | "off" | "no" => Ok(false),
            _ => Err(ConvertError::invalid_option(name, raw, "expected true or false")),
        }
    }
}

impl ConversionRequest {
    pub fn from_fields(operation: Operation, fields: &FormFields) -> Result<Self> {
        let f = Fields(fields);
        let request = match operation {
            Operation::Merge => ConversionRequest::Merge,
            Operation::Compress => ConversionRequest::Compress(CompressOptions {
                level: f.choice(
                    "compressionLevel",
                    CompressionLevel::Medium,
                    &[
                        ("low", CompressionLevel::Low),
                        ("medium", CompressionLevel::Medium),
                        ("high", CompressionLevel::High),
                    ],
                )?,
                remove_metadata: f.flag("removeMetadata")?,
            }),
            Operation::PdfToImage(format) => {
                let pages = PageSelection::from_fields(f.get("pageRange"), f.get("customRange"))?;
                pages.check_syntax()?;
                ConversionRequest::PdfToImage(RasterOptions {
                    format,
                    dpi: f.number("resolution", 150, 36, 600)?,
                    jpeg_quality: f.number("quality", 85, 1, 100)? as u8,
                    pages,
                })
            }
            Operation::ImageToPdf => ConversionRequest::ImageToPdf(ImagePdfOptions {
                page_size: f.choice(
                    "pageSize",
                    PageSize::A4,
                    &[
                        ("A4", PageSize::A4),
                        ("Letter", PageSize::Letter),
                        ("Legal", PageSize::Legal),
                        ("A3", PageSize::A3),
                        ("A5", PageSize::A5),
                    ],
                )?,
                orientation: f.choice(
                    "orientation",
                    Orientation::Portrait,
                    &[("portrait", Orientation::Portrait), ("landscape", Orientation::Landscape)],
                )?,
                layout: f.choice(
                    "layout",
                    Layout::Fit,
                    &[("fit", Layout::Fit), ("fill", Layout::Fill), ("original", Layout::Original)],
                )?,
            }),
            Operation::ImageToImage { from, to } => ConversionRequest::ImageToImage(ImageConvertOptions {
                from,
                to,
                quality: f.number("quality", 90, 1, 100)? as u8,
            }),
            Operation::OfficeToPdf => ConversionRequest::OfficeToPdf,
            Operation::PdfToWord => ConversionRequest::PdfToWord(WordOptions {
                preserve_layout: f.flag("preserveLayout")?,
            }),
            Operation::Preview(_) => ConversionRequest::Preview,
        };
        Ok(request)
    }
}

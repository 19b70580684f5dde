//! Lightweight previews returned before a full conversion.

use crate::convert::{blocking, pdf, PreviewKind};
use crate::error::{ConvertError, Result};
use crate::job::{ConversionJob, JobState};
use crate::upload::{ImageFormat, UploadedFile};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;
use std::fs::File;
use std::io::{Cursor, Read};
use std::path::Path;

/// Longest preview text returned, in characters.
pub const PREVIEW_TEXT_CHARS: usize = 500;
/// Longest thumbnail side, in pixels.
pub const THUMBNAIL_SIZE: u32 = 160;
/// Largest inflated `word/document.xml` a preview will read.
pub const MAX_DOCUMENT_XML_BYTES: u64 = 32 * 1024 * 1024;

lazy_static! {
    static ref WORD_TEXT_RUN: Regex = Regex::new(r"<w:t(?:\s[^>]*)?>([^<]*)</w:t>").expect("text run pattern is valid");
    static ref WORD_BREAK: Regex = Regex::new(r"<w:(?:tab|br|cr)\b[^>]*/>").expect("break pattern is valid");
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PdfPreview {
    pub page_count: usize,
    pub word_count: usize,
    pub preview_text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WordPreview {
    pub file_size: u64,
    pub word_count: usize,
    pub paragraph_count: usize,
    /// `None` for legacy `.doc` files, whose binary format is not parsed.
    pub preview_text: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImagePreview {
    pub format: ImageFormat,
    pub width: u32,
    pub height: u32,
    /// `data:image/png;base64,...`
    pub thumbnail: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Preview {
    Pdf(PdfPreview),
    Word(WordPreview),
    Image(ImagePreview),
}

/// Collapses whitespace and cuts to [`PREVIEW_TEXT_CHARS`].
fn preview_text(text: &str) -> String {
    let mut out = String::new();
    for (i, word) in text.split_whitespace().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        out.push_str(word);
        if out.chars().count() >= PREVIEW_TEXT_CHARS {
            break;
        }
    }
    match out.char_indices().nth(PREVIEW_TEXT_CHARS) {
        Some((cut, _)) => out[..cut].to_string(),
        None => out,
    }
}

fn pdf_preview(file: &UploadedFile) -> Result<PdfPreview> {
    let summary = pdf::summarize(&file.stored_path, &file.original_name)?;
    Ok(PdfPreview {
        page_count: summary.page_count,
        word_count: summary.text.split_whitespace().count(),
        preview_text: preview_text(&summary.text),
        title: summary.title,
        author: summary.author,
    })
}

fn unescape_xml(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

/// Paragraph texts of a WordprocessingML body, empty paragraphs dropped.
pub(crate) fn docx_paragraphs(document_xml: &str) -> Vec<String> {
    document_xml
        .split("</w:p>")
        .map(|chunk| {
            let chunk = WORD_BREAK.replace_all(chunk, "<w:t> </w:t>");
            WORD_TEXT_RUN
                .captures_iter(&chunk)
                .map(|cap| unescape_xml(&cap[1]))
                .collect::<String>()
        })
        .map(|text| text.trim().to_string())
        .filter(|text| !text.is_empty())
        .collect()
}

fn read_docx_body(path: &Path, name: &str, limit: u64) -> Result<String> {
    let corrupt = |detail: String| ConvertError::CorruptDocument {
        name: name.to_string(),
        detail,
    };
    let file = File::open(path).map_err(|e| ConvertError::workspace("open_docx", path, e))?;
    let mut archive = zip::ZipArchive::new(file).map_err(|e| corrupt(e.to_string()))?;
    let mut entry = archive
        .by_name("word/document.xml")
        .map_err(|_| corrupt("word/document.xml is missing".to_string()))?;
    let too_large = || corrupt(format!("word/document.xml inflates beyond {limit} bytes"));
    if entry.size() > limit {
        return Err(too_large());
    }
    // The declared size can lie; the reader is capped too.
    let mut xml = Vec::new();
    entry
        .by_ref()
        .take(limit + 1)
        .read_to_end(&mut xml)
        .map_err(|e| corrupt(e.to_string()))?;
    if xml.len() as u64 > limit {
        return Err(too_large());
    }
    String::from_utf8(xml).map_err(|e| corrupt(e.to_string()))
}

fn word_preview(file: &UploadedFile) -> Result<WordPreview> {
    if file.extension().as_deref() != Some("docx") {
        return Ok(WordPreview {
            file_size: file.size_bytes,
            word_count: 0,
            paragraph_count: 0,
            preview_text: None,
        });
    }
    let paragraphs = docx_paragraphs(&read_docx_body(
        &file.stored_path,
        &file.original_name,
        MAX_DOCUMENT_XML_BYTES,
    )?);
    let text = paragraphs.join("\n");
    Ok(WordPreview {
        file_size: file.size_bytes,
        word_count: text.split_whitespace().count(),
        paragraph_count: paragraphs.len(),
        preview_text: Some(preview_text(&text)),
    })
}

fn image_preview(file: &UploadedFile) -> Result<ImagePreview> {
    let corrupt = |detail: String| ConvertError::CorruptDocument {
        name: file.original_name.clone(),
        detail,
    };
    let bytes = std::fs::read(&file.stored_path).map_err(|e| ConvertError::workspace("read_image", &file.stored_path, e))?;
    let format = image::guess_format(&bytes)
        .ok()
        .and_then(ImageFormat::from_image_crate)
        .ok_or_else(|| corrupt("unrecognised image content".to_string()))?;
    let decoded = image::load_from_memory_with_format(&bytes, format.to_image_crate()).map_err(|e| corrupt(e.to_string()))?;

    let thumbnail = decoded.thumbnail(THUMBNAIL_SIZE, THUMBNAIL_SIZE);
    let mut png = Cursor::new(Vec::new());
    thumbnail
        .write_to(&mut png, image::ImageFormat::Png)
        .map_err(|e| ConvertError::Conversion(format!("could not encode thumbnail: {e}")))?;

    Ok(ImagePreview {
        format,
        width: decoded.width(),
        height: decoded.height(),
        thumbnail: format!("data:image/png;base64,{}", STANDARD.encode(png.into_inner())),
    })
}

/// Builds the preview for a validated single-file preview job.
pub async fn preview(job: &mut ConversionJob) -> Result<Preview> {
    let crate::convert::Operation::Preview(kind) = job.operation() else {
        return Err(ConvertError::Internal(format!("{} is not a preview job", job.operation())));
    };
    job.advance(JobState::Converting)?;
    let file = job
        .inputs()
        .first()
        .cloned()
        .ok_or_else(|| ConvertError::MissingFile {
            field: job.operation().file_field().to_string(),
        })?;

    blocking(move || match kind {
        PreviewKind::Pdf => pdf_preview(&file).map(Preview::Pdf),
        PreviewKind::Word => word_preview(&file).map(Preview::Word),
        PreviewKind::Image => image_preview(&file).map(Preview::Image),
    })
    .await
}

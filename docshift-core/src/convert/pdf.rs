//! Thin wrappers over the PDF engine's reader.

use crate::error::{classify_pdf_error, Result};
use oxidize_pdf::parser::{PdfDocument, PdfReader};
use std::fs::File;
use std::path::Path;

pub(crate) fn open(path: &Path, name: &str) -> Result<PdfDocument<File>> {
    let reader = PdfReader::open(path).map_err(|e| classify_pdf_error(name, e))?;
    Ok(PdfDocument::new(reader))
}

pub(crate) fn page_count(path: &Path, name: &str) -> Result<usize> {
    let document = open(path, name)?;
    let count = document.page_count().map_err(|e| classify_pdf_error(name, e))?;
    Ok(count as usize)
}

/// Text of every page, in page order.
pub(crate) fn page_texts(path: &Path, name: &str) -> Result<Vec<String>> {
    let document = open(path, name)?;
    let pages = document.extract_text().map_err(|e| classify_pdf_error(name, e))?;
    Ok(pages.into_iter().map(|page| page.text).collect())
}

#[derive(Debug, Default)]
pub(crate) struct PdfSummary {
    pub page_count: usize,
    pub text: String,
    pub title: Option<String>,
    pub author: Option<String>,
}

/// Page count, joined text and the descriptive metadata in one pass.
pub(crate) fn summarize(path: &Path, name: &str) -> Result<PdfSummary> {
    let document = open(path, name)?;
    let page_count = document.page_count().map_err(|e| classify_pdf_error(name, e))? as usize;
    let text = document
        .extract_text()
        .map_err(|e| classify_pdf_error(name, e))?
        .into_iter()
        .map(|page| page.text)
        .collect::<Vec<_>>()
        .join("\n");
    // Metadata is decorative; a broken Info dictionary should not fail a preview.
    let (title, author) = match document.metadata() {
        Ok(meta) => (non_blank(meta.title), non_blank(meta.author)),
        Err(_) => (None, None),
    };
    Ok(PdfSummary {
        page_count,
        text,
        title,
        author,
    })
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}


#[cfg(test)]
mod tests {
    use super::fixtures::write_pdf;
    use super::*;
    use crate::error::ConvertError;

    #[test]
    fn counts_pages_and_reads_text() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.pdf");
        write_pdf(&path, &["first page", "second page"]);

        assert_eq!(page_count(&path, "a.pdf").unwrap(), 2);
        let texts = page_texts(&path, "a.pdf").unwrap();
        assert_eq!(texts.len(), 2);
        assert!(texts[1].contains("second page"));
    }

    #[test]
    fn garbage_is_a_corrupt_document() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.pdf");
        std::fs::write(&path, b"definitely not a pdf document").unwrap();

        let err = page_count(&path, "bad.pdf").unwrap_err();
        assert!(matches!(
            err,
            ConvertError::CorruptDocument { .. } | ConvertError::PasswordProtected { .. }
        ));
    }
}

//! PDF to an editable `.docx`.
//!
//! There is no OCR: the text layer is extracted page by page, split into
//! headings and paragraphs with a line heuristic, and written out as a
//! minimal WordprocessingML package. A PDF without a text layer fails
//! with [`ConvertError::NoExtractableText`].

use super::{blocking, pdf, ConversionReport};
use crate::error::{ConvertError, Result};
use crate::job::{ConversionJob, OutputFile};
use crate::options::WordOptions;
use lazy_static::lazy_static;
use regex::Regex;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

const DOCX_MIME: &str = "application/vnd.openxmlformats-officedocument.wordprocessingml.document";
const HEADING_MAX_CHARS: usize = 80;
const HEADING_MAX_WORDS: usize = 12;

lazy_static! {
    // `1.`, `12)`, `IV.`, `A.` followed by whitespace or end of line.
    static ref LIST_MARKER: Regex = Regex::new(r"^(?:\d{1,3}|[IVXLCDM]{1,6}|[ivxlcdm]{1,6}|[A-Z])[.)](?:\s|$)")
        .expect("list marker pattern is valid");
}

/// A reconstructed document element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Block {
    Heading(String),
    Paragraph(String),
    /// Boundary between two source pages, kept only in layout mode.
    PageBreak,
}

/// Whether a single line of extracted text reads like a heading.
///
/// The line must be short, and additionally be all caps, end in a colon,
/// or start with a numbered-list marker.
pub fn is_heading(line: &str) -> bool {
    let line = line.trim();
    if line.is_empty() || line.chars().count() > HEADING_MAX_CHARS || line.split_whitespace().count() > HEADING_MAX_WORDS {
        return false;
    }
    let mut letters = line.chars().filter(|c| c.is_alphabetic()).peekable();
    let all_caps = letters.peek().is_some() && letters.all(|c| !c.is_lowercase());
    all_caps || line.ends_with(':') || LIST_MARKER.is_match(line)
}

/// Appends `line` to a paragraph under construction, undoing hyphenation
/// at line ends.
fn append_line(paragraph: &mut String, line: &str) {
    if paragraph.is_empty() {
        paragraph.push_str(line);
        return;
    }
    let hyphenated = paragraph.ends_with('-')
        && paragraph
            .chars()
            .rev()
            .nth(1)
            .is_some_and(|c| c.is_alphabetic());
    if hyphenated {
        paragraph.pop();
    } else {
        paragraph.push(' ');
    }
    paragraph.push_str(line);
}

/// Splits extracted text into blocks.
///
/// By default consecutive body lines are re-flowed into one paragraph
/// until a blank line or heading. With `preserve_layout` every line
/// becomes its own paragraph.
pub fn segment_lines(text: &str, preserve_layout: bool) -> Vec<Block> {
    let mut blocks = Vec::new();
    let mut paragraph = String::new();

    let flush = |paragraph: &mut String, blocks: &mut Vec<Block>| {
        if !paragraph.is_empty() {
            blocks.push(Block::Paragraph(std::mem::take(paragraph)));
        }
    };

    for raw in text.lines() {
        let line = raw.trim();
        if line.is_empty() {
            flush(&mut paragraph, &mut blocks);
            continue;
        }
        if is_heading(line) {
            flush(&mut paragraph, &mut blocks);
            blocks.push(Block::Heading(line.to_string()));
        } else if preserve_layout {
            blocks.push(Block::Paragraph(line.to_string()));
        } else {
            append_line(&mut paragraph, line);
        }
    }
    flush(&mut paragraph, &mut blocks);
    blocks
}

fn pages_to_blocks(pages: &[String], preserve_layout: bool) -> Vec<Block> {
    let mut blocks = Vec::new();
    for page in pages {
        let page_blocks = segment_lines(page, preserve_layout);
        if page_blocks.is_empty() {
            continue;
        }
        if preserve_layout && !blocks.is_empty() {
            blocks.push(Block::PageBreak);
        }
        blocks.extend(page_blocks);
    }
    blocks
}

fn escape_xml(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            '\t' => out.push(c),
            c if c.is_control() => {}
            c => out.push(c),
        }
    }
    out
}

fn run_xml(text: &str) -> String {
    format!(r#"<w:r><w:t xml:space="preserve">{}</w:t></w:r>"#, escape_xml(text))
}

fn document_xml(blocks: &[Block]) -> String {
    let mut body = String::new();
    for block in blocks {
        match block {
            Block::Heading(text) => {
                body.push_str(r#"<w:p><w:pPr><w:pStyle w:val="Heading1"/></w:pPr>"#);
                body.push_str(&run_xml(text));
                body.push_str("</w:p>");
            }
            Block::Paragraph(text) => {
                body.push_str("<w:p>");
                body.push_str(&run_xml(text));
                body.push_str("</w:p>");
            }
            Block::PageBreak => body.push_str(r#"<w:p><w:r><w:br w:type="page"/></w:r></w:p>"#),
        }
    }
    format!(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main"><w:body>{body}<w:sectPr><w:pgSz w:w="11906" w:h="16838"/><w:pgMar w:top="1440" w:right="1440" w:bottom="1440" w:left="1440" w:header="708" w:footer="708" w:gutter="0"/></w:sectPr></w:body></w:document>"#
    )
}

const CONTENT_TYPES_XML: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"><Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/><Default Extension="xml" ContentType="application/xml"/><Override PartName="/word/document.xml" ContentType="application/vnd.openxmlformats-officedocument.wordprocessingml.document.main+xml"/><Override PartName="/word/styles.xml" ContentType="application/vnd.openxmlformats-officedocument.wordprocessingml.styles+xml"/></Types>"#;

const PACKAGE_RELS_XML: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="word/document.xml"/></Relationships>"#;

const DOCUMENT_RELS_XML: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/styles" Target="styles.xml"/></Relationships>"#;

const STYLES_XML: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<w:styles xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main"><w:style w:type="paragraph" w:default="1" w:styleId="Normal"><w:name w:val="Normal"/><w:pPr><w:spacing w:after="160" w:line="259" w:lineRule="auto"/></w:pPr><w:rPr><w:sz w:val="22"/></w:rPr></w:style><w:style w:type="paragraph" w:styleId="Heading1"><w:name w:val="heading 1"/><w:basedOn w:val="Normal"/><w:next w:val="Normal"/><w:qFormat/><w:pPr><w:keepNext/><w:spacing w:before="240" w:after="120"/><w:outlineLvl w:val="0"/></w:pPr><w:rPr><w:b/><w:sz w:val="32"/></w:rPr></w:style></w:styles>"#;

fn write_docx(blocks: &[Block], target: &Path) -> Result<()> {
    let file = File::create(target).map_err(|e| ConvertError::workspace("create_output", target, e))?;
    let mut zip = ZipWriter::new(file);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    let archive_err = |e: zip::result::ZipError| ConvertError::Archive(format!("could not write document: {e}"));

    let document = document_xml(blocks);
    let parts: [(&str, &str); 5] = [
        ("[Content_Types].xml", CONTENT_TYPES_XML),
        ("_rels/.rels", PACKAGE_RELS_XML),
        ("word/_rels/document.xml.rels", DOCUMENT_RELS_XML),
        ("word/styles.xml", STYLES_XML),
        ("word/document.xml", &document),
    ];
    for (name, content) in parts {
        zip.start_file(name, options).map_err(archive_err)?;
        zip.write_all(content.as_bytes())
            .map_err(|e| ConvertError::workspace("write_output", target, e))?;
    }
    zip.finish().map_err(archive_err)?;
    Ok(())
}

fn convert(source: &Path, name: &str, options: WordOptions, target: &Path) -> Result<usize> {
    let pages = pdf::page_texts(source, name)?;
    if pages.iter().all(|page| page.trim().is_empty()) {
        return Err(ConvertError::NoExtractableText { name: name.to_string() });
    }
    let blocks = pages_to_blocks(&pages, options.preserve_layout);
    write_docx(&blocks, target)?;
    Ok(blocks.len())
}

pub(crate) async fn run(job: &mut ConversionJob, options: WordOptions) -> Result<ConversionReport> {
    let input = job
        .inputs()
        .first()
        .cloned()
        .ok_or_else(|| ConvertError::MissingFile {
            field: "pdf".to_string(),
        })?;

    let output = job.reserve_output("document.docx");
    let target = output.clone();
    let source: PathBuf = input.stored_path.clone();
    let name = input.original_name.clone();
    let blocks = blocking(move || convert(&source, &name, options, &target)).await?;
    debug!(blocks, preserve_layout = options.preserve_layout, "document reconstructed");

    job.add_output(OutputFile {
        path: output,
        download_name: format!("{}.docx", input.stem()),
        mime_type: DOCX_MIME.to_string(),
    });
    Ok(ConversionReport::default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convert::pdf::fixtures::{write_blank_pdf, write_pdf};
    use crate::convert::Operation;
    use crate::upload::UploadedFile;
    use pretty_assertions::assert_eq;
    use std::io::Read;

    #[test]
    fn heading_heuristic() {
        assert!(is_heading("INTRODUCTION"));
        assert!(is_heading("Key findings:"));
        assert!(is_heading("1. Scope"));
        assert!(is_heading("2) Method"));
        assert!(is_heading("IV. Results"));
        assert!(is_heading("A. Appendix"));

        assert!(!is_heading("This is an ordinary sentence in a paragraph."));
        assert!(!is_heading("e.g. something"));
        assert!(!is_heading("12345"));
        assert!(!is_heading(""));
        let long = "WORD ".repeat(20);
        assert!(!is_heading(&long));
    }

    #[test]
    fn reflows_body_lines_between_headings() {
        let text = "SUMMARY\nThe quick brown fox\njumps over the lazy dog.\n\nA second para-\ngraph here.\nNext steps:\nShip it.";
        assert_eq!(
            segment_lines(text, false),
            vec![
                Block::Heading("SUMMARY".into()),
                Block::Paragraph("The quick brown fox jumps over the lazy dog.".into()),
                Block::Paragraph("A second paragraph here.".into()),
                Block::Heading("Next steps:".into()),
                Block::Paragraph("Ship it.".into()),
            ]
        );
    }

    #[test]
    fn preserve_layout_keeps_lines() {
        let text = "first line of text\nsecond line of text";
        assert_eq!(
            segment_lines(text, true),
            vec![
                Block::Paragraph("first line of text".into()),
                Block::Paragraph("second line of text".into()),
            ]
        );
    }

    #[test]
    fn page_breaks_only_in_layout_mode() {
        let pages = vec!["page one text".to_string(), "   ".to_string(), "page two text".to_string()];
        assert_eq!(pages_to_blocks(&pages, false).len(), 2);
        assert_eq!(
            pages_to_blocks(&pages, true),
            vec![
                Block::Paragraph("page one text".into()),
                Block::PageBreak,
                Block::Paragraph("page two text".into()),
            ]
        );
    }

    #[test]
    fn xml_is_escaped() {
        assert_eq!(escape_xml("a < b & \"c\"\u{1}"), "a &lt; b &amp; &quot;c&quot;");
    }

    async fn job_with_pdf(root: &Path, write: impl FnOnce(&Path)) -> ConversionJob {
        let mut job = ConversionJob::create(root, Operation::PdfToWord).await.unwrap();
        let path = job.stage_input("notes.pdf");
        write(&path);
        let size_bytes = std::fs::metadata(&path).unwrap().len();
        job.add_input(UploadedFile {
            original_name: "notes.pdf".into(),
            stored_path: path,
            size_bytes,
            declared_mime_type: "application/pdf".into(),
        });
        job
    }

    #[tokio::test]
    async fn writes_a_docx_package() {
        let root = tempfile::tempdir().unwrap();
        let mut job = job_with_pdf(root.path(), |p| write_pdf(p, &["OVERVIEW", "Body text & more"])).await;

        run(&mut job, WordOptions::default()).await.unwrap();

        let output = &job.outputs()[0];
        assert_eq!(output.download_name, "notes.docx");
        assert_eq!(output.mime_type, DOCX_MIME);

        let mut archive = zip::ZipArchive::new(File::open(&output.path).unwrap()).unwrap();
        assert!(archive.by_name("[Content_Types].xml").is_ok());
        let mut xml = String::new();
        archive
            .by_name("word/document.xml")
            .unwrap()
            .read_to_string(&mut xml)
            .unwrap();
        assert!(xml.contains("Heading1"));
        assert!(xml.contains("OVERVIEW"));
        assert!(xml.contains("Body text &amp; more"));
    }

    #[tokio::test]
    async fn image_only_pdf_has_no_text() {
        let root = tempfile::tempdir().unwrap();
        let mut job = job_with_pdf(root.path(), |p| write_blank_pdf(p, 2)).await;

        let err = run(&mut job, WordOptions::default()).await.unwrap_err();
        assert!(matches!(err, ConvertError::NoExtractableText { .. }));
        assert!(err.suggestion().is_some());
    }
}

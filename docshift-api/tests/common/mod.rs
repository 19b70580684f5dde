#![allow(dead_code)]

use axum::body::Body;
use axum::http::{Request, Response};
use docshift::ServiceConfig;
use docshift_api::{app, AppState};
use http_body_util::BodyExt;
use oxidize_pdf::{Document, Font, Page};
use std::collections::BTreeSet;
use std::io::Write;
use std::path::{Path, PathBuf};
use tower::ServiceExt;

pub const BOUNDARY: &str = "----WebKitFormBoundary7MA4YWxkTrZu0gW";

/// One multipart part; `file_name: None` makes it a plain text field.
pub struct Part {
    pub field: String,
    pub file_name: Option<String>,
    pub content_type: String,
    pub data: Vec<u8>,
}

impl Part {
    pub fn file(field: &str, file_name: &str, content_type: &str, data: Vec<u8>) -> Self {
        Self {
            field: field.to_string(),
            file_name: Some(file_name.to_string()),
            content_type: content_type.to_string(),
            data,
        }
    }

    pub fn text(field: &str, value: &str) -> Self {
        Self {
            field: field.to_string(),
            file_name: None,
            content_type: String::new(),
            data: value.as_bytes().to_vec(),
        }
    }
}

/// Builds a `multipart/form-data` POST to `uri`.
pub fn multipart_request(uri: &str, parts: &[Part]) -> Request<Body> {
    let mut body = Vec::new();
    for part in parts {
        write!(body, "--{BOUNDARY}\r\n").unwrap();
        match &part.file_name {
            Some(file_name) => {
                write!(
                    body,
                    "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n",
                    part.field, file_name
                )
                .unwrap();
                write!(body, "Content-Type: {}\r\n\r\n", part.content_type).unwrap();
            }
            None => {
                write!(body, "Content-Disposition: form-data; name=\"{}\"\r\n\r\n", part.field).unwrap();
            }
        }
        body.extend_from_slice(&part.data);
        write!(body, "\r\n").unwrap();
    }
    write!(body, "--{BOUNDARY}--\r\n").unwrap();

    Request::builder()
        .method("POST")
        .uri(uri)
        .header("Content-Type", format!("multipart/form-data; boundary={BOUNDARY}"))
        .body(Body::from(body))
        .unwrap()
}

/// A PDF with one page of text per entry.
pub fn create_test_pdf(pages: &[&str]) -> Vec<u8> {
    let mut doc = Document::new();
    for text in pages {
        let mut page = Page::a4();
        page.text()
            .set_font(Font::Helvetica, 24.0)
            .at(50.0, 750.0)
            .write(text)
            .unwrap();
        doc.add_page(page);
    }
    let mut pdf_bytes = Vec::new();
    doc.write(&mut pdf_bytes).unwrap();
    pdf_bytes
}

pub fn create_test_png(width: u32, height: u32) -> Vec<u8> {
    let img = image::RgbImage::from_pixel(width, height, image::Rgb([200, 40, 40]));
    let mut out = std::io::Cursor::new(Vec::new());
    img.write_to(&mut out, image::ImageFormat::Png).unwrap();
    out.into_inner()
}

pub fn page_count(pdf: &[u8]) -> usize {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("out.pdf");
    std::fs::write(&path, pdf).unwrap();
    let reader = oxidize_pdf::parser::PdfReader::open(&path).unwrap();
    let document = oxidize_pdf::parser::PdfDocument::new(reader);
    document.page_count().unwrap() as usize
}

/// Extracted text of every page, in page order.
pub fn page_texts(pdf: &[u8]) -> Vec<String> {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("out.pdf");
    std::fs::write(&path, pdf).unwrap();
    let reader = oxidize_pdf::parser::PdfReader::open(&path).unwrap();
    let document = oxidize_pdf::parser::PdfDocument::new(reader);
    document.extract_text().unwrap().into_iter().map(|page| page.text).collect()
}

/// A router over a fresh scratch root.
pub struct TestServer {
    pub scratch: tempfile::TempDir,
    pub state: AppState,
}

impl TestServer {
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    pub async fn with_config(adjust: impl FnOnce(&mut ServiceConfig)) -> Self {
        let scratch = tempfile::tempdir().unwrap();
        let mut config = ServiceConfig::with_scratch_root(scratch.path().join("scratch"));
        adjust(&mut config);
        let state = AppState::new(config).await.unwrap();
        Self { scratch, state }
    }

    pub async fn send(&self, request: Request<Body>) -> Response<Body> {
        app(self.state.clone()).oneshot(request).await.unwrap()
    }

    pub fn scratch_root(&self) -> PathBuf {
        self.state.config().scratch_root.clone()
    }

    /// Everything under the scratch root except the result store.
    pub fn leftovers(&self) -> BTreeSet<PathBuf> {
        let root = self.scratch_root();
        let results = self.state.config().results_dir();
        let mut found = BTreeSet::new();
        walk(&root, &results, &mut found);
        found
    }
}

fn walk(dir: &Path, skip: &Path, found: &mut BTreeSet<PathBuf>) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path == skip {
            continue;
        }
        if path.is_dir() {
            walk(&path, skip, found);
        }
        found.insert(path);
    }
}

pub async fn body_bytes(response: Response<Body>) -> Vec<u8> {
    response.into_body().collect().await.unwrap().to_bytes().to_vec()
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

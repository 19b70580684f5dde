mod common;

use axum::http::StatusCode;
use common::{body_bytes, body_json, create_test_pdf, multipart_request, page_count, page_texts, Part, TestServer};
use pretty_assertions::assert_eq;

fn merge_request(pdfs: Vec<Vec<u8>>) -> axum::http::Request<axum::body::Body> {
    let parts: Vec<Part> = pdfs
        .into_iter()
        .enumerate()
        .map(|(i, pdf)| Part::file("files", &format!("test{}.pdf", i + 1), "application/pdf", pdf))
        .collect();
    multipart_request("/api/merge-pdf", &parts)
}

#[tokio::test]
async fn test_merge_endpoint_success() {
    let server = TestServer::new().await;
    let pdf1 = create_test_pdf(&["AAA 1", "AAA 2"]);
    let pdf2 = create_test_pdf(&["BBB 1", "BBB 2", "BBB 3"]);

    let response = server.send(merge_request(vec![pdf1, pdf2])).await;
    assert_eq!(response.status(), StatusCode::OK);

    let headers = response.headers();
    assert_eq!(headers.get("content-type").unwrap(), "application/pdf");
    assert!(headers
        .get("content-disposition")
        .unwrap()
        .to_str()
        .unwrap()
        .contains("merged.pdf"));

    let info: serde_json::Value =
        serde_json::from_str(headers.get("x-merge-info").unwrap().to_str().unwrap()).unwrap();
    assert_eq!(info["files_merged"], 2);
    assert_eq!(info["total_pages"], 5);

    let body = body_bytes(response).await;
    assert!(body.starts_with(b"%PDF"));
    assert_eq!(info["output_size"], body.len() as u64);
    assert_eq!(page_count(&body), 5);

    let texts = page_texts(&body);
    let expected = ["AAA 1", "AAA 2", "BBB 1", "BBB 2", "BBB 3"];
    assert_eq!(texts.len(), expected.len());
    for (text, label) in texts.iter().zip(expected) {
        assert!(text.contains(label), "expected {label:?}, page text was {text:?}");
    }

    assert!(server.leftovers().is_empty(), "left behind: {:?}", server.leftovers());
}

#[tokio::test]
async fn test_merge_accepts_array_style_field_names() {
    let server = TestServer::new().await;
    let parts = vec![
        Part::file("files[]", "a.pdf", "application/pdf", create_test_pdf(&["a"])),
        Part::file("files[]", "b.pdf", "application/pdf", create_test_pdf(&["b"])),
    ];

    let response = server.send(multipart_request("/api/merge-pdf", &parts)).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(page_count(&body_bytes(response).await), 2);
}

#[tokio::test]
async fn test_merge_endpoint_insufficient_files() {
    let server = TestServer::new().await;
    let response = server.send(merge_request(vec![create_test_pdf(&["only one"])])).await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert!(json["error"].as_str().unwrap().contains('2'));
    assert!(server.leftovers().is_empty());
}

#[tokio::test]
async fn test_merge_endpoint_too_many_files() {
    let server = TestServer::new().await;
    let pdfs = (0..11).map(|i| create_test_pdf(&[&format!("doc {i}")])).collect();

    let response = server.send(merge_request(pdfs)).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(server.leftovers().is_empty());
}

#[tokio::test]
async fn test_merge_rejects_non_pdf_content() {
    let server = TestServer::new().await;
    let parts = vec![
        Part::file("files", "a.pdf", "application/pdf", create_test_pdf(&["a"])),
        Part::file("files", "b.pdf", "application/pdf", b"not really a pdf".to_vec()),
    ];

    let response = server.send(multipart_request("/api/merge-pdf", &parts)).await;
    assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
    let json = body_json(response).await;
    assert!(json["error"].as_str().unwrap().contains("b.pdf"));
    assert!(server.leftovers().is_empty());
}

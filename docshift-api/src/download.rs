//! Streaming download bodies.
//!
//! The file is streamed straight from disk. Whatever owns it on disk (a
//! conversion job, a stored result) travels inside the body as a guard and
//! is dropped when the stream ends or the client disconnects, which is
//! when its files are deleted.

use crate::error::AppError;
use axum::{
    body::Body,
    http::{header, HeaderName, HeaderValue, StatusCode},
    response::Response,
};
use docshift::{ConvertError, PackagedResult};
use futures::Stream;
use std::path::Path;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio_util::io::ReaderStream;

/// A stream that keeps `guard` alive until the inner stream is exhausted.
pub(crate) struct GuardedStream<S, G> {
    inner: S,
    guard: Option<G>,
}

impl<S, G> GuardedStream<S, G> {
    pub(crate) fn new(inner: S, guard: G) -> Self {
        Self {
            inner,
            guard: Some(guard),
        }
    }
}

impl<S, G> Stream for GuardedStream<S, G>
where
    S: Stream + Unpin,
    G: Unpin,
{
    type Item = S::Item;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        let next = Pin::new(&mut this.inner).poll_next(cx);
        if let Poll::Ready(None) = next {
            this.guard.take();
        }
        next
    }
}

/// Builds the `Content-Disposition` value with an ASCII fallback name and
/// an RFC 5987 encoded original.
pub(crate) fn content_disposition(file_name: &str) -> String {
    let fallback: String = file_name
        .chars()
        .map(|c| match c {
            '"' | '\\' => '_',
            c if c.is_ascii() && !c.is_ascii_control() => c,
            _ => '_',
        })
        .collect();
    if fallback == file_name {
        return format!("attachment; filename=\"{file_name}\"");
    }
    let encoded: String = file_name
        .bytes()
        .map(|b| match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'.' | b'-' | b'_' | b'~' => (b as char).to_string(),
            _ => format!("%{b:02X}"),
        })
        .collect();
    format!("attachment; filename=\"{fallback}\"; filename*=UTF-8''{encoded}")
}

fn header_value(value: &str) -> Result<HeaderValue, AppError> {
    HeaderValue::from_str(value)
        .map_err(|e| AppError::from(ConvertError::Internal(format!("invalid header value: {e}"))))
}

/// Streams `path` as an attachment, holding `guard` until the body is done.
pub(crate) async fn stream_file<G>(
    path: &Path,
    content_type: &str,
    download_name: &str,
    extra_headers: &[(&'static str, String)],
    guard: G,
) -> Result<Response, AppError>
where
    G: Send + Unpin + 'static,
{
    let file = tokio::fs::File::open(path)
        .await
        .map_err(|e| ConvertError::workspace("open_result", path, e))?;
    let length = file
        .metadata()
        .await
        .map_err(|e| ConvertError::workspace("stat_result", path, e))?
        .len();

    let body = Body::from_stream(GuardedStream::new(ReaderStream::new(file), guard));
    let mut response = Response::new(body);
    *response.status_mut() = StatusCode::OK;

    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, header_value(content_type)?);
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(length));
    headers.insert(header::CONTENT_DISPOSITION, header_value(&content_disposition(download_name))?);
    for (name, value) in extra_headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| AppError::from(ConvertError::Internal(format!("invalid header name: {e}"))))?;
        headers.insert(name, header_value(value)?);
    }
    Ok(response)
}

/// Streams a packaged job result; the job is cleaned once the body ends.
pub(crate) async fn job_response(
    job: docshift::ConversionJob,
    packaged: &PackagedResult,
    extra_headers: &[(&'static str, String)],
) -> Result<Response, AppError> {
    stream_file(
        &packaged.path,
        &packaged.content_type,
        &packaged.download_name,
        extra_headers,
        job,
    )
    .await
}

//! # docshift-api
//!
//! HTTP API for the docshift document conversion service.
//!
//! Every conversion route accepts a multipart upload, runs one
//! [`docshift::ConversionJob`] through the pipeline and streams the result
//! back, or parks it for a one-shot download when called with
//! `?handoff=true`.

mod api;
mod download;
mod error;
mod ingest;

pub use api::{app, health_check, spawn_result_sweeper, AppState, ConvertQuery, HealthResponse};
pub use error::{AppError, ErrorResponse};

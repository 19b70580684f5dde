use axum::{
    extract::multipart::MultipartError,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use docshift::{ConvertError, ErrorCategory};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, warn};

/// Standard error response structure
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Human-readable error message describing what went wrong
    pub error: String,
    /// Extra context, never including server paths
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    /// What the user can do about it, when the cause is known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

/// Application-specific error types for the API
#[derive(Debug, Error)]
pub enum AppError {
    /// Validation, conversion and infrastructure failures from the pipeline
    #[error(transparent)]
    Convert(#[from] ConvertError),
    /// The multipart body could not be read
    #[error("Failed to read multipart body: {0}")]
    Multipart(#[from] MultipartError),
    #[error("{0}")]
    NotFound(String),
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Convert(ConvertError::Io(err))
    }
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Convert(err) => match err {
                ConvertError::FileTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
                ConvertError::UnsupportedFormat { .. } => StatusCode::UNSUPPORTED_MEDIA_TYPE,
                ConvertError::ConverterTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
                other => match other.category() {
                    ErrorCategory::Validation => StatusCode::BAD_REQUEST,
                    ErrorCategory::Conversion | ErrorCategory::Infrastructure => {
                        StatusCode::INTERNAL_SERVER_ERROR
                    }
                },
            },
            AppError::Multipart(err) => err.status(),
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
        }
    }

    fn to_body(&self) -> ErrorResponse {
        match self {
            AppError::Convert(err) => {
                let suggestion = err.suggestion().map(str::to_string);
                match err.category() {
                    ErrorCategory::Validation => ErrorResponse {
                        error: err.to_string(),
                        details: None,
                        suggestion,
                    },
                    ErrorCategory::Conversion => ErrorResponse {
                        error: "Conversion failed".to_string(),
                        details: conversion_details(err),
                        suggestion,
                    },
                    ErrorCategory::Infrastructure => ErrorResponse {
                        error: "Internal server error".to_string(),
                        details: None,
                        suggestion: None,
                    },
                }
            }
            AppError::Multipart(err) => ErrorResponse {
                error: "Malformed upload".to_string(),
                details: Some(err.body_text()),
                suggestion: None,
            },
            AppError::NotFound(message) => ErrorResponse {
                error: message.clone(),
                details: None,
                suggestion: None,
            },
        }
    }
}

/// Client-safe description of a conversion failure.
fn conversion_details(err: &ConvertError) -> Option<String> {
    match err {
        ConvertError::ConverterFailed { tool, status, .. } => Some(format!("{tool} exited with {status}")),
        ConvertError::MissingOutput { tool, .. } => Some(format!("{tool} produced no output")),
        ConvertError::ConverterTimeout { .. }
        | ConvertError::PasswordProtected { .. }
        | ConvertError::CorruptDocument { .. }
        | ConvertError::NoExtractableText { .. }
        | ConvertError::Conversion(_) => Some(err.to_string()),
        _ => None,
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(status = status.as_u16(), error = %self, "request failed");
        } else {
            warn!(status = status.as_u16(), error = %self, "request rejected");
        }
        (status, Json(self.to_body())).into_response()
    }
}

//! Error types for the conversion pipeline.
//!
//! Every failure a job can hit is a [`ConvertError`]. Variants fall into
//! three groups, reported by [`ConvertError::category`]:
//!
//! * **Validation**: the client sent something unusable. Raised before any
//!   external converter runs.
//! * **Conversion**: the external engine rejected or choked on the input.
//! * **Infrastructure**: the service itself could not do its bookkeeping
//!   (scratch directory, disk writes, archive building).

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, ConvertError>;

/// Coarse grouping of [`ConvertError`] variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Validation,
    Conversion,
    Infrastructure,
}

#[derive(Debug, Error)]
pub enum ConvertError {
    // ── Validation ────────────────────────────────────────────────────────
    /// The multipart body did not contain the expected file field.
    #[error("No file provided in field '{field}'")]
    MissingFile { field: String },

    #[error("At least {required} files are required, got {actual}")]
    TooFewFiles { required: usize, actual: usize },

    #[error("At most {max} files are allowed, got {actual}")]
    TooManyFiles { max: usize, actual: usize },

    #[error("File '{name}' exceeds the {limit_bytes} byte limit")]
    FileTooLarge { name: String, limit_bytes: u64 },

    /// Extension, declared mime type or content does not match what the
    /// operation accepts.
    #[error("File '{name}' is not a valid {expected} file: {reason}")]
    UnsupportedFormat {
        name: String,
        expected: String,
        reason: String,
    },

    #[error("Invalid value '{value}' for '{field}': {reason}")]
    InvalidOption {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Invalid page range: {0}")]
    InvalidPageSelection(String),

    /// Every requested page fell outside the document.
    #[error("No valid pages selected (document has {page_count} pages)")]
    NoValidPages { page_count: usize },

    #[error("Malformed upload: {0}")]
    MalformedUpload(String),

    // ── Conversion ────────────────────────────────────────────────────────
    #[error("'{name}' is password protected")]
    PasswordProtected { name: String },

    #[error("Could not read '{name}': {detail}")]
    CorruptDocument { name: String, detail: String },

    /// The PDF has no text layer (scanned or image-only).
    #[error("No extractable text found in '{name}'")]
    NoExtractableText { name: String },

    #[error("{tool} did not finish within {}s", timeout.as_secs())]
    ConverterTimeout { tool: String, timeout: Duration },

    #[error("{tool} exited with {status}: {stderr}")]
    ConverterFailed {
        tool: String,
        status: String,
        stderr: String,
    },

    #[error("{tool} reported success but produced no output at '{}'", expected.display())]
    MissingOutput { tool: String, expected: PathBuf },

    #[error("Conversion failed: {0}")]
    Conversion(String),

    // ── Infrastructure ────────────────────────────────────────────────────
    #[error("Workspace operation '{op}' failed for '{}': {source}", path.display())]
    Workspace {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to build archive: {0}")]
    Archive(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ConvertError {
    pub fn workspace(op: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ConvertError::Workspace {
            op,
            path: path.into(),
            source,
        }
    }

    pub fn invalid_option(
        field: impl Into<String>,
        value: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        ConvertError::InvalidOption {
            field: field.into(),
            value: value.into(),
            reason: reason.into(),
        }
    }

    pub fn unsupported_format(
        name: impl Into<String>,
        expected: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        ConvertError::UnsupportedFormat {
            name: name.into(),
            expected: expected.into(),
            reason: reason.into(),
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            ConvertError::MissingFile { .. }
            | ConvertError::TooFewFiles { .. }
            | ConvertError::TooManyFiles { .. }
            | ConvertError::FileTooLarge { .. }
            | ConvertError::UnsupportedFormat { .. }
            | ConvertError::InvalidOption { .. }
            | ConvertError::InvalidPageSelection(_)
            | ConvertError::NoValidPages { .. }
            | ConvertError::MalformedUpload(_) => ErrorCategory::Validation,

            ConvertError::PasswordProtected { .. }
            | ConvertError::CorruptDocument { .. }
            | ConvertError::NoExtractableText { .. }
            | ConvertError::ConverterTimeout { .. }
            | ConvertError::ConverterFailed { .. }
            | ConvertError::MissingOutput { .. }
            | ConvertError::Conversion(_) => ErrorCategory::Conversion,

            ConvertError::Workspace { .. }
            | ConvertError::Archive(_)
            | ConvertError::Config(_)
            | ConvertError::Io(_)
            | ConvertError::Internal(_) => ErrorCategory::Infrastructure,
        }
    }

    /// Short hint for the client, when the cause is known.
    pub fn suggestion(&self) -> Option<&'static str> {
        match self {
            ConvertError::PasswordProtected { .. } => {
                Some("Remove password protection from the document and try again.")
            }
            ConvertError::CorruptDocument { .. } => {
                Some("The file may be damaged. Try re-exporting it from the original application.")
            }
            ConvertError::NoExtractableText { .. } => Some(
                "The PDF looks scanned or image-only. Text recognition (OCR) is not supported.",
            ),
            ConvertError::ConverterTimeout { .. } => {
                Some("The document took too long to convert. Try a smaller or simpler file.")
            }
            ConvertError::FileTooLarge { .. } => Some("Split or compress the file before uploading."),
            ConvertError::UnsupportedFormat { .. } => {
                Some("Check that the file extension matches its real format.")
            }
            ConvertError::TooFewFiles { .. } => Some("Select more files and try again."),
            ConvertError::NoValidPages { .. } | ConvertError::InvalidPageSelection(_) => {
                Some("Use page numbers and ranges such as 1,3,5-7 within the document.")
            }
            _ => None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, ConvertError::ConverterTimeout { .. })
    }
}

/// Maps a PDF engine failure for input `name` onto the taxonomy above.
///
/// The engine does not expose a stable error kind for encryption, so the
/// message is inspected.
pub(crate) fn classify_pdf_error(name: &str, detail: impl std::fmt::Display) -> ConvertError {
    let detail = detail.to_string();
    let lowered = detail.to_ascii_lowercase();
    if lowered.contains("encrypt") || lowered.contains("password") {
        ConvertError::PasswordProtected {
            name: name.to_string(),
        }
    } else {
        ConvertError::CorruptDocument {
            name: name.to_string(),
            detail,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_errors_are_classified() {
        let e = ConvertError::TooFewFiles {
            required: 2,
            actual: 1,
        };
        assert_eq!(e.category(), ErrorCategory::Validation);
        assert!(e.to_string().contains("At least 2"));
    }

    #[test]
    fn timeout_is_a_conversion_error_with_suggestion() {
        let e = ConvertError::ConverterTimeout {
            tool: "soffice".into(),
            timeout: Duration::from_secs(60),
        };
        assert_eq!(e.category(), ErrorCategory::Conversion);
        assert!(e.is_timeout());
        assert!(e.to_string().contains("60s"));
        assert!(e.suggestion().is_some());
    }

    #[test]
    fn encryption_messages_become_password_errors() {
        let e = classify_pdf_error("secret.pdf", "Encryption not supported");
        assert!(matches!(e, ConvertError::PasswordProtected { .. }));
        assert!(e.suggestion().unwrap().contains("password"));

        let e = classify_pdf_error("broken.pdf", "Invalid xref table");
        assert!(matches!(e, ConvertError::CorruptDocument { .. }));
    }

    #[test]
    fn workspace_errors_are_infrastructure() {
        let e = ConvertError::workspace(
            "create",
            "/tmp/x",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        assert_eq!(e.category(), ErrorCategory::Infrastructure);
        assert!(e.suggestion().is_none());
    }
}

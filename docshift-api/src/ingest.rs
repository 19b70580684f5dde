//! Multipart upload ingestion.
//!
//! File parts are streamed chunk by chunk into paths reserved on the job,
//! so a 100 MB upload never sits in memory and a half-written part is
//! already on the job's cleanup list if the client goes away.

use crate::error::AppError;
use axum::extract::multipart::Field;
use axum::extract::Multipart;
use docshift::options::FormFields;
use docshift::upload::sanitize_file_name;
use docshift::{ConversionJob, ConvertError, UploadLimits, UploadedFile};
use tokio::io::AsyncWriteExt;
use tracing::debug;

/// Longest accepted scalar form value.
const MAX_FIELD_BYTES: usize = 4096;

fn is_file_field(name: &str, expected: &str) -> bool {
    name == expected || name.strip_suffix("[]") == Some(expected)
}

async fn stream_part(job: &mut ConversionJob, mut field: Field<'_>, limits: &UploadLimits) -> Result<UploadedFile, AppError> {
    let original_name = sanitize_file_name(field.file_name().unwrap_or("upload"));
    let declared_mime_type = field.content_type().unwrap_or_default().to_string();

    let path = job.stage_input(&original_name);
    let mut file = tokio::fs::File::create(&path)
        .await
        .map_err(|e| ConvertError::workspace("stage_upload", &path, e))?;

    let mut size_bytes = 0u64;
    while let Some(chunk) = field.chunk().await? {
        size_bytes += chunk.len() as u64;
        if size_bytes > limits.max_file_bytes {
            return Err(ConvertError::FileTooLarge {
                name: original_name,
                limit_bytes: limits.max_file_bytes,
            }
            .into());
        }
        file.write_all(&chunk)
            .await
            .map_err(|e| ConvertError::workspace("stage_upload", &path, e))?;
    }
    file.flush()
        .await
        .map_err(|e| ConvertError::workspace("stage_upload", &path, e))?;

    debug!(file = %original_name, size_bytes, "upload staged");
    Ok(UploadedFile {
        original_name,
        stored_path: path,
        size_bytes,
        declared_mime_type,
    })
}

/// Collects a scalar field, giving up as soon as it passes
/// [`MAX_FIELD_BYTES`].
async fn read_text_field(mut field: Field<'_>, name: &str) -> Result<String, AppError> {
    let mut value = Vec::new();
    while let Some(chunk) = field.chunk().await? {
        if value.len() + chunk.len() > MAX_FIELD_BYTES {
            return Err(ConvertError::MalformedUpload(format!("form field '{name}' is too long")).into());
        }
        value.extend_from_slice(&chunk);
    }
    String::from_utf8(value)
        .map_err(|_| ConvertError::MalformedUpload(format!("form field '{name}' is not valid UTF-8")).into())
}

/// Reads the whole body into `job`, returning the scalar form fields.
///
/// Size and count ceilings are enforced while reading; the minimum count
/// and formats are checked afterwards by the dispatcher.
pub(crate) async fn ingest(
    job: &mut ConversionJob,
    mut multipart: Multipart,
    limits: &UploadLimits,
) -> Result<FormFields, AppError> {
    let expected = job.operation().file_field();
    let mut fields = FormFields::new();
    let mut files = 0usize;

    while let Some(field) = multipart.next_field().await? {
        let name = field.name().unwrap_or_default().to_string();

        if is_file_field(&name, expected) {
            files += 1;
            if files > limits.max_files {
                return Err(ConvertError::TooManyFiles {
                    max: limits.max_files,
                    actual: files,
                }
                .into());
            }
            let upload = stream_part(job, field, limits).await?;
            job.add_input(upload);
        } else if field.file_name().is_some() {
            debug!(field = %name, "ignoring file part in unexpected field");
        } else {
            let value = read_text_field(field, &name).await?;
            fields.insert(name, value);
        }
    }
    Ok(fields)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn array_style_field_names_are_accepted() {
        assert!(is_file_field("files", "files"));
        assert!(is_file_field("files[]", "files"));
        assert!(!is_file_field("file", "files"));
        assert!(!is_file_field("pdf[]", "files"));
    }
}

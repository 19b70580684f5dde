//! Result packaging.
//!
//! A job with one output is served as that file. Several outputs are
//! bundled into a zip whose members follow output order; the archive is
//! finished and closed before anything is handed to the caller, so a
//! client never sees a partial archive.

use crate::convert::blocking;
use crate::error::{ConvertError, Result};
use crate::job::{ConversionJob, JobState, OutputFile};
use serde::Serialize;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::debug;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

pub const ARCHIVE_NAME: &str = "converted_files.zip";

/// What the HTTP layer streams back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PackagedResult {
    #[serde(skip)]
    pub path: PathBuf,
    pub content_type: String,
    pub download_name: String,
    pub size: u64,
}

fn build_archive(outputs: &[OutputFile], target: &Path) -> Result<()> {
    let archive_err = |e: zip::result::ZipError| ConvertError::Archive(e.to_string());
    let file = File::create(target).map_err(|e| ConvertError::workspace("create_archive", target, e))?;
    let mut zip = ZipWriter::new(BufWriter::new(file));
    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .large_file(true);

    for output in outputs {
        zip.start_file(output.download_name.as_str(), options)
            .map_err(archive_err)?;
        let mut source =
            File::open(&output.path).map_err(|e| ConvertError::workspace("read_output", &output.path, e))?;
        std::io::copy(&mut source, &mut zip).map_err(|e| ConvertError::Archive(e.to_string()))?;
    }

    let mut writer = zip.finish().map_err(archive_err)?;
    writer.flush().map_err(|e| ConvertError::Archive(e.to_string()))?;
    Ok(())
}

/// Packages the job's outputs and moves it to `Packaging`.
pub async fn package(job: &mut ConversionJob) -> Result<PackagedResult> {
    job.advance(JobState::Packaging)?;

    let (path, content_type, download_name) = match job.outputs() {
        [] => {
            return Err(ConvertError::Internal(format!(
                "job {} has no outputs to package",
                job.id()
            )))
        }
        [single] => (single.path.clone(), single.mime_type.clone(), single.download_name.clone()),
        many => {
            let outputs = many.to_vec();
            let archive = job.reserve_output(ARCHIVE_NAME);
            let target = archive.clone();
            let members = outputs.len();
            blocking(move || build_archive(&outputs, &target)).await?;
            debug!(job = %job.id(), members, "archive finalized");
            (archive, "application/zip".to_string(), ARCHIVE_NAME.to_string())
        }
    };

    let size = tokio::fs::metadata(&path)
        .await
        .map_err(|e| ConvertError::workspace("stat_result", &path, e))?
        .len();
    Ok(PackagedResult {
        path,
        content_type,
        download_name,
        size,
    })
}

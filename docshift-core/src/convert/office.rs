//! Word documents to PDF through a headless office engine.

use super::ConversionReport;
use crate::config::ExternalTool;
use crate::error::{ConvertError, Result};
use crate::job::{ConversionJob, OutputFile};
use crate::process::run_bounded;
use std::ffi::OsString;
use std::path::Path;
use tracing::debug;

/// `file://` URL for a local directory, percent-encoding everything but
/// unreserved characters and separators.
fn file_url(path: &Path) -> String {
    let path = path.to_string_lossy().replace('\\', "/");
    let encoded: String = path
        .bytes()
        .map(|b| match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'.' | b'-' | b'_' | b'~' | b'/' | b':' => (b as char).to_string(),
            _ => format!("%{b:02X}"),
        })
        .collect();
    if encoded.starts_with('/') {
        format!("file://{encoded}")
    } else {
        format!("file:///{encoded}")
    }
}

/// Arguments for `soffice --convert-to pdf`. The private profile keeps
/// concurrent jobs from fighting over the engine's user installation lock.
fn engine_args(profile: &Path, outdir: &Path, input: &Path) -> Vec<OsString> {
    vec![
        format!("-env:UserInstallation={}", file_url(profile)).into(),
        "--headless".into(),
        "--convert-to".into(),
        "pdf".into(),
        "--outdir".into(),
        outdir.into(),
        input.into(),
    ]
}

pub(crate) async fn run(job: &mut ConversionJob, tool: &ExternalTool) -> Result<ConversionReport> {
    let input = job
        .inputs()
        .first()
        .cloned()
        .ok_or_else(|| ConvertError::MissingFile {
            field: "word".to_string(),
        })?;

    let profile = job.scratch_dir().join("profile");
    let outdir = job.scratch_dir().join("out");
    tokio::fs::create_dir_all(&outdir)
        .await
        .map_err(|e| ConvertError::workspace("create_outdir", &outdir, e))?;

    // The engine names its output after the input file.
    let produced_name = format!(
        "{}.pdf",
        input
            .stored_path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("input")
    );
    let produced = job.reserve_output(&format!("out/{produced_name}"));

    let args = engine_args(&profile, &outdir, &input.stored_path);
    debug!(tool = %tool.program, input = %input.original_name, "starting office conversion");
    run_bounded(tool, &args).await?.into_result(tool)?;

    let produced_ok = tokio::fs::metadata(&produced)
        .await
        .map(|meta| meta.len() > 0)
        .unwrap_or(false);
    if !produced_ok {
        return Err(ConvertError::MissingOutput {
            tool: tool.program.clone(),
            expected: produced,
        });
    }

    job.add_output(OutputFile {
        path: produced,
        download_name: format!("{}.pdf", input.stem()),
        mime_type: "application/pdf".to_string(),
    });
    Ok(ConversionReport::default())
}

//! Structural PDF compression.
//!
//! The document is rewritten through the engine's merger with a single
//! input. `medium` and `high` enable its optimisation pass; `high` also
//! drops the outline tree. Stripping metadata writes no Info dictionary.
//! When the rewrite is not smaller the original bytes are served instead.

use super::{blocking, pdf, ConversionReport};
use crate::error::{ConvertError, Result};
use crate::job::{ConversionJob, OutputFile};
use crate::options::{CompressOptions, CompressionLevel};
use oxidize_pdf::operations::merge::MetadataMode;
use oxidize_pdf::operations::{merge_pdfs, MergeInput, MergeOptions};
use std::path::PathBuf;
use tracing::{debug, info};

fn merge_options(options: CompressOptions) -> MergeOptions {
    MergeOptions {
        optimize: options.level != CompressionLevel::Low,
        preserve_bookmarks: options.level != CompressionLevel::High,
        metadata_mode: if options.remove_metadata {
            MetadataMode::None
        } else {
            MetadataMode::FromFirst
        },
        ..MergeOptions::default()
    }
}

/// Percentage of the original size saved, rounded to one decimal.
pub(crate) fn savings_percent(original: u64, compressed: u64) -> f64 {
    if original == 0 || compressed >= original {
        return 0.0;
    }
    let saved = (original - compressed) as f64 / original as f64 * 100.0;
    (saved * 10.0).round() / 10.0
}

pub(crate) async fn run(job: &mut ConversionJob, options: CompressOptions) -> Result<ConversionReport> {
    let input = job
        .inputs()
        .first()
        .cloned()
        .ok_or_else(|| ConvertError::MissingFile {
            field: "pdf".to_string(),
        })?;

    let rewritten = job.reserve_output("compressed.pdf");
    let source: PathBuf = input.stored_path.clone();
    let target = rewritten.clone();
    let name = input.original_name.clone();
    blocking(move || {
        pdf::page_count(&source, &name)?;
        merge_pdfs(vec![MergeInput::new(source)], &target, merge_options(options))
            .map_err(|e| ConvertError::Conversion(format!("Failed to rewrite {name}: {e}")))
    })
    .await?;

    let original_size = tokio::fs::metadata(&input.stored_path).await?.len();
    let rewritten_size = tokio::fs::metadata(&rewritten).await?.len();

    let (path, compressed_size) = if rewritten_size < original_size {
        (rewritten, rewritten_size)
    } else {
        debug!(
            original_size,
            rewritten_size,
            "rewrite did not shrink the document, serving the original"
        );
        (input.stored_path.clone(), original_size)
    };
    let ratio = savings_percent(original_size, compressed_size);
    info!(level = ?options.level, original_size, compressed_size, ratio, "compressed PDF");

    job.add_output(OutputFile {
        path,
        download_name: format!("{}.pdf", input.stem()),
        mime_type: "application/pdf".to_string(),
    });

    Ok(ConversionReport::default()
        .with_header("X-Original-Size", original_size.to_string())
        .with_header("X-Compressed-Size", compressed_size.to_string())
        .with_header("X-Compression-Ratio", format!("{ratio:.1}")))
}

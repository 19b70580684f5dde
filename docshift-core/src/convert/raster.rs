//! PDF pages to JPEG or PNG through an external rasterizer.
//!
//! The rasterizer is invoked once per selected page with poppler's
//! `pdftoppm` argument convention, writing `<prefix>.<ext>`.

use super::{blocking, pdf, ConversionReport};
use crate::config::ExternalTool;
use crate::error::{ConvertError, Result};
use crate::job::{ConversionJob, OutputFile};
use crate::options::RasterOptions;
use crate::process::run_bounded;
use crate::upload::ImageFormat;
use std::ffi::OsString;
use std::path::Path;
use tracing::debug;

fn rasterizer_args(options: &RasterOptions, page: usize, input: &Path, prefix: &Path) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec![
        "-r".into(),
        options.dpi.to_string().into(),
        "-f".into(),
        page.to_string().into(),
        "-l".into(),
        page.to_string().into(),
    ];
    match options.format {
        ImageFormat::Jpeg => {
            args.push("-jpeg".into());
            args.push("-jpegopt".into());
            args.push(format!("quality={}", options.jpeg_quality).into());
        }
        _ => args.push("-png".into()),
    }
    args.push("-singlefile".into());
    args.push(input.into());
    args.push(prefix.into());
    args
}

pub(crate) async fn run(job: &mut ConversionJob, options: &RasterOptions, tool: &ExternalTool) -> Result<ConversionReport> {
    if options.format == ImageFormat::Webp {
        return Err(ConvertError::invalid_option(
            "outputFormat",
            "webp",
            "pages can be rendered to JPEG or PNG",
        ));
    }
    let input = job
        .inputs()
        .first()
        .cloned()
        .ok_or_else(|| ConvertError::MissingFile {
            field: "pdf".to_string(),
        })?;

    let source = input.stored_path.clone();
    let name = input.original_name.clone();
    let page_count = blocking(move || pdf::page_count(&source, &name)).await?;
    let pages = options.pages.resolve(page_count)?;
    debug!(page_count, selected = pages.len(), "rendering pages");

    let ext = options.format.extension();
    let stem = input.stem();
    for &page in pages.pages() {
        let prefix = job.scratch_dir().join(format!("page-{page}"));
        let rendered = job.reserve_output(&format!("page-{page}.{ext}"));

        let args = rasterizer_args(options, page, &input.stored_path, &prefix);
        run_bounded(tool, &args).await?.into_result(tool)?;

        if !tokio::fs::try_exists(&rendered).await.unwrap_or(false) {
            return Err(ConvertError::MissingOutput {
                tool: tool.program.clone(),
                expected: rendered,
            });
        }
        job.add_output(OutputFile {
            path: rendered,
            download_name: format!("{stem}_page_{page}.{ext}"),
            mime_type: options.format.mime_type().to_string(),
        });
    }

    Ok(ConversionReport::default().with_header("X-Page-Count", pages.len().to_string()))
}

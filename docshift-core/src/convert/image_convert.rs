//! Raster format conversion between PNG, JPEG and WebP.

use super::{blocking, ConversionReport};
use crate::error::{ConvertError, Result};
use crate::job::{ConversionJob, OutputFile};
use crate::options::ImageConvertOptions;
use crate::upload::ImageFormat;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::{CompressionType, FilterType, PngEncoder};
use image::codecs::webp::WebPEncoder;
use image::{DynamicImage, ImageEncoder};
use std::collections::HashSet;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// PNG is lossless, so a lower quality buys a smaller file at more CPU.
fn png_compression(quality: u8) -> CompressionType {
    match quality {
        0..=33 => CompressionType::Best,
        34..=66 => CompressionType::Default,
        _ => CompressionType::Fast,
    }
}

fn encode(decoded: DynamicImage, options: ImageConvertOptions, target: &Path) -> Result<()> {
    let file = File::create(target).map_err(|e| ConvertError::workspace("create_output", target, e))?;
    let mut writer = BufWriter::new(file);
    let failed = |e: image::ImageError| ConvertError::Conversion(format!("could not encode {}: {e}", options.to));

    match options.to {
        ImageFormat::Jpeg => {
            let rgb = decoded.to_rgb8();
            JpegEncoder::new_with_quality(&mut writer, options.quality)
                .encode_image(&rgb)
                .map_err(failed)?;
        }
        ImageFormat::Png => {
            let rgba = decoded.to_rgba8();
            PngEncoder::new_with_quality(&mut writer, png_compression(options.quality), FilterType::Adaptive)
                .write_image(rgba.as_raw(), rgba.width(), rgba.height(), image::ExtendedColorType::Rgba8)
                .map_err(failed)?;
        }
        ImageFormat::Webp => {
            let rgba = decoded.to_rgba8();
            WebPEncoder::new_lossless(&mut writer)
                .write_image(rgba.as_raw(), rgba.width(), rgba.height(), image::ExtendedColorType::Rgba8)
                .map_err(failed)?;
        }
    }
    writer
        .flush()
        .map_err(|e| ConvertError::workspace("write_output", target, e))
}

fn convert_one(source: &Path, name: &str, options: ImageConvertOptions, target: &Path) -> Result<()> {
    let bytes = std::fs::read(source).map_err(|e| ConvertError::workspace("read_image", source, e))?;
    let decoded = image::load_from_memory_with_format(&bytes, options.from.to_image_crate()).map_err(|e| {
        ConvertError::CorruptDocument {
            name: name.to_string(),
            detail: e.to_string(),
        }
    })?;
    encode(decoded, options, target)
}

/// `name.ext`, or `name_2.ext`, `name_3.ext`... when already taken.
fn unique_name(taken: &mut HashSet<String>, stem: &str, ext: &str) -> String {
    let mut candidate = format!("{stem}.{ext}");
    let mut n = 2;
    while !taken.insert(candidate.clone()) {
        candidate = format!("{stem}_{n}.{ext}");
        n += 1;
    }
    candidate
}

pub(crate) async fn run(job: &mut ConversionJob, options: ImageConvertOptions) -> Result<ConversionReport> {
    let inputs: Vec<(PathBuf, String, String)> = job
        .inputs()
        .iter()
        .map(|f| (f.stored_path.clone(), f.original_name.clone(), f.stem()))
        .collect();
    let ext = options.to.extension();
    let mut taken = HashSet::new();

    for (index, (source, name, stem)) in inputs.into_iter().enumerate() {
        let output = job.reserve_output(&format!("output-{index}.{ext}"));
        let target = output.clone();
        blocking(move || convert_one(&source, &name, options, &target)).await?;

        job.add_output(OutputFile {
            path: output,
            download_name: unique_name(&mut taken, &stem, ext),
            mime_type: options.to.mime_type().to_string(),
        });
    }
    Ok(ConversionReport::default())
}

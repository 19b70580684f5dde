//! One PDF page per input image.

use super::{blocking, ConversionReport};
use crate::error::{ConvertError, Result};
use crate::job::{ConversionJob, OutputFile};
use crate::options::{ImagePdfOptions, Layout};
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, ImageFormat as CodecFormat, RgbImage};
use oxidize_pdf::{Document, Image, Page};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Margin kept around images placed with [`Layout::Fit`], in points.
const FIT_MARGIN: f64 = 36.0;
const EMBED_QUALITY: u8 = 92;

/// Where an image lands on the page, in points from the lower-left corner.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Placement {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

fn centered(page: (f64, f64), width: f64, height: f64) -> Placement {
    Placement {
        x: (page.0 - width) / 2.0,
        y: (page.1 - height) / 2.0,
        width,
        height,
    }
}

fn scale_into(bounds: (f64, f64), image: (f64, f64)) -> f64 {
    (bounds.0 / image.0).min(bounds.1 / image.1)
}

pub(crate) fn place(layout: Layout, page: (f64, f64), image: (u32, u32)) -> Placement {
    let image = (f64::from(image.0.max(1)), f64::from(image.1.max(1)));
    match layout {
        Layout::Fill => Placement {
            x: 0.0,
            y: 0.0,
            width: page.0,
            height: page.1,
        },
        Layout::Fit => {
            let bounds = ((page.0 - 2.0 * FIT_MARGIN).max(1.0), (page.1 - 2.0 * FIT_MARGIN).max(1.0));
            let scale = scale_into(bounds, image);
            centered(page, image.0 * scale, image.1 * scale)
        }
        Layout::Original => {
            let scale = scale_into(page, image).min(1.0);
            centered(page, image.0 * scale, image.1 * scale)
        }
    }
}

/// Flattens transparency onto white and re-encodes as baseline JPEG.
fn to_jpeg(decoded: DynamicImage) -> Result<Vec<u8>> {
    let rgba = decoded.to_rgba8();
    let flattened = RgbImage::from_fn(rgba.width(), rgba.height(), |x, y| {
        let [r, g, b, a] = rgba.get_pixel(x, y).0;
        let alpha = u16::from(a);
        let blend = |c: u8| ((u16::from(c) * alpha + 255 * (255 - alpha)) / 255) as u8;
        image::Rgb([blend(r), blend(g), blend(b)])
    });
    let mut buffer = Vec::new();
    JpegEncoder::new_with_quality(&mut buffer, EMBED_QUALITY)
        .encode_image(&flattened)
        .map_err(|e| ConvertError::Conversion(format!("could not re-encode image: {e}")))?;
    Ok(buffer)
}

fn load_embeddable(path: &Path, name: &str) -> Result<Image> {
    let bytes = std::fs::read(path).map_err(|e| ConvertError::workspace("read_image", path, e))?;
    let corrupt = |detail: String| ConvertError::CorruptDocument {
        name: name.to_string(),
        detail,
    };

    let jpeg = if image::guess_format(&bytes).ok() == Some(CodecFormat::Jpeg) {
        bytes
    } else {
        let decoded = image::load_from_memory(&bytes).map_err(|e| corrupt(e.to_string()))?;
        to_jpeg(decoded)?
    };
    Image::from_jpeg_data(jpeg).map_err(|e| corrupt(e.to_string()))
}

fn build(images: Vec<(PathBuf, String)>, options: ImagePdfOptions, target: &Path) -> Result<usize> {
    let (page_width, page_height) = options.page_dimensions();
    let mut document = Document::new();
    document.set_creator("docshift");

    for (index, (path, name)) in images.iter().enumerate() {
        let embedded = load_embeddable(path, name)?;
        let spot = place(options.layout, (page_width, page_height), (embedded.width(), embedded.height()));
        debug!(file = %name, ?spot, "placing image");

        let key = format!("Im{}", index + 1);
        let mut page = Page::new(page_width, page_height);
        page.add_image(key.clone(), embedded);
        page.draw_image(&key, spot.x, spot.y, spot.width, spot.height)
            .map_err(|e| ConvertError::Conversion(format!("could not place {name}: {e}")))?;
        document.add_page(page);
    }

    document
        .save(target)
        .map_err(|e| ConvertError::Conversion(format!("could not write PDF: {e}")))?;
    Ok(images.len())
}

pub(crate) async fn run(job: &mut ConversionJob, options: ImagePdfOptions) -> Result<ConversionReport> {
    let images: Vec<(PathBuf, String)> = job
        .inputs()
        .iter()
        .map(|f| (f.stored_path.clone(), f.original_name.clone()))
        .collect();
    let stem = job.inputs().first().map(|f| f.stem()).unwrap_or_else(|| "images".to_string());

    let output = job.reserve_output("images.pdf");
    let target = output.clone();
    let pages = blocking(move || build(images, options, &target)).await?;
    debug!(pages, "image document written");

    job.add_output(OutputFile {
        path: output,
        download_name: format!("{stem}.pdf"),
        mime_type: "application/pdf".to_string(),
    });
    Ok(ConversionReport::default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convert::{pdf, Operation};
    use crate::options::{Orientation, PageSize};
    use crate::upload::UploadedFile;
    use std::io::Cursor;

    #[test]
    fn fit_preserves_aspect_ratio_inside_margins() {
        let spot = place(Layout::Fit, (595.0, 842.0), (1000, 500));
        assert!((spot.width - (595.0 - 72.0)).abs() < 1e-6);
        assert!((spot.height - spot.width / 2.0).abs() < 1e-6);
        assert!((spot.x - 36.0).abs() < 1e-6);
        assert!((spot.y + spot.height / 2.0 - 421.0).abs() < 1e-6);
    }

    #[test]
    fn fill_covers_the_page() {
        let spot = place(Layout::Fill, (612.0, 792.0), (10, 10));
        assert_eq!(
            spot,
            Placement {
                x: 0.0,
                y: 0.0,
                width: 612.0,
                height: 792.0
            }
        );
    }

    #[test]
    fn original_keeps_small_images_at_native_size() {
        let spot = place(Layout::Original, (595.0, 842.0), (100, 50));
        assert_eq!((spot.width, spot.height), (100.0, 50.0));
        assert_eq!((spot.x, spot.y), (247.5, 396.0));

        let big = place(Layout::Original, (595.0, 842.0), (2000, 1000));
        assert!((big.width - 595.0).abs() < 1e-6);
        assert!(big.height <= 842.0);
    }

    fn png_bytes(w: u32, h: u32) -> Vec<u8> {
        let img = image::RgbaImage::from_pixel(w, h, image::Rgba([10, 120, 200, 128]));
        let mut out = Cursor::new(Vec::new());
        DynamicImage::ImageRgba8(img).write_to(&mut out, CodecFormat::Png).unwrap();
        out.into_inner()
    }

    #[tokio::test]
    async fn one_page_per_image_in_order() {
        let root = tempfile::tempdir().unwrap();
        let mut job = ConversionJob::create(root.path(), Operation::ImageToPdf).await.unwrap();
        for name in ["scan-1.png", "scan-2.png", "scan-3.png"] {
            let path = job.stage_input(name);
            let bytes = png_bytes(40, 30);
            std::fs::write(&path, &bytes).unwrap();
            job.add_input(UploadedFile {
                original_name: name.into(),
                stored_path: path,
                size_bytes: bytes.len() as u64,
                declared_mime_type: "image/png".into(),
            });
        }

        let options = ImagePdfOptions {
            page_size: PageSize::Letter,
            orientation: Orientation::Landscape,
            layout: Layout::Fit,
        };
        run(&mut job, options).await.unwrap();

        let output = &job.outputs()[0];
        assert_eq!(output.download_name, "scan-1.pdf");
        assert_eq!(pdf::page_count(&output.path, "scan-1.pdf").unwrap(), 3);
    }

    #[tokio::test]
    async fn undecodable_image_is_reported_by_name() {
        let root = tempfile::tempdir().unwrap();
        let mut job = ConversionJob::create(root.path(), Operation::ImageToPdf).await.unwrap();
        let path = job.stage_input("broken.png");
        std::fs::write(&path, b"\x89PNG\r\n\x1a\nnot really").unwrap();
        job.add_input(UploadedFile {
            original_name: "broken.png".into(),
            stored_path: path,
            size_bytes: 18,
            declared_mime_type: "image/png".into(),
        });

        let err = run(&mut job, ImagePdfOptions::default()).await.unwrap_err();
        assert!(matches!(err, ConvertError::CorruptDocument { ref name, .. } if name == "broken.png"));
    }
}

//! Pure Rust image processing backend.
//!
//! Everything is statically linked into the binary.
//!
//! ## Crate mapping
//!
//! | Operation | Crate / function |
//! |---|---|
//! | Identify | `ImageReader::with_guessed_format` + `ImageDecoder::{dimensions, color_type}` |
//! | Decode (JPEG, PNG) | `image` crate (pure Rust decoders) |
//! | Resize | `DynamicImage::resize_exact` with `Lanczos3` filter |
//! | Encode → JPEG | `image::codecs::jpeg::JpegEncoder` (quality) |
//! | Encode → PNG | `image::codecs::png::PngEncoder` (lossless) |
//! | Encode → WebP | `webp::Encoder` (libwebp, lossy, quality) |
//! | Encode → AVIF | `image::codecs::avif::AvifEncoder` (rav1e, speed 6) |
//!
//! Encoded bytes are written with [`write_atomic`], so a variant file is never
//! observed half-written.

use super::backend::{BackendError, Identified, ImageBackend, TargetResults};
use super::params::{EncodeTarget, Quality, RenderParams};
use crate::fsutil::write_atomic;
use crate::memory::PixelDepth;
use crate::types::{Format, FormatSet};
use image::codecs::avif::AvifEncoder;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ImageDecoder, ImageFormat, ImageReader};
use std::path::Path;

/// AVIF encoder speed (1 = slowest/best, 10 = fastest).
const AVIF_SPEED: u8 = 6;

/// Pure Rust backend using the `image` crate ecosystem.
///
/// See the [module docs](self) for the crate-to-operation mapping.
pub struct RustBackend;

impl RustBackend {
    pub fn new() -> Self {
        Self
    }
}

impl Default for RustBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn image_format(format: Format) -> ImageFormat {
    match format {
        Format::Jpeg => ImageFormat::Jpeg,
        Format::Png => ImageFormat::Png,
        Format::Webp => ImageFormat::WebP,
        Format::Avif => ImageFormat::Avif,
    }
}

fn format_of(format: ImageFormat) -> Option<Format> {
    match format {
        ImageFormat::Jpeg => Some(Format::Jpeg),
        ImageFormat::Png => Some(Format::Png),
        ImageFormat::WebP => Some(Format::Webp),
        ImageFormat::Avif => Some(Format::Avif),
        _ => None,
    }
}

/// Load and decode an image from disk, trusting its contents over its name.
fn load_image(path: &Path) -> Result<DynamicImage, BackendError> {
    ImageReader::open(path)
        .map_err(BackendError::Io)?
        .with_guessed_format()
        .map_err(BackendError::Io)?
        .decode()
        .map_err(|e| {
            BackendError::ProcessingFailed(format!("Failed to decode {}: {}", path.display(), e))
        })
}

/// Lossy WebP at `quality`.
fn encode_webp(img: &DynamicImage, quality: Quality) -> Vec<u8> {
    let rgba = img.to_rgba8();
    webp::Encoder::from_rgba(rgba.as_raw(), rgba.width(), rgba.height())
        .encode(quality.value() as f32)
        .to_vec()
}

/// Encode a raster into `format`, returning the file bytes.
fn encode(img: &DynamicImage, format: Format, quality: Quality) -> Result<Vec<u8>, BackendError> {
    let mut buf = Vec::new();
    let q = quality.value() as u8;
    match format {
        // JPEG has no alpha channel
        Format::Jpeg => img
            .to_rgb8()
            .write_with_encoder(JpegEncoder::new_with_quality(&mut buf, q)),
        Format::Png => img.write_with_encoder(PngEncoder::new(&mut buf)),
        Format::Webp => return Ok(encode_webp(img, quality)),
        Format::Avif => img
            .to_rgba8()
            .write_with_encoder(AvifEncoder::new_with_speed_quality(&mut buf, AVIF_SPEED, q)),
    }
    .map_err(|e| BackendError::ProcessingFailed(format!("{format} encode failed: {e}")))?;
    Ok(buf)
}

fn write_target(img: &DynamicImage, target: &EncodeTarget) -> Result<(), BackendError> {
    if !image_format(target.format).writing_enabled() {
        return Err(BackendError::Unsupported(target.format));
    }
    let bytes = encode(img, target.format, target.quality)?;
    write_atomic(&target.output, &bytes)?;
    Ok(())
}

impl ImageBackend for RustBackend {
    fn identify(&self, path: &Path) -> Result<Identified, BackendError> {
        let reader = ImageReader::open(path)?.with_guessed_format()?;
        let format = reader.format().and_then(format_of);
        let decoder = reader.into_decoder().map_err(|e| {
            BackendError::ProcessingFailed(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let (width, height) = decoder.dimensions();
        let color = decoder.color_type();
        let channels = color.channel_count();
        let depth = (channels > 0).then(|| PixelDepth {
            channels,
            bytes_per_channel: color.bytes_per_pixel() / channels,
        });
        Ok(Identified {
            width,
            height,
            format,
            depth,
        })
    }

    fn supported_formats(&self) -> FormatSet {
        [Format::Jpeg, Format::Png, Format::Webp, Format::Avif]
            .into_iter()
            .filter(|&f| image_format(f).writing_enabled())
            .collect()
    }

    fn render(&self, params: &RenderParams) -> Result<TargetResults, BackendError> {
        let resized = {
            let img = load_image(&params.source)?;
            img.resize_exact(params.width, params.height, FilterType::Lanczos3)
        };
        Ok(params
            .targets
            .iter()
            .map(|target| write_target(&resized, target))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{create_test_jpeg, create_test_png};

    #[test]
    fn identify_synthetic_jpeg() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("test.jpg");
        create_test_jpeg(&path, 200, 150);

        let backend = RustBackend::new();
        let id = backend.identify(&path).unwrap();
        assert_eq!((id.width, id.height), (200, 150));
        assert_eq!(id.format, Some(Format::Jpeg));
        assert_eq!(
            id.depth,
            Some(PixelDepth {
                channels: 3,
                bytes_per_channel: 1
            })
        );
    }

    #[test]
    fn identify_detects_png_content_behind_jpg_name() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("misnamed.jpg");
        create_test_png(&path, 40, 30);

        let id = RustBackend::new().identify(&path).unwrap();
        assert_eq!(id.format, Some(Format::Png));
    }

    #[test]
    fn identify_nonexistent_file_errors() {
        let backend = RustBackend::new();
        let result = backend.identify(Path::new("/nonexistent/image.jpg"));
        assert!(result.is_err());
    }

    #[test]
    fn identify_garbage_errors() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("bad.jpg");
        std::fs::write(&path, b"not an image").unwrap();
        assert!(RustBackend::new().identify(&path).is_err());
    }

    #[test]
    fn supports_every_compiled_encoder() {
        let formats = RustBackend::new().supported_formats();
        assert!(formats.contains(Format::Jpeg));
        assert!(formats.contains(Format::Png));
        assert!(formats.contains(Format::Webp));
        assert!(formats.contains(Format::Avif));
    }

    #[test]
    fn render_writes_each_target_at_requested_size() {
        let tmp = tempfile::TempDir::new().unwrap();
        let source = tmp.path().join("source.jpg");
        create_test_jpeg(&source, 400, 300);

        let jpg = tmp.path().join("out/source_200.jpg");
        let webp = tmp.path().join("out/source_200.webp");
        let results = RustBackend::new()
            .render(&RenderParams {
                source,
                width: 200,
                height: 150,
                targets: vec![
                    EncodeTarget {
                        format: Format::Jpeg,
                        quality: Quality::new(75),
                        output: jpg.clone(),
                    },
                    EncodeTarget {
                        format: Format::Webp,
                        quality: Quality::new(60),
                        output: webp.clone(),
                    },
                ],
            })
            .unwrap();

        assert!(results.iter().all(|r| r.is_ok()));
        assert_eq!(image::image_dimensions(&jpg).unwrap(), (200, 150));
        assert_eq!(image::image_dimensions(&webp).unwrap(), (200, 150));
    }

    #[test]
    fn render_png_keeps_png() {
        let tmp = tempfile::TempDir::new().unwrap();
        let source = tmp.path().join("source.png");
        create_test_png(&source, 100, 80);

        let out = tmp.path().join("source_50.png");
        let results = RustBackend::new()
            .render(&RenderParams {
                source,
                width: 50,
                height: 40,
                targets: vec![EncodeTarget {
                    format: Format::Png,
                    quality: Quality::default(),
                    output: out.clone(),
                }],
            })
            .unwrap();

        assert!(results[0].is_ok());
        let reader = ImageReader::open(&out).unwrap().with_guessed_format().unwrap();
        assert_eq!(reader.format(), Some(ImageFormat::Png));
    }

    #[test]
    fn render_small_avif() {
        let tmp = tempfile::TempDir::new().unwrap();
        let source = tmp.path().join("source.jpg");
        create_test_jpeg(&source, 64, 48);

        let out = tmp.path().join("source_32.avif");
        let results = RustBackend::new()
            .render(&RenderParams {
                source,
                width: 32,
                height: 24,
                targets: vec![EncodeTarget {
                    format: Format::Avif,
                    quality: Quality::new(40),
                    output: out.clone(),
                }],
            })
            .unwrap();

        assert!(results[0].is_ok());
        assert!(std::fs::metadata(&out).unwrap().len() > 0);
    }

    #[test]
    fn webp_quality_changes_file_size() {
        let tmp = tempfile::TempDir::new().unwrap();
        let source = tmp.path().join("noisy.png");
        image::RgbImage::from_fn(256, 256, |x, y| {
            let v = ((x * 7919 + y * 104729) % 251) as u8;
            image::Rgb([v, v.wrapping_mul(3), v.wrapping_add(x as u8)])
        })
        .save(&source)
        .unwrap();

        let render_at = |quality: u32, name: &str| {
            let output = tmp.path().join(name);
            let results = RustBackend::new()
                .render(&RenderParams {
                    source: source.clone(),
                    width: 256,
                    height: 256,
                    targets: vec![EncodeTarget {
                        format: Format::Webp,
                        quality: Quality::new(quality),
                        output: output.clone(),
                    }],
                })
                .unwrap();
            assert!(results[0].is_ok());
            assert_eq!(image::image_dimensions(&output).unwrap(), (256, 256));
            std::fs::metadata(&output).unwrap().len()
        };

        let low = render_at(10, "low.webp");
        let high = render_at(90, "high.webp");
        assert!(low < high, "q10 {low} bytes, q90 {high} bytes");
    }

    #[test]
    fn render_undecodable_source_errors() {
        let tmp = tempfile::TempDir::new().unwrap();
        let source = tmp.path().join("bad.jpg");
        std::fs::write(&source, b"garbage").unwrap();

        let result = RustBackend::new().render(&RenderParams {
            source,
            width: 10,
            height: 10,
            targets: vec![],
        });
        assert!(result.is_err());
    }
}

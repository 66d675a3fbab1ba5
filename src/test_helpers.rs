//! Shared test utilities: synthetic source images and a temp-dir site.
//!
//! ```rust,ignore
//! use crate::test_helpers::*;
//!
//! let (tmp, config) = site_config();
//! create_test_jpeg(&tmp.path().join("images/photo.jpg"), 1000, 600);
//! ```

use crate::config::Configuration;
use image::{ImageEncoder, RgbImage};
use std::path::Path;
use tempfile::TempDir;

// =========================================================================
// Fixture images
// =========================================================================

fn gradient(width: u32, height: u32) -> RgbImage {
    RgbImage::from_fn(width, height, |x, y| {
        image::Rgb([(x % 256) as u8, (y % 256) as u8, 128])
    })
}

fn create_parent(path: &Path) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
}

/// Write a small valid JPEG with the given dimensions.
pub fn create_test_jpeg(path: &Path, width: u32, height: u32) {
    create_parent(path);
    let img = gradient(width, height);
    let writer = std::io::BufWriter::new(std::fs::File::create(path).unwrap());
    image::codecs::jpeg::JpegEncoder::new(writer)
        .write_image(img.as_raw(), width, height, image::ExtendedColorType::Rgb8)
        .unwrap();
}

/// Write a small valid PNG with the given dimensions.
pub fn create_test_png(path: &Path, width: u32, height: u32) {
    create_parent(path);
    let img = gradient(width, height);
    let writer = std::io::BufWriter::new(std::fs::File::create(path).unwrap());
    image::codecs::png::PngEncoder::new(writer)
        .write_image(img.as_raw(), width, height, image::ExtendedColorType::Rgb8)
        .unwrap();
}

// =========================================================================
// Site setup
// =========================================================================

/// Empty content root in a temp dir with default settings pointing at it.
pub fn site_config() -> (TempDir, Configuration) {
    let tmp = TempDir::new().unwrap();
    let config = Configuration::for_root(tmp.path());
    (tmp, config)
}

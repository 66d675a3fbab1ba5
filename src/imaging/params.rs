//! Parameter types for image operations.
//!
//! These structs describe *what* to render, not *how*. They are the interface
//! between [`operations`](super::operations), which decides which files a
//! source needs, and the [`backend`](super::backend), which does the pixel
//! work. Swapping in a mock backend does not touch the operation logic.
//!
//! ## Types
//!
//! - [`Quality`]: Encoder quality (1–100). Clamped on construction.
//! - [`EncodeTarget`]: One output file: format, quality, path.
//! - [`RenderParams`]: One breakpoint: source, resized dimensions, and every
//!   encoding wanted from that single resize.

use crate::types::Format;
use std::path::PathBuf;

/// Quality setting for lossy image encoding (1-100).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quality(pub u32);

impl Quality {
    pub fn new(value: u32) -> Self {
        Self(value.clamp(1, 100))
    }

    pub fn value(self) -> u32 {
        self.0
    }
}

impl Default for Quality {
    fn default() -> Self {
        Self(75)
    }
}

/// A single encoded output of a render.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodeTarget {
    pub format: Format,
    pub quality: Quality,
    pub output: PathBuf,
}

/// Decode `source`, resize it to exactly `width`×`height`, and encode the
/// result once per target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderParams {
    pub source: PathBuf,
    pub width: u32,
    pub height: u32,
    pub targets: Vec<EncodeTarget>,
}

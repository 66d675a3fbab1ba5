//! Image processing backend trait and shared types.
//!
//! The [`ImageBackend`] trait defines the three things every backend must
//! support: identify a source without decoding its pixels, report which
//! output formats it can encode, and render one breakpoint into one or more
//! encodings.
//!
//! The production implementation is
//! [`RustBackend`](super::rust_backend::RustBackend), built on the `image`
//! crate and statically linked into the binary.

use super::params::RenderParams;
use crate::memory::PixelDepth;
use crate::types::{Format, FormatSet};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Processing failed: {0}")]
    ProcessingFailed(String),
    #[error("{0} encoding is not available")]
    Unsupported(Format),
}

/// Result of an identify operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Identified {
    pub width: u32,
    pub height: u32,
    /// Format detected from the file contents, if it is one we know.
    pub format: Option<Format>,
    /// Decoded pixel layout, when the decoder reports it up front.
    pub depth: Option<PixelDepth>,
}

/// Outcome of each [`EncodeTarget`](super::params::EncodeTarget) of a
/// render, in the same order as `RenderParams::targets`.
pub type TargetResults = Vec<Result<(), BackendError>>;

/// Trait for image processing backends.
///
/// A failed decode or resize fails the whole render. A failed encode is
/// reported per target so one broken codec does not take the other formats
/// down with it.
pub trait ImageBackend: Sync {
    /// Read dimensions, format and pixel depth without decoding pixels.
    fn identify(&self, path: &Path) -> Result<Identified, BackendError>;

    /// Output formats this backend can encode at runtime.
    fn supported_formats(&self) -> FormatSet;

    /// Decode, resize, and write every target of one breakpoint.
    fn render(&self, params: &RenderParams) -> Result<TargetResults, BackendError>;
}

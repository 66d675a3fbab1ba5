//! Shared types used by every stage of variant generation.
//!
//! [`Format`] is the closed set of encodings the crate knows about. Per-format
//! data is always keyed by it, never by a free-form string.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;

/// Extensions accepted for source images (compared case-insensitively).
pub const SOURCE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png"];

/// An image encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    Jpeg,
    Png,
    Webp,
    Avif,
}

impl Format {
    /// Optional output formats, in the order they are generated.
    pub const OPTIONAL: [Format; 2] = [Format::Webp, Format::Avif];

    /// Map a file extension to a format. Case-insensitive.
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "jpg" | "jpeg" => Some(Self::Jpeg),
            "png" => Some(Self::Png),
            "webp" => Some(Self::Webp),
            "avif" => Some(Self::Avif),
            _ => None,
        }
    }

    /// Canonical file extension for generated files.
    pub fn extension(self) -> &'static str {
        match self {
            Self::Jpeg => "jpg",
            Self::Png => "png",
            Self::Webp => "webp",
            Self::Avif => "avif",
        }
    }

    /// MIME type used in `<source type="...">`.
    pub fn mime(self) -> &'static str {
        match self {
            Self::Jpeg => "image/jpeg",
            Self::Png => "image/png",
            Self::Webp => "image/webp",
            Self::Avif => "image/avif",
        }
    }

    /// Whether this is a format a source image may be in.
    pub fn is_source_format(self) -> bool {
        matches!(self, Self::Jpeg | Self::Png)
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Jpeg => "jpeg",
            Self::Png => "png",
            Self::Webp => "webp",
            Self::Avif => "avif",
        })
    }
}

/// A set of formats, e.g. the output formats a backend can encode.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FormatSet(BTreeSet<Format>);

impl FormatSet {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn all() -> Self {
        [Format::Jpeg, Format::Png, Format::Webp, Format::Avif]
            .into_iter()
            .collect()
    }

    pub fn insert(&mut self, format: Format) {
        self.0.insert(format);
    }

    pub fn remove(&mut self, format: Format) {
        self.0.remove(&format);
    }

    pub fn contains(&self, format: Format) -> bool {
        self.0.contains(&format)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = Format> + '_ {
        self.0.iter().copied()
    }
}

impl FromIterator<Format> for FormatSet {
    fn from_iter<I: IntoIterator<Item = Format>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// A validated source image, identified and hashed.
///
/// Built only on a cache miss; a cache hit never needs the dimensions because
/// the sidecar already carries them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceImage {
    /// Canonical absolute path.
    pub path: PathBuf,
    /// Path relative to the content root.
    pub relative: PathBuf,
    pub width: u32,
    pub height: u32,
    pub format: Format,
    /// SHA-256 of the file bytes, hex encoded.
    pub hash: String,
}

impl SourceImage {
    /// MIME type detected for the source.
    pub fn mime(&self) -> &'static str {
        self.format.mime()
    }
}

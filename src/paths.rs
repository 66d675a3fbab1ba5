//! Resolve a raw `src` reference to a validated file under the content root.
//!
//! Resolution never fails hard. Anything that cannot be served from a local,
//! allowed location comes back as an [`Ineligible`] reason, and the caller
//! leaves the markup alone.

use crate::config::Configuration;
use crate::types::{Format, SOURCE_EXTENSIONS};
use percent_encoding::percent_decode_str;
use std::fmt;
use std::path::{Path, PathBuf};

/// Why a reference is left untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ineligible {
    /// Empty after cleanup.
    Empty,
    /// Points at another host, or is a `data:` URI.
    External,
    /// The configured content root does not exist.
    RootUnavailable,
    /// Does not exist (or cannot be canonicalized).
    NotFound,
    /// Resolves outside the content root.
    OutsideRoot,
    /// Lives directly in an excluded directory.
    Excluded,
    /// Lives inside the variant cache itself.
    CacheDirectory,
    /// Extension is not jpg, jpeg or png.
    UnsupportedExtension,
}

impl fmt::Display for Ineligible {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Empty => "empty reference",
            Self::External => "external reference",
            Self::RootUnavailable => "content root unavailable",
            Self::NotFound => "file not found",
            Self::OutsideRoot => "outside content root",
            Self::Excluded => "excluded folder",
            Self::CacheDirectory => "inside cache directory",
            Self::UnsupportedExtension => "unsupported extension",
        })
    }
}

/// A source file that passed every check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPath {
    /// Canonical absolute path.
    pub path: PathBuf,
    /// Canonical content root.
    pub root: PathBuf,
    /// `path` relative to `root`.
    pub relative: PathBuf,
    /// Format implied by the extension.
    pub format: Format,
    /// The extension exactly as written, reused for same-format variants.
    pub extension: String,
}

impl ResolvedPath {
    /// File name without extension.
    pub fn stem(&self) -> &str {
        self.relative
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
    }

    /// Directory of the source relative to the root (empty for top level).
    pub fn relative_dir(&self) -> &Path {
        self.relative.parent().unwrap_or(Path::new(""))
    }
}

/// Normalize a raw `src` into a root-relative URL path.
///
/// Strips the site base URI and any `#fragment` or `?query`, decodes
/// percent-escapes, and guarantees a leading `/`.
pub fn clean_reference(raw: &str, base_uri: &str) -> Result<String, Ineligible> {
    let mut src = raw.trim();
    if !base_uri.is_empty()
        && let Some(rest) = src.strip_prefix(base_uri)
    {
        src = rest;
    }
    let src = src.split(['#', '?']).next().unwrap_or_default();

    if src.starts_with("//") || src.contains("://") || src.starts_with("data:") {
        return Err(Ineligible::External);
    }

    let decoded = percent_decode_str(src).decode_utf8_lossy();
    let decoded = decoded.trim();
    if decoded.is_empty() || decoded == "/" {
        return Err(Ineligible::Empty);
    }
    Ok(if decoded.starts_with('/') {
        decoded.to_string()
    } else {
        format!("/{decoded}")
    })
}

/// Resolve a raw `src` attribute value.
pub fn resolve(raw: &str, config: &Configuration) -> Result<ResolvedPath, Ineligible> {
    let reference = clean_reference(raw, &config.base_uri)?;
    let root = config
        .content_root
        .canonicalize()
        .map_err(|_| Ineligible::RootUnavailable)?;
    resolve_under(&root, &reference, config)
}

/// Resolve a root-relative reference against an already canonical root.
pub fn resolve_under(
    root: &Path,
    reference: &str,
    config: &Configuration,
) -> Result<ResolvedPath, Ineligible> {
    let candidate = root.join(reference.trim_start_matches('/'));
    let path = candidate.canonicalize().map_err(|_| Ineligible::NotFound)?;

    // Checked on the real path, so `..` segments and symlinks cannot escape.
    let relative = path
        .strip_prefix(root)
        .map_err(|_| Ineligible::OutsideRoot)?
        .to_path_buf();
    if relative.as_os_str().is_empty() {
        return Err(Ineligible::OutsideRoot);
    }

    let parent = path.parent().unwrap_or(root);
    if is_excluded(root, parent, &config.images.exclude_folders) {
        return Err(Ineligible::Excluded);
    }
    if relative.starts_with(config.cache.dir_path()) {
        return Err(Ineligible::CacheDirectory);
    }

    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .filter(|e| SOURCE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .ok_or(Ineligible::UnsupportedExtension)?
        .to_string();
    let format = Format::from_extension(&extension).ok_or(Ineligible::UnsupportedExtension)?;

    if !path.is_file() {
        return Err(Ineligible::NotFound);
    }

    Ok(ResolvedPath {
        path,
        root: root.to_path_buf(),
        relative,
        format,
        extension,
    })
}

/// True if `dir` is one of the excluded folders (configured relative to root).
fn is_excluded(root: &Path, dir: &Path, excluded: &[String]) -> bool {
    excluded
        .iter()
        .map(|folder| folder.trim().trim_matches('/'))
        .filter(|folder| !folder.is_empty())
        .any(|folder| {
            let folder = root.join(folder);
            let folder = folder.canonicalize().unwrap_or(folder);
            folder == dir
        })
}

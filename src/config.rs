//! Configuration snapshot.
//!
//! Every operation receives a [`Configuration`] explicitly; nothing is read
//! from ambient state. The host loads it once at its boundary, either by
//! building the struct directly or from a TOML file layered on top of the
//! stock defaults.
//!
//! ## Configuration Options
//!
//! ```toml
//! # All options are optional - defaults shown below
//!
//! content_root = "."        # Site root that image references resolve under
//! base_uri = ""             # Site base URI stripped from src values
//!
//! [images]
//! sizes = [200, 320, 480, 768, 992, 1200, 1600, 1920]  # Breakpoint widths
//! scale_up = false          # Generate breakpoints wider than the source
//! separator = "_"           # Between filename and width: photo_480.jpg
//! exclude_folders = []      # Directories (relative to content_root) to skip
//! memory_limit = "512M"     # Refuse sources whose decode would exceed this
//!
//! [formats]
//! webp = true
//! avif = false
//!
//! [quality]
//! jpeg = 75
//! webp = 60
//! avif = 40
//!
//! [cache]
//! dir = "media/cached-resp-images"
//! metadata_dir = "media/cached-resp-images/___data___"
//!
//! [processing]
//! max_processes = 4         # Max parallel workers for `warm` (omit for auto)
//! ```
//!
//! Unknown keys are rejected to catch typos early.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Immutable settings for one invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Configuration {
    /// Site root. Image references resolve under it and must not escape it.
    pub content_root: PathBuf,
    /// Site base URI (e.g. `https://example.com/`), stripped from `src`.
    pub base_uri: String,
    pub images: ImagesConfig,
    pub formats: FormatsConfig,
    pub quality: QualityConfig,
    pub cache: CacheConfig,
    pub processing: ProcessingConfig,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            content_root: PathBuf::from("."),
            base_uri: String::new(),
            images: ImagesConfig::default(),
            formats: FormatsConfig::default(),
            quality: QualityConfig::default(),
            cache: CacheConfig::default(),
            processing: ProcessingConfig::default(),
        }
    }
}

impl Configuration {
    /// Default settings rooted at `content_root`.
    pub fn for_root(content_root: impl Into<PathBuf>) -> Self {
        Self {
            content_root: content_root.into(),
            ..Self::default()
        }
    }

    /// Sort breakpoints ascending, drop duplicates, and strip `.` segments
    /// from the cache directories.
    pub fn normalize(&mut self) {
        self.images.sizes.sort_unstable();
        self.images.sizes.dedup();
        self.cache.dir = clean_relative(&self.cache.dir);
        self.cache.metadata_dir = clean_relative(&self.cache.metadata_dir);
    }

    /// Largest configured breakpoint, the ceiling of the `sizes` attribute.
    pub fn largest_breakpoint(&self) -> Option<u32> {
        self.images.sizes.iter().copied().max()
    }

    /// Validate config values are within acceptable ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("quality.jpeg", self.quality.jpeg),
            ("quality.webp", self.quality.webp),
            ("quality.avif", self.quality.avif),
        ] {
            if value > 100 {
                return Err(ConfigError::Validation(format!("{name} must be 0-100")));
            }
        }
        if self.images.sizes.is_empty() {
            return Err(ConfigError::Validation(
                "images.sizes must not be empty".into(),
            ));
        }
        if self.images.sizes.contains(&0) {
            return Err(ConfigError::Validation(
                "images.sizes values must be non-zero".into(),
            ));
        }
        if self.images.separator.contains(['/', '\\']) {
            return Err(ConfigError::Validation(
                "images.separator must not contain path separators".into(),
            ));
        }
        for (name, dir) in [
            ("cache.dir", &self.cache.dir),
            ("cache.metadata_dir", &self.cache.metadata_dir),
        ] {
            if !is_plain_relative(Path::new(dir)) {
                return Err(ConfigError::Validation(format!(
                    "{name} must be a relative path without '..'"
                )));
            }
        }
        Ok(())
    }
}

/// True if `path` is non-empty, relative, and only has normal components.
fn is_plain_relative(path: &Path) -> bool {
    path.components().next().is_some()
        && path
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

/// `./media//cache/.` -> `media/cache`. Anything but `.` segments is kept.
fn clean_relative(dir: &str) -> String {
    clean_path(dir).to_string_lossy().replace('\\', "/")
}

fn clean_path(dir: &str) -> PathBuf {
    Path::new(dir)
        .components()
        .filter(|c| !matches!(c, Component::CurDir))
        .collect()
}

/// Breakpoint and source-handling settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ImagesConfig {
    /// Breakpoint widths in pixels. Normalized to ascending order on load.
    pub sizes: Vec<u32>,
    /// Generate breakpoints wider than the source by upscaling.
    pub scale_up: bool,
    /// Inserted between the file stem and the breakpoint width.
    pub separator: String,
    /// Directories, relative to the content root, whose images are left alone.
    pub exclude_folders: Vec<String>,
    /// Memory ceiling for one decode, e.g. `"512M"`. Absent or unparseable
    /// means no limit.
    pub memory_limit: Option<String>,
}

impl Default for ImagesConfig {
    fn default() -> Self {
        Self {
            sizes: vec![200, 320, 480, 768, 992, 1200, 1600, 1920],
            scale_up: false,
            separator: "_".to_string(),
            exclude_folders: Vec::new(),
            memory_limit: Some("512M".to_string()),
        }
    }
}

/// Optional output formats.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FormatsConfig {
    pub webp: bool,
    pub avif: bool,
}

impl Default for FormatsConfig {
    fn default() -> Self {
        Self {
            webp: true,
            avif: false,
        }
    }
}

/// Encoder quality per format (0 = worst, 100 = best).
///
/// PNG output is lossless and ignores quality.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct QualityConfig {
    pub jpeg: u32,
    pub webp: u32,
    pub avif: u32,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            jpeg: 75,
            webp: 60,
            avif: 40,
        }
    }
}

/// Where generated files and sidecar records live, relative to the content root.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheConfig {
    /// Variant files, mirroring the source directory tree. Also the URL prefix.
    pub dir: String,
    /// Sidecar records, mirroring the source directory tree.
    pub metadata_dir: String,
}

impl CacheConfig {
    /// Variant directory without `.` segments.
    pub fn dir_path(&self) -> PathBuf {
        clean_path(&self.dir)
    }

    /// Sidecar directory without `.` segments.
    pub fn metadata_dir_path(&self) -> PathBuf {
        clean_path(&self.metadata_dir)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dir: "media/cached-resp-images".to_string(),
            metadata_dir: "media/cached-resp-images/___data___".to_string(),
        }
    }
}

/// Parallel processing settings for the `warm` command.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProcessingConfig {
    /// Maximum number of parallel workers.
    /// When absent, defaults to the number of CPU cores.
    /// Values larger than the core count are clamped down.
    pub max_processes: Option<usize>,
}

/// Resolve the effective thread count from config.
///
/// - `None` → use all available cores
/// - `Some(n)` → use `min(n, cores)` (user can constrain down, not up)
pub fn effective_threads(config: &ProcessingConfig) -> usize {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    config
        .max_processes
        .map(|n| n.clamp(1, cores))
        .unwrap_or(cores)
}

// =============================================================================
// Config loading, merging, and validation
// =============================================================================

/// Returns the stock default config as a `toml::Value::Table`.
pub fn stock_defaults_value() -> Result<toml::Value, ConfigError> {
    toml::Value::try_from(Configuration::default())
        .map_err(|e| ConfigError::Validation(format!("default config must serialize: {e}")))
}

/// Recursively merge `overlay` on top of `base`.
///
/// - Tables are merged key-by-key (overlay keys override base keys).
/// - Non-table values in overlay replace base values entirely.
/// - Keys in base that are not in overlay are preserved.
pub fn merge_toml(base: toml::Value, overlay: toml::Value) -> toml::Value {
    match (base, overlay) {
        (toml::Value::Table(mut base_table), toml::Value::Table(overlay_table)) => {
            for (key, overlay_val) in overlay_table {
                let merged = match base_table.remove(&key) {
                    Some(base_val) => merge_toml(base_val, overlay_val),
                    None => overlay_val,
                };
                base_table.insert(key, merged);
            }
            toml::Value::Table(base_table)
        }
        (_, overlay) => overlay,
    }
}

/// Merge an optional overlay onto the stock defaults, then deserialize,
/// normalize and validate.
pub fn resolve_config(overlay: Option<toml::Value>) -> Result<Configuration, ConfigError> {
    let base = stock_defaults_value()?;
    let merged = match overlay {
        Some(ov) => merge_toml(base, ov),
        None => base,
    };
    let mut config: Configuration = merged.try_into()?;
    config.normalize();
    config.validate()?;
    Ok(config)
}

/// Parse TOML text into a configuration over the stock defaults.
pub fn parse_config(content: &str) -> Result<Configuration, ConfigError> {
    let value: toml::Value = toml::from_str(content)?;
    resolve_config(Some(value))
}

/// Load a configuration file.
///
/// A relative `content_root` in the file is taken relative to the file's
/// directory.
pub fn load_config(path: &Path) -> Result<Configuration, ConfigError> {
    let content = fs::read_to_string(path)?;
    let mut config = parse_config(&content)?;
    if config.content_root.is_relative()
        && let Some(parent) = path.parent()
    {
        config.content_root = parent.join(&config.content_root);
    }
    Ok(config)
}

/// Returns a fully-commented stock config file with all keys and explanations.
///
/// Used by the `gen-config` CLI command.
pub fn stock_config_toml() -> &'static str {
    r##"# respimg configuration
# =====================
# All settings are optional. Values shown below are the defaults.
# Unknown keys will cause an error.

# Site root. Image references resolve under this directory and may not
# escape it. Relative paths are taken from this file's directory.
content_root = "."

# Site base URI, stripped from src attributes (e.g. "https://example.com/").
base_uri = ""

# ---------------------------------------------------------------------------
# Breakpoints and source handling
# ---------------------------------------------------------------------------
[images]
# Widths in pixels to generate. Sorted ascending on load.
sizes = [200, 320, 480, 768, 992, 1200, 1600, 1920]

# Generate breakpoints wider than the source image by upscaling.
scale_up = false

# Inserted between file stem and width: photo_480.jpg
separator = "_"

# Directories relative to content_root whose images are left untouched.
exclude_folders = []

# Memory ceiling for decoding one source (K, M or G suffix).
# Remove, or set to "-1", for no limit.
memory_limit = "512M"

# ---------------------------------------------------------------------------
# Optional output formats (the source's own format is always generated)
# ---------------------------------------------------------------------------
[formats]
webp = true
avif = false

# ---------------------------------------------------------------------------
# Encoder quality (0 = worst, 100 = best). PNG output is lossless.
# ---------------------------------------------------------------------------
[quality]
jpeg = 75
webp = 60
avif = 40

# ---------------------------------------------------------------------------
# Cache locations, relative to content_root
# ---------------------------------------------------------------------------
[cache]
dir = "media/cached-resp-images"
metadata_dir = "media/cached-resp-images/___data___"

# ---------------------------------------------------------------------------
# Processing (warm command)
# ---------------------------------------------------------------------------
[processing]
# Maximum parallel workers. Omit to auto-detect (= number of CPU cores).
# max_processes = 4
"##
}

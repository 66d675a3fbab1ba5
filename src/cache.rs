//! Sidecar cache of generated variants.
//!
//! Encoding a source at eight breakpoints in three formats is far too slow to
//! do on every render. This module keeps one JSON sidecar per source image
//! describing everything that was generated for it, so a render only has to
//! hash the source and read a small document.
//!
//! # Design
//!
//! ## Validity
//!
//! The cache is **content-addressed** at the record level: a record is valid
//! iff its `base.version` equals the SHA-256 of the source bytes. Variant
//! file paths are hash-free and deterministic (`photo_480.webp`); the hash
//! travels in the URL query instead (`?version=<hash>`), which busts browser
//! caches when the source changes.
//!
//! A stale record is never patched. Every variant of the source is
//! regenerated, including files already on disk, and the sidecar is replaced.
//!
//! ## Storage
//!
//! Variant files live under `<content_root>/<cache.dir>` and sidecars under
//! `<content_root>/<cache.metadata_dir>`, both mirroring the source tree:
//!
//! ```text
//! images/trip/photo.jpg
//!   → media/cached-resp-images/images/trip/photo_480.webp
//!   → media/cached-resp-images/___data___/images/trip/photo.jpg.json
//! ```
//!
//! Every file is written through [`write_atomic`], and variant files are
//! written before the sidecar that references them, so a reader never sees
//! a torn document or a record pointing at files from another generation.
//!
//! ## Concurrency
//!
//! [`CacheStore::get_or_build`] serializes generation per sidecar path with
//! a lock table. After taking the lock it reads the sidecar again; a caller
//! that waited behind another generation finds a valid record and returns it
//! without doing the work twice. Different sources never contend.
//!
//! # Limitations
//!
//! Variant names drop the source extension for formats other than the
//! source's own. `x.jpg` and `x.png` in the same directory keep separate
//! sidecars and base variants (`x_480.jpg`, `x_480.png`) but share
//! `x_480.webp` and `x_480.avif`. Whichever source regenerates last owns
//! those files; the other's record then points at foreign pixels until it
//! is regenerated. Sites that keep both spellings of a name should give
//! one of them a different stem.

use crate::config::Configuration;
use crate::fsutil::write_atomic;
use crate::types::Format;
use log::debug;
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// Version of the sidecar format. Bump this to invalidate all existing
/// records when the schema changes.
pub const SCHEMA_VERSION: u32 = 1;

/// Extension appended to the source file name to form the sidecar name.
const SIDECAR_EXTENSION: &str = "json";

/// Characters left unescaped in URL path segments.
const SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Breakpoint width → variant URL (with version query).
pub type SrcSet = BTreeMap<u32, String>;

/// Everything generated for one source image.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VariantRecord {
    pub schema: u32,
    pub base: BaseVariants,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webp: Option<FormatVariants>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avif: Option<FormatVariants>,
}

/// Variants in the source's own format, plus what every format shares.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BaseVariants {
    /// Source dimensions.
    pub width: u32,
    pub height: u32,
    /// Source format, used for the original-type `<source>`.
    pub format: Format,
    /// Content hash of the source at generation time.
    pub version: String,
    /// CSS `sizes` entries in emission order.
    pub sizes: Vec<String>,
    pub srcset: SrcSet,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct FormatVariants {
    pub srcset: SrcSet,
}

impl VariantRecord {
    pub fn new(base: BaseVariants) -> Self {
        Self {
            schema: SCHEMA_VERSION,
            base,
            webp: None,
            avif: None,
        }
    }

    /// Srcset for `format`: the base srcset for the source's own format,
    /// the optional entry otherwise.
    pub fn srcset(&self, format: Format) -> Option<&SrcSet> {
        if format == self.base.format {
            return Some(&self.base.srcset);
        }
        match format {
            Format::Webp => self.webp.as_ref().map(|v| &v.srcset),
            Format::Avif => self.avif.as_ref().map(|v| &v.srcset),
            Format::Jpeg | Format::Png => None,
        }
    }

    /// Attach an optional format's variants. Empty sets are dropped.
    pub fn set_format(&mut self, format: Format, srcset: SrcSet) {
        let variants = (!srcset.is_empty()).then_some(FormatVariants { srcset });
        match format {
            Format::Webp => self.webp = variants,
            Format::Avif => self.avif = variants,
            Format::Jpeg | Format::Png => {}
        }
    }

    /// Every optional-format breakpoint also exists in the base srcset.
    pub fn is_consistent(&self) -> bool {
        [&self.webp, &self.avif]
            .into_iter()
            .flatten()
            .all(|v| v.srcset.keys().all(|w| self.base.srcset.contains_key(w)))
    }
}

/// SHA-256 hash of a file's contents, returned as a hex string.
pub fn hash_file(path: &Path) -> io::Result<String> {
    let bytes = std::fs::read(path)?;
    let digest = Sha256::digest(&bytes);
    Ok(format!("{:x}", digest))
}

/// True iff the record was generated from bytes hashing to `source_hash`.
pub fn is_valid(record: &VariantRecord, source_hash: &str) -> bool {
    record.base.version == source_hash
}

// =============================================================================
// Layout
// =============================================================================

/// Maps a source path (relative to the content root) to its sidecar, its
/// variant files, and their URLs.
#[derive(Debug, Clone)]
pub struct CacheLayout {
    root: PathBuf,
    cache_dir: PathBuf,
    metadata_dir: PathBuf,
    separator: String,
}

impl CacheLayout {
    pub fn new(root: impl Into<PathBuf>, config: &Configuration) -> Self {
        Self {
            root: root.into(),
            cache_dir: config.cache.dir_path(),
            metadata_dir: config.cache.metadata_dir_path(),
            separator: config.images.separator.clone(),
        }
    }

    /// `<root>/<metadata_dir>/<dir>/<file name>.json`
    pub fn sidecar_path(&self, relative: &Path) -> PathBuf {
        let name = relative
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let dir = relative.parent().unwrap_or(Path::new(""));
        self.root
            .join(&self.metadata_dir)
            .join(dir)
            .join(format!("{name}.{SIDECAR_EXTENSION}"))
    }

    /// `<dir>/<stem><sep><width>.<ext>`, relative to the cache dir.
    ///
    /// The source's own format keeps the source extension as written
    /// (`.JPEG` stays `.JPEG`); other formats use their canonical one.
    fn variant_relative(&self, relative: &Path, width: u32, format: Format) -> PathBuf {
        let stem = relative
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let source_ext = relative
            .extension()
            .map(|e| e.to_string_lossy().into_owned())
            .unwrap_or_default();
        let ext = if Format::from_extension(&source_ext) == Some(format) {
            source_ext
        } else {
            format.extension().to_string()
        };
        let dir = relative.parent().unwrap_or(Path::new(""));
        dir.join(format!("{stem}{}{width}.{ext}", self.separator))
    }

    /// Absolute path of one variant file.
    pub fn variant_path(&self, relative: &Path, width: u32, format: Format) -> PathBuf {
        self.root
            .join(&self.cache_dir)
            .join(self.variant_relative(relative, width, format))
    }

    /// Root-relative, percent-encoded URL of one variant, with version query.
    pub fn variant_url(&self, relative: &Path, width: u32, format: Format, version: &str) -> String {
        let path = self.cache_dir.join(self.variant_relative(relative, width, format));
        let encoded: Vec<String> = path
            .components()
            .filter_map(|c| match c {
                Component::Normal(s) => {
                    Some(utf8_percent_encode(&s.to_string_lossy(), SEGMENT).to_string())
                }
                _ => None,
            })
            .collect();
        format!("/{}?version={version}", encoded.join("/"))
    }
}

// =============================================================================
// Store
// =============================================================================

/// Whether a record came from disk or was just generated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    Hit,
    Generated,
}

#[derive(Debug, Default)]
struct Counters {
    reads: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    regenerations: AtomicU64,
    writes: AtomicU64,
}

/// Snapshot of a store's counters.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    /// Sidecar read attempts.
    pub reads: u64,
    /// Calls answered by a valid record.
    pub hits: u64,
    /// Calls that found no valid record on first read.
    pub misses: u64,
    /// Generations started.
    pub regenerations: u64,
    /// Sidecars written.
    pub writes: u64,
}

impl CacheStats {
    pub fn total(&self) -> u64 {
        self.hits + self.regenerations
    }
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.hits > 0 {
            write!(
                f,
                "{} cached, {} generated ({} total)",
                self.hits,
                self.regenerations,
                self.total()
            )
        } else {
            write!(f, "{} generated", self.regenerations)
        }
    }
}

/// Reads and writes sidecars, and serializes generation per source.
///
/// The store itself holds no records; the filesystem is the only state
/// shared between callers. One store is meant to be shared by every caller
/// in a process so the per-path locks work.
#[derive(Debug, Default)]
pub struct CacheStore {
    locks: Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>,
    counters: Counters,
}

impl CacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read a sidecar. Missing, unreadable, unparseable, wrong-schema, and
    /// inconsistent documents all read as absent.
    pub fn read(&self, sidecar: &Path) -> Option<VariantRecord> {
        self.counters.reads.fetch_add(1, Ordering::Relaxed);
        let content = std::fs::read_to_string(sidecar).ok()?;
        let record: VariantRecord = match serde_json::from_str(&content) {
            Ok(r) => r,
            Err(e) => {
                debug!("corrupt sidecar {}: {e}", sidecar.display());
                return None;
            }
        };
        if record.schema != SCHEMA_VERSION || !record.is_consistent() {
            debug!("discarding sidecar {} (schema {})", sidecar.display(), record.schema);
            return None;
        }
        Some(record)
    }

    /// Persist a sidecar atomically, creating directories as needed.
    pub fn write(&self, sidecar: &Path, record: &VariantRecord) -> io::Result<()> {
        let json = serde_json::to_string_pretty(record)?;
        write_atomic(sidecar, json.as_bytes())?;
        self.counters.writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Return a valid record for the source hashing to `source_hash`,
    /// running `build` and writing its result on a miss.
    ///
    /// `build` must write every variant file before returning; the sidecar
    /// is only written once it succeeds. A failed build leaves any previous
    /// sidecar in place.
    pub fn get_or_build<E, F>(
        &self,
        sidecar: &Path,
        source_hash: &str,
        build: F,
    ) -> Result<(VariantRecord, CacheStatus), E>
    where
        E: From<io::Error>,
        F: FnOnce() -> Result<VariantRecord, E>,
    {
        if let Some(record) = self.read(sidecar)
            && is_valid(&record, source_hash)
        {
            self.counters.hits.fetch_add(1, Ordering::Relaxed);
            return Ok((record, CacheStatus::Hit));
        }
        self.counters.misses.fetch_add(1, Ordering::Relaxed);

        let lock = self.lock_for(sidecar);
        let result = {
            let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
            self.build_locked(sidecar, source_hash, build)
        };
        self.release(sidecar, lock);
        result
    }

    fn build_locked<E, F>(
        &self,
        sidecar: &Path,
        source_hash: &str,
        build: F,
    ) -> Result<(VariantRecord, CacheStatus), E>
    where
        E: From<io::Error>,
        F: FnOnce() -> Result<VariantRecord, E>,
    {
        // Another caller may have finished while we waited.
        if let Some(record) = self.read(sidecar)
            && is_valid(&record, source_hash)
        {
            self.counters.hits.fetch_add(1, Ordering::Relaxed);
            return Ok((record, CacheStatus::Hit));
        }

        self.counters.regenerations.fetch_add(1, Ordering::Relaxed);
        let record = build()?;
        self.write(sidecar, &record)?;
        Ok((record, CacheStatus::Generated))
    }

    fn lock_for(&self, sidecar: &Path) -> Arc<Mutex<()>> {
        let mut table = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(table.entry(sidecar.to_path_buf()).or_default())
    }

    /// Drop the table entry once nobody else holds or waits on it.
    fn release(&self, sidecar: &Path, lock: Arc<Mutex<()>>) {
        let mut table = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        // Clones are only made and dropped under the table lock.
        drop(lock);
        if table
            .get(sidecar)
            .is_some_and(|entry| Arc::strong_count(entry) == 1)
        {
            table.remove(sidecar);
        }
    }

    /// Number of sources with a generation in flight or queued.
    pub fn active_locks(&self) -> usize {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn stats(&self) -> CacheStats {
        let c = &self.counters;
        CacheStats {
            reads: c.reads.load(Ordering::Relaxed),
            hits: c.hits.load(Ordering::Relaxed),
            misses: c.misses.load(Ordering::Relaxed),
            regenerations: c.regenerations.load(Ordering::Relaxed),
            writes: c.writes.load(Ordering::Relaxed),
        }
    }
}

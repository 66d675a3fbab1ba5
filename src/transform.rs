//! Entry point: turn an `<img>` fragment into responsive `<picture>` markup.
//!
//! Every call walks the same small state machine:
//!
//! ```text
//! Unvalidated ─┬─ no <img>, no src, no breakpoints ──→ Skipped (original)
//!              ├─ PathResolver rejects ─────────────→ Skipped (original)
//!              ├─ sidecar valid ──→ CacheHit ───────→ Rendered
//!              └─ miss/stale ──→ Generating ─┬─ ok ─→ Rendered
//!                                            └─ err → Skipped (original)
//! ```
//!
//! Nothing here returns an error to the caller. Each way a call can fall
//! short is a [`SkipReason`], and every skip returns the fragment unchanged.

use crate::cache::{self, CacheLayout, CacheStats, CacheStatus, CacheStore, VariantRecord};
use crate::config::Configuration;
use crate::imaging::{self, GenerateError, ImageBackend, RustBackend};
use crate::markup;
use crate::memory::ResourceExceeded;
use crate::paths::{self, Ineligible, ResolvedPath};
use log::{debug, warn};
use std::fmt;

/// Why a fragment was returned unchanged.
#[derive(Debug)]
pub enum SkipReason {
    NoImageTag,
    NoSource,
    NoBreakpoints,
    Ineligible(Ineligible),
    ResourceExceeded(ResourceExceeded),
    Generate(GenerateError),
    /// The record has no variants for the requested breakpoints.
    NoVariants,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoImageTag => f.write_str("no <img> tag"),
            Self::NoSource => f.write_str("no src attribute"),
            Self::NoBreakpoints => f.write_str("no breakpoints requested"),
            Self::Ineligible(reason) => write!(f, "ineligible: {reason}"),
            Self::ResourceExceeded(e) => e.fmt(f),
            Self::Generate(e) => write!(f, "generation failed: {e}"),
            Self::NoVariants => f.write_str("no variants for requested breakpoints"),
        }
    }
}

impl From<Ineligible> for SkipReason {
    fn from(reason: Ineligible) -> Self {
        Self::Ineligible(reason)
    }
}

impl From<GenerateError> for SkipReason {
    fn from(e: GenerateError) -> Self {
        match e {
            GenerateError::ResourceExceeded(e) => Self::ResourceExceeded(e),
            other => Self::Generate(other),
        }
    }
}

/// How a call ended.
#[derive(Debug)]
pub enum Outcome {
    Rendered(CacheStatus),
    Skipped(SkipReason),
}

/// Markup plus how it was produced.
#[derive(Debug)]
pub struct Transformed {
    pub html: String,
    pub outcome: Outcome,
}

/// A source with a valid record on disk.
#[derive(Debug)]
pub struct Prepared {
    pub source: ResolvedPath,
    pub record: VariantRecord,
    pub status: CacheStatus,
}

/// Responsive image transformer.
///
/// Holds the image backend and the cache store. Share one instance between
/// every caller that may touch the same cache so per-source generation is
/// serialized.
pub struct Responsive<B: ImageBackend = RustBackend> {
    backend: B,
    store: CacheStore,
}

impl Responsive<RustBackend> {
    pub fn new() -> Self {
        Self::with_backend(RustBackend::new())
    }
}

impl Default for Responsive<RustBackend> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: ImageBackend> Responsive<B> {
    pub fn with_backend(backend: B) -> Self {
        Self {
            backend,
            store: CacheStore::new(),
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn stats(&self) -> CacheStats {
        self.store.stats()
    }

    /// Replace the `<img>` in `fragment` with a `<picture>` offering the
    /// requested `breakpoints`, or return `fragment` unchanged.
    pub fn transform(&self, config: &Configuration, fragment: &str, breakpoints: &[u32]) -> String {
        self.transform_detailed(config, fragment, breakpoints).html
    }

    /// Like [`transform`](Self::transform), also reporting what happened.
    pub fn transform_detailed(
        &self,
        config: &Configuration,
        fragment: &str,
        breakpoints: &[u32],
    ) -> Transformed {
        match self.render(config, fragment, breakpoints) {
            Ok((html, status)) => Transformed {
                html,
                outcome: Outcome::Rendered(status),
            },
            Err(reason) => {
                log_skip(&reason);
                Transformed {
                    html: fragment.to_string(),
                    outcome: Outcome::Skipped(reason),
                }
            }
        }
    }

    fn render(
        &self,
        config: &Configuration,
        fragment: &str,
        breakpoints: &[u32],
    ) -> Result<(String, CacheStatus), SkipReason> {
        if breakpoints.is_empty() {
            return Err(SkipReason::NoBreakpoints);
        }
        let tag = markup::find_img_tag(fragment).ok_or(SkipReason::NoImageTag)?;
        let src = markup::extract_src(tag).ok_or(SkipReason::NoSource)?;
        let prepared = self.prepare(config, src)?;
        let picture = markup::render_picture(tag, &prepared.record, breakpoints)
            .ok_or(SkipReason::NoVariants)?;
        Ok((markup::replace_img_tag(fragment, &picture), prepared.status))
    }

    /// Resolve a raw `src` and make sure its record is valid, generating on
    /// a miss.
    pub fn prepare(&self, config: &Configuration, src: &str) -> Result<Prepared, SkipReason> {
        let source = paths::resolve(src, config)?;
        self.prepare_resolved(config, source)
    }

    /// [`prepare`](Self::prepare) for a path that is already resolved.
    pub fn prepare_resolved(
        &self,
        config: &Configuration,
        source: ResolvedPath,
    ) -> Result<Prepared, SkipReason> {
        let layout = CacheLayout::new(&source.root, config);
        let sidecar = layout.sidecar_path(&source.relative);
        let hash = cache::hash_file(&source.path).map_err(GenerateError::Io)?;

        let (record, status) = self.store.get_or_build(&sidecar, &hash, || {
            imaging::generate(
                &self.backend,
                &source.path,
                &source.relative,
                &hash,
                config,
                &layout,
            )
        })?;
        if status == CacheStatus::Hit {
            debug!("Cache hit for {}", source.relative.display());
        }
        Ok(Prepared {
            source,
            record,
            status,
        })
    }
}

fn log_skip(reason: &SkipReason) {
    match reason {
        SkipReason::ResourceExceeded(_) => warn!("Skipping image: {reason}"),
        SkipReason::Generate(GenerateError::UnsupportedSource(_)) => {
            debug!("Skipping image: {reason}")
        }
        SkipReason::Generate(_) => warn!("Skipping image: {reason}"),
        _ => debug!("Leaving markup unchanged: {reason}"),
    }
}

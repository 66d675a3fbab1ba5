//! # respimg
//!
//! Responsive image variants for server-rendered HTML. Hand it an `<img>`
//! fragment and a list of breakpoint widths; it returns a `<picture>` with
//! `<source>` elements in modern formats and a sized, lazy-loading fallback
//! `<img>`, generating the resized files on first use.
//!
//! ```text
//! <img src="/images/photo.jpg" alt="…">
//!   → resolve  /site/images/photo.jpg         (must stay under the root)
//!   → hash     sha256 of the bytes
//!   → sidecar  media/cached-resp-images/___data___/images/photo.jpg.json
//!        valid? yes → reuse
//!               no  → plan, resize, encode, write variants, write sidecar
//!   → <picture class="responsive-image">
//!        <source type="image/webp" sizes="…" srcset="…_992.webp?version=… 992w, …">
//!        <source type="image/jpeg" sizes="…" srcset="…">
//!        <img src="…_992.jpg?version=…" width="992" height="595" loading="lazy" …>
//!      </picture>
//! ```
//!
//! Anything that cannot be served (remote URLs, files outside the content
//! root, unsupported formats, sources too large for the memory limit, encoder
//! failures) leaves the fragment untouched. The call never fails.
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`transform`] | [`Responsive`] entry point, outcome and skip reasons |
//! | [`paths`] | `src` cleanup and containment checks against the content root |
//! | [`memory`] | Decoded-size estimate and `memory_limit` check |
//! | [`planner`] | Breakpoint × format work set and the `sizes` attribute |
//! | [`imaging`] | Backend trait, pure-Rust backend, variant generation |
//! | [`cache`] | Sidecar records, on-disk layout, per-source generation lock |
//! | [`markup`] | `<img>` attribute extraction and `<picture>` rendering |
//! | [`config`] | TOML configuration over stock defaults, validation |
//! | [`types`] | Output formats and the identified source image |
//! | [`fsutil`] | Write-to-temp-then-rename |
//! | [`output`] | CLI output formatting for `warm` |
//!
//! # Design Decisions
//!
//! ## Content-Addressed Sidecars
//!
//! Freshness is decided by hashing the source bytes, never by timestamps.
//! Touching a file does nothing; replacing its contents regenerates every
//! variant once. The hash doubles as the `?version=` query on each variant
//! URL, so browsers refetch exactly when the image changed.
//!
//! ## No Threads in the Library
//!
//! The library does its work on the calling thread. A host that renders
//! pages in parallel shares one [`Responsive`] and gets at-most-one
//! generation per source from its lock table; the `warm` command is such a
//! host, running on a rayon pool.

pub mod cache;
pub mod config;
pub mod fsutil;
pub mod imaging;
pub mod markup;
pub mod memory;
pub mod output;
pub mod paths;
pub mod planner;
pub mod transform;
pub mod types;

pub use config::Configuration;
pub use transform::{Outcome, Responsive, SkipReason, Transformed};

#[cfg(test)]
pub(crate) mod test_helpers;

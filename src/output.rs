//! CLI output formatting for the `warm` command.
//!
//! Each image leads with its path relative to the content root. Cache status
//! and per-format variant counts follow as indented context:
//!
//! ```text
//! images/trip/photo.jpg
//!     generated
//!     jpeg: 5 breakpoints
//!     webp: 5 breakpoints
//! images/logo.png
//!     cached
//!     png: 2 breakpoints
//! images/anim/frame.png
//!     skipped: file not found
//!
//! Cache: 1 cached, 1 generated (2 total)
//! ```
//!
//! `format_*` functions return lines and do no I/O; `main` prints them.

use crate::cache::{CacheStats, CacheStatus};
use crate::transform::Prepared;
use crate::types::Format;
use std::path::{Path, PathBuf};

/// Progress of one source during `warm`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WarmEvent {
    Prepared {
        relative: PathBuf,
        status: CacheStatus,
        /// Breakpoint count per format, source format first.
        variants: Vec<(Format, usize)>,
    },
    Skipped {
        relative: PathBuf,
        reason: String,
    },
}

impl WarmEvent {
    pub fn prepared(prepared: &Prepared) -> Self {
        let record = &prepared.record;
        let variants = std::iter::once(record.base.format)
            .chain(Format::OPTIONAL)
            .filter_map(|f| record.srcset(f).map(|s| (f, s.len())))
            .collect();
        Self::Prepared {
            relative: prepared.source.relative.clone(),
            status: prepared.status,
            variants,
        }
    }

    pub fn skipped(relative: &Path, reason: impl ToString) -> Self {
        Self::Skipped {
            relative: relative.to_path_buf(),
            reason: reason.to_string(),
        }
    }
}

/// Return indentation string: 4 spaces per depth level.
fn indent(depth: usize) -> String {
    "    ".repeat(depth)
}

fn status_label(status: CacheStatus) -> &'static str {
    match status {
        CacheStatus::Hit => "cached",
        CacheStatus::Generated => "generated",
    }
}

fn plural(n: usize) -> &'static str {
    if n == 1 { "" } else { "s" }
}

/// Format a single warm event as display lines.
pub fn format_warm_event(event: &WarmEvent) -> Vec<String> {
    match event {
        WarmEvent::Prepared {
            relative,
            status,
            variants,
        } => {
            let mut lines = vec![
                relative.display().to_string(),
                format!("{}{}", indent(1), status_label(*status)),
            ];
            if variants.iter().all(|(_, n)| *n == 0) {
                lines.push(format!("{}no variants (source narrower than every breakpoint)", indent(1)));
            } else {
                for (format, count) in variants {
                    lines.push(format!(
                        "{}{format}: {count} breakpoint{}",
                        indent(1),
                        plural(*count)
                    ));
                }
            }
            lines
        }
        WarmEvent::Skipped { relative, reason } => vec![
            relative.display().to_string(),
            format!("{}skipped: {reason}", indent(1)),
        ],
    }
}

/// Closing summary line.
pub fn format_warm_summary(stats: &CacheStats, skipped: usize) -> String {
    if skipped == 0 {
        format!("Cache: {stats}")
    } else {
        format!("Cache: {stats}, {skipped} skipped")
    }
}

//! Decide which variants a source image gets.
//!
//! A [`Plan`] is the cross product of breakpoints and output formats, plus
//! the `sizes` attribute rows stored with the record.

use crate::config::Configuration;
use crate::imaging::calculations::{ResponsiveSize, calculate_responsive_sizes};
use crate::types::{Format, FormatSet, SourceImage};
use log::info;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plan {
    /// Breakpoints to render, ascending.
    pub sizes: Vec<ResponsiveSize>,
    /// Output formats. The source's own format first, then optional formats
    /// in generation order.
    pub formats: Vec<Format>,
    /// CSS `sizes` entries, in the order they are emitted.
    pub sizes_attr: Vec<String>,
}

impl Plan {
    pub fn is_empty(&self) -> bool {
        self.sizes.is_empty()
    }

    /// Formats other than the source's own.
    pub fn optional_formats(&self) -> &[Format] {
        self.formats.get(1..).unwrap_or_default()
    }
}

/// Build the work set for `source`.
///
/// `supported` is the backend's capability set. Optional formats that are
/// enabled but not supported are left out here rather than failing later.
pub fn plan(source: &SourceImage, config: &Configuration, supported: &FormatSet) -> Plan {
    for format in enabled_formats(config).iter() {
        if !supported.contains(format) {
            info!("{format} encoding unavailable, skipping for {}", source.relative.display());
        }
    }
    Plan {
        sizes: calculate_responsive_sizes(
            (source.width, source.height),
            &config.images.sizes,
            config.images.scale_up,
        ),
        formats: output_formats(source.format, config, supported),
        sizes_attr: sizes_attribute(config),
    }
}

/// The configured optional formats, before any capability check.
pub fn enabled_formats(config: &Configuration) -> FormatSet {
    let mut set = FormatSet::empty();
    if config.formats.webp {
        set.insert(Format::Webp);
    }
    if config.formats.avif {
        set.insert(Format::Avif);
    }
    set
}

/// Source format, followed by every enabled and supported optional format.
pub fn output_formats(
    source_format: Format,
    config: &Configuration,
    supported: &FormatSet,
) -> Vec<Format> {
    let enabled = enabled_formats(config);
    std::iter::once(source_format)
        .chain(
            Format::OPTIONAL
                .into_iter()
                .filter(|&f| f != source_format && enabled.contains(f) && supported.contains(f)),
        )
        .collect()
}

/// `sizes` rows capped at the largest configured breakpoint.
///
/// The cap is the configured maximum, not the largest breakpoint this source
/// produced, so the attribute is never empty.
pub fn sizes_attribute(config: &Configuration) -> Vec<String> {
    match config.largest_breakpoint() {
        Some(largest) => vec![
            format!("(max-width: {largest}px) 100vw"),
            format!("{largest}px"),
        ],
        None => vec!["100vw".to_string()],
    }
}

//! High-level image operations.
//!
//! These functions combine calculations with backend execution. They take
//! configuration, compute parameters, and call the backend.

use super::backend::{BackendError, ImageBackend};
use super::params::{EncodeTarget, Quality, RenderParams};
use crate::cache::{BaseVariants, CacheLayout, SrcSet, VariantRecord};
use crate::config::{Configuration, QualityConfig};
use crate::memory::{self, MemoryLimit, ResourceExceeded};
use crate::planner::{self, Plan};
use crate::types::{Format, FormatSet, SourceImage};
use log::{info, warn};
use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Why a generation produced no record.
#[derive(Error, Debug)]
pub enum GenerateError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error(transparent)]
    ResourceExceeded(#[from] ResourceExceeded),
    #[error("{0} is not a JPEG or PNG image")]
    UnsupportedSource(PathBuf),
}

/// Quality configured for `format`. PNG is lossless and ignores it.
pub fn quality_for(config: &QualityConfig, format: Format) -> Quality {
    match format {
        Format::Jpeg | Format::Png => Quality::new(config.jpeg),
        Format::Webp => Quality::new(config.webp),
        Format::Avif => Quality::new(config.avif),
    }
}

/// Identify a source and check it against the memory limit.
///
/// Nothing is decoded here: the backend reads headers only, so an oversized
/// source is refused before its raster is ever allocated.
pub fn identify_source(
    backend: &impl ImageBackend,
    path: &Path,
    relative: &Path,
    hash: &str,
    config: &Configuration,
) -> Result<SourceImage, GenerateError> {
    let identified = backend.identify(path)?;
    let limit = MemoryLimit::parse(config.images.memory_limit.as_deref());
    memory::check(
        identified.width,
        identified.height,
        identified.depth.unwrap_or_default(),
        limit,
    )?;
    let format = identified
        .format
        .filter(|f| f.is_source_format())
        .ok_or_else(|| GenerateError::UnsupportedSource(path.to_path_buf()))?;

    Ok(SourceImage {
        path: path.to_path_buf(),
        relative: relative.to_path_buf(),
        width: identified.width,
        height: identified.height,
        format,
        hash: hash.to_string(),
    })
}

/// Render every planned variant and describe them in a record.
///
/// One render per breakpoint; the raster is dropped before the next one.
/// A failure of the source's own format aborts the whole generation. A
/// failure of an optional format drops that format from the record (and
/// from the remaining breakpoints) so its srcset never covers fewer
/// breakpoints than the base.
pub fn create_variants(
    backend: &impl ImageBackend,
    source: &SourceImage,
    plan: &Plan,
    config: &Configuration,
    layout: &CacheLayout,
) -> Result<VariantRecord, GenerateError> {
    let mut base = SrcSet::new();
    let mut optional: BTreeMap<Format, SrcSet> = plan
        .optional_formats()
        .iter()
        .map(|&f| (f, SrcSet::new()))
        .collect();
    let mut dropped = FormatSet::empty();

    for size in &plan.sizes {
        let targets: Vec<EncodeTarget> = plan
            .formats
            .iter()
            .copied()
            .filter(|&f| !dropped.contains(f))
            .map(|format| EncodeTarget {
                format,
                quality: quality_for(&config.quality, format),
                output: layout.variant_path(&source.relative, size.width, format),
            })
            .collect();

        let results = backend.render(&RenderParams {
            source: source.path.clone(),
            width: size.width,
            height: size.height,
            targets: targets.clone(),
        })?;

        for (target, result) in targets.iter().zip(results) {
            let format = target.format;
            match result {
                Ok(()) => {
                    let url = layout.variant_url(&source.relative, size.width, format, &source.hash);
                    if format == source.format {
                        base.insert(size.width, url);
                    } else if let Some(srcset) = optional.get_mut(&format) {
                        srcset.insert(size.width, url);
                    }
                }
                Err(e) if format == source.format => {
                    warn!(
                        "{} encode failed for {}: {e}",
                        format,
                        source.relative.display()
                    );
                    return Err(e.into());
                }
                Err(e) => {
                    info!(
                        "Dropping {} for {}: {e}",
                        format,
                        source.relative.display()
                    );
                    dropped.insert(format);
                    optional.remove(&format);
                }
            }
        }
    }

    let mut record = VariantRecord::new(BaseVariants {
        width: source.width,
        height: source.height,
        format: source.format,
        version: source.hash.clone(),
        sizes: plan.sizes_attr.clone(),
        srcset: base,
    });
    for (format, srcset) in optional {
        record.set_format(format, srcset);
    }
    Ok(record)
}

/// Identify, plan, and render one source end to end.
pub fn generate(
    backend: &impl ImageBackend,
    path: &Path,
    relative: &Path,
    hash: &str,
    config: &Configuration,
    layout: &CacheLayout,
) -> Result<VariantRecord, GenerateError> {
    let source = identify_source(backend, path, relative, hash, config)?;
    let plan = planner::plan(&source, config, &backend.supported_formats());
    let record = create_variants(backend, &source, &plan, config, layout)?;
    info!(
        "Generated {} ({} breakpoints, {})",
        relative.display(),
        record.base.srcset.len(),
        plan.formats
            .iter()
            .filter(|&&f| record.srcset(f).is_some_and(|s| !s.is_empty()))
            .map(|f| f.to_string())
            .collect::<Vec<_>>()
            .join("/")
    );
    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imaging::backend::Identified;
    use crate::imaging::backend::tests::{MockBackend, RecordedOp};
    use crate::memory::PixelDepth;

    fn setup(width: u32, height: u32) -> (MockBackend, Configuration, CacheLayout) {
        let backend = MockBackend::with_dimensions(width, height);
        let mut config = Configuration::for_root("/site");
        config.images.sizes = vec![200, 320, 480, 768, 992, 1200];
        let layout = CacheLayout::new("/site", &config);
        (backend, config, layout)
    }

    fn run(
        backend: &MockBackend,
        config: &Configuration,
        layout: &CacheLayout,
    ) -> Result<VariantRecord, GenerateError> {
        generate(
            backend,
            Path::new("/site/images/photo.jpg"),
            Path::new("images/photo.jpg"),
            "hash1",
            config,
            layout,
        )
    }

    #[test]
    fn quality_lookup() {
        let q = QualityConfig::default();
        assert_eq!(quality_for(&q, Format::Jpeg).value(), 75);
        assert_eq!(quality_for(&q, Format::Webp).value(), 60);
        assert_eq!(quality_for(&q, Format::Avif).value(), 40);
    }

    #[test]
    fn generates_only_breakpoints_not_wider_than_source() {
        let (backend, config, layout) = setup(1000, 600);
        let record = run(&backend, &config, &layout).unwrap();

        let widths: Vec<u32> = record.base.srcset.keys().copied().collect();
        assert_eq!(widths, vec![200, 320, 480, 768, 992]);
        assert_eq!(backend.render_count(), 5);
        assert_eq!(record.base.version, "hash1");
        assert_eq!(
            record.base.srcset[&992],
            "/media/cached-resp-images/images/photo_992.jpg?version=hash1"
        );
    }

    #[test]
    fn one_render_per_breakpoint_with_all_formats() {
        let (backend, mut config, layout) = setup(500, 250);
        config.formats.avif = true;
        run(&backend, &config, &layout).unwrap();

        let renders: Vec<_> = backend
            .get_operations()
            .into_iter()
            .filter_map(|op| match op {
                RecordedOp::Render {
                    width,
                    height,
                    targets,
                    ..
                } => Some((width, height, targets)),
                _ => None,
            })
            .collect();
        assert_eq!(renders.len(), 3);
        let (w, h, targets) = &renders[2];
        assert_eq!((*w, *h), (480, 240));
        let formats: Vec<Format> = targets.iter().map(|t| t.0).collect();
        assert_eq!(formats, vec![Format::Jpeg, Format::Webp, Format::Avif]);
        assert_eq!(targets[0].1, 75);
        assert_eq!(targets[2].1, 40);
        assert!(targets[1].2.ends_with("images/photo_480.webp"));
    }

    #[test]
    fn optional_format_failure_is_dropped() {
        let (backend, mut config, layout) = setup(1000, 600);
        config.formats.avif = true;
        backend.fail_format(Format::Avif);

        let record = run(&backend, &config, &layout).unwrap();
        assert!(record.avif.is_none());
        assert_eq!(record.webp.as_ref().unwrap().srcset.len(), 5);
        assert!(record.is_consistent());

        // Stops asking for AVIF after the first failure
        let avif_requests = backend
            .get_operations()
            .iter()
            .filter(|op| {
                matches!(op, RecordedOp::Render { targets, .. }
                    if targets.iter().any(|t| t.0 == Format::Avif))
            })
            .count();
        assert_eq!(avif_requests, 1);
    }

    #[test]
    fn base_format_failure_aborts() {
        let (backend, config, layout) = setup(1000, 600);
        backend.fail_format(Format::Jpeg);
        assert!(matches!(
            run(&backend, &config, &layout),
            Err(GenerateError::Backend(_))
        ));
    }

    #[test]
    fn decode_failure_aborts() {
        let (backend, config, layout) = setup(1000, 600);
        *backend.fail_render.lock().unwrap() = true;
        assert!(run(&backend, &config, &layout).is_err());
    }

    #[test]
    fn unsupported_backend_formats_are_not_requested() {
        let (backend, mut config, layout) = setup(400, 300);
        config.formats.avif = true;
        let backend = backend.supporting([Format::Jpeg, Format::Png].into_iter().collect());

        let record = run(&backend, &config, &layout).unwrap();
        assert!(record.webp.is_none());
        assert!(record.avif.is_none());
        assert_eq!(record.base.srcset.len(), 2);
    }

    #[test]
    fn memory_limit_refuses_before_render() {
        let (backend, mut config, layout) = setup(4000, 3000);
        config.images.memory_limit = Some("1M".into());

        let result = run(&backend, &config, &layout);
        assert!(matches!(result, Err(GenerateError::ResourceExceeded(_))));
        assert_eq!(backend.render_count(), 0);
    }

    #[test]
    fn unknown_depth_uses_conservative_estimate() {
        // 400x400 at 8 bytes/pixel = 1_280_000 > 1M; at 3 bytes it would fit
        let backend = MockBackend::with_identified(Identified {
            width: 400,
            height: 400,
            format: Some(Format::Jpeg),
            depth: None,
        });
        let (_, mut config, layout) = setup(1, 1);
        config.images.memory_limit = Some("1M".into());
        assert!(matches!(
            run(&backend, &config, &layout),
            Err(GenerateError::ResourceExceeded(_))
        ));

        let backend = MockBackend::with_identified(Identified {
            depth: Some(PixelDepth {
                channels: 3,
                bytes_per_channel: 1,
            }),
            format: Some(Format::Jpeg),
            width: 400,
            height: 400,
        });
        assert!(run(&backend, &config, &layout).is_ok());
    }

    #[test]
    fn non_source_format_is_rejected() {
        let backend = MockBackend::with_identified(Identified {
            width: 800,
            height: 600,
            format: Some(Format::Webp),
            depth: None,
        });
        let (_, config, layout) = setup(1, 1);
        assert!(matches!(
            run(&backend, &config, &layout),
            Err(GenerateError::UnsupportedSource(_))
        ));
    }

    #[test]
    fn small_source_gives_empty_record() {
        let (backend, config, layout) = setup(100, 100);
        let record = run(&backend, &config, &layout).unwrap();
        assert!(record.base.srcset.is_empty());
        assert!(record.webp.is_none());
        assert_eq!(backend.render_count(), 0);
        assert_eq!(record.base.sizes[1], "1200px");
    }
}

//! Pure calculation functions for image dimensions.
//!
//! All functions here are pure and testable without any I/O or images.

/// Height that keeps the source aspect ratio at `target_width`.
///
/// Never returns 0, so very wide sources still produce a valid raster.
///
/// # Examples
/// ```
/// # use respimg::imaging::calculations::scaled_height;
/// assert_eq!(scaled_height((1000, 600), 480), 288);
/// assert_eq!(scaled_height((4000, 1), 200), 1);
/// ```
pub fn scaled_height(original: (u32, u32), target_width: u32) -> u32 {
    let (orig_w, orig_h) = original;
    if orig_w == 0 {
        return 1;
    }
    let h = (orig_h as f64 * target_width as f64 / orig_w as f64).round() as u32;
    h.max(1)
}

/// Represents a single responsive size to generate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponsiveSize {
    /// Breakpoint, which is also the output width.
    pub width: u32,
    /// Calculated output height.
    pub height: u32,
}

/// Calculate which breakpoints to generate and their dimensions.
///
/// Breakpoints are constraints on width. A breakpoint wider than the
/// original is only kept when `scale_up` is set, in which case the image is
/// enlarged to it. Order of `sizes` is preserved.
///
/// Unlike a "fit inside" resize there is no fallback to the original size:
/// a source narrower than every breakpoint yields an empty list.
pub fn calculate_responsive_sizes(
    original: (u32, u32),
    sizes: &[u32],
    scale_up: bool,
) -> Vec<ResponsiveSize> {
    let (orig_w, _) = original;
    sizes
        .iter()
        .copied()
        .filter(|&w| w > 0 && (scale_up || orig_w >= w))
        .map(|width| ResponsiveSize {
            width,
            height: scaled_height(original, width),
        })
        .collect()
}

//! Memory guard for raster decodes.
//!
//! A decode of an unknown source can need far more memory than the file size
//! suggests. Before anything is decoded, the peak raster size is estimated as
//! `width * height * bytes_per_pixel` and compared with the configured limit.

use thiserror::Error;

/// Channel count assumed when the decoder cannot report one.
pub const DEFAULT_CHANNELS: u8 = 4;
/// Bytes per channel assumed when the decoder cannot report one (16-bit).
pub const DEFAULT_BYTES_PER_CHANNEL: u8 = 2;

/// Per-pixel storage of a decoded raster.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelDepth {
    pub channels: u8,
    pub bytes_per_channel: u8,
}

impl PixelDepth {
    pub fn bytes_per_pixel(self) -> u64 {
        self.channels as u64 * self.bytes_per_channel as u64
    }
}

impl Default for PixelDepth {
    /// Conservative estimate: 4 channels at 16 bits each.
    fn default() -> Self {
        Self {
            channels: DEFAULT_CHANNELS,
            bytes_per_channel: DEFAULT_BYTES_PER_CHANNEL,
        }
    }
}

/// A memory ceiling in bytes, or none.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MemoryLimit {
    #[default]
    Unlimited,
    Bytes(u64),
}

impl MemoryLimit {
    /// Parse a human-readable limit such as `"128M"`, `"512K"` or `"2G"`.
    ///
    /// A bare number is taken as bytes. Absent, negative (`"-1"`), or
    /// otherwise unparseable values mean no limit.
    pub fn parse(value: Option<&str>) -> Self {
        let Some(raw) = value.map(str::trim).filter(|v| !v.is_empty()) else {
            return Self::Unlimited;
        };
        let (digits, multiplier) = match raw.chars().last() {
            Some('K' | 'k') => (&raw[..raw.len() - 1], 1024),
            Some('M' | 'm') => (&raw[..raw.len() - 1], 1024 * 1024),
            Some('G' | 'g') => (&raw[..raw.len() - 1], 1024 * 1024 * 1024),
            _ => (raw, 1),
        };
        match digits.parse::<u64>() {
            Ok(n) => n
                .checked_mul(multiplier)
                .map_or(Self::Unlimited, Self::Bytes),
            Err(_) => Self::Unlimited,
        }
    }
}

/// The guard refused a source image.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("image too big to be processed: needs ~{estimated} bytes, limit is {limit} bytes")]
pub struct ResourceExceeded {
    pub estimated: u64,
    pub limit: u64,
}

/// Estimated bytes needed to hold the decoded raster.
pub fn estimate_bytes(width: u32, height: u32, depth: PixelDepth) -> u64 {
    (width as u64)
        .saturating_mul(height as u64)
        .saturating_mul(depth.bytes_per_pixel())
}

/// Refuse the operation if the estimate exceeds a known limit.
pub fn check(
    width: u32,
    height: u32,
    depth: PixelDepth,
    limit: MemoryLimit,
) -> Result<(), ResourceExceeded> {
    let estimated = estimate_bytes(width, height, depth);
    match limit {
        MemoryLimit::Bytes(limit) if estimated > limit => {
            Err(ResourceExceeded { estimated, limit })
        }
        _ => Ok(()),
    }
}

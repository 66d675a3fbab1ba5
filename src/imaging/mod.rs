//! Image processing in pure Rust, statically linked.
//!
//! | Operation | Crate / function |
//! |---|---|
//! | **Identify** | `image` decoder headers (dimensions, color type) |
//! | **Resize** | Lanczos3, exact target dimensions |
//! | **Encode** | JPEG, PNG, WebP (libwebp, lossy), AVIF (rav1e) |
//!
//! The module is split into:
//! - **Calculations**: Pure functions for dimension math (unit testable)
//! - **Parameters**: Data structures describing image operations
//! - **Backend**: [`ImageBackend`] trait + [`RustBackend`]
//! - **Operations**: High-level functions combining calculations + backend

pub mod backend;
pub mod calculations;
pub mod operations;
mod params;
pub mod rust_backend;

pub use backend::{BackendError, Identified, ImageBackend};
pub use operations::{GenerateError, create_variants, generate, identify_source};
pub use params::{EncodeTarget, Quality, RenderParams};
pub use rust_backend::RustBackend;

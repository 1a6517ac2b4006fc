//! Image processing on the `image` crate.
//!
//! | Operation | Crate / function |
//! |---|---|
//! | **Identify** | `image::ImageReader::into_dimensions` |
//! | **Square crop** | `crop_imm` over [`square_crop_region`] |
//! | **Fit-inside scale** | Lanczos3 `resize_exact` to [`fit_inside`] |
//! | **Encode** | JPEG (quality from config), PNG, TIFF, WebP |
//!
//! The module is split into:
//! - **Calculations**: Pure functions for crop and scale geometry (unit testable)
//! - **Parameters**: Encoder settings
//! - **Backend**: [`ImageBackend`] trait + [`RustBackend`]

pub mod backend;
mod calculations;
mod params;
pub mod rust_backend;

pub use backend::{BackendError, ImageBackend, Info};
pub use calculations::{Region, fit_inside, square_crop_region};
pub use params::Quality;
pub use rust_backend::RustBackend;

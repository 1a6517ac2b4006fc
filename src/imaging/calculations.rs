//! Pure calculation functions for image geometry.
//!
//! All functions here are pure and testable without any I/O or images.

/// A rectangle in source pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// The largest centered square inside a `width × height` image.
///
/// # Examples
/// ```
/// # use thumbnailer::imaging::{Region, square_crop_region};
/// // Landscape: trim the sides
/// assert_eq!(
///     square_crop_region(800, 600),
///     Region { x: 100, y: 0, width: 600, height: 600 }
/// );
/// ```
pub fn square_crop_region(width: u32, height: u32) -> Region {
    let side = width.min(height);
    Region {
        x: (width - side) / 2,
        y: (height - side) / 2,
        width: side,
        height: side,
    }
}

/// Dimensions that fit `source` inside a `max_width × max_height` box while
/// keeping its aspect ratio.
///
/// Never upscales: a source already inside the box is returned unchanged.
/// Neither edge is allowed to round down to zero.
pub fn fit_inside(source: (u32, u32), max_width: u32, max_height: u32) -> (u32, u32) {
    let (src_w, src_h) = source;
    if src_w == 0 || src_h == 0 {
        return source;
    }
    if src_w <= max_width && src_h <= max_height {
        return source;
    }

    let scale = f64::min(
        max_width as f64 / src_w as f64,
        max_height as f64 / src_h as f64,
    );
    let w = ((src_w as f64 * scale).round() as u32).clamp(1, max_width.max(1));
    let h = ((src_h as f64 * scale).round() as u32).clamp(1, max_height.max(1));
    (w, h)
}

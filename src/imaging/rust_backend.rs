//! Pure Rust image processing backend.
//!
//! ## Crate mapping
//!
//! | Operation | Crate / function |
//! |---|---|
//! | Identify | `image::ImageReader::into_dimensions` (header only) |
//! | Decode (JPEG, PNG, TIFF, WebP) | `image` crate (pure Rust decoders) |
//! | Square crop | `image::DynamicImage::crop_imm` |
//! | Fit-inside scale | `image::DynamicImage::resize_exact` with `Lanczos3` |
//! | Encode → JPEG | `image::codecs::jpeg::JpegEncoder` at the configured quality |
//! | Encode → PNG, TIFF, WebP | `image::DynamicImage::write_to` (WebP is lossless) |

use super::backend::{BackendError, ImageBackend, Info};
use super::calculations::{fit_inside, square_crop_region};
use super::params::Quality;
use crate::format::Format;
use crate::operation::{Crop, Operation, OperationList, Scale, ScaleMode};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat, ImageReader};
use std::io::Cursor;

/// Backend using the `image` crate ecosystem.
///
/// See the [module docs](self) for the crate-to-operation mapping.
#[derive(Debug, Clone, Copy, Default)]
pub struct RustBackend {
    quality: Quality,
}

impl RustBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_quality(quality: Quality) -> Self {
        Self { quality }
    }
}

fn reader(data: &[u8]) -> Result<ImageReader<Cursor<&[u8]>>, BackendError> {
    Ok(ImageReader::new(Cursor::new(data)).with_guessed_format()?)
}

/// Decode an image from memory, guessing the format from its magic bytes.
fn load_image(data: &[u8]) -> Result<DynamicImage, BackendError> {
    reader(data)?
        .decode()
        .map_err(|e| BackendError::Decode(e.to_string()))
}

fn apply_crop(img: DynamicImage, crop: Crop) -> DynamicImage {
    match crop {
        Crop::ToSquare => {
            let region = square_crop_region(img.width(), img.height());
            if region.width == img.width() && region.height == img.height() {
                return img;
            }
            img.crop_imm(region.x, region.y, region.width, region.height)
        }
    }
}

fn apply_scale(img: DynamicImage, scale: Scale) -> DynamicImage {
    match scale.mode {
        ScaleMode::AspectFitInside => {
            let current = (img.width(), img.height());
            let (w, h) = fit_inside(current, scale.width, scale.height);
            if (w, h) == current {
                return img;
            }
            img.resize_exact(w, h, FilterType::Lanczos3)
        }
    }
}

/// Encode `img` to `format`.
fn encode(img: &DynamicImage, format: &Format, quality: Quality) -> Result<Vec<u8>, BackendError> {
    let mut buf = Vec::new();
    let result = match format {
        Format::Jpeg => {
            // JPEG has no alpha channel
            let encoder = JpegEncoder::new_with_quality(&mut buf, quality.as_u8());
            DynamicImage::ImageRgb8(img.to_rgb8()).write_with_encoder(encoder)
        }
        Format::Png => img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png),
        Format::Tiff => img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Tiff),
        Format::WebP => DynamicImage::ImageRgba8(img.to_rgba8())
            .write_to(&mut Cursor::new(&mut buf), ImageFormat::WebP),
        Format::Unknown(key) => return Err(BackendError::UnsupportedFormat(key.clone())),
    };
    result.map_err(|e| {
        BackendError::ProcessingFailed(format!("{} encode failed: {}", format.name(), e))
    })?;
    Ok(buf)
}

impl ImageBackend for RustBackend {
    fn identify(&self, data: &[u8]) -> Result<Info, BackendError> {
        let reader = reader(data)?;
        let source_format = reader.format().and_then(Format::from_image_format);
        let (width, height) = reader
            .into_dimensions()
            .map_err(|e| BackendError::Decode(e.to_string()))?;
        Ok(Info {
            width,
            height,
            source_format,
        })
    }

    /// Operations run in list order; the encode step ends processing.
    fn process(&self, data: &[u8], operations: &OperationList) -> Result<Vec<u8>, BackendError> {
        let mut img = load_image(data)?;
        for operation in operations {
            img = match operation {
                Operation::Crop(crop) => apply_crop(img, *crop),
                Operation::Scale(scale) => apply_scale(img, *scale),
                Operation::Encode(enc) => return encode(&img, enc.format(), self.quality),
            };
        }
        Err(BackendError::MissingEncode)
    }
}

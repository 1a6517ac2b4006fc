//! Output format registry.
//!
//! Maps format keys (`jpg`, `png`, ...) to the formats the server knows
//! about. Lookups never fail: a key that matches nothing yields
//! [`Format::Unknown`], and it is up to the encoder to reject it.

use image::ImageFormat;
use std::fmt;

/// Media type used for formats the registry does not know.
const OCTET_STREAM: &str = "application/octet-stream";

/// An image format, identified by its registry key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Format {
    Jpeg,
    Png,
    Tiff,
    WebP,
    /// A key with no registry entry, kept verbatim.
    Unknown(String),
}

/// Every format with a registry entry, in listing order.
const KNOWN_FORMATS: &[Format] = &[Format::Jpeg, Format::Png, Format::Tiff, Format::WebP];

impl Format {
    /// Look up a format by key or file extension (case-insensitive).
    pub fn get(key: &str) -> Format {
        let wanted = key.trim().to_ascii_lowercase();
        KNOWN_FORMATS
            .iter()
            .find(|f| f.key() == wanted || f.extensions().contains(&wanted.as_str()))
            .cloned()
            .unwrap_or(Format::Unknown(key.to_string()))
    }

    /// All registered formats.
    pub fn all() -> &'static [Format] {
        KNOWN_FORMATS
    }

    /// Registry key, e.g. `jpg`.
    pub fn key(&self) -> &str {
        match self {
            Format::Jpeg => "jpg",
            Format::Png => "png",
            Format::Tiff => "tif",
            Format::WebP => "webp",
            Format::Unknown(key) => key,
        }
    }

    /// Human-readable name.
    pub fn name(&self) -> &str {
        match self {
            Format::Jpeg => "JPEG",
            Format::Png => "PNG",
            Format::Tiff => "TIFF",
            Format::WebP => "WebP",
            Format::Unknown(key) => key,
        }
    }

    /// Media types for this format, preferred first.
    pub fn media_types(&self) -> &'static [&'static str] {
        match self {
            Format::Jpeg => &["image/jpeg"],
            Format::Png => &["image/png"],
            Format::Tiff => &["image/tiff"],
            Format::WebP => &["image/webp"],
            Format::Unknown(_) => &[],
        }
    }

    /// The media type to advertise in `Content-Type`.
    pub fn preferred_media_type(&self) -> &'static str {
        self.media_types().first().copied().unwrap_or(OCTET_STREAM)
    }

    /// File extensions associated with this format.
    pub fn extensions(&self) -> &'static [&'static str] {
        match self {
            Format::Jpeg => &["jpg", "jpeg", "jpe", "jif", "jfif"],
            Format::Png => &["png"],
            Format::Tiff => &["tif", "tiff", "ptif"],
            Format::WebP => &["webp"],
            Format::Unknown(_) => &[],
        }
    }

    /// The `image` crate format used to decode/encode, if any.
    pub fn image_format(&self) -> Option<ImageFormat> {
        match self {
            Format::Jpeg => Some(ImageFormat::Jpeg),
            Format::Png => Some(ImageFormat::Png),
            Format::Tiff => Some(ImageFormat::Tiff),
            Format::WebP => Some(ImageFormat::WebP),
            Format::Unknown(_) => None,
        }
    }

    /// Map a detected `image` crate format back into the registry.
    pub fn from_image_format(format: ImageFormat) -> Option<Format> {
        KNOWN_FORMATS
            .iter()
            .find(|f| f.image_format() == Some(format))
            .cloned()
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, Format::Unknown(_))
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

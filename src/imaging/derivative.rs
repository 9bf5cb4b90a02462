//! Reduced copies of stored originals.
//!
//! Each destination pixel `(x, y)` is the source pixel at `(x·N, y·N)`:
//! nearest neighbour, no filtering. The result is re-encoded and tagged with
//! the source orientation so viewers rotate it the same way as the original.
//!
//! | Source | Derivative |
//! |---|---|
//! | JPEG | JPEG, quality [`THUMBNAIL_JPEG_QUALITY`] |
//! | PNG | PNG |
//! | GIF (first frame) | PNG |

use super::orientation::Orientation;
use super::sanitize::{self, ParseFailure};
use super::sniff::ImageKind;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::{DynamicImage, GenericImageView, RgbaImage};
use std::io;
use thiserror::Error;

/// JPEG quality used for every lossy derivative.
pub const THUMBNAIL_JPEG_QUALITY: u8 = 85;

#[derive(Error, Debug)]
pub enum DerivativeError {
    #[error("Invalid image name: {0}")]
    InvalidName(String),
    #[error("Image not found: {0}")]
    NotFound(String),
    #[error("Stored file is not a supported image: {detected}")]
    UnsupportedType { detected: String },
    #[error("Read failure: {0}")]
    ReadFailure(#[source] io::Error),
    #[error("Decode failure: {0}")]
    DecodeFailure(#[source] image::ImageError),
    #[error("Encode failure: {0}")]
    EncodeFailure(#[source] image::ImageError),
    #[error("Could not tag derivative orientation: {0}")]
    Tagging(#[from] ParseFailure),
    #[error("Shrink factor must be at least 1, got {0}")]
    InvalidFactor(u32),
    #[error("{width}x{height} is too small to shrink by {factor}")]
    TooSmall { width: u32, height: u32, factor: u32 },
    #[error("Write failure: {0}")]
    WriteFailure(#[source] io::Error),
}

/// An encoded derivative, ready to be written or streamed.
#[derive(Debug, Clone)]
pub struct Derivative {
    pub bytes: Vec<u8>,
    pub kind: ImageKind,
    pub width: u32,
    pub height: u32,
    pub orientation: Orientation,
}

/// Container a derivative of `source` is encoded as.
pub fn derivative_kind(source: ImageKind) -> ImageKind {
    match source {
        ImageKind::Jpeg => ImageKind::Jpeg,
        ImageKind::Png | ImageKind::Gif => ImageKind::Png,
    }
}

/// Output dimensions for a shrink by `factor`.
pub fn shrunk_dimensions(width: u32, height: u32, factor: u32) -> Result<(u32, u32), DerivativeError> {
    if factor == 0 {
        return Err(DerivativeError::InvalidFactor(factor));
    }
    let (w, h) = (width / factor, height / factor);
    if w == 0 || h == 0 {
        return Err(DerivativeError::TooSmall {
            width,
            height,
            factor,
        });
    }
    Ok((w, h))
}

/// Nearest-neighbour shrink.
pub fn shrink(img: &DynamicImage, factor: u32) -> Result<RgbaImage, DerivativeError> {
    let (width, height) = shrunk_dimensions(img.width(), img.height(), factor)?;
    Ok(RgbaImage::from_fn(width, height, |x, y| {
        img.get_pixel(x * factor, y * factor)
    }))
}

/// Decode `source`, shrink it by `factor`, encode and tag it.
pub fn make_derivative(
    source: &[u8],
    kind: ImageKind,
    factor: u32,
) -> Result<Derivative, DerivativeError> {
    if factor == 0 {
        return Err(DerivativeError::InvalidFactor(factor));
    }
    let orientation = sanitize::read_orientation(source, kind);
    let img = image::load_from_memory_with_format(source, kind.image_format())
        .map_err(DerivativeError::DecodeFailure)?;
    let small = shrink(&img, factor)?;
    let (width, height) = small.dimensions();

    let output_kind = derivative_kind(kind);
    let encoded = encode(small, output_kind)?;
    let bytes = sanitize::tag_orientation(encoded, output_kind, orientation)?;

    Ok(Derivative {
        bytes,
        kind: output_kind,
        width,
        height,
        orientation,
    })
}

fn encode(img: RgbaImage, kind: ImageKind) -> Result<Vec<u8>, DerivativeError> {
    let mut buf = Vec::new();
    let result = match kind {
        ImageKind::Jpeg => {
            let rgb = DynamicImage::ImageRgba8(img).into_rgb8();
            DynamicImage::ImageRgb8(rgb).write_with_encoder(JpegEncoder::new_with_quality(
                &mut buf,
                THUMBNAIL_JPEG_QUALITY,
            ))
        }
        ImageKind::Png | ImageKind::Gif => {
            DynamicImage::ImageRgba8(img).write_with_encoder(PngEncoder::new(&mut buf))
        }
    };
    result.map_err(DerivativeError::EncodeFailure)?;
    Ok(buf)
}

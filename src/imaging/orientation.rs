//! EXIF orientation: reading it out of a TIFF block and writing the
//! single-tag block that sanitized images and derivatives carry.
//!
//! | Value | Display transform |
//! |---|---|
//! | 1 | none |
//! | 2 | mirror horizontally |
//! | 3 | rotate 180° |
//! | 4 | mirror vertically |
//! | 5 | mirror horizontally, rotate 270° CW |
//! | 6 | rotate 90° CW |
//! | 7 | mirror horizontally, rotate 90° CW |
//! | 8 | rotate 270° CW |
//!
//! The value only tells viewers how to display the stored pixels; pixel data
//! is never rotated here.

use exif::{In, Reader, Tag};

/// TIFF tag number of Orientation.
const ORIENTATION_TAG: u16 = 0x0112;
/// TIFF field type SHORT.
const TYPE_SHORT: u16 = 3;

/// An EXIF orientation value in `1..=8`.
///
/// Reading is total: anything absent, unparsable or out of range becomes
/// [`Orientation::NORMAL`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Orientation(u16);

impl Orientation {
    pub const NORMAL: Orientation = Orientation(1);

    /// Accepts the eight defined values.
    pub fn new(value: u16) -> Option<Self> {
        (1..=8).contains(&value).then_some(Orientation(value))
    }

    pub fn value(self) -> u16 {
        self.0
    }

    /// Decode a raw TIFF/EXIF block (no `Exif\0\0` prefix) and return the
    /// primary-IFD orientation, defaulting to normal.
    pub fn from_exif_block(block: &[u8]) -> Self {
        let block = block.strip_prefix(EXIF_HEADER).unwrap_or(block);
        let exif = match Reader::new().read_raw(block.to_vec()) {
            Ok(exif) => exif,
            Err(e) => {
                tracing::debug!(error = %e, "EXIF block not decodable, orientation defaults to 1");
                return Self::NORMAL;
            }
        };
        exif.get_field(Tag::Orientation, In::PRIMARY)
            .and_then(|field| field.value.get_uint(0))
            .and_then(|v| u16::try_from(v).ok())
            .and_then(Self::new)
            .unwrap_or(Self::NORMAL)
    }

    /// The minimal EXIF block: a little-endian TIFF header and one IFD0
    /// entry holding this orientation. 26 bytes, always identical for the
    /// same value.
    pub fn to_exif_block(self) -> Vec<u8> {
        let mut tiff = Vec::with_capacity(26);
        // Header: byte order, magic 42, IFD0 right after the header.
        tiff.extend_from_slice(b"II");
        tiff.extend_from_slice(&42u16.to_le_bytes());
        tiff.extend_from_slice(&8u32.to_le_bytes());
        // IFD0 with a single entry.
        tiff.extend_from_slice(&1u16.to_le_bytes());
        tiff.extend_from_slice(&ORIENTATION_TAG.to_le_bytes());
        tiff.extend_from_slice(&TYPE_SHORT.to_le_bytes());
        tiff.extend_from_slice(&1u32.to_le_bytes());
        // SHORT values are left-justified in the 4-byte value field.
        tiff.extend_from_slice(&self.0.to_le_bytes());
        tiff.extend_from_slice(&[0, 0]);
        // No next IFD.
        tiff.extend_from_slice(&0u32.to_le_bytes());
        tiff
    }
}

impl Default for Orientation {
    fn default() -> Self {
        Self::NORMAL
    }
}

impl std::fmt::Display for Orientation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier that precedes the TIFF block inside a JPEG APP1 segment.
/// Some PNG writers wrongly include it in `eXIf` too.
pub(crate) const EXIF_HEADER: &[u8] = b"Exif\0\0";

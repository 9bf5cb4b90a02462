//! Content type detection from magic bytes.
//!
//! The claimed filename or `Content-Type` of an upload is never consulted:
//! the first [`SNIFF_LEN`] bytes of the stream decide which container we
//! are dealing with, and that decision picks the sanitizer path. The
//! consumed prefix is handed back chained in front of the rest of the
//! stream, so downstream stages still read the payload from byte zero.

use image::ImageFormat;
use std::io::{self, Cursor, Read};
use thiserror::Error;

/// Number of bytes inspected when sniffing.
pub const SNIFF_LEN: usize = 512;

#[derive(Error, Debug)]
pub enum SniffError {
    #[error("Unsupported type: {detected}")]
    UnsupportedType { detected: String },
    #[error("Read failure while sniffing: {0}")]
    ReadFailure(#[from] io::Error),
}

/// The image containers accepted for storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageKind {
    /// Segment-based, carries EXIF in APP1.
    Jpeg,
    /// Chunk-based, carries EXIF in `eXIf` and text chunks.
    Png,
    /// Animation-capable; stored verbatim.
    Gif,
}

impl ImageKind {
    /// Canonical extension, with the leading dot.
    pub fn extension(self) -> &'static str {
        match self {
            ImageKind::Jpeg => ".jpg",
            ImageKind::Png => ".png",
            ImageKind::Gif => ".gif",
        }
    }

    pub fn mime_type(self) -> &'static str {
        match self {
            ImageKind::Jpeg => "image/jpeg",
            ImageKind::Png => "image/png",
            ImageKind::Gif => "image/gif",
        }
    }

    /// Map a filename extension (with or without the dot, any case) back to a kind.
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.trim_start_matches('.').to_ascii_lowercase().as_str() {
            "jpg" | "jpeg" => Some(ImageKind::Jpeg),
            "png" => Some(ImageKind::Png),
            "gif" => Some(ImageKind::Gif),
            _ => None,
        }
    }

    pub(crate) fn image_format(self) -> ImageFormat {
        match self {
            ImageKind::Jpeg => ImageFormat::Jpeg,
            ImageKind::Png => ImageFormat::Png,
            ImageKind::Gif => ImageFormat::Gif,
        }
    }

    /// Whether the sanitizer rewrites this container.
    pub fn carries_metadata(self) -> bool {
        !matches!(self, ImageKind::Gif)
    }
}

impl std::fmt::Display for ImageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ImageKind::Jpeg => "jpeg",
            ImageKind::Png => "png",
            ImageKind::Gif => "gif",
        };
        f.write_str(name)
    }
}

/// Classify a byte prefix by its signature.
pub fn detect(prefix: &[u8]) -> Result<ImageKind, SniffError> {
    match image::guess_format(prefix) {
        Ok(ImageFormat::Jpeg) => Ok(ImageKind::Jpeg),
        Ok(ImageFormat::Png) => Ok(ImageKind::Png),
        Ok(ImageFormat::Gif) => Ok(ImageKind::Gif),
        Ok(other) => Err(SniffError::UnsupportedType {
            detected: format!("{other:?}").to_lowercase(),
        }),
        Err(_) => Err(SniffError::UnsupportedType {
            detected: "unknown".to_string(),
        }),
    }
}

/// A stream whose prefix has been inspected.
///
/// `reader` yields the whole original stream: the buffered prefix first,
/// then whatever was left unread in the source.
pub struct Sniffed<R> {
    pub kind: ImageKind,
    pub reader: io::Chain<Cursor<Vec<u8>>, R>,
}

impl<R: Read> Sniffed<R> {
    /// Drain the full stream into memory.
    pub fn into_bytes(mut self) -> io::Result<Vec<u8>> {
        let mut bytes = Vec::new();
        self.reader.read_to_end(&mut bytes)?;
        Ok(bytes)
    }
}

/// Peek at up to [`SNIFF_LEN`] bytes of `reader` and detect its type.
pub fn sniff<R: Read>(mut reader: R) -> Result<Sniffed<R>, SniffError> {
    let mut prefix = Vec::with_capacity(SNIFF_LEN);
    (&mut reader).take(SNIFF_LEN as u64).read_to_end(&mut prefix)?;
    let kind = detect(&prefix)?;
    Ok(Sniffed {
        kind,
        reader: Cursor::new(prefix).chain(reader),
    })
}

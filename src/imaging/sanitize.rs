//! Metadata stripping for JPEG and PNG, keeping only orientation.
//!
//! Images are never decoded here. The container is split into its
//! segments (JPEG) or chunks (PNG), metadata carriers are dropped, and a
//! single orientation-only EXIF block is spliced back in. Everything else,
//! including the compressed pixel data, is written back untouched.
//!
//! | Container | Dropped | Re-inserted |
//! |---|---|---|
//! | JPEG | APP1 (EXIF, XMP), APP13 (Photoshop/IPTC), COM | EXIF APP1 with Orientation, always |
//! | PNG | `eXIf`, `tEXt`, `iTXt`, `zTXt` | `eXIf` with Orientation after `IHDR`, only if something was dropped |
//! | GIF | nothing | nothing |
//!
//! # Failing open
//!
//! If a container cannot be parsed the original bytes are returned as-is
//! with [`SanitizeOutcome::FailedOpen`], and a warning is logged under the
//! `imgdrop::sanitize` target. An image that keeps its metadata is still
//! servable; a mangled one is not.

use super::orientation::{EXIF_HEADER, Orientation};
use super::sniff::ImageKind;
use bytes::Bytes;
use img_parts::jpeg::{Jpeg, JpegSegment};
use img_parts::png::{Png, PngChunk};
use thiserror::Error;

const SOI: u8 = 0xD8;
const APP0: u8 = 0xE0;
const APP1: u8 = 0xE1;
const APP13: u8 = 0xED;
const COM: u8 = 0xFE;

const IHDR: [u8; 4] = *b"IHDR";
const EXIF_CHUNK: [u8; 4] = *b"eXIf";
const METADATA_CHUNKS: [[u8; 4]; 4] = [EXIF_CHUNK, *b"tEXt", *b"iTXt", *b"zTXt"];

/// A container could not be split into segments or chunks.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Parse failure in {kind} container: {reason}")]
pub struct ParseFailure {
    pub kind: ImageKind,
    pub reason: String,
}

impl ParseFailure {
    fn new(kind: ImageKind, reason: impl std::fmt::Display) -> Self {
        Self {
            kind,
            reason: reason.to_string(),
        }
    }
}

/// What [`sanitize`] did to its input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SanitizeOutcome {
    /// Metadata was removed or the orientation tag was normalized.
    Stripped,
    /// The input was already minimal; output equals input.
    Unchanged,
    /// The format is stored verbatim (GIF).
    Passthrough,
    /// Parsing failed; output is the untouched input.
    FailedOpen(ParseFailure),
}

/// Output of [`sanitize`].
#[derive(Debug, Clone)]
pub struct Sanitized {
    pub bytes: Vec<u8>,
    pub outcome: SanitizeOutcome,
    /// Orientation found in the input (and carried by the output).
    pub orientation: Orientation,
}

/// Strip all container metadata except orientation.
///
/// Never fails: parse errors produce [`SanitizeOutcome::FailedOpen`] with
/// the original bytes.
pub fn sanitize(data: Vec<u8>, kind: ImageKind) -> Sanitized {
    let original = Bytes::from(data);
    let result = match kind {
        ImageKind::Jpeg => strip_jpeg(original.clone()),
        ImageKind::Png => strip_png(original.clone()),
        ImageKind::Gif => {
            return Sanitized {
                bytes: Vec::from(original),
                outcome: SanitizeOutcome::Passthrough,
                orientation: Orientation::NORMAL,
            };
        }
    };

    match result {
        Ok((bytes, orientation)) => {
            let outcome = if bytes[..] == original[..] {
                SanitizeOutcome::Unchanged
            } else {
                SanitizeOutcome::Stripped
            };
            Sanitized {
                bytes,
                outcome,
                orientation,
            }
        }
        Err(failure) => {
            tracing::warn!(
                target: "imgdrop::sanitize",
                format = %failure.kind,
                reason = %failure.reason,
                "metadata parse failed, keeping original bytes"
            );
            Sanitized {
                bytes: Vec::from(original),
                outcome: SanitizeOutcome::FailedOpen(failure),
                orientation: Orientation::NORMAL,
            }
        }
    }
}

/// Orientation of an encoded image, `1` when absent or unreadable.
pub fn read_orientation(data: &[u8], kind: ImageKind) -> Orientation {
    let bytes = Bytes::copy_from_slice(data);
    match kind {
        ImageKind::Jpeg => Jpeg::from_bytes(bytes)
            .map(|jpeg| jpeg_orientation(&jpeg))
            .unwrap_or_default(),
        ImageKind::Png => Png::from_bytes(bytes)
            .map(|png| png_orientation(&png))
            .unwrap_or_default(),
        ImageKind::Gif => Orientation::NORMAL,
    }
}

/// Replace whatever EXIF an encoded image has with the orientation-only
/// block. Used to re-tag freshly encoded derivatives; other metadata is
/// left alone. GIF input is returned unchanged.
pub fn tag_orientation(
    data: Vec<u8>,
    kind: ImageKind,
    orientation: Orientation,
) -> Result<Vec<u8>, ParseFailure> {
    match kind {
        ImageKind::Jpeg => {
            let mut jpeg = Jpeg::from_bytes(Bytes::from(data))
                .map_err(|e| ParseFailure::new(kind, e))?;
            splice_jpeg_exif(jpeg.segments_mut(), orientation, is_exif_segment);
            encode_jpeg(jpeg)
        }
        ImageKind::Png => {
            let mut png =
                Png::from_bytes(Bytes::from(data)).map_err(|e| ParseFailure::new(kind, e))?;
            let chunks = png.chunks_mut();
            chunks.retain(|chunk| chunk.kind() != EXIF_CHUNK);
            insert_png_exif(chunks, orientation);
            encode_png(png)
        }
        ImageKind::Gif => Ok(data),
    }
}

// ---------------------------------------------------------------------------
// JPEG
// ---------------------------------------------------------------------------

fn strip_jpeg(data: Bytes) -> Result<(Vec<u8>, Orientation), ParseFailure> {
    let mut jpeg = Jpeg::from_bytes(data).map_err(|e| ParseFailure::new(ImageKind::Jpeg, e))?;
    let orientation = jpeg_orientation(&jpeg);
    splice_jpeg_exif(jpeg.segments_mut(), orientation, is_metadata_segment);
    Ok((encode_jpeg(jpeg)?, orientation))
}

fn is_exif_segment(segment: &JpegSegment) -> bool {
    segment.marker() == APP1 && segment.contents().starts_with(EXIF_HEADER)
}

fn is_metadata_segment(segment: &JpegSegment) -> bool {
    matches!(segment.marker(), APP1 | APP13 | COM)
}

/// Orientation from the first EXIF APP1 segment.
fn jpeg_orientation(jpeg: &Jpeg) -> Orientation {
    jpeg.segments()
        .iter()
        .find(|segment| is_exif_segment(segment))
        .map(|segment| Orientation::from_exif_block(&segment.contents()[EXIF_HEADER.len()..]))
        .unwrap_or_default()
}

/// Remove every segment matching `drop`, then insert the orientation-only
/// EXIF segment where the first EXIF segment used to be, or after the
/// leading SOI/APP0 segments when there was none.
fn splice_jpeg_exif(
    segments: &mut Vec<JpegSegment>,
    orientation: Orientation,
    drop: fn(&JpegSegment) -> bool,
) {
    let position = match segments.iter().position(is_exif_segment) {
        Some(exif_at) => segments[..exif_at].iter().filter(|s| !drop(s)).count(),
        None => segments
            .iter()
            .take_while(|s| matches!(s.marker(), SOI | APP0))
            .count(),
    };
    segments.retain(|segment| !drop(segment));

    let mut contents = Vec::with_capacity(EXIF_HEADER.len() + 26);
    contents.extend_from_slice(EXIF_HEADER);
    contents.extend(orientation.to_exif_block());
    segments.insert(
        position.min(segments.len()),
        JpegSegment::new_with_contents(APP1, Bytes::from(contents)),
    );
}

fn encode_jpeg(jpeg: Jpeg) -> Result<Vec<u8>, ParseFailure> {
    let mut out = Vec::new();
    jpeg.encoder()
        .write_to(&mut out)
        .map_err(|e| ParseFailure::new(ImageKind::Jpeg, e))?;
    Ok(out)
}

// ---------------------------------------------------------------------------
// PNG
// ---------------------------------------------------------------------------

fn strip_png(data: Bytes) -> Result<(Vec<u8>, Orientation), ParseFailure> {
    let mut png = Png::from_bytes(data).map_err(|e| ParseFailure::new(ImageKind::Png, e))?;
    let orientation = png_orientation(&png);

    let chunks = png.chunks_mut();
    let had_metadata = chunks.iter().any(is_metadata_chunk);
    chunks.retain(|chunk| !is_metadata_chunk(chunk));
    if had_metadata {
        insert_png_exif(chunks, orientation);
    }

    Ok((encode_png(png)?, orientation))
}

fn is_metadata_chunk(chunk: &PngChunk) -> bool {
    METADATA_CHUNKS.contains(&chunk.kind())
}

fn png_orientation(png: &Png) -> Orientation {
    png.chunks()
        .iter()
        .find(|chunk| chunk.kind() == EXIF_CHUNK)
        .map(|chunk| Orientation::from_exif_block(chunk.contents()))
        .unwrap_or_default()
}

fn insert_png_exif(chunks: &mut Vec<PngChunk>, orientation: Orientation) {
    let after_header = chunks
        .iter()
        .position(|chunk| chunk.kind() == IHDR)
        .map_or(0, |i| i + 1);
    chunks.insert(
        after_header,
        PngChunk::new(EXIF_CHUNK, Bytes::from(orientation.to_exif_block())),
    );
}

fn encode_png(png: Png) -> Result<Vec<u8>, ParseFailure> {
    let mut out = Vec::new();
    png.encoder()
        .write_to(&mut out)
        .map_err(|e| ParseFailure::new(ImageKind::Png, e))?;
    Ok(out)
}

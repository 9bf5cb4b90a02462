//! Shared test utilities: synthetic images with controlled metadata.
//!
//! Fixtures are generated in memory with the `image` encoders and then
//! decorated with metadata through `img-parts`, so every test knows exactly
//! which segments and chunks its input carries.
//!
//! # Usage
//!
//! ```rust
//! use crate::test_helpers::*;
//!
//! let camera_jpeg = jpeg_with_metadata(64, 48, 6); // EXIF, XMP, IPTC, COM
//! let clean_png = plain_png(16, 16);               // no metadata at all
//! ```

use bytes::Bytes;
use image::codecs::gif::GifEncoder;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::{ExtendedColorType, ImageEncoder, Rgb, RgbImage, Rgba, RgbaImage};
use img_parts::jpeg::{Jpeg, JpegSegment};
use img_parts::png::{Png, PngChunk};

const SOI: u8 = 0xD8;
const APP0: u8 = 0xE0;
const APP1: u8 = 0xE1;
const APP13: u8 = 0xED;
const COM: u8 = 0xFE;

const TYPE_ASCII: u16 = 2;
const TYPE_SHORT: u16 = 3;
const TYPE_LONG: u16 = 4;

// =========================================================================
// EXIF
// =========================================================================

/// Append one 12-byte IFD entry; values over 4 bytes go to `heap`.
fn ifd_entry(out: &mut Vec<u8>, heap: &mut Vec<u8>, heap_base: u32, tag: u16, kind: u16, count: u32, value: &[u8]) {
    out.extend_from_slice(&tag.to_le_bytes());
    out.extend_from_slice(&kind.to_le_bytes());
    out.extend_from_slice(&count.to_le_bytes());
    if value.len() <= 4 {
        let mut inline = value.to_vec();
        inline.resize(4, 0);
        out.extend_from_slice(&inline);
    } else {
        out.extend_from_slice(&(heap_base + heap.len() as u32).to_le_bytes());
        heap.extend_from_slice(value);
        if heap.len() % 2 == 1 {
            heap.push(0);
        }
    }
}

/// A TIFF block like a camera writes: Make, Model, Orientation, Software
/// and a GPS sub-IFD, little-endian, no `Exif\0\0` prefix.
pub fn exif_block_with_camera_tags(orientation: u16) -> Vec<u8> {
    let make = b"Acme Optics\0";
    let model = b"X-100\0";
    let software = b"Darkroom 2.1\0";

    let ifd0_len = 2 + 5 * 12 + 4;
    let gps_offset = 8 + ifd0_len;
    let gps_len = 2 + 12 + 4;
    let heap_base = (gps_offset + gps_len) as u32;

    let mut tiff = b"II*\0".to_vec();
    tiff.extend_from_slice(&8u32.to_le_bytes());
    let mut heap = Vec::new();

    tiff.extend_from_slice(&5u16.to_le_bytes());
    ifd_entry(&mut tiff, &mut heap, heap_base, 0x010F, TYPE_ASCII, make.len() as u32, make);
    ifd_entry(&mut tiff, &mut heap, heap_base, 0x0110, TYPE_ASCII, model.len() as u32, model);
    ifd_entry(&mut tiff, &mut heap, heap_base, 0x0112, TYPE_SHORT, 1, &orientation.to_le_bytes());
    ifd_entry(&mut tiff, &mut heap, heap_base, 0x0131, TYPE_ASCII, software.len() as u32, software);
    ifd_entry(&mut tiff, &mut heap, heap_base, 0x8825, TYPE_LONG, 1, &(gps_offset as u32).to_le_bytes());
    tiff.extend_from_slice(&0u32.to_le_bytes());

    // GPS IFD: GPSLatitudeRef = "N"
    tiff.extend_from_slice(&1u16.to_le_bytes());
    ifd_entry(&mut tiff, &mut heap, heap_base, 0x0001, TYPE_ASCII, 2, b"N\0");
    tiff.extend_from_slice(&0u32.to_le_bytes());

    assert_eq!(tiff.len() as u32, heap_base);
    tiff.extend(heap);
    tiff
}

// =========================================================================
// JPEG
// =========================================================================

fn gradient_rgb(width: u32, height: u32) -> RgbImage {
    RgbImage::from_fn(width, height, |x, y| {
        Rgb([(x * 7 % 256) as u8, (y * 5 % 256) as u8, ((x + y) * 3 % 256) as u8])
    })
}

/// Baseline JPEG with no metadata segments beyond the encoder's own.
pub fn plain_jpeg(width: u32, height: u32) -> Vec<u8> {
    let img = gradient_rgb(width, height);
    let mut buf = Vec::new();
    JpegEncoder::new_with_quality(&mut buf, 90)
        .write_image(img.as_raw(), width, height, ExtendedColorType::Rgb8)
        .unwrap();
    buf
}

/// JPEG carrying camera EXIF (with `orientation`), XMP, Photoshop IPTC and
/// a comment, in that order right after the JFIF header.
pub fn jpeg_with_metadata(width: u32, height: u32, orientation: u16) -> Vec<u8> {
    let mut jpeg = Jpeg::from_bytes(Bytes::from(plain_jpeg(width, height))).unwrap();

    let mut exif = b"Exif\0\0".to_vec();
    exif.extend(exif_block_with_camera_tags(orientation));
    let mut xmp = b"http://ns.adobe.com/xap/1.0/\0".to_vec();
    xmp.extend_from_slice(b"<x:xmpmeta xmlns:x=\"adobe:ns:meta/\"><rdf:RDF/></x:xmpmeta>");
    let mut iptc = b"Photoshop 3.0\08BIM\x04\x04\0\0".to_vec();
    iptc.extend_from_slice(&[0, 0, 0, 8, 0x1C, 0x02, 0x50, 0x00, 0x03, b'A', b'n', b'n']);

    let segments = jpeg.segments_mut();
    let at = segments
        .iter()
        .take_while(|s| s.marker() == SOI || s.marker() == APP0)
        .count();
    let added = [
        JpegSegment::new_with_contents(APP1, Bytes::from(exif)),
        JpegSegment::new_with_contents(APP1, Bytes::from(xmp)),
        JpegSegment::new_with_contents(APP13, Bytes::from(iptc)),
        JpegSegment::new_with_contents(COM, Bytes::from_static(b"Shot on Acme X-100")),
    ];
    for (i, segment) in added.into_iter().enumerate() {
        segments.insert(at + i, segment);
    }

    let mut out = Vec::new();
    jpeg.encoder().write_to(&mut out).unwrap();
    out
}

// =========================================================================
// PNG
// =========================================================================

/// RGBA PNG with only the chunks the encoder writes.
pub fn plain_png(width: u32, height: u32) -> Vec<u8> {
    let img = RgbaImage::from_fn(width, height, |x, y| {
        Rgba([(x * 11 % 256) as u8, (y * 13 % 256) as u8, 128, 255])
    });
    let mut buf = Vec::new();
    PngEncoder::new(&mut buf)
        .write_image(img.as_raw(), width, height, ExtendedColorType::Rgba8)
        .unwrap();
    buf
}

fn png_with_chunks(width: u32, height: u32, extra: Vec<PngChunk>) -> Vec<u8> {
    let mut png = Png::from_bytes(Bytes::from(plain_png(width, height))).unwrap();
    let chunks = png.chunks_mut();
    let at = chunks.iter().position(|c| &c.kind() == b"IHDR").unwrap() + 1;
    for (i, chunk) in extra.into_iter().enumerate() {
        chunks.insert(at + i, chunk);
    }
    let mut out = Vec::new();
    png.encoder().write_to(&mut out).unwrap();
    out
}

/// PNG with `tEXt`, `zTXt` and `iTXt` chunks followed by a camera `eXIf`.
pub fn png_with_metadata(width: u32, height: u32, orientation: u16) -> Vec<u8> {
    png_with_chunks(
        width,
        height,
        vec![
            PngChunk::new(*b"tEXt", Bytes::from_static(b"Software\0Darkroom 2.1")),
            PngChunk::new(*b"zTXt", Bytes::from_static(b"Comment\0\0\x78\x9c\x03\x00\x00\x00\x00\x01")),
            PngChunk::new(*b"iTXt", Bytes::from_static(b"Author\0\0\0\0\0Ann")),
            PngChunk::new(*b"eXIf", Bytes::from(exif_block_with_camera_tags(orientation))),
        ],
    )
}

/// PNG whose only metadata is a `tEXt` chunk.
pub fn png_with_text_only(width: u32, height: u32) -> Vec<u8> {
    png_with_chunks(
        width,
        height,
        vec![PngChunk::new(*b"tEXt", Bytes::from_static(b"Title\0Holiday"))],
    )
}

// =========================================================================
// GIF
// =========================================================================

/// Single-frame GIF.
pub fn tiny_gif(width: u32, height: u32) -> Vec<u8> {
    let frame = RgbaImage::from_fn(width, height, |x, y| {
        if (x + y) % 2 == 0 {
            Rgba([255, 0, 0, 255])
        } else {
            Rgba([0, 0, 255, 255])
        }
    });
    let mut buf = Vec::new();
    {
        let mut encoder = GifEncoder::new(&mut buf);
        encoder
            .encode(frame.as_raw(), width, height, ExtendedColorType::Rgba8)
            .unwrap();
    }
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn camera_block_layout() {
        let block = exif_block_with_camera_tags(6);
        assert_eq!(&block[..4], b"II*\0");
        // Entries are sorted by tag; orientation is the third.
        let third = 8 + 2 + 2 * 12;
        assert_eq!(&block[third..third + 2], &[0x12, 0x01]);
        assert_eq!(block[third + 8], 6);
    }

    #[test]
    fn fixtures_are_decodable() {
        assert_eq!(image::load_from_memory(&jpeg_with_metadata(10, 6, 1)).unwrap().width(), 10);
        assert_eq!(image::load_from_memory(&png_with_metadata(10, 6, 1)).unwrap().height(), 6);
        assert_eq!(image::load_from_memory(&tiny_gif(3, 2)).unwrap().width(), 3);
    }
}

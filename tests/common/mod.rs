//! Fixture builders shared by the integration tests.

#![allow(dead_code)]

use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::{ExtendedColorType, ImageEncoder, Rgb, RgbImage, Rgba, RgbaImage};
use img_parts::jpeg::{Jpeg, JpegSegment};
use img_parts::png::{Png, PngChunk};
use imgdrop::config::AppConfig;
use std::path::Path;

const APP0: u8 = 0xE0;
const APP1: u8 = 0xE1;
const SOI: u8 = 0xD8;
const COM: u8 = 0xFE;

pub const CAMERA_MAKE: &[u8] = b"Acme Optics";

/// Config rooted at `dir` with an uploads directory below it.
pub fn config_in(dir: &Path) -> AppConfig {
    AppConfig {
        upload_path: dir.join("uploads"),
        ..AppConfig::default()
    }
}

/// Little-endian TIFF block: Make and Orientation in IFD0, no prefix.
pub fn camera_exif(orientation: u16) -> Vec<u8> {
    let make_offset: u32 = 8 + 2 + 2 * 12 + 4;
    let mut tiff = b"II*\0".to_vec();
    tiff.extend_from_slice(&8u32.to_le_bytes());
    tiff.extend_from_slice(&2u16.to_le_bytes());

    let make_len = CAMERA_MAKE.len() as u32 + 1;
    tiff.extend_from_slice(&0x010Fu16.to_le_bytes());
    tiff.extend_from_slice(&2u16.to_le_bytes());
    tiff.extend_from_slice(&make_len.to_le_bytes());
    tiff.extend_from_slice(&make_offset.to_le_bytes());

    tiff.extend_from_slice(&0x0112u16.to_le_bytes());
    tiff.extend_from_slice(&3u16.to_le_bytes());
    tiff.extend_from_slice(&1u32.to_le_bytes());
    tiff.extend_from_slice(&orientation.to_le_bytes());
    tiff.extend_from_slice(&[0, 0]);

    tiff.extend_from_slice(&0u32.to_le_bytes());
    tiff.extend_from_slice(CAMERA_MAKE);
    tiff.push(0);
    tiff
}

/// Camera JPEG: EXIF with make and `orientation`, plus a comment segment.
pub fn camera_jpeg(width: u32, height: u32, orientation: u16) -> Vec<u8> {
    let img = RgbImage::from_fn(width, height, |x, y| {
        Rgb([(x % 251) as u8, (y % 241) as u8, ((x ^ y) % 256) as u8])
    });
    let mut encoded = Vec::new();
    JpegEncoder::new_with_quality(&mut encoded, 80)
        .write_image(img.as_raw(), width, height, ExtendedColorType::Rgb8)
        .unwrap();

    let mut jpeg = Jpeg::from_bytes(Bytes::from(encoded)).unwrap();
    let mut exif = b"Exif\0\0".to_vec();
    exif.extend(camera_exif(orientation));
    let segments = jpeg.segments_mut();
    let at = segments
        .iter()
        .take_while(|s| s.marker() == SOI || s.marker() == APP0)
        .count();
    segments.insert(at, JpegSegment::new_with_contents(APP1, Bytes::from(exif)));
    segments.insert(
        at + 1,
        JpegSegment::new_with_contents(COM, Bytes::from_static(b"holiday 2019")),
    );

    let mut out = Vec::new();
    jpeg.encoder().write_to(&mut out).unwrap();
    out
}

/// PNG with a text chunk and a camera `eXIf` chunk.
pub fn camera_png(width: u32, height: u32, orientation: u16) -> Vec<u8> {
    let img = RgbaImage::from_fn(width, height, |x, y| Rgba([x as u8, y as u8, 7, 255]));
    let mut encoded = Vec::new();
    PngEncoder::new(&mut encoded)
        .write_image(img.as_raw(), width, height, ExtendedColorType::Rgba8)
        .unwrap();

    let mut png = Png::from_bytes(Bytes::from(encoded)).unwrap();
    let chunks = png.chunks_mut();
    chunks.insert(1, PngChunk::new(*b"tEXt", Bytes::from_static(b"Author\0Ann")));
    chunks.insert(2, PngChunk::new(*b"eXIf", Bytes::from(camera_exif(orientation))));

    let mut out = Vec::new();
    png.encoder().write_to(&mut out).unwrap();
    out
}

pub fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

/// Regular, non-hidden files directly inside `dir`.
pub fn visible_files(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap())
        .filter(|e| e.file_type().unwrap().is_file())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .filter(|n| !n.starts_with('.'))
        .collect();
    names.sort();
    names
}

//! Container-level image handling.
//!
//! | Operation | Crate / function |
//! |---|---|
//! | **Sniff** | `image::guess_format` on the first 512 bytes |
//! | **Orientation** | `kamadak-exif` reader, hand-built 26-byte TIFF writer |
//! | **Sanitize** | `img-parts` segment/chunk splicing, no pixel re-encode |
//! | **Derivative** | `image` decode, nearest-neighbour shrink, JPEG q85 / PNG encode |
//!
//! The module is split into:
//! - **Sniff**: what kind of container a byte stream is
//! - **Orientation**: the one metadata value that survives sanitizing
//! - **Sanitize**: metadata stripping and orientation re-tagging
//! - **Derivative**: reduced copies that keep the source orientation

pub mod derivative;
pub mod orientation;
pub mod sanitize;
pub mod sniff;

pub use derivative::{Derivative, DerivativeError, make_derivative};
pub use orientation::Orientation;
pub use sanitize::{ParseFailure, SanitizeOutcome, Sanitized, read_orientation, sanitize, tag_orientation};
pub use sniff::{ImageKind, SniffError, Sniffed, sniff};

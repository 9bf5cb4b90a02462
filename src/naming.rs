//! Stored-file names.
//!
//! Every original is stored as six random ASCII letters plus the extension
//! of its sniffed type, e.g. `qXbRtm.jpg`. The same names identify images
//! to callers, so anything a caller hands back is validated before it gets
//! anywhere near a path:
//!
//! - `"AbCdEf.png"` → ok
//! - `"../etc/passwd"`, `"a/b.jpg"` → path separator
//! - `".upload-x1y2"` → hidden (in-flight temp files are hidden)
//! - `"notes.txt"` → not an image extension

use crate::imaging::ImageKind;
use rand::Rng;
use std::ffi::OsStr;

/// Letters in a generated name, before the extension.
pub const NAME_LEN: usize = 6;

const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// Draw a fresh name for content of `kind`.
pub fn generate_name(kind: ImageKind) -> String {
    let mut rng = rand::rng();
    let mut name: String = (0..NAME_LEN)
        .map(|_| ALPHABET[rng.random_range(0..ALPHABET.len())] as char)
        .collect();
    name.push_str(kind.extension());
    name
}

/// Why a name was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameRejection {
    Empty,
    DotEntry,
    Hidden,
    PathSeparator,
    Extension,
}

impl std::fmt::Display for NameRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let reason = match self {
            NameRejection::Empty => "empty name",
            NameRejection::DotEntry => "directory entry",
            NameRejection::Hidden => "hidden file",
            NameRejection::PathSeparator => "contains a path separator",
            NameRejection::Extension => "not a jpg, jpeg, png or gif name",
        };
        f.write_str(reason)
    }
}

/// Check that `name` can only refer to an original in the storage directory.
pub fn validate_image_name(name: &str) -> Result<ImageKind, NameRejection> {
    if name.is_empty() {
        return Err(NameRejection::Empty);
    }
    if name == "." || name == ".." {
        return Err(NameRejection::DotEntry);
    }
    if name.contains(['/', '\\', '\0']) {
        return Err(NameRejection::PathSeparator);
    }
    if name.starts_with('.') {
        return Err(NameRejection::Hidden);
    }
    name.rsplit_once('.')
        .filter(|(stem, _)| !stem.is_empty())
        .and_then(|(_, ext)| ImageKind::from_extension(ext))
        .ok_or(NameRejection::Extension)
}

/// Response content type for a stored name.
pub fn content_type(name: &str) -> &'static str {
    name.rsplit_once('.')
        .and_then(|(_, ext)| ImageKind::from_extension(ext))
        .map_or("application/octet-stream", ImageKind::mime_type)
}

/// Files that live next to originals without being one: in-flight temp
/// files (hidden) and `.bak` copies left by a bulk strip.
pub fn is_hidden_or_backup(file_name: &OsStr) -> bool {
    let name = file_name.to_string_lossy();
    name.starts_with('.') || name.ends_with(".bak")
}

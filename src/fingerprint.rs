//! Content fingerprints.
//!
//! A [`Fingerprint`] is the SHA-256 of a file's full byte content. It is the
//! identity key of the dedup index: equal fingerprints mean equal content,
//! whatever the files are called.
//!
//! Hashing streams through the digest, so a payload never has to be held in
//! memory just to be fingerprinted. Seekable sources can be rewound after
//! hashing with [`fingerprint_and_rewind`]; for anything else the caller has
//! to reopen the stream.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum HashError {
    #[error("Read failure while hashing: {0}")]
    ReadFailure(#[from] io::Error),
}

/// SHA-256 digest of a byte stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    /// Lowercase hex, 64 characters.
    pub fn to_hex(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

/// Which bytes of an upload are fingerprinted.
///
/// Stored files are always sanitized, and a rebuilt index fingerprints what
/// is on disk. With [`Raw`](FingerprintPolicy::Raw) a repeated upload of the
/// same camera file is recognised in-process, but after a restart only a
/// metadata-free upload matches it. With
/// [`Sanitized`](FingerprintPolicy::Sanitized) the keys agree across
/// restarts, and two uploads differing only in stripped metadata dedup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FingerprintPolicy {
    /// Hash the bytes as received.
    #[default]
    Raw,
    /// Hash the bytes that will be persisted.
    Sanitized,
}

/// Drain `reader` and return the digest of everything it yielded.
///
/// An I/O error aborts with [`HashError::ReadFailure`]; no partial digest
/// is ever returned.
pub fn fingerprint_reader<R: Read>(mut reader: R) -> Result<Fingerprint, HashError> {
    let mut hasher = Sha256::new();
    io::copy(&mut reader, &mut hasher)?;
    Ok(Fingerprint(hasher.finalize().into()))
}

/// Hash a seekable source from its current position, then seek back there.
pub fn fingerprint_and_rewind<R: Read + Seek>(reader: &mut R) -> Result<Fingerprint, HashError> {
    let start = reader.stream_position()?;
    let fingerprint = fingerprint_reader(&mut *reader)?;
    reader.seek(SeekFrom::Start(start))?;
    Ok(fingerprint)
}

pub fn fingerprint_bytes(bytes: &[u8]) -> Fingerprint {
    Fingerprint(Sha256::digest(bytes).into())
}

pub fn fingerprint_file(path: &Path) -> Result<Fingerprint, HashError> {
    fingerprint_reader(File::open(path)?)
}

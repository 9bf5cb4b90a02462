//! The storage directory and the operations callers use on it.
//!
//! ```text
//! bytes ─▶ sniff ─▶ fingerprint ─▶ index lookup ─┬─ hit ──▶ existing name
//!                                                └─ miss ─▶ sanitize ─▶ write ─▶ insert ─▶ new name
//! ```
//!
//! Every file that becomes visible under its final name is complete: bytes
//! go to a hidden temp file in the same directory first and are renamed into
//! place. Hidden files are never indexed or served.
//!
//! Derivatives are cached at `<thumbnails dir>/<factor>/<name>`; GIF sources
//! get a `.png` suffix there because their derivatives are PNG.

use crate::config::AppConfig;
use crate::fingerprint::{
    Fingerprint, FingerprintPolicy, HashError, fingerprint_and_rewind, fingerprint_bytes,
};
use crate::imaging::derivative::{DerivativeError, derivative_kind, make_derivative};
use crate::imaging::sniff::{ImageKind, SniffError, sniff};
use crate::imaging::{Sanitized, sanitize};
use crate::index::{DedupIndex, IndexError, Insertion, StoredImage};
use crate::naming::{self, NameRejection};
use rayon::prelude::*;
use serde::Serialize;
use std::fs::{self, File, Permissions};
use std::io::{self, Read, Seek, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::SystemTime;
use thiserror::Error;

/// Fresh names drawn before giving up on finding a free one.
const MAX_NAME_ATTEMPTS: usize = 16;

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("Unsupported type: {detected}")]
    UnsupportedType { detected: String },
    #[error("Read failure: {0}")]
    ReadFailure(#[source] io::Error),
    #[error("Write failure: {0}")]
    WriteFailure(#[source] io::Error),
    #[error(transparent)]
    Index(#[from] IndexError),
}

impl From<SniffError> for IngestError {
    fn from(e: SniffError) -> Self {
        match e {
            SniffError::UnsupportedType { detected } => IngestError::UnsupportedType { detected },
            SniffError::ReadFailure(e) => IngestError::ReadFailure(e),
        }
    }
}

impl From<HashError> for IngestError {
    fn from(e: HashError) -> Self {
        match e {
            HashError::ReadFailure(e) => IngestError::ReadFailure(e),
        }
    }
}

#[derive(Error, Debug)]
pub enum ServeError {
    #[error("Invalid image name {name:?}: {reason}")]
    InvalidName { name: String, reason: NameRejection },
    #[error("Image not found: {0}")]
    NotFound(String),
    #[error("Stored file is not a supported image: {detected}")]
    UnsupportedType { detected: String },
    #[error("Read failure: {0}")]
    ReadFailure(#[source] io::Error),
}

impl From<SniffError> for ServeError {
    fn from(e: SniffError) -> Self {
        match e {
            SniffError::UnsupportedType { detected } => ServeError::UnsupportedType { detected },
            SniffError::ReadFailure(e) => ServeError::ReadFailure(e),
        }
    }
}

impl From<ServeError> for DerivativeError {
    fn from(e: ServeError) -> Self {
        match e {
            ServeError::InvalidName { name, reason } => {
                DerivativeError::InvalidName(format!("{name}: {reason}"))
            }
            ServeError::NotFound(name) => DerivativeError::NotFound(name),
            ServeError::UnsupportedType { detected } => {
                DerivativeError::UnsupportedType { detected }
            }
            ServeError::ReadFailure(e) => DerivativeError::ReadFailure(e),
        }
    }
}

/// Result of an ingest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Ingested {
    /// Stored name, e.g. `AbCdEf.jpg`.
    pub identifier: String,
    /// `false` when the content was already stored under `identifier`.
    pub was_newly_stored: bool,
}

/// Originals directory, derivative cache and the dedup index over them.
pub struct ImageStore {
    dir: PathBuf,
    thumbs_dir: PathBuf,
    index: Arc<DedupIndex>,
    policy: FingerprintPolicy,
}

impl ImageStore {
    /// Create the storage directory if needed and start the index rebuild
    /// in the background. The store is usable right away; ingests block
    /// until the rebuild is done.
    pub fn open(config: &AppConfig) -> io::Result<(Self, JoinHandle<Result<usize, IndexError>>)> {
        fs::create_dir_all(&config.upload_path)?;
        let (index, rebuild) =
            DedupIndex::spawn_rebuild(&config.upload_path, config.warmup_timeout());
        let store = Self::with_index(
            config.upload_path.clone(),
            config.thumbnails_dir(),
            index,
            config.dedup.fingerprint,
        );
        Ok((store, rebuild))
    }

    pub fn with_index(
        dir: PathBuf,
        thumbs_dir: PathBuf,
        index: Arc<DedupIndex>,
        policy: FingerprintPolicy,
    ) -> Self {
        Self {
            dir,
            thumbs_dir,
            index,
            policy,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn index(&self) -> &DedupIndex {
        &self.index
    }

    /// Store the content of `reader` unless it is already stored.
    ///
    /// Identical content always yields the same name. A parse failure in
    /// the sanitizer does not fail the ingest: the bytes are stored as
    /// received and a warning is logged.
    pub fn ingest<R: Read>(&self, reader: R) -> Result<Ingested, IngestError> {
        let sniffed = sniff(reader)?;
        let kind = sniffed.kind;
        let raw = sniffed.into_bytes().map_err(IngestError::ReadFailure)?;

        let (fingerprint, sanitized) = match self.policy {
            FingerprintPolicy::Raw => {
                let fingerprint = fingerprint_bytes(&raw);
                if let Some(hit) = self.existing(&fingerprint)? {
                    return Ok(hit);
                }
                (fingerprint, sanitize(raw, kind))
            }
            FingerprintPolicy::Sanitized => {
                let sanitized = sanitize(raw, kind);
                let fingerprint = fingerprint_bytes(&sanitized.bytes);
                if let Some(hit) = self.existing(&fingerprint)? {
                    return Ok(hit);
                }
                (fingerprint, sanitized)
            }
        };
        self.store_new(fingerprint, sanitized, kind)
    }

    /// Ingest a local file.
    ///
    /// Under the raw policy the file is hashed straight from disk and only
    /// read into memory when its content is new.
    pub fn ingest_file(&self, path: &Path) -> Result<Ingested, IngestError> {
        let mut file = File::open(path).map_err(IngestError::ReadFailure)?;
        if self.policy == FingerprintPolicy::Sanitized {
            return self.ingest(file);
        }

        let kind = sniff(&mut file)?.kind;
        file.rewind().map_err(IngestError::ReadFailure)?;
        let fingerprint = fingerprint_and_rewind(&mut file)?;
        if let Some(hit) = self.existing(&fingerprint)? {
            return Ok(hit);
        }

        let mut raw = Vec::new();
        file.read_to_end(&mut raw)
            .map_err(IngestError::ReadFailure)?;
        self.store_new(fingerprint, sanitize(raw, kind), kind)
    }

    fn existing(&self, fingerprint: &Fingerprint) -> Result<Option<Ingested>, IngestError> {
        let hit = self.index.lookup(fingerprint)?;
        match &hit {
            Some(record) => tracing::debug!(%fingerprint, name = %record.name, "dedup hit"),
            None => tracing::debug!(%fingerprint, "dedup miss"),
        }
        Ok(hit.map(|record| Ingested {
            identifier: record.name,
            was_newly_stored: false,
        }))
    }

    fn store_new(
        &self,
        fingerprint: Fingerprint,
        sanitized: Sanitized,
        kind: ImageKind,
    ) -> Result<Ingested, IngestError> {
        let name = self.persist_new(&sanitized.bytes, kind)?;
        let record = StoredImage {
            fingerprint,
            name: name.clone(),
            created: SystemTime::now(),
        };

        match self.index.insert(record) {
            Ok(Insertion::Inserted) => {
                tracing::info!(%name, outcome = ?sanitized.outcome, "stored new image");
                Ok(Ingested {
                    identifier: name,
                    was_newly_stored: true,
                })
            }
            Ok(Insertion::Existing(existing)) => {
                tracing::warn!(
                    %fingerprint,
                    kept = %existing.name,
                    dropped = %name,
                    "same content stored concurrently, removing duplicate"
                );
                self.remove_quietly(&name);
                Ok(Ingested {
                    identifier: existing.name,
                    was_newly_stored: false,
                })
            }
            Err(e) => {
                self.remove_quietly(&name);
                Err(e.into())
            }
        }
    }

    /// Write `bytes` under a fresh name without ever replacing a file.
    fn persist_new(&self, bytes: &[u8], kind: ImageKind) -> Result<String, IngestError> {
        let mut tmp = tempfile::Builder::new()
            .prefix(".upload-")
            .tempfile_in(&self.dir)
            .map_err(IngestError::WriteFailure)?;
        tmp.write_all(bytes).map_err(IngestError::WriteFailure)?;
        tmp.as_file().sync_all().map_err(IngestError::WriteFailure)?;
        make_world_readable(tmp.as_file()).map_err(IngestError::WriteFailure)?;

        for _ in 0..MAX_NAME_ATTEMPTS {
            let name = naming::generate_name(kind);
            match tmp.persist_noclobber(self.dir.join(&name)) {
                Ok(_) => return Ok(name),
                Err(e) if e.error.kind() == io::ErrorKind::AlreadyExists => tmp = e.file,
                Err(e) => return Err(IngestError::WriteFailure(e.error)),
            }
        }
        Err(IngestError::WriteFailure(io::Error::new(
            io::ErrorKind::AlreadyExists,
            "no free name found",
        )))
    }

    fn remove_quietly(&self, name: &str) {
        if let Err(e) = fs::remove_file(self.dir.join(name)) {
            tracing::warn!(%name, error = %e, "could not remove duplicate file");
        }
    }

    /// Open a stored original for streaming.
    ///
    /// The name only has to be a safe storage name; the returned kind is
    /// sniffed from the file's first bytes, so files stored under a
    /// misleading extension are served as what they are.
    pub fn open_original(&self, name: &str) -> Result<(File, ImageKind), ServeError> {
        naming::validate_image_name(name).map_err(|reason| ServeError::InvalidName {
            name: name.to_string(),
            reason,
        })?;
        let mut file = match File::open(self.dir.join(name)) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(ServeError::NotFound(name.to_string()));
            }
            Err(e) => return Err(ServeError::ReadFailure(e)),
        };
        let kind = sniff(&mut file)?.kind;
        file.rewind().map_err(ServeError::ReadFailure)?;
        Ok((file, kind))
    }

    /// Where the derivative of `name` (content of `kind`) at `factor` is
    /// cached. The name is kept when its extension already matches the
    /// derivative's container, otherwise that container's extension is
    /// appended.
    pub fn derivative_path(&self, name: &str, kind: ImageKind, factor: u32) -> PathBuf {
        let out = derivative_kind(kind);
        let file_name = if naming::validate_image_name(name) == Ok(out) {
            name.to_string()
        } else {
            format!("{name}{}", out.extension())
        };
        self.thumbs_dir.join(factor.to_string()).join(file_name)
    }

    /// Cached derivative bytes, generating and caching them on a miss.
    pub fn get_or_make_derivative(
        &self,
        name: &str,
        factor: u32,
    ) -> Result<(Vec<u8>, ImageKind), DerivativeError> {
        if factor == 0 {
            return Err(DerivativeError::InvalidFactor(factor));
        }
        let (mut original, kind) = self.open_original(name)?;

        let cached = self.derivative_path(name, kind, factor);
        match fs::read(&cached) {
            Ok(bytes) => {
                tracing::debug!(%name, factor, "derivative cache hit");
                return Ok((bytes, derivative_kind(kind)));
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::debug!(%name, factor, "derivative cache miss");
            }
            Err(e) => return Err(DerivativeError::ReadFailure(e)),
        }

        let mut source = Vec::new();
        original
            .read_to_end(&mut source)
            .map_err(DerivativeError::ReadFailure)?;
        let derivative = make_derivative(&source, kind, factor)?;

        if let Some(parent) = cached.parent() {
            fs::create_dir_all(parent).map_err(DerivativeError::WriteFailure)?;
        }
        write_atomic(&cached, &derivative.bytes, None).map_err(DerivativeError::WriteFailure)?;
        Ok((derivative.bytes, derivative.kind))
    }

    /// Generate (or find cached) derivatives for every indexed original,
    /// in parallel. One result per original, sorted by name.
    pub fn make_all_derivatives(
        &self,
        factor: u32,
    ) -> Result<Vec<(String, Result<ImageKind, DerivativeError>)>, IndexError> {
        self.index.wait_ready()?;
        Ok(self
            .index
            .records()
            .into_par_iter()
            .map(|record| {
                let result = self
                    .get_or_make_derivative(&record.name, factor)
                    .map(|(_, kind)| kind);
                (record.name, result)
            })
            .collect())
    }
}

/// Replace `path` with `bytes` so readers only ever see the old or the new
/// file. `permissions`, if given, are applied to the new file.
pub(crate) fn write_atomic(
    path: &Path,
    bytes: &[u8],
    permissions: Option<Permissions>,
) -> io::Result<()> {
    let dir = path.parent().unwrap_or(Path::new("."));
    let mut tmp = tempfile::Builder::new().prefix(".write-").tempfile_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    match permissions {
        Some(p) => tmp.as_file().set_permissions(p)?,
        None => make_world_readable(tmp.as_file())?,
    }
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Temp files are created owner-only; stored images are served to others.
#[cfg(unix)]
fn make_world_readable(file: &File) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    file.set_permissions(Permissions::from_mode(0o644))
}

#[cfg(not(unix))]
fn make_world_readable(_file: &File) -> io::Result<()> {
    Ok(())
}

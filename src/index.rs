//! The dedup index: fingerprint → stored file.
//!
//! The index is the authority for "have we already stored this content".
//! It has no persistence of its own; the storage directory is the source of
//! truth and the index is rebuilt from it on every start.
//!
//! # Warm-up
//!
//! The startup rebuild runs on a background thread while the caller carries
//! on. Until it finishes the index is [`IndexStatus::Warming`] and every
//! [`lookup`](DedupIndex::lookup) or [`insert`](DedupIndex::insert) blocks,
//! for at most the configured warm-up timeout, then fails with
//! [`IndexError::WarmingUp`]. Nothing is ever answered from a partial index,
//! so the one-copy-per-content guarantee holds during warm-up too. A failed
//! rebuild fails every waiting and later call with
//! [`IndexError::RebuildFailed`].
//!
//! Only a rebuild can end warm-up, and only once; later signals are logged
//! and ignored.
//!
//! # Inserts
//!
//! [`insert`](DedupIndex::insert) is get-or-insert under one write lock. If
//! two threads store the same new content concurrently the first insert
//! wins and the second gets [`Insertion::Existing`] back, so it can remove
//! its own copy and report the winner's name.

use crate::fingerprint::{Fingerprint, HashError, fingerprint_file};
use crate::naming;
use rayon::prelude::*;
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::ffi::OsStr;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex, PoisonError, RwLock};
use std::thread::JoinHandle;
use std::time::{Duration, Instant, SystemTime};
use thiserror::Error;
use walkdir::WalkDir;

#[derive(Error, Debug)]
pub enum IndexError {
    #[error("Index still warming up after {0:?}")]
    WarmingUp(Duration),
    #[error("Index rebuild failed: {0}")]
    RebuildFailed(String),
    #[error("Failed to walk {path}: {source}")]
    Walk {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },
    #[error("Failed to hash {path}: {source}")]
    Hash {
        path: PathBuf,
        #[source]
        source: HashError,
    },
}

/// One stored original.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredImage {
    pub fingerprint: Fingerprint,
    /// File name inside the storage directory, e.g. `AbCdEf.jpg`.
    pub name: String,
    /// Modification time for scanned files, ingest time for new ones.
    pub created: SystemTime,
}

/// Readiness of the index, usable as a liveness check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexStatus {
    Warming,
    Ready,
    Failed(String),
}

/// Result of [`DedupIndex::insert`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Insertion {
    Inserted,
    /// The fingerprint was already taken; this is the record that holds it.
    Existing(StoredImage),
}

pub struct DedupIndex {
    records: RwLock<HashMap<Fingerprint, StoredImage>>,
    status: Mutex<IndexStatus>,
    ready: Condvar,
    warmup_timeout: Duration,
}

impl DedupIndex {
    fn warming(warmup_timeout: Duration) -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            status: Mutex::new(IndexStatus::Warming),
            ready: Condvar::new(),
            warmup_timeout,
        }
    }

    /// Rebuild from `dir` on the calling thread and return a ready index.
    pub fn build(dir: &Path, warmup_timeout: Duration) -> Result<Self, IndexError> {
        let index = Self::warming(warmup_timeout);
        index.rebuild(dir)?;
        Ok(index)
    }

    /// Start the rebuild of `dir` on a background thread.
    ///
    /// The index is returned immediately in the warming state. The handle
    /// yields the number of records, or the error that failed the rebuild;
    /// a caller that treats rebuild failure as fatal joins it.
    pub fn spawn_rebuild(
        dir: &Path,
        warmup_timeout: Duration,
    ) -> (Arc<Self>, JoinHandle<Result<usize, IndexError>>) {
        let index = Arc::new(Self::warming(warmup_timeout));
        let worker = Arc::clone(&index);
        let dir = dir.to_path_buf();
        let handle = std::thread::spawn(move || worker.rebuild(&dir));
        (index, handle)
    }

    /// Scan `dir` and replace the index contents.
    ///
    /// Ends warm-up on first completion. Used again later, e.g. after a
    /// bulk strip rewrote stored files, it swaps in the new records while
    /// keeping any that were inserted during the scan.
    pub fn rescan(&self, dir: &Path) -> Result<usize, IndexError> {
        self.rebuild(dir)
    }

    fn rebuild(&self, dir: &Path) -> Result<usize, IndexError> {
        let started = Instant::now();
        let scan_started = SystemTime::now();
        tracing::info!(dir = %dir.display(), "rebuilding dedup index");
        match scan_directory(dir) {
            Ok(records) => {
                let count = self.replace_records(dir, records, scan_started);
                tracing::info!(
                    records = count,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "dedup index ready"
                );
                self.finish(IndexStatus::Ready);
                Ok(count)
            }
            Err(e) => {
                tracing::error!(error = %e, "dedup index rebuild failed");
                self.finish(IndexStatus::Failed(e.to_string()));
                Err(e)
            }
        }
    }

    /// Install a finished scan. Inserts that landed after the listing was
    /// taken are carried over as long as their file is still there.
    fn replace_records(
        &self,
        dir: &Path,
        mut scanned: HashMap<Fingerprint, StoredImage>,
        scan_started: SystemTime,
    ) -> usize {
        let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
        for (fingerprint, record) in records.drain() {
            if record.created >= scan_started && dir.join(&record.name).is_file() {
                scanned.entry(fingerprint).or_insert(record);
            }
        }
        *records = scanned;
        records.len()
    }

    /// Leave the warming state. Only the first call has any effect.
    fn finish(&self, outcome: IndexStatus) {
        let mut status = self.status.lock().unwrap_or_else(PoisonError::into_inner);
        if *status == IndexStatus::Warming {
            *status = outcome;
            self.ready.notify_all();
        } else if outcome != *status {
            tracing::warn!(
                current = ?*status,
                ignored = ?outcome,
                "index already left warm-up, ignoring readiness signal"
            );
        }
    }

    pub fn status(&self) -> IndexStatus {
        self.status
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Block until warm-up ends, for at most the configured timeout.
    pub fn wait_ready(&self) -> Result<(), IndexError> {
        let status = self.status.lock().unwrap_or_else(PoisonError::into_inner);
        let (status, _) = self
            .ready
            .wait_timeout_while(status, self.warmup_timeout, |s| *s == IndexStatus::Warming)
            .unwrap_or_else(PoisonError::into_inner);
        match &*status {
            IndexStatus::Ready => Ok(()),
            IndexStatus::Warming => Err(IndexError::WarmingUp(self.warmup_timeout)),
            IndexStatus::Failed(reason) => Err(IndexError::RebuildFailed(reason.clone())),
        }
    }

    pub fn lookup(&self, fingerprint: &Fingerprint) -> Result<Option<StoredImage>, IndexError> {
        self.wait_ready()?;
        let records = self.records.read().unwrap_or_else(PoisonError::into_inner);
        Ok(records.get(fingerprint).cloned())
    }

    /// Add a record unless its fingerprint is already present.
    pub fn insert(&self, record: StoredImage) -> Result<Insertion, IndexError> {
        self.wait_ready()?;
        let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
        match records.entry(record.fingerprint) {
            Entry::Occupied(existing) => Ok(Insertion::Existing(existing.get().clone())),
            Entry::Vacant(slot) => {
                slot.insert(record);
                Ok(Insertion::Inserted)
            }
        }
    }

    pub fn len(&self) -> usize {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All records, sorted by name.
    pub fn records(&self) -> Vec<StoredImage> {
        let mut all: Vec<StoredImage> = self
            .records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }
}

/// Hash every stored original directly inside `dir`.
///
/// Subdirectories (the derivative cache), hidden files (in-flight uploads),
/// `.bak` backups and anything without a servable image name are not
/// originals. When several files share a fingerprint the oldest one, then
/// the lexically first, is kept.
fn scan_directory(dir: &Path) -> Result<HashMap<Fingerprint, StoredImage>, IndexError> {
    let mut paths = Vec::new();
    for entry in WalkDir::new(dir).min_depth(1).max_depth(1) {
        let entry = entry.map_err(|source| IndexError::Walk {
            path: dir.to_path_buf(),
            source,
        })?;
        if entry.file_type().is_file() && is_original(entry.file_name()) {
            paths.push(entry.into_path());
        }
    }

    let scanned = paths
        .par_iter()
        .map(|path| scan_file(path))
        .collect::<Result<Vec<_>, _>>()?;

    let mut records: HashMap<Fingerprint, StoredImage> = HashMap::with_capacity(scanned.len());
    for record in scanned.into_iter().flatten() {
        match records.entry(record.fingerprint) {
            Entry::Vacant(slot) => {
                slot.insert(record);
            }
            Entry::Occupied(mut slot) => {
                let kept = slot.get();
                tracing::debug!(
                    fingerprint = %record.fingerprint,
                    a = %kept.name,
                    b = %record.name,
                    "duplicate content in storage"
                );
                if (record.created, &record.name) < (kept.created, &kept.name) {
                    slot.insert(record);
                }
            }
        }
    }
    Ok(records)
}

fn is_original(file_name: &OsStr) -> bool {
    if naming::is_hidden_or_backup(file_name) {
        return false;
    }
    match file_name.to_str() {
        Some(name) => naming::validate_image_name(name).is_ok(),
        None => {
            tracing::warn!(name = ?file_name, "skipping non-UTF-8 file name");
            false
        }
    }
}

/// Fingerprint one file. Files that vanish mid-scan are skipped.
fn scan_file(path: &Path) -> Result<Option<StoredImage>, IndexError> {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return Ok(None);
    };
    let hash_err = |source: HashError| IndexError::Hash {
        path: path.to_path_buf(),
        source,
    };

    let created = match std::fs::metadata(path).and_then(|m| m.modified()) {
        Ok(t) => t,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(hash_err(e.into())),
    };
    let fingerprint = match fingerprint_file(path) {
        Ok(fp) => fp,
        Err(HashError::ReadFailure(e)) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(hash_err(e)),
    };

    Ok(Some(StoredImage {
        fingerprint,
        name: name.to_string(),
        created,
    }))
}

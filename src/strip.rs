//! Bulk metadata stripping over a directory tree.
//!
//! Used to bring files stored before sanitizing existed (or stored by other
//! tools) to the same minimal form new uploads get. After a run the stored
//! bytes match what an ingest of a metadata-free copy would produce, so a
//! [`rescan`](crate::index::DedupIndex::rescan) makes such uploads dedup
//! against them.
//!
//! ## Per-file outcome
//!
//! | Case | Counted as |
//! |---|---|
//! | Metadata removed (or would be, in a dry run) | processed |
//! | GIF, or already minimal | skipped |
//! | Read, parse, backup or write failure | error |
//! | Not an image, hidden, or a `.bak` file | not counted |
//!
//! Files are picked by their content, not their extension. Per-file errors
//! are reported and counted; only a failure to walk the tree aborts.
//!
//! ## Parallel Processing
//!
//! Files are processed in parallel on the rayon pool. Progress is reported
//! as [`StripEvent`]s over an optional channel so the caller can print them
//! in order of completion.

use crate::imaging::sniff::{self, SNIFF_LEN};
use crate::imaging::{ParseFailure, SanitizeOutcome, sanitize};
use crate::naming;
use crate::store::write_atomic;
use rayon::prelude::*;
use serde::Serialize;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::mpsc::Sender;
use thiserror::Error;
use walkdir::WalkDir;

#[derive(Error, Debug)]
pub enum StripError {
    #[error("Error walking directory {path}: {source}")]
    Walk {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },
}

/// Why a single file could not be stripped.
#[derive(Error, Debug)]
pub enum FileError {
    #[error("Error reading: {0}")]
    Read(#[source] io::Error),
    #[error("Error processing: {0}")]
    Parse(#[from] ParseFailure),
    #[error("Error creating backup: {0}")]
    Backup(#[source] io::Error),
    #[error("Error writing: {0}")]
    Write(#[source] io::Error),
}

#[derive(Debug, Clone, Copy, Default)]
pub struct StripOptions {
    /// Report what would change without touching any file.
    pub dry_run: bool,
    /// Copy each file to `<file>.bak` before rewriting it.
    pub backup: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Gif,
    Unchanged,
}

/// Progress report for one file.
#[derive(Debug)]
pub enum StripEvent {
    Processed {
        path: PathBuf,
        before: usize,
        after: usize,
        dry_run: bool,
        backup: Option<PathBuf>,
    },
    Skipped {
        path: PathBuf,
        reason: SkipReason,
    },
    Failed {
        path: PathBuf,
        error: FileError,
    },
}

impl StripEvent {
    fn tally(&self) -> StripSummary {
        let mut summary = StripSummary::default();
        match self {
            StripEvent::Processed { .. } => summary.processed = 1,
            StripEvent::Skipped { .. } => summary.skipped = 1,
            StripEvent::Failed { .. } => summary.errors = 1,
        }
        summary
    }
}

/// Totals of a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StripSummary {
    pub processed: usize,
    pub skipped: usize,
    pub errors: usize,
}

impl StripSummary {
    fn merge(self, other: Self) -> Self {
        Self {
            processed: self.processed + other.processed,
            skipped: self.skipped + other.skipped,
            errors: self.errors + other.errors,
        }
    }
}

/// Strip metadata from every image under `dir`, in place.
pub fn sanitize_directory(
    dir: &Path,
    options: StripOptions,
    events: Option<Sender<StripEvent>>,
) -> Result<StripSummary, StripError> {
    sanitize_directory_excluding(dir, &[], options, events)
}

/// [`sanitize_directory`], leaving the trees under `excluded` alone.
///
/// The store's derivative cache lives inside the storage directory by
/// default; its files are not originals and are not counted.
pub fn sanitize_directory_excluding(
    dir: &Path,
    excluded: &[&Path],
    options: StripOptions,
    events: Option<Sender<StripEvent>>,
) -> Result<StripSummary, StripError> {
    let files = collect_files(dir, excluded)?;
    tracing::debug!(dir = %dir.display(), files = files.len(), "bulk strip starting");

    let summary = files
        .par_iter()
        .filter_map(|path| strip_file(path, options))
        .map(|event| {
            let tally = event.tally();
            if let Some(tx) = &events {
                tx.send(event).ok();
            }
            tally
        })
        .reduce(StripSummary::default, StripSummary::merge);

    tracing::info!(
        processed = summary.processed,
        skipped = summary.skipped,
        errors = summary.errors,
        dry_run = options.dry_run,
        "bulk strip finished"
    );
    Ok(summary)
}

/// Regular files below `dir`, skipping hidden entries, backups and the
/// `excluded` trees.
fn collect_files(dir: &Path, excluded: &[&Path]) -> Result<Vec<PathBuf>, StripError> {
    let mut files = Vec::new();
    let walker = WalkDir::new(dir)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| {
            e.depth() == 0
                || !(naming::is_hidden_or_backup(e.file_name())
                    || excluded.iter().any(|root| e.path() == *root))
        });
    for entry in walker {
        let entry = entry.map_err(|source| StripError::Walk {
            path: dir.to_path_buf(),
            source,
        })?;
        if entry.file_type().is_file() {
            files.push(entry.into_path());
        }
    }
    Ok(files)
}

/// Strip one file. `None` for files that are not images at all.
fn strip_file(path: &Path, options: StripOptions) -> Option<StripEvent> {
    let failed = |error: FileError| {
        Some(StripEvent::Failed {
            path: path.to_path_buf(),
            error,
        })
    };

    let data = match fs::read(path) {
        Ok(data) => data,
        Err(e) => return failed(FileError::Read(e)),
    };
    let kind = sniff::detect(&data[..data.len().min(SNIFF_LEN)]).ok()?;
    if !kind.carries_metadata() {
        return Some(StripEvent::Skipped {
            path: path.to_path_buf(),
            reason: SkipReason::Gif,
        });
    }

    let before = data.len();
    let sanitized = sanitize(data, kind);
    match sanitized.outcome {
        SanitizeOutcome::Stripped => {}
        SanitizeOutcome::Unchanged | SanitizeOutcome::Passthrough => {
            return Some(StripEvent::Skipped {
                path: path.to_path_buf(),
                reason: SkipReason::Unchanged,
            });
        }
        SanitizeOutcome::FailedOpen(failure) => return failed(failure.into()),
    }
    let after = sanitized.bytes.len();

    if options.dry_run {
        return Some(StripEvent::Processed {
            path: path.to_path_buf(),
            before,
            after,
            dry_run: true,
            backup: None,
        });
    }

    let permissions = match fs::metadata(path) {
        Ok(meta) => meta.permissions(),
        Err(e) => return failed(FileError::Read(e)),
    };

    let backup = if options.backup {
        let mut backup_path = path.as_os_str().to_owned();
        backup_path.push(".bak");
        let backup_path = PathBuf::from(backup_path);
        if let Err(e) = fs::copy(path, &backup_path) {
            return failed(FileError::Backup(e));
        }
        Some(backup_path)
    } else {
        None
    };

    if let Err(e) = write_atomic(path, &sanitized.bytes, Some(permissions)) {
        return failed(FileError::Write(e));
    }

    Some(StripEvent::Processed {
        path: path.to_path_buf(),
        before,
        after,
        dry_run: false,
        backup,
    })
}

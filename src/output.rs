//! CLI output formatting.
//!
//! Results go to stdout, log events go to stderr through `tracing`, so the
//! output of `ingest` can be piped straight into other tools.
//!
//! # Output Format
//!
//! ## Ingest
//!
//! ```text
//! /i/qXbRtm.jpg
//! /i/Lmnopq.png (already stored)
//! ```
//!
//! With `--json`, one object per line: `{"url":"/i/qXbRtm.jpg"}`.
//!
//! ## Strip
//!
//! ```text
//! Stripping EXIF from images in: /srv/uploads
//! DRY RUN MODE: No files will be modified
//!
//! Would process: /srv/uploads/AbCdEf.jpg (size: 48213 -> 45120 bytes)
//!
//! Summary:
//!   Would process: 1 files
//!   Skipped: 3 files
//! ```
//!
//! # Architecture
//!
//! Each output has a `format_*` function (returns `Vec<String>` or
//! `String`) for testability and a `print_*` wrapper that writes to stdout.
//! Format functions are pure: no I/O, no side effects.

use crate::imaging::ImageKind;
use crate::imaging::derivative::DerivativeError;
use crate::store::Ingested;
use crate::strip::{SkipReason, StripEvent, StripOptions, StripSummary};
use std::path::Path;

// ============================================================================
// Ingest
// ============================================================================

/// Public URL path of a stored name.
pub fn serve_url(serve_path: &str, identifier: &str) -> String {
    if serve_path.ends_with('/') {
        format!("{serve_path}{identifier}")
    } else {
        format!("{serve_path}/{identifier}")
    }
}

pub fn format_ingested(serve_path: &str, ingested: &Ingested, json: bool) -> String {
    let url = serve_url(serve_path, &ingested.identifier);
    if json {
        serde_json::json!({ "url": url }).to_string()
    } else if ingested.was_newly_stored {
        url
    } else {
        format!("{url} (already stored)")
    }
}

pub fn print_ingested(serve_path: &str, ingested: &Ingested, json: bool) {
    println!("{}", format_ingested(serve_path, ingested, json));
}

// ============================================================================
// Bulk strip
// ============================================================================

pub fn format_strip_header(dir: &Path, options: StripOptions) -> Vec<String> {
    let mut lines = vec![format!("Stripping EXIF from images in: {}", dir.display())];
    if options.dry_run {
        lines.push("DRY RUN MODE: No files will be modified".to_string());
    }
    if options.backup {
        lines.push("BACKUP MODE: Creating .bak files before modification".to_string());
    }
    lines.push(String::new());
    lines
}

/// Lines for one strip event. Skips and backups are only shown when
/// `verbose`.
pub fn format_strip_event(event: &StripEvent, verbose: bool) -> Vec<String> {
    match event {
        StripEvent::Processed {
            path,
            before,
            after,
            dry_run,
            backup,
        } => {
            let mut lines = Vec::new();
            if verbose && let Some(backup) = backup {
                lines.push(format!("Created backup: {}", backup.display()));
            }
            let verb = if *dry_run { "Would process" } else { "Processed" };
            lines.push(format!(
                "{verb}: {} (size: {before} -> {after} bytes)",
                path.display()
            ));
            lines
        }
        StripEvent::Skipped { path, reason } if verbose => {
            let label = match reason {
                SkipReason::Gif => "Skipping GIF",
                SkipReason::Unchanged => "No change",
            };
            vec![format!("{label}: {}", path.display())]
        }
        StripEvent::Skipped { .. } => Vec::new(),
        StripEvent::Failed { path, error } => {
            vec![format!("{} ({})", error, path.display())]
        }
    }
}

pub fn format_strip_summary(summary: &StripSummary, dry_run: bool) -> Vec<String> {
    let mut lines = vec![String::new(), "Summary:".to_string()];
    if dry_run {
        lines.push(format!("  Would process: {} files", summary.processed));
    } else {
        lines.push(format!("  Processed: {} files", summary.processed));
    }
    lines.push(format!("  Skipped: {} files", summary.skipped));
    if summary.errors > 0 {
        lines.push(format!("  Errors: {}", summary.errors));
    }
    lines
}

pub fn print_strip_summary(summary: &StripSummary, dry_run: bool) {
    for line in format_strip_summary(summary, dry_run) {
        println!("{}", line);
    }
}

// ============================================================================
// Index and thumbnails
// ============================================================================

pub fn format_index_report(dir: &Path, count: usize) -> String {
    format!("Indexed {} images in {}", count, dir.display())
}

/// One line per original, then a total.
pub fn format_thumbs_output(
    factor: u32,
    results: &[(String, Result<ImageKind, DerivativeError>)],
) -> Vec<String> {
    let mut lines = Vec::with_capacity(results.len() + 1);
    let mut failed = 0;
    for (name, result) in results {
        match result {
            Ok(kind) => lines.push(format!("{name} → 1/{factor} {kind}")),
            Err(e) => {
                failed += 1;
                lines.push(format!("{name}: {e}"));
            }
        }
    }
    lines.push(format!(
        "Thumbnails: {} ok, {} failed",
        results.len() - failed,
        failed
    ));
    lines
}

pub fn print_thumbs_output(factor: u32, results: &[(String, Result<ImageKind, DerivativeError>)]) {
    for line in format_thumbs_output(factor, results) {
        println!("{}", line);
    }
}

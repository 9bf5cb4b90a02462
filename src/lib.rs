//! # imgdrop
//!
//! Content-addressed storage for uploaded images. Identical content is
//! stored once, privacy-sensitive metadata is stripped before anything hits
//! the disk, and reduced copies keep the orientation of their original.
//!
//! # Pipeline
//!
//! ```text
//! upload ─▶ sniff ─▶ fingerprint ─▶ index ─┬─ known ─▶ existing name
//!                                          └─ new ───▶ sanitize ─▶ store ─▶ new name
//!
//! name ─▶ derivative cache ─┬─ hit ──▶ bytes
//!                           └─ miss ─▶ decode ─▶ shrink ─▶ encode + orientation ─▶ bytes
//! ```
//!
//! HTTP handlers, URL fetching and page rendering live outside this crate;
//! they hand [`store::ImageStore::ingest`] a reader and get a name back.
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`imaging`] | Container sniffing, orientation, metadata stripping, derivatives |
//! | [`fingerprint`] | SHA-256 content fingerprints and the fingerprint policy |
//! | [`index`] | Fingerprint → stored file map with its startup readiness gate |
//! | [`store`] | Ingest, original lookup and the derivative cache |
//! | [`strip`] | Bulk metadata stripping over an existing directory |
//! | [`naming`] | Generated names and name validation |
//! | [`config`] | `config.toml` loading, layering and validation |
//! | [`output`] | CLI output formatting |
//!
//! # Design Decisions
//!
//! ## Block Until Ready
//!
//! The index is rebuilt from the storage directory on every start, on a
//! background thread. Ingests wait for it (bounded by
//! `dedup.warmup_timeout_secs`) instead of running against a half-built
//! index, so content uploaded during warm-up is never stored twice.
//! [`index::DedupIndex::status`] reports warming/ready/failed for health checks.
//!
//! ## Fingerprint Policy
//!
//! Uploads are stored sanitized, and a rebuilt index fingerprints the stored
//! bytes. Whether an upload is fingerprinted before or after sanitizing is
//! a choice, see [`fingerprint::FingerprintPolicy`]:
//!
//! - `raw` (default): repeated uploads of the same file dedup within a run;
//!   after a restart only metadata-free uploads match stored files.
//! - `sanitized`: keys are stable across restarts, and uploads that differ
//!   only in stripped metadata dedup with each other.
//!
//! ## Fail Open
//!
//! A JPEG or PNG whose container cannot be parsed is stored exactly as
//! received. Availability wins over stripping, but every such case logs a
//! warning under the `imgdrop::sanitize` target so a parser regression
//! shows up in the logs.
//!
//! ## No Pixel Re-encoding of Originals
//!
//! Sanitizing works on JPEG segments and PNG chunks only. Pixel data is
//! copied byte for byte, so stripping is lossless and idempotent. Only
//! derivatives are decoded and re-encoded.

pub mod config;
pub mod fingerprint;
pub mod imaging;
pub mod index;
pub mod naming;
pub mod output;
pub mod store;
pub mod strip;

#[cfg(test)]
pub(crate) mod test_helpers;

//! Configuration loading.
//!
//! Settings come from three layers, later ones winning:
//!
//! ```text
//! stock defaults  →  config.toml  →  command-line flags
//! ```
//!
//! ## Config File Location
//!
//! `--config PATH` names the file explicitly; a missing explicit file is an
//! error. Without it `config.toml` in the working directory is used if
//! present, otherwise the stock defaults apply.
//!
//! ## Configuration Options
//!
//! ```toml
//! # All options are optional - defaults shown below
//!
//! upload_path = "./uploads/"   # Where originals are stored (~/ is expanded)
//! serve_path = "/i/"           # URL prefix printed in front of stored names
//! debug = false                # Debug logging
//!
//! [thumbnails]
//! shrink_factor = 4            # Derivatives are 1/N of the original per side
//! # path = "./uploads/thumbs"  # Derivative cache (default: <upload_path>/thumbs)
//!
//! [dedup]
//! fingerprint = "raw"          # "raw" or "sanitized"
//! warmup_timeout_secs = 30     # Max wait for the startup index rebuild
//!
//! [processing]
//! max_processes = 4            # Max parallel workers (omit for auto = CPU cores)
//! ```
//!
//! Unknown keys are rejected to catch typos early.

use crate::fingerprint::FingerprintPolicy;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// File looked up in the working directory when `--config` is not given.
pub const DEFAULT_CONFIG_FILE: &str = "config.toml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Config file {0} specified but not found")]
    NotFound(PathBuf),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Resolved configuration.
///
/// All fields have defaults; a config file needs only the values it
/// overrides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AppConfig {
    /// Storage directory for originals.
    pub upload_path: PathBuf,
    /// URL prefix stored names are reported under.
    pub serve_path: String,
    pub debug: bool,
    pub thumbnails: ThumbnailsConfig,
    pub dedup: DedupConfig,
    pub processing: ProcessingConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            upload_path: PathBuf::from("./uploads/"),
            serve_path: "/i/".to_string(),
            debug: false,
            thumbnails: ThumbnailsConfig::default(),
            dedup: DedupConfig::default(),
            processing: ProcessingConfig::default(),
        }
    }
}

impl AppConfig {
    /// Validate config values are within acceptable ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.thumbnails.shrink_factor == 0 {
            return Err(ConfigError::Validation(
                "thumbnails.shrink_factor must be at least 1".into(),
            ));
        }
        if self.dedup.warmup_timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "dedup.warmup_timeout_secs must be at least 1".into(),
            ));
        }
        if self.serve_path.is_empty() {
            return Err(ConfigError::Validation("serve_path must not be empty".into()));
        }
        if self.upload_path.as_os_str().is_empty() {
            return Err(ConfigError::Validation("upload_path must not be empty".into()));
        }
        Ok(())
    }

    /// Apply command-line flags on top of the file layer.
    pub fn apply_overrides(mut self, overrides: &Overrides) -> Self {
        if let Some(path) = &overrides.upload_path {
            self.upload_path = path.clone();
        }
        if let Some(serve) = &overrides.serve_path {
            self.serve_path = serve.clone();
        }
        if overrides.debug {
            self.debug = true;
        }
        self
    }

    /// Expand `~/` and make the storage paths absolute.
    pub fn resolve_paths(mut self) -> Result<Self, ConfigError> {
        let home = std::env::var_os("HOME").map(PathBuf::from);
        self.upload_path = absolute_path(&self.upload_path, home.as_deref())?;
        if let Some(thumbs) = &self.thumbnails.path {
            self.thumbnails.path = Some(absolute_path(thumbs, home.as_deref())?);
        }
        Ok(self)
    }

    /// Derivative cache directory.
    pub fn thumbnails_dir(&self) -> PathBuf {
        self.thumbnails
            .path
            .clone()
            .unwrap_or_else(|| self.upload_path.join("thumbs"))
    }

    pub fn warmup_timeout(&self) -> Duration {
        Duration::from_secs(self.dedup.warmup_timeout_secs)
    }
}

/// Values given on the command line. `None`/`false` leaves the file value.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub upload_path: Option<PathBuf>,
    pub serve_path: Option<String>,
    pub debug: bool,
}

/// Derivative settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ThumbnailsConfig {
    /// Derivatives are `floor(width / N) × floor(height / N)`.
    pub shrink_factor: u32,
    /// Cache directory; `<upload_path>/thumbs` when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

impl Default for ThumbnailsConfig {
    fn default() -> Self {
        Self {
            shrink_factor: 4,
            path: None,
        }
    }
}

/// Dedup index settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DedupConfig {
    pub fingerprint: FingerprintPolicy,
    /// How long a lookup waits for the startup rebuild.
    pub warmup_timeout_secs: u64,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            fingerprint: FingerprintPolicy::Raw,
            warmup_timeout_secs: 30,
        }
    }
}

/// Parallel processing settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProcessingConfig {
    /// Maximum number of parallel workers for index rebuilds, bulk strips
    /// and eager thumbnails. When absent, defaults to the number of CPU
    /// cores. Values larger than the core count are clamped down.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_processes: Option<usize>,
}

/// Resolve the effective thread count from config.
///
/// - `None` → use all available cores
/// - `Some(n)` → use `min(n, cores)` (user can constrain down, not up)
pub fn effective_threads(config: &ProcessingConfig) -> usize {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    config
        .max_processes
        .map(|n| n.clamp(1, cores))
        .unwrap_or(cores)
}

/// `~/x` → `$HOME/x`, then relative paths are anchored at the working directory.
pub fn absolute_path(path: &Path, home: Option<&Path>) -> Result<PathBuf, ConfigError> {
    let expanded = match (path.strip_prefix("~"), home) {
        (Ok(rest), Some(home)) => home.join(rest),
        (Ok(_), None) => {
            return Err(ConfigError::Validation(format!(
                "cannot expand {}: HOME is not set",
                path.display()
            )));
        }
        (Err(_), _) => path.to_path_buf(),
    };
    Ok(std::path::absolute(expanded)?)
}

/// Returns the stock default config as a `toml::Value::Table`.
pub fn stock_defaults_value() -> Result<toml::Value, ConfigError> {
    Ok(toml::Value::try_from(AppConfig::default())?)
}

/// Recursively merge `overlay` on top of `base`.
///
/// - Tables are merged key-by-key (overlay keys override base keys).
/// - Non-table values in overlay replace base values entirely.
/// - Keys in base that are not in overlay are preserved.
pub fn merge_toml(base: toml::Value, overlay: toml::Value) -> toml::Value {
    match (base, overlay) {
        (toml::Value::Table(mut base_table), toml::Value::Table(overlay_table)) => {
            for (key, overlay_val) in overlay_table {
                let merged = match base_table.remove(&key) {
                    Some(base_val) => merge_toml(base_val, overlay_val),
                    None => overlay_val,
                };
                base_table.insert(key, merged);
            }
            toml::Value::Table(base_table)
        }
        (_, overlay) => overlay,
    }
}

/// Read a config file as a raw TOML value.
///
/// A missing file is `Ok(None)` unless it was asked for explicitly.
pub fn load_raw_config(path: &Path, explicit: bool) -> Result<Option<toml::Value>, ConfigError> {
    if !path.exists() {
        if explicit {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }
        tracing::info!(path = %path.display(), "config file not found, using defaults");
        return Ok(None);
    }
    tracing::info!(path = %path.display(), "loading config");
    let content = fs::read_to_string(path)?;
    Ok(Some(toml::from_str(&content)?))
}

/// Merge an optional overlay onto the stock defaults and deserialize.
pub fn resolve_config(overlay: Option<toml::Value>) -> Result<AppConfig, ConfigError> {
    let base = stock_defaults_value()?;
    let merged = match overlay {
        Some(ov) => merge_toml(base, ov),
        None => base,
    };
    Ok(merged.try_into()?)
}

/// Full resolution: file layer, flag layer, path expansion, validation.
pub fn load_config(
    explicit_path: Option<&Path>,
    overrides: &Overrides,
) -> Result<AppConfig, ConfigError> {
    let raw = match explicit_path {
        Some(path) => load_raw_config(path, true)?,
        None => load_raw_config(Path::new(DEFAULT_CONFIG_FILE), false)?,
    };
    let config = resolve_config(raw)?
        .apply_overrides(overrides)
        .resolve_paths()?;
    config.validate()?;
    Ok(config)
}

/// A documented config file with every option at its default.
pub fn stock_config_toml() -> &'static str {
    r##"# imgdrop configuration
# =====================
# All settings are optional. Remove or comment out any you don't need.
# Values shown below are the defaults. Command-line flags override them.
# Unknown keys will cause an error.

# Directory that holds the stored originals. "~/" expands to $HOME.
upload_path = "./uploads/"

# URL prefix printed in front of stored names, e.g. /i/AbCdEf.jpg
serve_path = "/i/"

# Debug logging (same as --debug or RUST_LOG=imgdrop=debug).
debug = false

# ---------------------------------------------------------------------------
# Thumbnails
# ---------------------------------------------------------------------------
[thumbnails]
# Derivatives are 1/N of the original in each dimension (rounded down).
shrink_factor = 4

# Derivative cache directory. Defaults to <upload_path>/thumbs.
# path = "./uploads/thumbs"

# ---------------------------------------------------------------------------
# Deduplication
# ---------------------------------------------------------------------------
[dedup]
# Which bytes identify an upload:
#   "raw"       - the bytes as received
#   "sanitized" - the bytes after metadata stripping, as stored on disk
fingerprint = "raw"

# Seconds an ingest waits for the startup index rebuild before failing.
warmup_timeout_secs = 30

# ---------------------------------------------------------------------------
# Processing
# ---------------------------------------------------------------------------
[processing]
# Maximum parallel workers for index rebuilds, bulk strips and thumbnails.
# Omit or comment out to auto-detect (= number of CPU cores).
# max_processes = 4
"##
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_config(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("config.toml");
        fs::write(&path, body).unwrap();
        path
    }

    // =========================================================================
    // Defaults and parsing
    // =========================================================================

    #[test]
    fn defaults() {
        let c = AppConfig::default();
        assert_eq!(c.upload_path, PathBuf::from("./uploads/"));
        assert_eq!(c.serve_path, "/i/");
        assert!(!c.debug);
        assert_eq!(c.thumbnails.shrink_factor, 4);
        assert_eq!(c.dedup.fingerprint, FingerprintPolicy::Raw);
        assert_eq!(c.warmup_timeout(), Duration::from_secs(30));
        assert_eq!(c.thumbnails_dir(), PathBuf::from("./uploads/thumbs"));
    }

    #[test]
    fn parse_sparse_config() {
        let c = resolve_config(Some(
            toml::from_str(
                r#"
serve_path = "/img/"

[dedup]
fingerprint = "sanitized"
"#,
            )
            .unwrap(),
        ))
        .unwrap();
        assert_eq!(c.serve_path, "/img/");
        assert_eq!(c.dedup.fingerprint, FingerprintPolicy::Sanitized);
        // Unspecified defaults preserved
        assert_eq!(c.dedup.warmup_timeout_secs, 30);
        assert_eq!(c.thumbnails.shrink_factor, 4);
    }

    #[test]
    fn unknown_key_rejected() {
        let raw: toml::Value = toml::from_str("bind = \"0.0.0.0:3000\"").unwrap();
        assert!(matches!(resolve_config(Some(raw)), Err(ConfigError::Toml(_))));
    }

    #[test]
    fn unknown_fingerprint_policy_rejected() {
        let raw: toml::Value = toml::from_str("[dedup]\nfingerprint = \"md5\"").unwrap();
        assert!(resolve_config(Some(raw)).is_err());
    }

    // =========================================================================
    // File layer
    // =========================================================================

    #[test]
    fn explicit_missing_file_is_error() {
        let tmp = TempDir::new().unwrap();
        let result = load_config(
            Some(tmp.path().join("nope.toml").as_path()),
            &Overrides::default(),
        );
        assert!(matches!(result, Err(ConfigError::NotFound(_))));
    }

    #[test]
    fn implicit_missing_file_is_none() {
        let tmp = TempDir::new().unwrap();
        assert!(load_raw_config(&tmp.path().join("config.toml"), false)
            .unwrap()
            .is_none());
    }

    #[test]
    fn load_reads_file_and_resolves_paths() {
        let tmp = TempDir::new().unwrap();
        let store = tmp.path().join("store");
        let path = write_config(
            tmp.path(),
            &format!(
                "upload_path = {:?}\n[thumbnails]\nshrink_factor = 2\n",
                store.display().to_string()
            ),
        );
        let c = load_config(Some(path.as_path()), &Overrides::default()).unwrap();
        assert_eq!(c.upload_path, store);
        assert_eq!(c.thumbnails.shrink_factor, 2);
        assert_eq!(c.thumbnails_dir(), store.join("thumbs"));
    }

    #[test]
    fn invalid_toml_is_error() {
        let tmp = TempDir::new().unwrap();
        let path = write_config(tmp.path(), "this is not valid toml [[[");
        assert!(matches!(
            load_config(Some(path.as_path()), &Overrides::default()),
            Err(ConfigError::Toml(_))
        ));
    }

    #[test]
    fn load_validates_values() {
        let tmp = TempDir::new().unwrap();
        let path = write_config(tmp.path(), "[thumbnails]\nshrink_factor = 0\n");
        assert!(matches!(
            load_config(Some(path.as_path()), &Overrides::default()),
            Err(ConfigError::Validation(_))
        ));
    }

    // =========================================================================
    // Flag layer and paths
    // =========================================================================

    #[test]
    fn overrides_win_over_file() {
        let tmp = TempDir::new().unwrap();
        let path = write_config(tmp.path(), "serve_path = \"/file/\"\ndebug = false\n");
        let overrides = Overrides {
            upload_path: Some(tmp.path().join("flag")),
            serve_path: Some("/flag/".into()),
            debug: true,
        };
        let c = load_config(Some(path.as_path()), &overrides).unwrap();
        assert_eq!(c.serve_path, "/flag/");
        assert_eq!(c.upload_path, tmp.path().join("flag"));
        assert!(c.debug);
    }

    #[test]
    fn debug_flag_cannot_turn_debug_off() {
        let mut c = AppConfig::default();
        c.debug = true;
        assert!(c.apply_overrides(&Overrides::default()).debug);
    }

    #[test]
    fn tilde_expands_against_home() {
        let p = absolute_path(Path::new("~/pics"), Some(Path::new("/home/ann"))).unwrap();
        assert_eq!(p, PathBuf::from("/home/ann/pics"));
    }

    #[test]
    fn tilde_without_home_is_error() {
        assert!(absolute_path(Path::new("~/pics"), None).is_err());
    }

    #[test]
    fn relative_path_becomes_absolute() {
        let p = absolute_path(Path::new("uploads"), None).unwrap();
        assert!(p.is_absolute());
        assert!(p.ends_with("uploads"));
    }

    #[test]
    fn effective_threads_user_constrains_down() {
        let config = ProcessingConfig {
            max_processes: Some(1),
        };
        assert_eq!(effective_threads(&config), 1);
    }

    #[test]
    fn effective_threads_auto() {
        let cores = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        assert_eq!(effective_threads(&ProcessingConfig::default()), cores);
        let huge = ProcessingConfig {
            max_processes: Some(99999),
        };
        assert_eq!(effective_threads(&huge), cores);
    }

    // =========================================================================
    // merge_toml and stock config
    // =========================================================================

    #[test]
    fn merge_toml_preserves_base_keys() {
        let base: toml::Value = toml::from_str("a = 1\n[t]\nx = 1\ny = 2").unwrap();
        let overlay: toml::Value = toml::from_str("[t]\ny = 3").unwrap();
        let merged = merge_toml(base, overlay);
        assert_eq!(merged["a"].as_integer(), Some(1));
        assert_eq!(merged["t"]["x"].as_integer(), Some(1));
        assert_eq!(merged["t"]["y"].as_integer(), Some(3));
    }

    #[test]
    fn stock_config_toml_roundtrips_to_defaults() {
        let raw: toml::Value = toml::from_str(stock_config_toml()).unwrap();
        assert_eq!(resolve_config(Some(raw)).unwrap(), AppConfig::default());
    }
}

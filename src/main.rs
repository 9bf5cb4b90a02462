use clap::{Parser, Subcommand};
use imgdrop::config::{self, AppConfig, Overrides};
use imgdrop::index::DedupIndex;
use imgdrop::store::ImageStore;
use imgdrop::strip::{self, StripOptions};
use imgdrop::output;
use std::path::PathBuf;
use std::time::Instant;
use tracing_subscriber::EnvFilter;

fn version_string() -> &'static str {
    let on_tag = env!("ON_RELEASE_TAG");
    if on_tag == "true" {
        env!("CARGO_PKG_VERSION")
    } else {
        let hash = env!("GIT_HASH");
        if hash.is_empty() {
            "dev@unknown"
        } else {
            // Leaked once at startup
            Box::leak(format!("dev@{hash}").into_boxed_str())
        }
    }
}

#[derive(Parser)]
#[command(name = "imgdrop")]
#[command(about = "Content-addressed image storage with metadata stripping")]
#[command(long_about = "\
Content-addressed image storage with metadata stripping

Uploaded images are identified by content: the same bytes are stored once
and always get the same name back. JPEG and PNG files lose every piece of
embedded metadata except their orientation before they are written.

Storage layout:

  uploads/
  ├── qXbRtm.jpg          # Originals: 6 random letters + sniffed extension
  ├── Lmnopq.png
  └── thumbs/
      └── 4/              # Derivatives by shrink factor
          ├── qXbRtm.jpg
          └── Lmnopq.png

Run 'imgdrop gen-config' to generate a documented config.toml.")]
#[command(version = version_string())]
struct Cli {
    /// Path to a configuration file (default: config.toml if present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Directory that stores the originals
    #[arg(short, long, global = true)]
    upload_path: Option<PathBuf>,

    /// URL prefix stored names are reported under
    #[arg(short, long, global = true)]
    serve_path: Option<String>,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Store image files, printing the URL of each
    Ingest {
        /// Files to store
        #[arg(required = true)]
        files: Vec<PathBuf>,
        /// Print one JSON object per file instead of plain URLs
        #[arg(long)]
        json: bool,
    },
    /// Strip metadata from every stored image in place
    StripExif {
        /// Only report what would change
        #[arg(long)]
        dry_run: bool,
        /// Keep a .bak copy of each modified file
        #[arg(long)]
        backup: bool,
    },
    /// Generate derivatives for every stored image
    Thumbs {
        /// Shrink factor (default: thumbnails.shrink_factor)
        #[arg(long)]
        factor: Option<u32>,
    },
    /// Get the derivative of one stored image
    Thumb {
        /// Stored name, e.g. qXbRtm.jpg
        name: String,
        /// Shrink factor (default: thumbnails.shrink_factor)
        #[arg(long)]
        factor: Option<u32>,
        /// Copy the derivative here instead of printing its cache path
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Rebuild the dedup index and report its size
    Index,
    /// Print a stock config.toml with all options documented
    GenConfig,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_tracing(cli.debug);

    let overrides = Overrides {
        upload_path: cli.upload_path.clone(),
        serve_path: cli.serve_path.clone(),
        debug: cli.debug,
    };
    let load = || -> Result<AppConfig, config::ConfigError> {
        let config = config::load_config(cli.config.as_deref(), &overrides)?;
        if config.debug && !cli.debug {
            tracing::debug!("debug enabled by config file");
        }
        init_thread_pool(&config.processing);
        Ok(config)
    };

    match cli.command {
        Command::Ingest { files, json } => {
            let config = load()?;
            let store = open_store(&config)?;
            for file in &files {
                let ingested = store.ingest_file(file)?;
                output::print_ingested(&config.serve_path, &ingested, json);
            }
        }
        Command::StripExif { dry_run, backup } => {
            let config = load()?;
            let options = StripOptions { dry_run, backup };
            for line in output::format_strip_header(&config.upload_path, options) {
                println!("{}", line);
            }
            let verbose = config.debug;
            let (tx, rx) = std::sync::mpsc::channel();
            let printer = std::thread::spawn(move || {
                for event in rx {
                    for line in output::format_strip_event(&event, verbose) {
                        println!("{}", line);
                    }
                }
            });
            let thumbs_dir = config.thumbnails_dir();
            let result = strip::sanitize_directory_excluding(
                &config.upload_path,
                &[thumbs_dir.as_path()],
                options,
                Some(tx),
            );
            printer.join().ok();
            let summary = result?;
            output::print_strip_summary(&summary, dry_run);
        }
        Command::Thumbs { factor } => {
            let config = load()?;
            let factor = factor.unwrap_or(config.thumbnails.shrink_factor);
            let store = open_store(&config)?;
            let results = store.make_all_derivatives(factor)?;
            output::print_thumbs_output(factor, &results);
        }
        Command::Thumb {
            name,
            factor,
            output: target,
        } => {
            let config = load()?;
            let factor = factor.unwrap_or(config.thumbnails.shrink_factor);
            let store = open_store(&config)?;
            let (bytes, kind) = store.get_or_make_derivative(&name, factor)?;
            match target {
                Some(path) => {
                    std::fs::write(&path, &bytes)?;
                    println!("{} ({}, {} bytes)", path.display(), kind.mime_type(), bytes.len());
                }
                None => {
                    let (_, source_kind) = store.open_original(&name)?;
                    println!("{}", store.derivative_path(&name, source_kind, factor).display());
                }
            }
        }
        Command::Index => {
            let config = load()?;
            std::fs::create_dir_all(&config.upload_path)?;
            let started = Instant::now();
            let index = DedupIndex::build(&config.upload_path, config.warmup_timeout())?;
            println!("{}", output::format_index_report(&config.upload_path, index.len()));
            tracing::debug!(elapsed_ms = started.elapsed().as_millis() as u64, "index built");
        }
        Command::GenConfig => {
            print!("{}", config::stock_config_toml());
        }
    }

    Ok(())
}

/// Open the store and wait for its index; a failed rebuild is fatal.
fn open_store(config: &AppConfig) -> Result<ImageStore, Box<dyn std::error::Error>> {
    let (store, rebuild) = ImageStore::open(config)?;
    match rebuild.join() {
        Ok(result) => {
            result?;
        }
        Err(_) => return Err("index rebuild thread panicked".into()),
    }
    Ok(store)
}

/// Logs go to stderr; `RUST_LOG` wins over `--debug`.
fn init_tracing(debug: bool) {
    let default = if debug { "imgdrop=debug" } else { "imgdrop=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Initialize the rayon thread pool based on processing config.
///
/// Capped at the number of available cores.
fn init_thread_pool(processing: &config::ProcessingConfig) {
    let threads = config::effective_threads(processing);
    rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build_global()
        .ok();
}

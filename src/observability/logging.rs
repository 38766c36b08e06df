//! Structured logging.
//!
//! # Responsibilities
//! - Initialize the tracing subscriber once per process
//! - Route all output to stderr (stdout carries the protocol)
//! - Optionally mirror logs to an append-mode file with startup rotation
//!
//! # Design Decisions
//! - `RUST_LOG` takes precedence over the configured level
//! - JSON format for machine parsing, compact text otherwise
//!
//! # Limitations
//! - The log file is rotated only when logging starts. During a run it grows
//!   without bound; there is no size-based rotation, so a `maxSize` key in the
//!   config is ignored. `max_files` caps how many rotated copies are kept.

use std::fs::{self, OpenOptions};
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use thiserror::Error;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer, Registry};

use crate::config::{LogFormat, LoggingConfig};

static LOGGING_INIT: OnceLock<()> = OnceLock::new();

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("invalid log level '{level}': {source}")]
    Filter {
        level: String,
        #[source]
        source: tracing_subscriber::filter::ParseError,
    },

    #[error("cannot open log file {path}: {source}")]
    File {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("tracing subscriber already set: {0}")]
    Init(#[from] tracing_subscriber::util::TryInitError),
}

/// Install the global subscriber. Later calls are no-ops.
pub fn init_logging(config: &LoggingConfig) -> Result<(), LoggingError> {
    if LOGGING_INIT.get().is_some() {
        return Ok(());
    }

    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(filter_directive(&config.level)).map_err(|source| LoggingError::Filter {
            level: config.level.clone(),
            source,
        })?,
    };

    let mut layers: Vec<BoxedLayer> = vec![format_layer(
        config.format,
        std::io::stderr,
        std::io::stderr().is_terminal(),
    )];

    if let Some(path) = &config.file {
        rotate_log_files(path, config.max_files);
        let file = open_log_file(path)?;
        layers.push(format_layer(config.format, Arc::new(file), false));
    }

    tracing_subscriber::registry()
        .with(layers)
        .with(filter)
        .try_init()?;

    let _ = LOGGING_INIT.set(());
    Ok(())
}

/// Bare level names are matched case-insensitively (`INFO`, `Warn`).
/// Anything else is passed through as an `EnvFilter` directive.
fn filter_directive(level: &str) -> String {
    let trimmed = level.trim();
    match trimmed.to_ascii_lowercase().as_str() {
        lower @ ("trace" | "debug" | "info" | "warn" | "error" | "off") => lower.to_string(),
        _ => trimmed.to_string(),
    }
}

fn format_layer<W>(format: LogFormat, writer: W, ansi: bool) -> BoxedLayer
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    match format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_writer(writer)
            .with_ansi(ansi)
            .boxed(),
        LogFormat::Text => fmt::layer()
            .compact()
            .with_writer(writer)
            .with_ansi(ansi)
            .boxed(),
    }
}

fn open_log_file(path: &Path) -> Result<fs::File, LoggingError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|source| LoggingError::File {
            path: path.to_path_buf(),
            source,
        })?;
    }

    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|source| LoggingError::File {
            path: path.to_path_buf(),
            source,
        })
}

/// Shift `log`, `log.1`, ... up by one, keeping at most `max_files` old copies.
///
/// Failures are reported on stderr only; a missing rotation never blocks startup.
pub fn rotate_log_files(path: &Path, max_files: u32) {
    if max_files == 0 || !path.exists() {
        return;
    }

    let rotated = |n: u32| -> PathBuf {
        let mut name = path.as_os_str().to_owned();
        name.push(format!(".{n}"));
        PathBuf::from(name)
    };

    let oldest = rotated(max_files);
    if oldest.exists() {
        if let Err(e) = fs::remove_file(&oldest) {
            eprintln!("log rotation: cannot remove {}: {e}", oldest.display());
        }
    }

    for n in (1..max_files).rev() {
        let from = rotated(n);
        if from.exists() {
            if let Err(e) = fs::rename(&from, rotated(n + 1)) {
                eprintln!("log rotation: cannot rename {}: {e}", from.display());
            }
        }
    }

    if let Err(e) = fs::rename(path, rotated(1)) {
        eprintln!("log rotation: cannot rename {}: {e}", path.display());
    }
}

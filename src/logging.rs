use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result, anyhow};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::writer::BoxMakeWriter;

use crate::config::{LogFormat, LoggingConfig};

/// Log file used while the dashboard owns the terminal and no file is configured.
pub const DASHBOARD_LOG_FILE: &str = "catalog-crawler.log";

/// Where log output goes: the configured file, the dashboard fallback file,
/// or stderr.
pub fn log_destination(config: &LoggingConfig, dashboard: bool) -> Option<PathBuf> {
    match (&config.file, dashboard) {
        (Some(path), _) => Some(path.clone()),
        (None, true) => Some(PathBuf::from(DASHBOARD_LOG_FILE)),
        (None, false) => None,
    }
}

/// Installs the global subscriber. `RUST_LOG` takes precedence over the
/// configured level.
pub fn init(config: &LoggingConfig, dashboard: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.as_str()));

    let destination = log_destination(config, dashboard);
    let ansi = destination.is_none();
    let writer = match destination {
        Some(path) => BoxMakeWriter::new(Mutex::new(open_log_file(&path)?)),
        None => BoxMakeWriter::new(std::io::stderr),
    };

    let installed = match config.format {
        LogFormat::Text => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(writer)
            .with_ansi(ansi)
            .with_target(false)
            .try_init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(writer)
            .try_init(),
    };
    installed.map_err(|e| anyhow!("failed to install log subscriber: {e}"))
}

fn open_log_file(path: &Path) -> Result<std::fs::File> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("failed to open log file {}", path.display()))
}

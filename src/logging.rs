//! Subscriber setup for hosts of the library. The library itself only emits
//! `tracing` events and spans.

use std::path::{Path, PathBuf};

use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const LOG_FILE_PREFIX: &str = "fall-sentinel.log";
const DEFAULT_LOG_DIR: &str = "./logs";

/// Keeps the background file writer alive; drop it last.
pub struct FileLogGuard {
    _guard: WorkerGuard,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSettings {
    /// `EnvFilter` directive, e.g. `info` or `fall_sentinel=debug`.
    pub level: String,
    /// Daily-rotated log files go here when set.
    pub file_dir: Option<PathBuf>,
}

impl LogSettings {
    /// Reads `ENABLE_FILE_LOGS` and `LOG_DIR`.
    pub fn from_env(level: &str) -> Self {
        Self::resolve(
            level,
            std::env::var("ENABLE_FILE_LOGS").ok().as_deref(),
            std::env::var("LOG_DIR").ok().as_deref(),
        )
    }

    fn resolve(level: &str, enable_files: Option<&str>, log_dir: Option<&str>) -> Self {
        let file_dir = enable_files
            .is_some_and(is_truthy)
            .then(|| PathBuf::from(log_dir.unwrap_or(DEFAULT_LOG_DIR)));
        Self {
            level: level.to_string(),
            file_dir,
        }
    }

    fn filter(&self) -> EnvFilter {
        EnvFilter::try_new(&self.level).unwrap_or_else(|_| EnvFilter::new("info"))
    }
}

fn is_truthy(value: &str) -> bool {
    matches!(value.trim().to_ascii_lowercase().as_str(), "true" | "1" | "yes")
}

pub fn file_logging_enabled() -> bool {
    LogSettings::from_env("info").file_dir.is_some()
}

/// Installs the global subscriber from the environment. Fails quietly if one
/// is already set.
pub fn init_tracing(log_level: &str) -> Option<FileLogGuard> {
    init_with(&LogSettings::from_env(log_level))
}

pub fn init_with(settings: &LogSettings) -> Option<FileLogGuard> {
    let (file_layer, guard) = match settings.file_dir.as_deref().and_then(file_writer) {
        Some((writer, guard)) => {
            let layer = fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(true);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let installed = tracing_subscriber::registry()
        .with(settings.filter())
        .with(fmt::layer().with_target(true))
        .with(file_layer)
        .try_init()
        .is_ok();

    guard
        .filter(|_| installed)
        .map(|guard| FileLogGuard { _guard: guard })
}

fn file_writer(dir: &Path) -> Option<(NonBlocking, WorkerGuard)> {
    if let Err(err) = std::fs::create_dir_all(dir) {
        // no subscriber exists yet to report this through
        eprintln!("failed to create log directory {}: {err}", dir.display());
        return None;
    }
    let appender = RollingFileAppender::new(Rotation::DAILY, dir, LOG_FILE_PREFIX);
    Some(tracing_appender::non_blocking(appender))
}

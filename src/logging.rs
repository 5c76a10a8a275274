//! `tracing` subscriber setup for the binary.
//!
//! Filter comes from `DESKCHAT_LOG` (default `warn`). Output goes to stderr,
//! or is appended to `DESKCHAT_LOG_FILE` when set so it does not interleave
//! with the transcript.

use std::env;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use thiserror::Error;
use tracing_subscriber::EnvFilter;

pub const LOG_FILTER_ENV_VAR: &str = "DESKCHAT_LOG";
pub const LOG_FILE_ENV_VAR: &str = "DESKCHAT_LOG_FILE";
pub const DEFAULT_LOG_FILTER: &str = "warn";

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("invalid log filter '{filter}': {message}")]
    Filter { filter: String, message: String },

    #[error("failed to open log file {path}: {source}")]
    OpenFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("a global tracing subscriber is already installed")]
    AlreadyInstalled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSettings {
    pub filter: String,
    pub file: Option<PathBuf>,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            filter: DEFAULT_LOG_FILTER.to_string(),
            file: None,
        }
    }
}

impl LogSettings {
    pub fn from_env() -> Self {
        let filter = env::var(LOG_FILTER_ENV_VAR)
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string());
        let file = env::var_os(LOG_FILE_ENV_VAR)
            .filter(|value| !value.is_empty())
            .map(PathBuf::from);
        Self { filter, file }
    }

    fn env_filter(&self) -> Result<EnvFilter, LoggingError> {
        EnvFilter::try_new(&self.filter).map_err(|error| LoggingError::Filter {
            filter: self.filter.clone(),
            message: error.to_string(),
        })
    }
}

/// Installs the global subscriber described by `settings`.
pub fn init(settings: &LogSettings) -> Result<(), LoggingError> {
    let filter = settings.env_filter()?;

    let installed = match &settings.file {
        Some(path) => {
            let file = open_log_file(path)?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .try_init()
        }
        None => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .try_init(),
    };

    installed.map_err(|_| LoggingError::AlreadyInstalled)
}

fn open_log_file(path: &Path) -> Result<File, LoggingError> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|source| LoggingError::OpenFile {
            path: path.to_path_buf(),
            source,
        })
}

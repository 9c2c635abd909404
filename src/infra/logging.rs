use std::fs::{self, OpenOptions};
use std::io;
use std::path::PathBuf;
use std::sync::Mutex;
use thiserror::Error;
use tracing_subscriber::EnvFilter;

const LOG_PATH_ENV: &str = "HPROF_VIEW_LOG";
const FILE_DEFAULT_FILTER: &str = "info";
const STDERR_DEFAULT_FILTER: &str = "warn";

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum LogTarget {
    File(PathBuf),
    Stderr,
}

#[derive(Debug, Error)]
pub enum ResolveLogPathError {
    #[error("home directory not found")]
    HomeDirNotFound,
}

#[derive(Debug, Error)]
pub enum InitLoggingError {
    #[error("failed to create log directory: {0}")]
    CreateDir(io::Error),

    #[error("failed to open log file: {0}")]
    OpenFile(io::Error),

    #[error("failed to install log subscriber: {0}")]
    Install(String),
}

pub fn resolve_log_path() -> Result<PathBuf, ResolveLogPathError> {
    if let Some(override_path) = std::env::var_os(LOG_PATH_ENV) {
        return Ok(PathBuf::from(override_path));
    }

    let Some(home) = dirs::home_dir() else {
        return Err(ResolveLogPathError::HomeDirNotFound);
    };
    Ok(home
        .join(format!(".{}", env!("CARGO_PKG_NAME")))
        .join(format!("{}.log", env!("CARGO_PKG_NAME"))))
}

/// Installs the global subscriber. `RUST_LOG` overrides the per-target default level.
pub fn init_logging(target: LogTarget) -> Result<(), InitLoggingError> {
    let default_filter = match target {
        LogTarget::File(_) => FILE_DEFAULT_FILTER,
        LogTarget::Stderr => STDERR_DEFAULT_FILTER,
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    match target {
        LogTarget::Stderr => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_writer(io::stderr)
            .try_init()
            .map_err(|error| InitLoggingError::Install(error.to_string())),
        LogTarget::File(path) => {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).map_err(InitLoggingError::CreateDir)?;
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .map_err(InitLoggingError::OpenFile)?;

            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_target(false)
                .with_ansi(false)
                .with_thread_names(true)
                .with_writer(Mutex::new(file))
                .try_init()
                .map_err(|error| InitLoggingError::Install(error.to_string()))
        }
    }
}

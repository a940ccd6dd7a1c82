//! Structured logging setup.
//!
//! The library only emits `tracing` events; installing a subscriber is left
//! to binaries, tests and benches through [`init`].
//!
//! ## Levels
//! * `info` - device selection and release
//! * `debug` - program load, stage configuration, buffer replacement
//! * `trace` - every enqueue and readback
//! * `error` - kernel build logs
//!
//! Directives come from the configuration when given, otherwise from
//! `RUST_LOG`, otherwise `info`.

use std::error::Error;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;


const DEFAULT_DIRECTIVE: &str = "info";

/// Subscriber options.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directives overriding `RUST_LOG`.
    pub directives: Option<String>,
    /// Colourised output.
    pub ansi: bool,
    /// Print event targets.
    pub targets: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { directives: None, ansi: true, targets: false }
    }
}

impl LoggingConfig {
    fn resolve_filter(&self) -> Result<EnvFilter, LoggingError> {
        match &self.directives {
            Some(directives) => {
                EnvFilter::try_new(directives).map_err(|e| LoggingError::InvalidFilter(e.to_string()))
            }
            None => Ok(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVE))),
        }
    }
}

/// Failure to install the subscriber.
#[derive(Debug)]
pub enum LoggingError {
    /// Directive string could not be parsed.
    InvalidFilter(String),
    /// A global subscriber is already installed.
    AlreadyInstalled(tracing_subscriber::util::TryInitError),
}

impl fmt::Display for LoggingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoggingError::InvalidFilter(msg) => write!(f, "invalid log directive: {msg}"),
            LoggingError::AlreadyInstalled(e) => write!(f, "couldn't install log subscriber: {e}"),
        }
    }
}

impl Error for LoggingError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            LoggingError::AlreadyInstalled(e) => Some(e),
            LoggingError::InvalidFilter(_) => None,
        }
    }
}

/// Installs a `fmt` subscriber as the process-wide default.
pub fn init(config: &LoggingConfig) -> Result<(), LoggingError> {
    tracing_subscriber::fmt()
        .with_env_filter(config.resolve_filter()?)
        .with_ansi(config.ansi)
        .with_target(config.targets)
        .finish()
        .try_init()
        .map_err(LoggingError::AlreadyInstalled)
}

/// Installs the default subscriber unless one is already present.
///
/// Used by tests and benches, where several entry points race to install.
pub fn init_for_tests() {
    let config = LoggingConfig { ansi: false, ..LoggingConfig::default() };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(config.resolve_filter().unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVE)))
        .with_ansi(false)
        .with_test_writer()
        .finish()
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bad_directives_are_reported() {
        let config = LoggingConfig { directives: Some("stagesim=[".to_string()), ..LoggingConfig::default() };
        assert!(matches!(init(&config), Err(LoggingError::InvalidFilter(_))));
    }
}

//! Configuration errors

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Configuration loading and validation failures.
///
/// All configuration errors are fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

impl ConfigError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::Invalid(msg.into())
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::Io { .. } => "WSREP_CONFIG_IO",
            Self::Parse(_) => "WSREP_CONFIG_PARSE",
            Self::Invalid(_) => "WSREP_CONFIG_INVALID",
        }
    }
}

/// Result type for configuration operations
pub type ConfigResult<T> = Result<T, ConfigError>;

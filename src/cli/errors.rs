//! CLI-specific error types
//!
//! Every CLI error ends the command with a non-zero exit.

use std::io;

use thiserror::Error;

use crate::commit::WsrepError;
use crate::config::ConfigError;
use crate::fragment::FragmentStoreError;
use crate::recovery::RecoveryError;

/// CLI error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CliErrorCode {
    /// Configuration file error
    ConfigError,
    /// I/O error (stdout)
    IoError,
    /// Fragment store could not be opened or read
    StoreError,
    /// Replication layer could not be set up
    BootFailed,
}

impl CliErrorCode {
    pub fn code(&self) -> &'static str {
        match self {
            Self::ConfigError => "WSREP_CLI_CONFIG_ERROR",
            Self::IoError => "WSREP_CLI_IO_ERROR",
            Self::StoreError => "WSREP_CLI_STORE_ERROR",
            Self::BootFailed => "WSREP_CLI_BOOT_FAILED",
        }
    }
}

#[derive(Debug, Error)]
#[error("{}: {message}", .code.code())]
pub struct CliError {
    code: CliErrorCode,
    message: String,
}

impl CliError {
    pub fn new(code: CliErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::new(CliErrorCode::ConfigError, msg)
    }

    pub fn io_error(msg: impl Into<String>) -> Self {
        Self::new(CliErrorCode::IoError, msg)
    }

    pub fn store_error(msg: impl Into<String>) -> Self {
        Self::new(CliErrorCode::StoreError, msg)
    }

    pub fn boot_failed(msg: impl Into<String>) -> Self {
        Self::new(CliErrorCode::BootFailed, msg)
    }

    pub fn code(&self) -> CliErrorCode {
        self.code
    }

    pub fn code_str(&self) -> &'static str {
        self.code.code()
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<io::Error> for CliError {
    fn from(e: io::Error) -> Self {
        Self::io_error(e.to_string())
    }
}

impl From<serde_json::Error> for CliError {
    fn from(e: serde_json::Error) -> Self {
        Self::io_error(format!("JSON error: {}", e))
    }
}

impl From<ConfigError> for CliError {
    fn from(e: ConfigError) -> Self {
        Self::config_error(format!("{} ({})", e, e.code()))
    }
}

impl From<FragmentStoreError> for CliError {
    fn from(e: FragmentStoreError) -> Self {
        Self::store_error(e.to_string())
    }
}

impl From<RecoveryError> for CliError {
    fn from(e: RecoveryError) -> Self {
        Self::store_error(e.to_string())
    }
}

impl From<WsrepError> for CliError {
    fn from(e: WsrepError) -> Self {
        Self::boot_failed(e.to_string())
    }
}

/// CLI result type
pub type CliResult<T> = Result<T, CliError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_carries_code() {
        let err = CliError::store_error("log truncated");
        assert_eq!(err.to_string(), "WSREP_CLI_STORE_ERROR: log truncated");
        assert_eq!(err.code(), CliErrorCode::StoreError);
    }

    #[test]
    fn test_config_error_conversion() {
        let err: CliError = ConfigError::invalid("applier_threads must be at least 1").into();
        assert_eq!(err.code(), CliErrorCode::ConfigError);
        assert!(err.message().contains("WSREP_CONFIG_INVALID"));
    }
}

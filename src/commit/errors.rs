//! Replication error taxonomy
//!
//! Provider status codes are translated into `WsrepError` at the call
//! site and into `SqlError` at the session boundary. Raw provider codes
//! never reach the client.

use std::fmt;

use thiserror::Error;

use crate::applier::ApplyError;
use crate::config::ConfigError;
use crate::engine::EngineError;
use crate::fragment::FragmentStoreError;
use crate::provider::Status;
use crate::types::{ConflictState, TrxId};
use crate::writeset::WriteSetError;

/// Failures of the replication layer.
#[derive(Debug, Error)]
pub enum WsrepError {
    /// Certification failed; the transaction must roll back fully.
    #[error("Certification failed for transaction {trx_id}")]
    CertificationFailure { trx_id: TrxId },

    /// Transaction was BF-aborted or its replay failed.
    #[error("Transaction {trx_id} aborted to resolve a replication conflict")]
    Deadlock { trx_id: TrxId },

    /// Certified but BF-aborted; scheduled for replay. Not a failure.
    #[error("Transaction {trx_id} must be replayed")]
    MustReplay { trx_id: TrxId },

    #[error("Write-set of {size} bytes exceeds the maximum of {max}")]
    SizeExceeded { size: u64, max: u64 },

    #[error("Write-set of {rows} rows exceeds the maximum of {max}")]
    RowLimitExceeded { rows: u64, max: u64 },

    #[error("Write-set rejected: {0}")]
    WriteSet(WriteSetError),

    #[error("Transaction {trx_id} reported {rows} affected rows but produced an empty write-set")]
    EmptyWriteSet { trx_id: TrxId, rows: u64 },

    /// This session can no longer talk to the provider.
    #[error("Provider connection failure ({status})")]
    ConnectionFailure { status: Status },

    /// The node left the cluster; the replication layer must be reinitialized.
    #[error("Node failure ({status})")]
    NodeFailure { status: Status },

    #[error("Timed out waiting for {0}")]
    Timeout(&'static str),

    #[error("Interrupted by shutdown")]
    Interrupted,

    #[error("Apply failed: {0}")]
    Apply(#[from] ApplyError),

    #[error("Fragment store failure: {0}")]
    Store(#[from] FragmentStoreError),

    #[error("Storage engine failure: {0}")]
    Engine(#[from] EngineError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Invalid conflict state transition {from} -> {to}")]
    InvalidTransition {
        from: ConflictState,
        to: ConflictState,
    },

    #[error("No active transaction")]
    NoTransaction,

    #[error("Invalid state: {0}")]
    InvalidState(String),
}

impl WsrepError {
    /// Translate a non-Ok provider status.
    pub fn from_status(status: Status, trx_id: TrxId) -> Self {
        match status {
            Status::TrxFail | Status::Ok => Self::CertificationFailure { trx_id },
            Status::BfAbort => Self::Deadlock { trx_id },
            Status::SizeExceeded => Self::SizeExceeded { size: 0, max: 0 },
            Status::ConnFail => Self::ConnectionFailure { status },
            Status::NodeFail => Self::NodeFailure { status },
        }
    }

    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }

    /// User-visible error for this failure.
    pub fn to_sql_error(&self) -> SqlError {
        match self {
            Self::CertificationFailure { .. } | Self::Deadlock { .. } | Self::MustReplay { .. } => {
                SqlError::Deadlock
            }
            Self::Timeout(_) => SqlError::LockWaitTimeout,
            Self::Interrupted => SqlError::QueryInterrupted,
            Self::ConnectionFailure { .. } | Self::NodeFailure { .. } => SqlError::ConnectionClosed,
            Self::SizeExceeded { .. }
            | Self::RowLimitExceeded { .. }
            | Self::WriteSet(_)
            | Self::EmptyWriteSet { .. }
            | Self::Apply(_)
            | Self::Store(_)
            | Self::Engine(_)
            | Self::Config(_)
            | Self::InvalidTransition { .. }
            | Self::NoTransaction
            | Self::InvalidState(_) => SqlError::ErrorDuringCommit,
        }
    }

    /// Deadlock-class failures an application may retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::CertificationFailure { .. } | Self::Deadlock { .. }
        )
    }

    pub fn is_fatal(&self) -> bool {
        match self {
            Self::NodeFailure { .. } | Self::InvalidTransition { .. } => true,
            Self::Store(e) => e.is_fatal(),
            _ => false,
        }
    }
}

impl From<WriteSetError> for WsrepError {
    fn from(e: WriteSetError) -> Self {
        match e {
            WriteSetError::SizeExceeded { size, max } => Self::SizeExceeded { size, max },
            WriteSetError::TooManyRows { rows, max } => Self::RowLimitExceeded { rows, max },
            other => Self::WriteSet(other),
        }
    }
}

/// Result type for replication operations
pub type WsrepResult<T> = Result<T, WsrepError>;

/// Error classes visible to SQL clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SqlError {
    Deadlock,
    LockWaitTimeout,
    QueryInterrupted,
    ErrorDuringCommit,
    ConnectionClosed,
}

impl SqlError {
    /// MySQL-compatible error number.
    pub fn code(self) -> u16 {
        match self {
            SqlError::Deadlock => 1213,
            SqlError::LockWaitTimeout => 1205,
            SqlError::QueryInterrupted => 1317,
            SqlError::ErrorDuringCommit => 1180,
            SqlError::ConnectionClosed => 1047,
        }
    }

    pub fn message(self) -> &'static str {
        match self {
            SqlError::Deadlock => "Deadlock found when trying to get lock; try restarting transaction",
            SqlError::LockWaitTimeout => "Lock wait timeout exceeded; try restarting transaction",
            SqlError::QueryInterrupted => "Query execution was interrupted",
            SqlError::ErrorDuringCommit => "Got error during COMMIT",
            SqlError::ConnectionClosed => "WSREP has not yet prepared node for application use",
        }
    }
}

impl fmt::Display for SqlError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ERROR {}: {}", self.code(), self.message())
    }
}

//! Storage engine errors

use thiserror::Error;

use crate::types::Gtid;

use super::EngineTxnId;

/// Failures reported by the storage engine collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("Duplicate key in {table}: {key:?}")]
    DuplicateKey { table: String, key: Vec<u8> },

    #[error("Key not found in {table}: {key:?}")]
    KeyNotFound { table: String, key: Vec<u8> },

    #[error("Unknown engine transaction {0}")]
    UnknownTransaction(EngineTxnId),

    #[error("Checkpoint regression: current {current}, requested {requested}")]
    CheckpointRegression { current: Gtid, requested: Gtid },
}

/// Result type for storage engine operations
pub type EngineResult<T> = Result<T, EngineError>;

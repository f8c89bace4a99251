//! Apply errors
//!
//! A remote write-set that fails to apply is not fatal to the node: it
//! is rolled back, dumped to the apply error log and its commit slot is
//! passed. The same failure during a replay is fatal.

use thiserror::Error;

use crate::engine::EngineError;
use crate::fragment::FragmentStoreError;
use crate::writeset::WriteSetError;

/// Failures while applying a write-set in a high priority context.
#[derive(Debug, Error)]
pub enum ApplyError {
    #[error("Malformed write-set payload: {0}")]
    Payload(#[from] WriteSetError),

    #[error("Storage engine rejected a change: {0}")]
    Engine(#[from] EngineError),

    #[error("Fragment store failure: {0}")]
    Store(#[from] FragmentStoreError),

    #[error("No transaction started in this context")]
    NoTransaction,

    #[error("Context already holds a write-set")]
    Busy,
}

/// Result type for apply operations
pub type ApplyResult<T> = Result<T, ApplyError>;

//! Recovery errors
//!
//! Every recovery error is fatal to startup: skipping a fragment that
//! could not be read or applied would let this node diverge silently.

use std::io;
use std::path::PathBuf;

use thiserror::Error;
use uuid::Uuid;

use crate::applier::ApplyError;
use crate::commit::WsrepError;
use crate::fragment::FragmentStoreError;
use crate::types::TrxId;

#[derive(Debug, Error)]
pub enum RecoveryError {
    #[error("Fragment store failed during recovery: {0}")]
    Store(#[from] FragmentStoreError),

    #[error("Failed to apply recovered transaction {server_id}/{trx_id}: {source}")]
    Apply {
        server_id: Uuid,
        trx_id: TrxId,
        #[source]
        source: ApplyError,
    },

    #[error("Failed to commit recovered transaction {server_id}/{trx_id}: {source}")]
    Commit {
        server_id: Uuid,
        trx_id: TrxId,
        #[source]
        source: WsrepError,
    },

    #[error("Storage service failed during recovery: {0}")]
    Service(#[from] WsrepError),

    #[error("Shutdown marker {path}: {source}")]
    Marker {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl RecoveryError {
    pub fn is_fatal(&self) -> bool {
        true
    }
}

pub type RecoveryResult<T> = Result<T, RecoveryError>;

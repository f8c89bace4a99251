//! Fragment store errors
//!
//! Corruption is fatal. Everything else escalates to aborting the owning
//! transaction during normal operation, and is fatal during recovery.

use std::io;

use thiserror::Error;
use uuid::Uuid;

use crate::types::{Seqno, TrxId};

/// Fragment store failures.
#[derive(Debug, Error)]
pub enum FragmentStoreError {
    #[error("Fragment store I/O failure ({context}): {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },

    #[error("Fragment store corruption at offset {offset}: {reason}")]
    Corruption { offset: u64, reason: String },

    #[error("Transaction {server_id}/{trx_id} already has an uncertified fragment")]
    DuplicateUnset { server_id: Uuid, trx_id: TrxId },

    #[error("Fragment {server_id}/{trx_id}/{seqno} already exists")]
    Duplicate {
        server_id: Uuid,
        trx_id: TrxId,
        seqno: Seqno,
    },

    #[error("No uncertified fragment for {server_id}/{trx_id}")]
    NotFound { server_id: Uuid, trx_id: TrxId },

    #[error("Non-monotonic fragment seqno for {server_id}/{trx_id}: last {last}, requested {requested}")]
    NonMonotonic {
        server_id: Uuid,
        trx_id: TrxId,
        last: Seqno,
        requested: Seqno,
    },

    #[error("Invalid fragment seqno {0}")]
    InvalidSeqno(Seqno),
}

impl FragmentStoreError {
    pub fn io(context: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    pub fn corruption(offset: u64, reason: impl Into<String>) -> Self {
        Self::Corruption {
            offset,
            reason: reason.into(),
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Corruption { .. })
    }
}

/// Result type for fragment store operations
pub type StoreResult<T> = Result<T, FragmentStoreError>;

//! Replication provider interface
//!
//! The provider (group communication, total order, certification) is an
//! external black box. This module wraps its synchronous call contract as
//! a typed trait with a closed `Status` result.
//!
//! `LoopbackProvider` is a single-process implementation that certifies
//! by key overlap and enforces commit order. It backs the test suite and
//! the operator CLI; it is not a cluster.

mod loopback;

pub use loopback::{CertifiedRecord, LoopbackProvider};

use std::fmt;

use bytes::Bytes;

use crate::types::{ConnId, Seqno, TrxId, WriteSetFlags, WriteSetMeta};
use crate::writeset::CertKey;

/// Result of every provider call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    Ok,
    /// Certification failed or the transaction is otherwise doomed
    TrxFail,
    /// Interrupted by a brute force abort
    BfAbort,
    /// Write-set too large for the provider
    SizeExceeded,
    /// This connection can no longer talk to the provider
    ConnFail,
    /// The node can no longer participate in replication
    NodeFail,
}

impl Status {
    pub fn is_ok(self) -> bool {
        self == Status::Ok
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Status::Ok => "OK",
            Status::TrxFail => "TRX_FAIL",
            Status::BfAbort => "BF_ABORT",
            Status::SizeExceeded => "SIZE_EXCEEDED",
            Status::ConnFail => "CONN_FAIL",
            Status::NodeFail => "NODE_FAIL",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Provider-opaque write-set reference.
///
/// Deliberately not `Clone`: exactly one owner holds a given reference,
/// and it is moved, never copied, when a replay takes it over.
#[derive(Debug, PartialEq, Eq)]
pub struct WsHandle {
    trx_id: TrxId,
    opaque: u64,
}

impl WsHandle {
    /// Handle for a locally originated transaction.
    pub fn new(trx_id: TrxId) -> Self {
        Self { trx_id, opaque: 0 }
    }

    /// Handle minted by the provider for a delivered write-set.
    pub fn with_opaque(trx_id: TrxId, opaque: u64) -> Self {
        Self { trx_id, opaque }
    }

    pub fn trx_id(&self) -> TrxId {
        self.trx_id
    }

    pub fn opaque(&self) -> u64 {
        self.opaque
    }
}

/// A certified write-set delivered by the provider for local apply.
#[derive(Debug)]
pub struct ReceivedWriteSet {
    pub handle: WsHandle,
    pub meta: WriteSetMeta,
    pub data: Bytes,
}

/// Synchronous call contract of the replication provider.
pub trait Provider: Send + Sync {
    /// Add a certification key to the write-set.
    fn append_key(&self, ws: &WsHandle, key: &CertKey) -> Status;

    /// Add payload bytes to the write-set.
    fn append_data(&self, ws: &WsHandle, data: &[u8]) -> Status;

    /// Replicate and certify. On `Ok` (and on an ordered `BfAbort`)
    /// `meta` carries the assigned GTID.
    fn pre_commit(
        &self,
        conn_id: ConnId,
        ws: &WsHandle,
        flags: WriteSetFlags,
        meta: &mut WriteSetMeta,
    ) -> Status;

    /// Block until it is this write-set's turn to commit.
    fn commit_order_enter(&self, ws: &WsHandle, meta: &WriteSetMeta) -> Status;

    /// Leave the commit order critical section.
    fn commit_order_leave(&self, ws: &WsHandle, meta: &WriteSetMeta) -> Status;

    fn post_commit(&self, ws: &WsHandle) -> Status;

    /// Roll back an ordered write-set, passing through its commit slot.
    fn post_rollback(&self, ws: &WsHandle) -> Status;

    /// Drop all provider state for the write-set.
    fn release(&self, ws: &WsHandle) -> Status;

    /// Replicate a rollback event for a streaming transaction.
    fn rollback(&self, trx_id: TrxId, data: &[u8]) -> Status;

    /// Interrupt a victim blocked in `pre_commit` or `commit_order_enter`.
    fn abort_pre_commit(&self, bf_seqno: Seqno, victim: TrxId) -> Status;

    /// Start total order isolated execution.
    fn to_execute_start(
        &self,
        conn_id: ConnId,
        keys: &[CertKey],
        data: &[u8],
        meta: &mut WriteSetMeta,
    ) -> Status;

    /// End total order isolated execution.
    fn to_execute_end(&self, conn_id: ConnId) -> Status;
}

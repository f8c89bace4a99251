//! Fragment rows and store operations

use bytes::Bytes;
use serde::Serialize;
use uuid::Uuid;

use crate::types::{Seqno, TrxId, WriteSetFlags, SEQNO_UNDEFINED};

/// One persisted streaming fragment.
///
/// `seqno == None` means the fragment was recorded but never certified;
/// after a crash such a row is an orphan and recovery deletes it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    pub server_id: Uuid,
    pub trx_id: TrxId,
    pub seqno: Option<Seqno>,
    pub flags: WriteSetFlags,
    pub payload: Bytes,
}

impl Fragment {
    /// A freshly cut fragment, not yet certified.
    pub fn uncertified(server_id: Uuid, trx_id: TrxId, flags: WriteSetFlags, payload: Bytes) -> Self {
        Self {
            server_id,
            trx_id,
            seqno: None,
            flags,
            payload,
        }
    }

    /// A fragment that already carries its certified seqno.
    pub fn certified(
        server_id: Uuid,
        trx_id: TrxId,
        seqno: Seqno,
        flags: WriteSetFlags,
        payload: Bytes,
    ) -> Self {
        Self {
            server_id,
            trx_id,
            seqno: Some(seqno),
            flags,
            payload,
        }
    }

    pub fn key(&self) -> FragmentKey {
        FragmentKey::new(self.server_id, self.trx_id, self.seqno)
    }

    pub fn is_orphan(&self) -> bool {
        self.seqno.is_none()
    }

    /// Listing row for operators.
    pub fn summary(&self) -> FragmentSummary {
        FragmentSummary {
            node_uuid: self.server_id.to_string(),
            trx_id: self.trx_id,
            seqno: self.seqno.unwrap_or(SEQNO_UNDEFINED),
            flags: self.flags.bits(),
            frag_len: self.payload.len(),
        }
    }
}

/// Primary key of the fragment table: `(node_uuid, trx_id, seqno)`.
///
/// An unset seqno is stored as -1 and therefore sorts first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FragmentKey {
    pub server_id: Uuid,
    pub trx_id: TrxId,
    pub seqno: Seqno,
}

impl FragmentKey {
    pub fn new(server_id: Uuid, trx_id: TrxId, seqno: Option<Seqno>) -> Self {
        Self {
            server_id,
            trx_id,
            seqno: seqno.unwrap_or(SEQNO_UNDEFINED),
        }
    }

    /// Smallest key of a transaction, for range scans.
    pub fn first_of(server_id: Uuid, trx_id: TrxId) -> Self {
        Self {
            server_id,
            trx_id,
            seqno: Seqno::MIN,
        }
    }

    /// Largest key of a transaction, for range scans.
    pub fn last_of(server_id: Uuid, trx_id: TrxId) -> Self {
        Self {
            server_id,
            trx_id,
            seqno: Seqno::MAX,
        }
    }
}

/// JSON-friendly view of one fragment row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FragmentSummary {
    pub node_uuid: String,
    pub trx_id: TrxId,
    pub seqno: Seqno,
    pub flags: u32,
    pub frag_len: usize,
}

/// A single mutation of the fragment table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FragmentOp {
    Append(Fragment),
    UpdateSeqno {
        server_id: Uuid,
        trx_id: TrxId,
        seqno: Seqno,
    },
    Remove(FragmentKey),
    RemoveAll {
        server_id: Uuid,
        trx_id: TrxId,
    },
}

/// Mutations committed together, atomically.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FragmentBatch {
    ops: Vec<FragmentOp>,
}

impl FragmentBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, op: FragmentOp) {
        self.ops.push(op);
    }

    pub fn remove_all(&mut self, server_id: Uuid, trx_id: TrxId) {
        self.push(FragmentOp::RemoveAll { server_id, trx_id });
    }

    pub fn ops(&self) -> &[FragmentOp] {
        &self.ops
    }

    pub fn into_ops(self) -> Vec<FragmentOp> {
        self.ops
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn clear(&mut self) {
        self.ops.clear();
    }
}

impl From<FragmentOp> for FragmentBatch {
    fn from(op: FragmentOp) -> Self {
        Self { ops: vec![op] }
    }
}

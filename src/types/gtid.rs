//! Global transaction identifiers and write-set metadata

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::flags::WriteSetFlags;

/// Global sequence number assigned by the provider.
pub type Seqno = i64;

/// Transaction id, reused for the whole life of one replicated transaction.
pub type TrxId = u64;

/// Client connection id.
pub type ConnId = u64;

/// Sequence number of a write-set that has not been ordered yet.
pub const SEQNO_UNDEFINED: Seqno = -1;

/// Global transaction identifier: `(source uuid, seqno)`.
///
/// Used both as a replication position and as the storage engine
/// checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Gtid {
    pub uuid: Uuid,
    pub seqno: Seqno,
}

impl Gtid {
    pub fn new(uuid: Uuid, seqno: Seqno) -> Self {
        Self { uuid, seqno }
    }

    /// The position before anything was ordered.
    pub const fn undefined() -> Self {
        Self {
            uuid: Uuid::nil(),
            seqno: SEQNO_UNDEFINED,
        }
    }

    pub fn is_defined(&self) -> bool {
        self.seqno != SEQNO_UNDEFINED
    }
}

impl Default for Gtid {
    fn default() -> Self {
        Self::undefined()
    }
}

impl fmt::Display for Gtid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.uuid, self.seqno)
    }
}

/// Source transaction id: which node, transaction and connection a
/// write-set originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Stid {
    pub node: Uuid,
    pub trx_id: TrxId,
    pub conn_id: ConnId,
}

impl Stid {
    pub fn new(node: Uuid, trx_id: TrxId, conn_id: ConnId) -> Self {
        Self {
            node,
            trx_id,
            conn_id,
        }
    }
}

/// Metadata the provider attaches to a write-set at certification time.
///
/// Immutable once `gtid.seqno` is defined, except for the explicit
/// per-fragment reset done by streaming replication.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteSetMeta {
    pub gtid: Gtid,
    pub depends_on: Seqno,
    pub stid: Stid,
    pub flags: WriteSetFlags,
}

impl WriteSetMeta {
    /// Fresh metadata for a transaction that has not been certified.
    pub fn new(stid: Stid) -> Self {
        Self {
            gtid: Gtid::undefined(),
            depends_on: SEQNO_UNDEFINED,
            stid,
            flags: WriteSetFlags::empty(),
        }
    }

    pub fn seqno(&self) -> Seqno {
        self.gtid.seqno
    }

    pub fn is_ordered(&self) -> bool {
        self.gtid.is_defined()
    }

    /// Forget the ordering position (between streaming fragments).
    pub fn reset_gtid(&mut self) {
        self.gtid = Gtid::undefined();
        self.depends_on = SEQNO_UNDEFINED;
    }
}

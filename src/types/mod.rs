//! Core replication data model
//!
//! Identifiers, write-set metadata and the per-transaction state enums
//! shared by every other subsystem:
//! - `Gtid` / `Stid` / `WriteSetMeta`: positions assigned by the provider
//! - `WriteSetFlags`: write-set flag bitset
//! - `ConflictState`, `ClientExecMode`, `QueryState`: handle state

mod flags;
mod gtid;
mod state;

pub use flags::WriteSetFlags;
pub use gtid::{ConnId, Gtid, Seqno, Stid, TrxId, WriteSetMeta, SEQNO_UNDEFINED};
pub use state::{ClientExecMode, ConflictState, QueryState};

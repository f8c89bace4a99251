//! Storage engine collaborator
//!
//! The engine's own transaction internals are out of scope. This layer
//! only needs to open a transaction, apply row changes, commit it while
//! recording the replication checkpoint, and roll it back.

mod errors;
mod memory;

pub use errors::{EngineError, EngineResult};
pub use memory::MemoryEngine;

use crate::types::Gtid;
use crate::writeset::ChangeRecord;

/// Engine-side transaction identifier.
pub type EngineTxnId = u64;

/// Opaque statement savepoint inside an engine transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Savepoint(pub usize);

/// Two-phase storage engine as seen by the replication layer.
pub trait StorageEngine: Send + Sync {
    fn begin(&self) -> EngineTxnId;

    fn apply(&self, txn: EngineTxnId, record: &ChangeRecord) -> EngineResult<()>;

    /// Commit, atomically advancing the checkpoint when one is given.
    fn commit(&self, txn: EngineTxnId, checkpoint: Option<Gtid>) -> EngineResult<()>;

    fn rollback(&self, txn: EngineTxnId) -> EngineResult<()>;

    /// Mark the current position inside `txn` for statement rollback.
    fn savepoint(&self, txn: EngineTxnId) -> EngineResult<Savepoint>;

    /// Undo the changes made after `savepoint`.
    fn rollback_to_savepoint(&self, txn: EngineTxnId, savepoint: Savepoint) -> EngineResult<()>;

    /// Highest position durably applied.
    fn checkpoint(&self) -> Gtid;

    /// Overwrite the checkpoint, used after a state snapshot transfer.
    fn set_checkpoint(&self, gtid: Gtid) -> EngineResult<()>;
}

//! External collaborators
//!
//! - `IdGenerator`: monotonic transaction ids and the current checkpoint
//! - `StateTransfer`: bulk state snapshot transfer, driven elsewhere

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use uuid::Uuid;

use crate::commit::WsrepResult;
use crate::engine::StorageEngine;
use crate::types::{Gtid, Seqno};

/// Source of transaction ids and of the current replication position.
pub trait IdGenerator: Send + Sync {
    /// Next transaction id. Strictly increasing, never 0.
    fn next_id(&self) -> u64;

    fn current_checkpoint(&self) -> Gtid;
}

/// Counter-backed id generator reading the checkpoint from the engine.
pub struct AtomicIdGenerator {
    next: AtomicU64,
    engine: Arc<dyn StorageEngine>,
}

impl AtomicIdGenerator {
    pub fn new(engine: Arc<dyn StorageEngine>) -> Self {
        Self::starting_at(engine, 1)
    }

    /// Generator whose first id is `first` (clamped to 1).
    pub fn starting_at(engine: Arc<dyn StorageEngine>, first: u64) -> Self {
        Self {
            next: AtomicU64::new(first.max(1)),
            engine,
        }
    }
}

impl IdGenerator for AtomicIdGenerator {
    fn next_id(&self) -> u64 {
        self.next.fetch_add(1, Ordering::SeqCst)
    }

    fn current_checkpoint(&self) -> Gtid {
        self.engine.checkpoint()
    }
}

/// Opaque snapshot request produced by a joiner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SstRequest(pub Bytes);

/// State snapshot transfer helper. Data copying happens outside this crate.
pub trait StateTransfer: Send + Sync {
    fn request_transfer(&self) -> SstRequest;

    /// A snapshot up to `(uuid, seqno)` was installed locally.
    fn on_snapshot_received(&self, uuid: Uuid, seqno: Seqno) -> WsrepResult<()>;

    /// Serve `request` with local state up to `checkpoint`.
    fn donate(&self, request: &SstRequest, checkpoint: Gtid) -> WsrepResult<()>;
}

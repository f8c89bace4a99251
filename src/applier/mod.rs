//! High priority appliers
//!
//! Three executions share one interface:
//! - `RemoteApplier` applies write-sets delivered by the provider
//! - `Replayer` re-applies a BF-aborted local transaction at its
//!   certified position
//! - `StorageService` is headless and works on the fragment store
//!   directly, for recovery and background cleanup
//!
//! The first two commit through the same ordered commit as local
//! sessions, so local and remote commits follow one global order.

mod context;
mod error_log;
mod errors;
mod pool;
mod remote;
mod replayer;
mod storage;

pub use context::{HighPriorityContext, Role};
pub use error_log::{ApplyErrorEntry, ApplyErrorLog};
pub use errors::{ApplyError, ApplyResult};
pub use pool::ApplierPool;
pub use remote::{ApplyOutcome, RemoteApplier};
pub use replayer::Replayer;
pub use storage::StorageService;

use crate::commit::WsrepResult;
use crate::provider::WsHandle;
use crate::types::WriteSetMeta;

/// Lifecycle of one high priority transaction.
///
/// `start_transaction`, any number of `apply_write_set`, then exactly one
/// of `commit` or `rollback`, then `cleanup`.
pub trait ApplierService {
    /// `ws` is `None` for executions the provider does not know about.
    fn start_transaction(&mut self, ws: Option<WsHandle>, meta: &WriteSetMeta) -> ApplyResult<()>;

    fn apply_write_set(&mut self, meta: &WriteSetMeta, data: &[u8]) -> ApplyResult<()>;

    fn commit(&mut self, meta: &WriteSetMeta) -> WsrepResult<()>;

    fn rollback(&mut self, meta: &WriteSetMeta) -> WsrepResult<()>;

    /// Return the context to its idle state.
    fn cleanup(&mut self);
}

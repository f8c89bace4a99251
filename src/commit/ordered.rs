//! The ordered commit phase shared by local committers, replayers and
//! appliers
//!
//! Callers enter the provider's commit order first. Inside the critical
//! section the staged fragment store mutations are applied, then the
//! engine commits and records the GTID as its checkpoint. Any failure
//! here leaves this node diverged from the cluster and is fatal.

use crate::context::ReplicationContext;
use crate::crash_point::{maybe_crash, points};
use crate::engine::EngineTxnId;
use crate::fragment::FragmentBatch;
use crate::observability::{Event, Logger};
use crate::provider::WsHandle;
use crate::types::WriteSetMeta;

use super::errors::{WsrepError, WsrepResult};

/// Commit `engine_txn` at `meta`'s position and leave commit order.
///
/// Must be called after a successful `commit_order_enter` for `ws`.
pub(crate) fn commit_in_order(
    ctx: &ReplicationContext,
    ws: &WsHandle,
    meta: &WriteSetMeta,
    engine_txn: Option<EngineTxnId>,
    store_ops: FragmentBatch,
) -> WsrepResult<()> {
    let seqno = meta.seqno().to_string();
    let trx_id = meta.stid.trx_id.to_string();

    if !store_ops.is_empty() {
        if let Err(e) = ctx.store().apply(store_ops) {
            Logger::error(
                Event::StoreFailure,
                &[("trx_id", &trx_id), ("seqno", &seqno), ("error", &e.to_string())],
            );
            ctx.fatal(&format!("fragment store failed in commit order at {}: {}", meta.gtid, e));
        }
    }

    maybe_crash(points::COMMIT_BEFORE_ENGINE_COMMIT);
    let engine = ctx.engine();
    let txn = engine_txn.unwrap_or_else(|| engine.begin());
    if let Err(e) = engine.commit(txn, Some(meta.gtid)) {
        ctx.fatal(&format!("engine commit failed in commit order at {}: {}", meta.gtid, e));
    }
    maybe_crash(points::COMMIT_AFTER_ENGINE_COMMIT);

    let status = ctx.provider().commit_order_leave(ws, meta);
    if !status.is_ok() {
        Logger::error(
            Event::ProviderFailure,
            &[("trx_id", &trx_id), ("seqno", &seqno), ("status", status.as_str())],
        );
        return Err(WsrepError::from_status(status, meta.stid.trx_id));
    }

    Logger::trace(Event::CommitOrdered, &[("trx_id", &trx_id), ("seqno", &seqno)]);
    Ok(())
}

/// Pass through commit order without committing anything, for write-sets
/// this node already holds.
pub(crate) fn skip_in_order(ctx: &ReplicationContext, ws: &WsHandle, meta: &WriteSetMeta) -> WsrepResult<()> {
    let provider = ctx.provider();
    let status = provider.commit_order_enter(ws, meta);
    if !status.is_ok() {
        return Err(WsrepError::from_status(status, meta.stid.trx_id));
    }
    let status = provider.commit_order_leave(ws, meta);
    if !status.is_ok() {
        return Err(WsrepError::from_status(status, meta.stid.trx_id));
    }
    Ok(())
}

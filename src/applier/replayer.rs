//! Replayer execution
//!
//! Applies a BF-aborted local transaction's certified payload on a pooled
//! high priority context and commits it at the already assigned seqno.

use super::context::HighPriorityContext;
use super::errors::ApplyResult;
use super::ApplierService;
use crate::commit::{commit_in_order, WsrepError, WsrepResult};
use crate::context::{Pooled, ReplicationContext};
use crate::fragment::FragmentBatch;
use crate::provider::{Status, WsHandle};
use crate::types::WriteSetMeta;

/// Stale interrupts aimed at the original session are consumed by
/// re-entering commit order.
const MAX_ORDER_ATTEMPTS: usize = 3;

pub struct Replayer<'a> {
    ctx: &'a ReplicationContext,
    hp: Pooled<'a, HighPriorityContext>,
    order_entered: bool,
}

impl<'a> Replayer<'a> {
    pub fn new(ctx: &'a ReplicationContext) -> Self {
        Self {
            ctx,
            hp: ctx.replayers().acquire(),
            order_entered: false,
        }
    }

    /// The original session already entered commit order and still holds
    /// the slot.
    pub fn with_order_entered(mut self, entered: bool) -> Self {
        self.order_entered = entered;
        self
    }

    pub fn context(&self) -> &HighPriorityContext {
        &self.hp
    }

    /// Fragment store mutations to apply with the commit.
    pub(crate) fn stage(&mut self, batch: FragmentBatch) {
        for op in batch.into_ops() {
            self.hp.stage(op);
        }
    }

    fn enter_order(&self, ws: &WsHandle, meta: &WriteSetMeta) -> Status {
        let provider = self.ctx.provider();
        let mut status = provider.commit_order_enter(ws, meta);
        for _ in 1..MAX_ORDER_ATTEMPTS {
            if status != Status::BfAbort {
                break;
            }
            status = provider.commit_order_enter(ws, meta);
        }
        status
    }
}

impl ApplierService for Replayer<'_> {
    fn start_transaction(&mut self, ws: Option<WsHandle>, meta: &WriteSetMeta) -> ApplyResult<()> {
        self.hp.begin(self.ctx.engine(), ws, meta)
    }

    fn apply_write_set(&mut self, _meta: &WriteSetMeta, data: &[u8]) -> ApplyResult<()> {
        self.hp.apply(self.ctx.engine(), data)
    }

    fn commit(&mut self, meta: &WriteSetMeta) -> WsrepResult<()> {
        let engine_txn = self.hp.take_engine_txn();
        let staged = self.hp.take_staged();
        let ws = self.hp.ws()?;

        if !self.order_entered {
            let status = self.enter_order(ws, meta);
            if !status.is_ok() {
                if let Some(txn) = engine_txn {
                    self.ctx.engine().rollback(txn)?;
                }
                return Err(WsrepError::from_status(status, meta.stid.trx_id));
            }
        }
        self.order_entered = true;
        commit_in_order(self.ctx, ws, meta, engine_txn, staged)?;
        self.order_entered = false;
        self.ctx.provider().post_commit(ws);
        Ok(())
    }

    fn rollback(&mut self, _meta: &WriteSetMeta) -> WsrepResult<()> {
        let rolled_back = match self.hp.take_engine_txn() {
            Some(txn) => self.ctx.engine().rollback(txn),
            None => Ok(()),
        };
        self.hp.take_staged();
        if let Ok(ws) = self.hp.ws() {
            let status = self.ctx.provider().post_rollback(ws);
            if !status.is_ok() {
                return Err(WsrepError::from_status(status, ws.trx_id()));
            }
        }
        self.order_entered = false;
        rolled_back.map_err(WsrepError::from)
    }

    fn cleanup(&mut self) {
        if let Some(ws) = self.hp.take_ws() {
            self.ctx.provider().release(&ws);
        }
        self.hp.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ReplicationConfig;
    use crate::engine::MemoryEngine;
    use crate::fragment::MemoryFragmentStore;
    use crate::provider::LoopbackProvider;
    use crate::types::Stid;
    use crate::writeset::ChangeRecord;
    use std::sync::Arc;
    use uuid::Uuid;

    #[test]
    fn test_replayer_contexts_are_recycled() {
        let engine = Arc::new(MemoryEngine::new());
        let ctx = ReplicationContext::builder(ReplicationConfig::default())
            .provider(Arc::new(LoopbackProvider::new(Uuid::new_v4())))
            .engine(engine.clone())
            .store(Arc::new(MemoryFragmentStore::new()))
            .build()
            .unwrap();

        {
            let mut replayer = Replayer::new(&ctx);
            assert!(replayer.context().handle().exec_mode().is_high_priority());
            let meta = WriteSetMeta::new(Stid::new(ctx.node_id(), 5, 1));
            replayer.start_transaction(None, &meta).unwrap();
            let data = ChangeRecord::insert("t", b"k".to_vec(), b"v".to_vec()).encode();
            replayer.apply_write_set(&meta, &data).unwrap();
            replayer.rollback(&meta).unwrap();
            replayer.cleanup();
        }
        assert_eq!(ctx.replayers().idle(), 1);
        assert_eq!(engine.open_transactions(), 0);

        let replayer = Replayer::new(&ctx);
        assert!(!replayer.context().is_busy());
        assert_eq!(ctx.replayers().created(), 1);
    }
}

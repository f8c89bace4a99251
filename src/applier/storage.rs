//! Headless storage service
//!
//! Works on the fragment store and the engine without the provider:
//! nothing here takes a commit slot or moves the engine checkpoint.
//! Used by startup recovery and background cleanup.

use uuid::Uuid;

use super::context::HighPriorityContext;
use super::errors::ApplyResult;
use super::ApplierService;
use crate::commit::{WsrepError, WsrepResult};
use crate::context::ReplicationContext;
use crate::fragment::{Fragment, FragmentKey, FragmentOp, FragmentStore};
use crate::observability::{Event, Logger};
use crate::provider::WsHandle;
use crate::types::{Seqno, TrxId, WriteSetMeta};

pub struct StorageService<'a> {
    ctx: &'a ReplicationContext,
    hp: HighPriorityContext,
}

impl<'a> StorageService<'a> {
    pub fn new(ctx: &'a ReplicationContext) -> Self {
        Self {
            ctx,
            hp: HighPriorityContext::storage(ctx.node_id()),
        }
    }

    pub fn context(&self) -> &HighPriorityContext {
        &self.hp
    }

    /// Record a fragment outside any transaction.
    pub fn append_fragment(&self, fragment: Fragment) -> WsrepResult<()> {
        self.store().append(fragment)?;
        Ok(())
    }

    /// Stamp the certified seqno on the uncertified fragment of a transaction.
    pub fn update_fragment_meta(&self, server_id: Uuid, trx_id: TrxId, seqno: Seqno) -> WsrepResult<()> {
        self.store().update_seqno(server_id, trx_id, seqno)?;
        Ok(())
    }

    /// Delete one fragment row. Returns false when it was not there.
    pub fn remove_fragment(&self, key: FragmentKey) -> WsrepResult<bool> {
        Ok(self.store().remove(key)?)
    }

    /// Delete every fragment of a transaction. Returns the number removed.
    pub fn remove_fragments(&self, server_id: Uuid, trx_id: TrxId) -> WsrepResult<usize> {
        let removed = self.store().remove_all(server_id, trx_id)?;
        Logger::trace(
            Event::FragmentsRemoved,
            &[
                ("server_id", &server_id.to_string()),
                ("trx_id", &trx_id.to_string()),
                ("count", &removed.to_string()),
            ],
        );
        Ok(removed)
    }

    /// Queue removal of a transaction's fragments with the next commit.
    pub fn stage_removal(&mut self, server_id: Uuid, trx_id: TrxId) {
        self.hp.stage(FragmentOp::RemoveAll { server_id, trx_id });
    }

    fn store(&self) -> &dyn FragmentStore {
        self.ctx.store()
    }
}

impl ApplierService for StorageService<'_> {
    fn start_transaction(&mut self, ws: Option<WsHandle>, meta: &WriteSetMeta) -> ApplyResult<()> {
        self.hp.begin(self.ctx.engine(), ws, meta)
    }

    fn apply_write_set(&mut self, _meta: &WriteSetMeta, data: &[u8]) -> ApplyResult<()> {
        self.hp.apply(self.ctx.engine(), data)
    }

    /// Engine commit first, then the staged store mutations.
    fn commit(&mut self, _meta: &WriteSetMeta) -> WsrepResult<()> {
        let txn = self.hp.take_engine_txn().ok_or(WsrepError::NoTransaction)?;
        self.ctx.engine().commit(txn, None)?;
        let staged = self.hp.take_staged();
        if !staged.is_empty() {
            self.store().apply(staged)?;
        }
        Ok(())
    }

    fn rollback(&mut self, _meta: &WriteSetMeta) -> WsrepResult<()> {
        self.hp.take_staged();
        if let Some(txn) = self.hp.take_engine_txn() {
            self.ctx.engine().rollback(txn)?;
        }
        Ok(())
    }

    fn cleanup(&mut self) {
        if let Some(ws) = self.hp.take_ws() {
            self.ctx.provider().release(&ws);
        }
        self.hp.clear();
    }
}

//! Applier for write-sets delivered by the provider
//!
//! Per delivered write-set:
//! - already covered by the engine checkpoint: pass through commit order
//! - `ROLLBACK`: drop the stored fragments of the transaction
//! - streaming fragment without `TRX_END`: store it, apply nothing yet
//! - `TRX_END`: apply the stored fragments and the payload, commit
//!
//! Every path except the skip commits through `commit_in_order`, so the
//! engine checkpoint follows each ordered write-set.

use bytes::Bytes;

use super::context::HighPriorityContext;
use super::error_log::ApplyErrorEntry;
use super::errors::{ApplyError, ApplyResult};
use super::ApplierService;
use crate::commit::{commit_in_order, skip_in_order, WsrepError, WsrepResult};
use crate::context::ReplicationContext;
use crate::fragment::{Fragment, FragmentOp};
use crate::observability::{Event, Logger};
use crate::provider::{ReceivedWriteSet, WsHandle};
use crate::types::{WriteSetFlags, WriteSetMeta};

/// What applying one delivered write-set did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Committed,
    FragmentStored,
    RolledBack,
    /// Already part of the engine state.
    Skipped,
}

/// One applier thread's execution context.
pub struct RemoteApplier<'a> {
    ctx: &'a ReplicationContext,
    hp: HighPriorityContext,
}

impl<'a> RemoteApplier<'a> {
    pub fn new(ctx: &'a ReplicationContext, id: usize) -> Self {
        Self {
            ctx,
            hp: HighPriorityContext::applier(ctx.node_id(), id),
        }
    }

    pub fn context(&self) -> &HighPriorityContext {
        &self.hp
    }

    /// Apply one delivered write-set in its commit order.
    pub fn apply(&mut self, received: ReceivedWriteSet) -> WsrepResult<ApplyOutcome> {
        let ReceivedWriteSet { handle, meta, data } = received;

        if self.already_applied(&meta) {
            let passed = skip_in_order(self.ctx, &handle, &meta);
            self.ctx.provider().release(&handle);
            passed?;
            Logger::trace(
                Event::CommitOrdered,
                &[("seqno", &meta.seqno().to_string()), ("skipped", "true")],
            );
            return Ok(ApplyOutcome::Skipped);
        }

        self.start_transaction(Some(handle), &meta)?;
        let outcome = match self.prepare(&meta, &data) {
            Ok(outcome) => outcome,
            Err(e) => {
                let err = self.fail(&meta, &data, e);
                self.cleanup();
                return Err(err);
            }
        };
        let committed = self.commit(&meta);
        self.cleanup();
        committed?;

        self.ctx.metrics().increment_remote_applied();
        Ok(outcome)
    }

    fn already_applied(&self, meta: &WriteSetMeta) -> bool {
        let checkpoint = self.ctx.engine().checkpoint();
        checkpoint.is_defined()
            && checkpoint.uuid == meta.gtid.uuid
            && meta.seqno() <= checkpoint.seqno
    }

    /// Apply or stage everything the write-set carries, short of commit.
    fn prepare(&mut self, meta: &WriteSetMeta, data: &Bytes) -> ApplyResult<ApplyOutcome> {
        let server_id = meta.stid.node;
        let trx_id = meta.stid.trx_id;

        if meta.flags.contains(WriteSetFlags::ROLLBACK) {
            self.hp.stage(FragmentOp::RemoveAll { server_id, trx_id });
            return Ok(ApplyOutcome::RolledBack);
        }

        if !meta.flags.contains(WriteSetFlags::TRX_END) {
            let fragment = Fragment::certified(server_id, trx_id, meta.seqno(), meta.flags, data.clone());
            self.hp.stage(FragmentOp::Append(fragment));
            return Ok(ApplyOutcome::FragmentStored);
        }

        let stored = self.ctx.store().fragments_of(server_id, trx_id)?;
        for fragment in stored.iter().filter(|f| !f.is_orphan()) {
            self.apply_write_set(meta, &fragment.payload)?;
        }
        self.apply_write_set(meta, data)?;
        if !stored.is_empty() {
            self.hp.stage(FragmentOp::RemoveAll { server_id, trx_id });
        }
        Ok(ApplyOutcome::Committed)
    }

    /// Record the failure, then roll back and give up the commit slot.
    fn fail(&mut self, meta: &WriteSetMeta, data: &[u8], error: ApplyError) -> WsrepError {
        let seqno = meta.seqno().to_string();
        let trx_id = meta.stid.trx_id.to_string();
        self.ctx.metrics().increment_apply_failures();
        Logger::error(
            Event::ApplyError,
            &[
                ("seqno", &seqno),
                ("source", &meta.stid.node.to_string()),
                ("trx_id", &trx_id),
                ("error", &error.to_string()),
            ],
        );

        if let Some(log) = self.ctx.apply_errors() {
            match log.dump(&ApplyErrorEntry::new(meta, data, &error)) {
                Ok(()) => Logger::info(
                    Event::ApplyErrorDumped,
                    &[("seqno", &seqno), ("path", &log.path().display().to_string())],
                ),
                Err(e) => Logger::error(
                    Event::ApplyError,
                    &[("seqno", &seqno), ("dump_error", &e.to_string())],
                ),
            }
        }

        if let Err(e) = self.rollback(meta) {
            Logger::error(
                Event::ProviderFailure,
                &[("seqno", &seqno), ("trx_id", &trx_id), ("error", &e.to_string())],
            );
        }
        WsrepError::Apply(error)
    }
}

impl ApplierService for RemoteApplier<'_> {
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
        let provider = self.ctx.provider();

        let status = provider.commit_order_enter(ws, meta);
        if !status.is_ok() {
            if let Some(txn) = engine_txn {
                self.ctx.engine().rollback(txn)?;
            }
            return Err(WsrepError::from_status(status, meta.stid.trx_id));
        }
        commit_in_order(self.ctx, ws, meta, engine_txn, staged)?;
        provider.post_commit(ws);
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
        rolled_back.map_err(WsrepError::from)
    }

    fn cleanup(&mut self) {
        if let Some(ws) = self.hp.take_ws() {
            self.ctx.provider().release(&ws);
        }
        self.hp.clear();
    }
}

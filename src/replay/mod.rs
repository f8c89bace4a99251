//! Replay of BF-aborted certified transactions
//!
//! A transaction that was BF-aborted after certification still owns its
//! commit position. The session hands it here instead of rolling back:
//! the local engine work is discarded and the certified payload (stored
//! fragments first, then the final write-set) is applied again on a
//! replayer context at the same seqno. The caller gets the original
//! statement result back.
//!
//! Certification failure is the only expected failure and surfaces as a
//! deadlock. Anything else is a divergence from the cluster and fatal.

use bytes::Bytes;

use crate::applier::{ApplierService, Replayer};
use crate::commit::{replicate_rollback, WsrepError, WsrepResult};
use crate::context::ReplicationContext;
use crate::observability::{Event, Logger};
use crate::transaction::{StatementResult, Transaction};
use crate::types::{ClientExecMode, ConflictState, QueryState, WriteSetMeta};

pub struct ReplayEngine<'a> {
    ctx: &'a ReplicationContext,
}

impl<'a> ReplayEngine<'a> {
    pub fn new(ctx: &'a ReplicationContext) -> Self {
        Self { ctx }
    }

    /// Replay `trx`, which must be in `MustReplay`.
    pub fn replay(&self, trx: &mut Transaction) -> WsrepResult<StatementResult> {
        let (meta, fragments_sent) = {
            let mut st = trx.handle.lock();
            st.transition(ConflictState::Replaying)?;
            (*st.meta(), st.fragments_sent())
        };
        Logger::info(
            Event::ReplayBegin,
            &[
                ("trx_id", &trx.trx_id.to_string()),
                ("seqno", &meta.seqno().to_string()),
                ("fragments", &fragments_sent.to_string()),
            ],
        );

        let outcome = self.run(trx, &meta, fragments_sent);
        self.ctx.replay_gate().leave();
        outcome
    }

    fn run(
        &self,
        trx: &mut Transaction,
        meta: &WriteSetMeta,
        fragments_sent: u64,
    ) -> WsrepResult<StatementResult> {
        let trx_id = trx.trx_id;
        let engine_txn = trx.handle.lock().engine_txn.take();
        if let Some(txn) = engine_txn {
            if let Err(e) = self.ctx.engine().rollback(txn) {
                Logger::warn(
                    Event::ReplayBegin,
                    &[("trx_id", &trx_id.to_string()), ("rollback_error", &e.to_string())],
                );
            }
        }

        let payloads = self.payloads(trx, fragments_sent)?;
        let ws = trx
            .ws
            .take()
            .ok_or_else(|| WsrepError::invalid_state("write-set handle already replayed"))?;

        let mut replayer = Replayer::new(self.ctx).with_order_entered(trx.order_entered);
        if let Err(e) = replayer.start_transaction(Some(ws), meta) {
            self.ctx.fatal(&format!("replay of {} could not start: {}", meta.gtid, e));
        }
        for payload in &payloads {
            if let Err(e) = replayer.apply_write_set(meta, payload) {
                self.ctx.fatal(&format!("replay of {} failed to apply: {}", meta.gtid, e));
            }
        }
        replayer.stage(std::mem::take(&mut trx.staged));

        match replayer.commit(meta) {
            Ok(()) => {
                replayer.cleanup();
                trx.order_entered = false;
                self.finish(trx, meta, fragments_sent)
            }
            Err(WsrepError::CertificationFailure { .. }) => {
                if let Err(e) = replayer.rollback(meta) {
                    Logger::error(
                        Event::ProviderFailure,
                        &[("trx_id", &trx_id.to_string()), ("error", &e.to_string())],
                    );
                }
                replayer.cleanup();
                trx.order_entered = false;
                self.fail(trx, meta, fragments_sent)
            }
            Err(e) => self.ctx.fatal(&format!("replay of {} failed to commit: {}", meta.gtid, e)),
        }
    }

    /// Certified fragments in seqno order, then the final write-set.
    fn payloads(&self, trx: &Transaction, fragments_sent: u64) -> WsrepResult<Vec<Bytes>> {
        let mut payloads = Vec::new();
        if fragments_sent > 0 {
            let stored = self.ctx.store().fragments_of(self.ctx.node_id(), trx.trx_id)?;
            payloads.extend(
                stored
                    .into_iter()
                    .filter(|f| !f.is_orphan())
                    .map(|f| f.payload),
            );
        }
        if !trx.certified_payload.is_empty() {
            payloads.push(trx.certified_payload.clone());
        }
        Ok(payloads)
    }

    fn finish(
        &self,
        trx: &mut Transaction,
        meta: &WriteSetMeta,
        fragments_sent: u64,
    ) -> WsrepResult<StatementResult> {
        {
            let mut st = trx.handle.lock();
            st.transition(ConflictState::NoConflict)?;
            st.exec_mode = ClientExecMode::LocalState;
            st.query_state = QueryState::Idle;
        }
        if fragments_sent > 0 {
            self.ctx.unregister_streaming(trx.trx_id);
        }
        self.ctx.metrics().increment_replays();
        self.ctx.metrics().increment_commits();
        Logger::info(
            Event::ReplayComplete,
            &[
                ("trx_id", &trx.trx_id.to_string()),
                ("seqno", &meta.seqno().to_string()),
            ],
        );
        Ok(trx.result())
    }

    fn fail(
        &self,
        trx: &mut Transaction,
        meta: &WriteSetMeta,
        fragments_sent: u64,
    ) -> WsrepResult<StatementResult> {
        let trx_id = trx.trx_id;
        if fragments_sent > 0 || trx.replicated_any {
            replicate_rollback(self.ctx, trx_id);
            if let Err(e) = self.ctx.store().remove_all(self.ctx.node_id(), trx_id) {
                Logger::error(
                    Event::StoreFailure,
                    &[("trx_id", &trx_id.to_string()), ("error", &e.to_string())],
                );
            }
            self.ctx.unregister_streaming(trx_id);
        }
        trx.builder.clear();
        {
            let mut st = trx.handle.lock();
            st.transition(ConflictState::Aborted)?;
            st.exec_mode = ClientExecMode::LocalState;
            st.query_state = QueryState::Idle;
            st.rollback_replicated = true;
        }
        self.ctx.metrics().increment_replay_failures();
        Logger::warn(
            Event::ReplayFailed,
            &[
                ("trx_id", &trx_id.to_string()),
                ("seqno", &meta.seqno().to_string()),
            ],
        );
        Err(WsrepError::Deadlock { trx_id })
    }
}

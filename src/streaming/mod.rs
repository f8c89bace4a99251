//! Streaming replication
//!
//! A long transaction is replicated in certified fragments instead of one
//! write-set at commit. Per fragment:
//! 1. Wait for replays to drain, fail fast on `MustAbort`
//! 2. Flush the builder since the previous cut (`TRX_START` on the first)
//! 3. Record the fragment in the store with an unset seqno
//! 4. Certify through the provider without `TRX_END`
//! 5. Inside commit order, stamp the certified seqno on the stored row
//!
//! `fragments_sent` only grows, and only after a fragment was ordered.

mod state;

pub use state::StreamingState;

use crate::commit::{WsrepError, WsrepResult};
use crate::context::ReplicationContext;
use crate::crash_point::{maybe_crash, points};
use crate::fragment::{Fragment, FragmentKey, FragmentStore};
use crate::observability::{Event, Logger};
use crate::provider::Status;
use crate::transaction::Transaction;
use crate::types::{ClientExecMode, ConflictState, QueryState, Seqno, WriteSetFlags};

/// Cuts and replicates fragments for one session's transaction.
pub struct FragmentManager<'a> {
    ctx: &'a ReplicationContext,
}

impl<'a> FragmentManager<'a> {
    pub fn new(ctx: &'a ReplicationContext) -> Self {
        Self { ctx }
    }

    /// Row boundary: cut when the byte or row threshold was reached.
    pub fn after_row(&self, trx: &mut Transaction) -> WsrepResult<()> {
        if trx.streaming.on_row(trx.builder.pending_bytes()) {
            self.replicate_fragment(trx)?;
        }
        Ok(())
    }

    /// Statement boundary: cut when any threshold was reached.
    pub fn after_statement(&self, trx: &mut Transaction) -> WsrepResult<()> {
        if trx.streaming.on_statement() {
            self.replicate_fragment(trx)?;
        }
        Ok(())
    }

    /// Cut and replicate one fragment. Returns false when there was
    /// nothing to cut.
    pub fn replicate_fragment(&self, trx: &mut Transaction) -> WsrepResult<bool> {
        let handle = trx.handle.clone();
        let trx_id = trx.trx_id;

        self.ctx.replay_gate().wait_drained(self.ctx.cancel_token(), || {
            handle.conflict_state() == ConflictState::MustAbort
        })?;

        let flags = {
            let mut st = handle.lock();
            if st.conflict() == ConflictState::MustAbort {
                return Err(WsrepError::Deadlock { trx_id });
            }
            if st.exec_mode != ClientExecMode::LocalState {
                return Err(WsrepError::invalid_state(format!(
                    "cannot cut a fragment in {} mode",
                    st.exec_mode
                )));
            }
            st.query_state = QueryState::Committing;
            if st.fragments_sent == 0 {
                WriteSetFlags::TRX_START
            } else {
                WriteSetFlags::empty()
            }
        };

        let flushed = match trx.builder.flush(self.ctx.config().max_ws_size) {
            Ok(flushed) => flushed,
            Err(e) => {
                handle.lock().query_state = QueryState::Exec;
                Logger::warn(
                    Event::WriteSetSizeExceeded,
                    &[("trx_id", &trx_id.to_string()), ("error", &e.to_string())],
                );
                return Err(e.into());
            }
        };
        if flushed.is_empty() {
            handle.lock().query_state = QueryState::Exec;
            trx.streaming.reset();
            return Ok(false);
        }

        let node = self.ctx.node_id();
        let fragment = Fragment::uncertified(node, trx_id, flags, flushed.data.clone());
        if let Err(e) = self.ctx.store().append(fragment) {
            Logger::error(
                Event::StoreFailure,
                &[("trx_id", &trx_id.to_string()), ("error", &e.to_string())],
            );
            self.abort_after_failure(trx, ConflictState::MustAbort);
            return Err(e.into());
        }
        Logger::trace(
            Event::FragmentAppended,
            &[("trx_id", &trx_id.to_string()), ("bytes", &flushed.len().to_string())],
        );
        maybe_crash(points::SR_AFTER_FRAGMENT_APPEND);

        let provider = self.ctx.provider();
        let ws = trx.ws()?;
        let mut status = Status::Ok;
        for key in &flushed.keys {
            status = provider.append_key(ws, key);
            if !status.is_ok() {
                break;
            }
        }
        if status.is_ok() {
            status = provider.append_data(ws, &flushed.data);
        }

        let mut meta = handle.meta();
        if status.is_ok() {
            status = provider.pre_commit(handle.conn_id(), ws, flags, &mut meta);
        }
        maybe_crash(points::SR_AFTER_FRAGMENT_CERTIFY);

        let bf_aborted = {
            let mut st = handle.lock();
            st.meta = meta;
            std::mem::replace(&mut st.pending_bf, false)
        };
        if meta.is_ordered() {
            trx.replicated_any = true;
        }

        if status.is_ok() && !bf_aborted {
            status = self.order_fragment(trx, meta.gtid.seqno)?;
            if status.is_ok() {
                self.finish_fragment(trx, flags, flushed.len() as u64, meta.seqno());
                return Ok(true);
            }
        }

        let effective = if status.is_ok() { Status::BfAbort } else { status };
        Logger::warn(
            Event::FragmentFailed,
            &[
                ("trx_id", &trx_id.to_string()),
                ("status", effective.as_str()),
                ("seqno", &meta.seqno().to_string()),
            ],
        );
        let next = if effective == Status::TrxFail {
            ConflictState::CertFailure
        } else {
            ConflictState::MustAbort
        };
        self.abort_after_failure(trx, next);
        Err(WsrepError::from_status(effective, trx_id))
    }

    /// Pass through commit order and stamp the stored row.
    fn order_fragment(&self, trx: &Transaction, seqno: Seqno) -> WsrepResult<Status> {
        let handle = &trx.handle;
        let provider = self.ctx.provider();
        let ws = trx.ws()?;
        let meta = handle.meta();

        handle.lock().waiting_in_provider = true;
        let status = provider.commit_order_enter(ws, &meta);
        handle.lock().waiting_in_provider = false;
        if !status.is_ok() {
            return Ok(status);
        }

        let stamped = self.ctx.store().update_seqno(self.ctx.node_id(), trx.trx_id, seqno);
        maybe_crash(points::SR_AFTER_SEQNO_UPDATE);
        let leave = provider.commit_order_leave(ws, &meta);

        if let Err(e) = stamped {
            Logger::error(
                Event::StoreFailure,
                &[("trx_id", &trx.trx_id.to_string()), ("error", &e.to_string())],
            );
            // Ordered slot already consumed; the rollback event tells peers.
            provider.release(ws);
            self.reset_fragment_state(trx, ConflictState::MustAbort);
            return Err(e.into());
        }
        Ok(leave)
    }

    fn finish_fragment(&self, trx: &mut Transaction, flags: WriteSetFlags, bytes: u64, seqno: Seqno) {
        if let Ok(ws) = trx.ws() {
            self.ctx.provider().release(ws);
        }
        let first = {
            let mut st = trx.handle.lock();
            st.fragments_sent += 1;
            st.streaming = true;
            st.meta.reset_gtid();
            st.query_state = QueryState::Exec;
            st.touch();
            st.fragments_sent == 1
        };
        if first {
            self.ctx.register_streaming(trx.trx_id, &trx.handle);
        }
        trx.streaming.reset();

        let metrics = self.ctx.metrics();
        metrics.increment_fragments();
        metrics.add_ws_bytes(bytes);
        Logger::info(
            Event::FragmentReplicated,
            &[
                ("trx_id", &trx.trx_id.to_string()),
                ("seqno", &seqno.to_string()),
                ("flags", &flags.bits().to_string()),
                ("bytes", &bytes.to_string()),
            ],
        );
    }

    /// Undo provider and store side effects of a fragment that will not
    /// be part of the transaction.
    fn abort_after_failure(&self, trx: &Transaction, next: ConflictState) {
        let provider = self.ctx.provider();
        if let Ok(ws) = trx.ws() {
            if trx.handle.meta().is_ordered() {
                provider.post_rollback(ws);
            }
            provider.release(ws);
        }
        let orphan = FragmentKey::new(self.ctx.node_id(), trx.trx_id, None);
        if let Err(e) = self.ctx.store().remove(orphan) {
            Logger::error(
                Event::StoreFailure,
                &[("trx_id", &trx.trx_id.to_string()), ("error", &e.to_string())],
            );
        }
        self.reset_fragment_state(trx, next);
    }

    fn reset_fragment_state(&self, trx: &Transaction, next: ConflictState) {
        let mut st = trx.handle.lock();
        if st.conflict() == ConflictState::NoConflict {
            // NoConflict -> MustAbort | CertFailure are always legal.
            let _ = st.transition(next);
        }
        st.meta.reset_gtid();
        st.query_state = QueryState::Exec;
        st.pending_bf = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FragmentUnit, ReplicationConfig};
    use crate::engine::MemoryEngine;
    use crate::fragment::MemoryFragmentStore;
    use crate::provider::LoopbackProvider;
    use crate::transaction::TransactionHandle;
    use crate::writeset::ChangeRecord;
    use std::sync::Arc;
    use uuid::Uuid;

    struct Fixture {
        ctx: Arc<ReplicationContext>,
        provider: Arc<LoopbackProvider>,
        store: Arc<MemoryFragmentStore>,
    }

    fn fixture() -> Fixture {
        let provider = Arc::new(LoopbackProvider::new(Uuid::new_v4()));
        let store = Arc::new(MemoryFragmentStore::new());
        let ctx = ReplicationContext::builder(ReplicationConfig::default())
            .provider(provider.clone())
            .engine(Arc::new(MemoryEngine::new()))
            .store(store.clone())
            .build()
            .unwrap();
        Fixture {
            ctx,
            provider,
            store,
        }
    }

    fn transaction(ctx: &ReplicationContext, trx_id: u64) -> Transaction {
        let handle = Arc::new(TransactionHandle::new(ctx.node_id(), 1));
        handle.lock().start(trx_id, false, true).unwrap();
        Transaction::new(handle, trx_id, 0, StreamingState::new(FragmentUnit::Rows, 2))
    }

    fn write(trx: &mut Transaction, key: &str) {
        trx.builder
            .append(&ChangeRecord::insert("t", key.as_bytes().to_vec(), b"v".to_vec()))
            .unwrap();
    }

    #[test]
    fn test_fragments_are_stamped_in_order() {
        let f = fixture();
        let mut trx = transaction(&f.ctx, 5);
        let manager = FragmentManager::new(&f.ctx);

        for key in ["a", "b", "c"] {
            write(&mut trx, key);
            manager.after_row(&mut trx).unwrap();
        }
        write(&mut trx, "d");
        manager.after_row(&mut trx).unwrap();

        let rows = f.store.fragments_of(f.ctx.node_id(), 5).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].seqno, Some(1));
        assert_eq!(rows[0].flags, WriteSetFlags::TRX_START);
        assert_eq!(rows[1].seqno, Some(2));
        assert_eq!(rows[1].flags, WriteSetFlags::empty());
        assert_eq!(trx.handle.fragments_sent(), 2);
        assert!(!trx.handle.meta().is_ordered());
        assert_eq!(f.provider.last_committed(), 2);
    }

    #[test]
    fn test_empty_cut_is_skipped() {
        let f = fixture();
        let mut trx = transaction(&f.ctx, 6);
        assert!(!FragmentManager::new(&f.ctx).replicate_fragment(&mut trx).unwrap());
        assert!(f.store.is_empty());
        assert_eq!(trx.handle.fragments_sent(), 0);
    }

    #[test]
    fn test_certification_failure_removes_orphan() {
        let f = fixture();
        let mut trx = transaction(&f.ctx, 7);
        f.provider.inject_pre_commit(7, Status::TrxFail);
        write(&mut trx, "a");
        let err = FragmentManager::new(&f.ctx).replicate_fragment(&mut trx).unwrap_err();
        assert!(matches!(err, WsrepError::CertificationFailure { trx_id: 7 }));
        assert!(f.store.is_empty());
        assert_eq!(trx.handle.conflict_state(), ConflictState::CertFailure);
        assert_eq!(trx.handle.fragments_sent(), 0);
    }

    #[test]
    fn test_store_failure_aborts_transaction() {
        let f = fixture();
        let mut trx = transaction(&f.ctx, 8);
        f.store.set_failing(true);
        write(&mut trx, "a");
        let err = FragmentManager::new(&f.ctx).replicate_fragment(&mut trx).unwrap_err();
        assert!(matches!(err, WsrepError::Store(_)));
        assert_eq!(trx.handle.conflict_state(), ConflictState::MustAbort);
        assert!(f.provider.certified().is_empty());
    }

    #[test]
    fn test_must_abort_fails_fast() {
        let f = fixture();
        let mut trx = transaction(&f.ctx, 9);
        trx.handle.lock().transition(ConflictState::MustAbort).unwrap();
        write(&mut trx, "a");
        let err = FragmentManager::new(&f.ctx).replicate_fragment(&mut trx).unwrap_err();
        assert!(matches!(err, WsrepError::Deadlock { trx_id: 9 }));
        assert!(f.store.is_empty());
        assert_eq!(trx.builder.pending_rows(), 1);
    }
}

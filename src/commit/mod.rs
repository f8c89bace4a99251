//! Commit orchestration
//!
//! Drives one local transaction through the two-phase commit hooks:
//! 1. `before_prepare`: local only, no GTID may be assigned yet
//! 2. `after_prepare`: drain replays, then certify with `TRX_END`
//! 3. `before_commit`: certify here when prepare was skipped
//! 4. `ordered_commit`: engine commit inside the provider's commit order
//! 5. `after_commit`: release the write-set
//!
//! The rollback side is `before_rollback` / `after_rollback`. Every hook
//! returns `Ok` to proceed; an error aborts the enclosing operation.
//! High priority executions (appliers, replayers, isolated DDL) see the
//! local hooks as no-ops.

mod errors;
mod isolation;
mod ordered;

pub use errors::{SqlError, WsrepError, WsrepResult};

pub(crate) use ordered::{commit_in_order, skip_in_order};

use crate::context::ReplicationContext;
use crate::crash_point::{maybe_crash, points};
use crate::fragment::FragmentBatch;
use crate::observability::{Event, Logger};
use crate::provider::Status;
use crate::transaction::Transaction;
use crate::types::{ClientExecMode, ConflictState, QueryState, TrxId, WriteSetFlags};

/// How much work an `after_rollback` undoes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RollbackScope {
    Statement,
    Transaction,
}

/// Commit and rollback hooks bound to a replication context.
pub struct Orchestrator<'a> {
    ctx: &'a ReplicationContext,
}

impl<'a> Orchestrator<'a> {
    pub fn new(ctx: &'a ReplicationContext) -> Self {
        Self { ctx }
    }

    fn is_local(&self, trx: &Transaction) -> bool {
        self.ctx.is_enabled() && !trx.handle.exec_mode().is_high_priority()
    }

    pub fn before_prepare(&self, trx: &mut Transaction) -> WsrepResult<()> {
        if !self.is_local(trx) {
            return Ok(());
        }
        let streaming = {
            let st = trx.handle.lock();
            if st.meta().is_ordered() && !trx.certified {
                return Err(WsrepError::invalid_state(format!(
                    "transaction {} has a GTID before prepare",
                    trx.trx_id
                )));
            }
            if st.conflict() == ConflictState::MustAbort {
                return Err(WsrepError::Deadlock { trx_id: trx.trx_id });
            }
            st.fragments_sent() > 0
        };
        if streaming && trx.staged.is_empty() {
            trx.staged.remove_all(self.ctx.node_id(), trx.trx_id);
        }
        Ok(())
    }

    pub fn after_prepare(&self, trx: &mut Transaction) -> WsrepResult<()> {
        if !self.is_local(trx) {
            return Ok(());
        }
        self.certify(trx)
    }

    /// Certify now if the transaction skipped the prepare phase.
    pub fn before_commit(&self, trx: &mut Transaction) -> WsrepResult<()> {
        if !self.is_local(trx) || trx.certified || trx.read_only {
            return Ok(());
        }
        self.before_prepare(trx)?;
        self.certify(trx)
    }

    /// Replicate the final write-set and map the provider outcome onto
    /// the conflict state.
    fn certify(&self, trx: &mut Transaction) -> WsrepResult<()> {
        if trx.certified || trx.read_only {
            return Ok(());
        }
        let handle = trx.handle.clone();
        let trx_id = trx.trx_id;
        let trx_label = trx_id.to_string();

        self.ctx.replay_gate().wait_drained(self.ctx.cancel_token(), || {
            handle.conflict_state() == ConflictState::MustAbort
        })?;

        let fragments_sent = {
            let mut st = handle.lock();
            if st.conflict() == ConflictState::MustAbort {
                return Err(WsrepError::Deadlock { trx_id });
            }
            st.query_state = QueryState::Committing;
            st.fragments_sent()
        };

        let flushed = match trx.builder.flush(self.ctx.config().max_ws_size) {
            Ok(flushed) => flushed,
            Err(e) => {
                handle.lock().query_state = QueryState::Exec;
                Logger::warn(
                    Event::WriteSetSizeExceeded,
                    &[("trx_id", &trx_label), ("error", &e.to_string())],
                );
                return Err(e.into());
            }
        };

        if flushed.is_empty() {
            if trx.affected_rows > 0 {
                Logger::warn(
                    Event::WriteSetEmpty,
                    &[
                        ("trx_id", &trx_label),
                        ("affected_rows", &trx.affected_rows.to_string()),
                        ("streaming", &(fragments_sent > 0).to_string()),
                    ],
                );
                if fragments_sent == 0 {
                    handle.lock().query_state = QueryState::Exec;
                    return Err(WsrepError::EmptyWriteSet {
                        trx_id,
                        rows: trx.affected_rows,
                    });
                }
            } else if fragments_sent == 0 {
                handle.lock().query_state = QueryState::Exec;
                trx.read_only = true;
                return Ok(());
            }
        }

        let mut flags = WriteSetFlags::TRX_END;
        if fragments_sent == 0 {
            flags |= WriteSetFlags::TRX_START;
        }
        if flushed.keys.is_empty() {
            flags |= WriteSetFlags::PA_UNSAFE;
        }

        let provider = self.ctx.provider();
        let ws = trx.ws()?;
        let mut status = Status::Ok;
        for key in &flushed.keys {
            status = provider.append_key(ws, key);
            if !status.is_ok() {
                break;
            }
        }
        if status.is_ok() && !flushed.is_empty() {
            status = provider.append_data(ws, &flushed.data);
        }
        let mut meta = handle.meta();
        if status.is_ok() {
            status = provider.pre_commit(handle.conn_id(), ws, flags, &mut meta);
        }
        trx.certified_payload = flushed.data;
        maybe_crash(points::COMMIT_AFTER_CERTIFY);

        let mut st = handle.lock();
        st.meta = meta;
        let bf_aborted = std::mem::replace(&mut st.pending_bf, false);
        match status {
            Status::Ok if !bf_aborted => {
                st.exec_mode = ClientExecMode::LocalCommit;
                trx.certified = true;
                self.ctx.metrics().add_ws_bytes(trx.certified_payload.len() as u64);
                Logger::trace(
                    Event::CertifyOk,
                    &[("trx_id", &trx_label), ("seqno", &meta.seqno().to_string())],
                );
                Ok(())
            }
            Status::Ok | Status::BfAbort if meta.is_ordered() => {
                st.transition(ConflictState::MustReplay)?;
                st.exec_mode = ClientExecMode::LocalCommit;
                trx.certified = true;
                self.ctx.replay_gate().enter();
                Logger::info(
                    Event::CertifyBfAborted,
                    &[("trx_id", &trx_label), ("seqno", &meta.seqno().to_string())],
                );
                Err(WsrepError::MustReplay { trx_id })
            }
            Status::Ok | Status::BfAbort => {
                st.query_state = QueryState::Exec;
                if st.conflict() == ConflictState::NoConflict {
                    st.transition(ConflictState::MustAbort)?;
                }
                Logger::info(Event::CertifyBfAborted, &[("trx_id", &trx_label)]);
                Err(WsrepError::Deadlock { trx_id })
            }
            Status::TrxFail => {
                st.query_state = QueryState::Exec;
                if st.conflict() == ConflictState::NoConflict {
                    st.transition(ConflictState::CertFailure)?;
                }
                self.ctx.metrics().increment_cert_failures();
                Logger::info(Event::CertifyFailed, &[("trx_id", &trx_label)]);
                Err(WsrepError::CertificationFailure { trx_id })
            }
            other => {
                st.query_state = QueryState::Exec;
                Logger::error(
                    Event::ProviderFailure,
                    &[("trx_id", &trx_label), ("status", other.as_str())],
                );
                Err(match other {
                    Status::SizeExceeded => WsrepError::SizeExceeded {
                        size: trx.certified_payload.len() as u64,
                        max: self.ctx.config().max_ws_size,
                    },
                    _ => WsrepError::from_status(other, trx_id),
                })
            }
        }
    }

    /// Commit inside the provider's commit order.
    pub fn ordered_commit(&self, trx: &mut Transaction) -> WsrepResult<()> {
        let engine = self.ctx.engine();
        if !self.ctx.is_enabled() || trx.read_only {
            let txn = trx.handle.lock().engine_txn.take();
            if let Some(txn) = txn {
                engine.commit(txn, None)?;
            }
            return Ok(());
        }
        if trx.handle.exec_mode().is_high_priority() {
            return Ok(());
        }
        if !trx.certified {
            return Err(WsrepError::invalid_state(format!(
                "transaction {} reached ordered commit uncertified",
                trx.trx_id
            )));
        }

        let trx_id = trx.trx_id;
        let handle = trx.handle.clone();
        {
            let mut st = handle.lock();
            if st.conflict() == ConflictState::MustReplay {
                return Err(WsrepError::MustReplay { trx_id });
            }
            st.waiting_in_provider = !trx.order_entered;
        }

        let meta = handle.meta();
        let status = if trx.order_entered {
            Status::Ok
        } else {
            self.ctx.provider().commit_order_enter(trx.ws()?, &meta)
        };

        let engine_txn = {
            let mut st = handle.lock();
            st.waiting_in_provider = false;
            if status.is_ok() {
                trx.order_entered = true;
            }
            if st.conflict() == ConflictState::MustReplay {
                return Err(WsrepError::MustReplay { trx_id });
            }
            if !status.is_ok() {
                return Err(WsrepError::from_status(status, trx_id));
            }
            st.query_state = QueryState::OrderedCommit;
            st.engine_txn.take()
        };

        let staged = std::mem::take(&mut trx.staged);
        commit_in_order(self.ctx, trx.ws()?, &meta, engine_txn, staged)?;
        self.ctx.metrics().increment_commits();
        Ok(())
    }

    pub fn after_commit(&self, trx: &mut Transaction) -> WsrepResult<()> {
        if !self.ctx.is_enabled() {
            return Ok(());
        }
        if !trx.read_only {
            if let Ok(ws) = trx.ws() {
                let provider = self.ctx.provider();
                provider.post_commit(ws);
                provider.release(ws);
            }
        }
        let mut st = trx.handle.lock();
        if st.conflict() == ConflictState::MustAbort {
            Logger::info(Event::CommitAbortSwallowed, &[("trx_id", &trx.trx_id.to_string())]);
        }
        if st.fragments_sent() > 0 {
            self.ctx.unregister_streaming(trx.trx_id);
        }
        st.end_commit()
    }

    /// Enter local rollback and tell peers to drop streamed fragments.
    pub fn before_rollback(&self, trx: &mut Transaction) -> WsrepResult<()> {
        if !self.ctx.is_enabled() {
            return Ok(());
        }
        let replicate = {
            let mut st = trx.handle.lock();
            if matches!(
                st.exec_mode,
                ClientExecMode::LocalState | ClientExecMode::LocalCommit
            ) {
                st.exec_mode = ClientExecMode::LocalRollback;
            }
            if st.conflict() == ConflictState::MustAbort {
                st.transition(ConflictState::Aborting)?;
            }
            let replicate = (trx.replicated_any || st.fragments_sent() > 0) && !st.rollback_replicated;
            st.rollback_replicated |= replicate;
            replicate
        };
        if replicate {
            replicate_rollback(self.ctx, trx.trx_id);
        }
        Ok(())
    }

    pub fn after_rollback(&self, trx: &mut Transaction, scope: RollbackScope) -> WsrepResult<()> {
        match scope {
            RollbackScope::Statement => self.rollback_statement(trx),
            RollbackScope::Transaction => {
                if self.ctx.is_enabled() {
                    self.release_after_rollback(trx);
                }
                Ok(())
            }
        }
    }

    /// Undo the current statement, or escalate to a full rollback when a
    /// fragment was cut in the middle of it.
    fn rollback_statement(&self, trx: &mut Transaction) -> WsrepResult<()> {
        if self.ctx.is_enabled()
            && trx.handle.fragments_sent() > 0
            && !trx.builder.statement_rollback_is_safe()
        {
            Logger::warn(
                Event::StatementRollbackEscalated,
                &[("trx_id", &trx.trx_id.to_string())],
            );
            let mut st = trx.handle.lock();
            if st.conflict() == ConflictState::NoConflict {
                st.transition(ConflictState::MustAbort)?;
            }
            return Err(WsrepError::Deadlock { trx_id: trx.trx_id });
        }

        trx.builder.rollback_statement();
        let txn = trx.handle.lock().engine_txn;
        if let (Some(txn), Some(savepoint)) = (txn, trx.statement_savepoint) {
            self.ctx.engine().rollback_to_savepoint(txn, savepoint)?;
        }
        Ok(())
    }

    /// Provider and store cleanup after the engine rolled back.
    fn release_after_rollback(&self, trx: &mut Transaction) {
        let provider = self.ctx.provider();
        let (ordered, fragments_sent) = {
            let st = trx.handle.lock();
            (st.meta().is_ordered(), st.fragments_sent())
        };
        if let Ok(ws) = trx.ws() {
            if ordered {
                provider.post_rollback(ws);
            }
            provider.release(ws);
        }

        if fragments_sent > 0 || trx.replicated_any {
            match self.ctx.store().remove_all(self.ctx.node_id(), trx.trx_id) {
                Ok(removed) => Logger::trace(
                    Event::FragmentsRemoved,
                    &[("trx_id", &trx.trx_id.to_string()), ("count", &removed.to_string())],
                ),
                Err(e) => Logger::error(
                    Event::StoreFailure,
                    &[("trx_id", &trx.trx_id.to_string()), ("error", &e.to_string())],
                ),
            }
            self.ctx.unregister_streaming(trx.trx_id);
        }
        trx.staged = FragmentBatch::new();
        trx.builder.clear();

        let mut st = trx.handle.lock();
        if st.conflict() == ConflictState::Aborting {
            // Aborting -> Aborted is always legal.
            let _ = st.transition(ConflictState::Aborted);
        } else if st.conflict() == ConflictState::Aborted {
            // Finished by the rollbacker, which counted it.
            st.query_state = QueryState::Idle;
            return;
        }
        st.meta.reset_gtid();
        st.query_state = QueryState::Idle;
        self.ctx.metrics().increment_rollbacks();
    }
}

/// Replicate a rollback event so peers discard the transaction's fragments.
pub(crate) fn replicate_rollback(ctx: &ReplicationContext, trx_id: TrxId) {
    let status = ctx.provider().rollback(trx_id, &[]);
    if status.is_ok() {
        Logger::info(Event::RollbackReplicated, &[("trx_id", &trx_id.to_string())]);
    } else {
        Logger::warn(
            Event::ProviderFailure,
            &[("trx_id", &trx_id.to_string()), ("status", status.as_str())],
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ReplicationConfig;
    use crate::engine::{MemoryEngine, StorageEngine};
    use crate::fragment::{Fragment, FragmentStore, MemoryFragmentStore};
    use crate::provider::LoopbackProvider;
    use crate::streaming::StreamingState;
    use crate::transaction::TransactionHandle;
    use crate::writeset::{CertKey, ChangeRecord};
    use std::sync::Arc;
    use uuid::Uuid;

    struct Fixture {
        ctx: Arc<ReplicationContext>,
        provider: Arc<LoopbackProvider>,
        engine: Arc<MemoryEngine>,
        store: Arc<MemoryFragmentStore>,
    }

    fn fixture_with(config: ReplicationConfig) -> Fixture {
        let provider = Arc::new(LoopbackProvider::new(Uuid::new_v4()));
        let engine = Arc::new(MemoryEngine::new());
        let store = Arc::new(MemoryFragmentStore::new());
        let ctx = ReplicationContext::builder(config)
            .provider(provider.clone())
            .engine(engine.clone())
            .store(store.clone())
            .build()
            .unwrap();
        Fixture {
            ctx,
            provider,
            engine,
            store,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(ReplicationConfig::default())
    }

    fn begin(f: &Fixture, trx_id: u64) -> Transaction {
        let handle = Arc::new(TransactionHandle::new(f.ctx.node_id(), trx_id));
        {
            let mut st = handle.lock();
            st.start(trx_id, false, false).unwrap();
            st.engine_txn = Some(f.engine.begin());
        }
        Transaction::new(handle, trx_id, 0, StreamingState::disabled())
    }

    fn write(f: &Fixture, trx: &mut Transaction, key: &str, value: &str) {
        let record = ChangeRecord::insert("t", key.as_bytes().to_vec(), value.as_bytes().to_vec());
        let txn = trx.handle.lock().engine_txn.unwrap();
        f.engine.apply(txn, &record).unwrap();
        trx.builder.append(&record).unwrap();
        trx.affected_rows += 1;
    }

    fn commit(f: &Fixture, trx: &mut Transaction) -> WsrepResult<()> {
        let orchestrator = Orchestrator::new(&f.ctx);
        orchestrator.before_prepare(trx)?;
        orchestrator.after_prepare(trx)?;
        orchestrator.before_commit(trx)?;
        orchestrator.ordered_commit(trx)?;
        orchestrator.after_commit(trx)
    }

    #[test]
    fn test_commit_records_checkpoint() {
        let f = fixture();
        let mut trx = begin(&f, 1);
        write(&f, &mut trx, "a", "1");
        commit(&f, &mut trx).unwrap();

        assert_eq!(f.engine.get("t", b"a"), Some(b"1".to_vec()));
        let checkpoint = f.engine.checkpoint();
        assert_eq!(checkpoint.seqno, 1);
        assert_eq!(checkpoint.uuid, f.provider.cluster_uuid());
        assert_eq!(f.provider.last_committed(), 1);
        assert_eq!(f.provider.open_write_sets(), 0);
        assert_eq!(trx.handle.exec_mode(), ClientExecMode::LocalCommit);

        let certified = f.provider.certified();
        assert_eq!(certified.len(), 1);
        assert!(certified[0].meta.flags.is_complete());
        assert_eq!(f.ctx.metrics().snapshot().commits, 1);
    }

    #[test]
    fn test_after_commit_settles_conflict_state() {
        let f = fixture();
        let mut trx = begin(&f, 11);
        write(&f, &mut trx, "a", "1");
        commit(&f, &mut trx).unwrap();
        assert_eq!(trx.handle.conflict_state(), ConflictState::NoConflict);

        // A BF-abort that lands after the ordered commit is swallowed.
        let mut late = begin(&f, 12);
        write(&f, &mut late, "b", "1");
        let orchestrator = Orchestrator::new(&f.ctx);
        orchestrator.before_prepare(&mut late).unwrap();
        orchestrator.after_prepare(&mut late).unwrap();
        orchestrator.before_commit(&mut late).unwrap();
        orchestrator.ordered_commit(&mut late).unwrap();
        late.handle.lock().transition(ConflictState::MustAbort).unwrap();
        orchestrator.after_commit(&mut late).unwrap();
        assert_eq!(late.handle.conflict_state(), ConflictState::MustAbort);
        assert_eq!(f.engine.get("t", b"b"), Some(b"1".to_vec()));
    }

    #[test]
    fn test_size_exceeded_appends_nothing() {
        let config = ReplicationConfig {
            max_ws_size: 16,
            ..ReplicationConfig::default()
        };
        let f = fixture_with(config);
        let mut trx = begin(&f, 2);
        write(&f, &mut trx, "a", "a value well past sixteen bytes");

        let orchestrator = Orchestrator::new(&f.ctx);
        let err = orchestrator.after_prepare(&mut trx).unwrap_err();
        assert!(matches!(err, WsrepError::SizeExceeded { max: 16, .. }));
        assert_eq!(f.provider.open_write_sets(), 0);
        assert!(f.provider.certified().is_empty());
        assert_eq!(trx.handle.query_state(), QueryState::Exec);
    }

    #[test]
    fn test_certification_failure() {
        let f = fixture();
        let mut trx = begin(&f, 3);
        write(&f, &mut trx, "a", "1");
        f.provider.inject_pre_commit(3, Status::TrxFail);

        let err = commit(&f, &mut trx).unwrap_err();
        assert!(matches!(err, WsrepError::CertificationFailure { trx_id: 3 }));
        assert_eq!(trx.handle.conflict_state(), ConflictState::CertFailure);
        assert_eq!(f.ctx.metrics().snapshot().cert_failures, 1);
        assert_eq!(err.to_sql_error(), SqlError::Deadlock);
    }

    #[test]
    fn test_ordered_bf_abort_schedules_replay() {
        let f = fixture();
        let mut trx = begin(&f, 4);
        write(&f, &mut trx, "a", "1");
        f.provider.inject_pre_commit(4, Status::BfAbort);

        let err = commit(&f, &mut trx).unwrap_err();
        assert!(matches!(err, WsrepError::MustReplay { trx_id: 4 }));
        assert_eq!(trx.handle.conflict_state(), ConflictState::MustReplay);
        assert!(trx.is_certified());
        assert!(trx.handle.meta().is_ordered());
        assert_eq!(f.ctx.replay_gate().active(), 1);
        assert_eq!(f.engine.get("t", b"a"), None);
    }

    #[test]
    fn test_empty_write_set_with_rows_fails() {
        let f = fixture();
        let mut trx = begin(&f, 5);
        trx.affected_rows = 3;

        let err = commit(&f, &mut trx).unwrap_err();
        assert!(matches!(err, WsrepError::EmptyWriteSet { rows: 3, .. }));
        assert!(f.provider.certified().is_empty());
    }

    #[test]
    fn test_read_only_commits_locally() {
        let f = fixture();
        let mut trx = begin(&f, 6);
        commit(&f, &mut trx).unwrap();

        assert!(trx.read_only);
        assert!(f.provider.certified().is_empty());
        assert_eq!(f.engine.commit_log(), vec![None]);
    }

    #[test]
    fn test_must_abort_fails_before_certify() {
        let f = fixture();
        let mut trx = begin(&f, 7);
        write(&f, &mut trx, "a", "1");
        trx.handle.lock().transition(ConflictState::MustAbort).unwrap();

        let err = commit(&f, &mut trx).unwrap_err();
        assert!(matches!(err, WsrepError::Deadlock { trx_id: 7 }));
        assert!(f.provider.certified().is_empty());
    }

    #[test]
    fn test_commit_removes_streamed_fragments() {
        let f = fixture();
        let mut trx = begin(&f, 8);
        let node = f.ctx.node_id();
        let mut stored = Fragment::uncertified(node, 8, WriteSetFlags::TRX_START, bytes::Bytes::from_static(b"x"));
        stored.seqno = Some(1);
        f.store.append(stored).unwrap();
        trx.handle.lock().fragments_sent = 1;
        write(&f, &mut trx, "b", "2");

        commit(&f, &mut trx).unwrap();
        assert!(f.store.is_empty());
        let certified = f.provider.certified();
        assert_eq!(certified[0].meta.flags, WriteSetFlags::TRX_END);
    }

    #[test]
    fn test_rollback_replicates_once_for_streaming() {
        let f = fixture();
        let mut trx = begin(&f, 9);
        trx.handle.lock().fragments_sent = 2;
        let orchestrator = Orchestrator::new(&f.ctx);

        orchestrator.before_rollback(&mut trx).unwrap();
        orchestrator.before_rollback(&mut trx).unwrap();
        assert_eq!(f.provider.rollbacks(), vec![9]);
        assert_eq!(trx.handle.exec_mode(), ClientExecMode::LocalRollback);

        orchestrator
            .after_rollback(&mut trx, RollbackScope::Transaction)
            .unwrap();
        assert_eq!(f.ctx.metrics().snapshot().rollbacks, 1);
    }

    #[test]
    fn test_bf_aborted_rollback_reaches_aborted() {
        let f = fixture();
        let mut trx = begin(&f, 10);
        trx.handle.lock().transition(ConflictState::MustAbort).unwrap();
        let orchestrator = Orchestrator::new(&f.ctx);

        orchestrator.before_rollback(&mut trx).unwrap();
        assert_eq!(trx.handle.conflict_state(), ConflictState::Aborting);
        orchestrator
            .after_rollback(&mut trx, RollbackScope::Transaction)
            .unwrap();
        assert_eq!(trx.handle.conflict_state(), ConflictState::Aborted);
        assert!(f.provider.rollbacks().is_empty());
    }

    #[test]
    fn test_statement_rollback_restores_savepoint() {
        let f = fixture();
        let mut trx = begin(&f, 11);
        write(&f, &mut trx, "a", "1");

        let txn = trx.handle.lock().engine_txn.unwrap();
        trx.statement_savepoint = Some(f.engine.savepoint(txn).unwrap());
        trx.builder.begin_statement();
        write(&f, &mut trx, "b", "2");

        Orchestrator::new(&f.ctx)
            .after_rollback(&mut trx, RollbackScope::Statement)
            .unwrap();
        commit(&f, &mut trx).unwrap();
        assert_eq!(f.engine.get("t", b"a"), Some(b"1".to_vec()));
        assert_eq!(f.engine.get("t", b"b"), None);
        assert_eq!(f.provider.certified()[0].keys, vec![CertKey::new("t", b"a".to_vec())]);
    }

    #[test]
    fn test_unsafe_statement_rollback_escalates() {
        let f = fixture();
        let mut trx = begin(&f, 12);
        trx.handle.lock().fragments_sent = 1;
        trx.builder.begin_statement();
        write(&f, &mut trx, "a", "1");
        trx.builder.flush(u64::MAX).unwrap();

        let err = Orchestrator::new(&f.ctx)
            .after_rollback(&mut trx, RollbackScope::Statement)
            .unwrap_err();
        assert!(matches!(err, WsrepError::Deadlock { trx_id: 12 }));
        assert_eq!(trx.handle.conflict_state(), ConflictState::MustAbort);
    }

    #[test]
    fn test_isolation_holds_exec_mode() {
        let f = fixture();
        let handle = TransactionHandle::new(f.ctx.node_id(), 20);
        let orchestrator = Orchestrator::new(&f.ctx);

        let meta = orchestrator
            .to_isolation_begin(&handle, &[CertKey::new("t", b"*".to_vec())], b"ALTER")
            .unwrap();
        assert_eq!(meta.seqno(), 1);
        assert!(meta.flags.contains(WriteSetFlags::ISOLATION));
        assert_eq!(handle.exec_mode(), ClientExecMode::TotalOrder);
        assert_eq!(f.provider.last_committed(), 0);

        orchestrator.to_isolation_end(&handle).unwrap();
        assert_eq!(handle.exec_mode(), ClientExecMode::LocalState);
        assert_eq!(f.provider.last_committed(), 1);
        assert!(orchestrator.to_isolation_end(&handle).is_err());
    }
}

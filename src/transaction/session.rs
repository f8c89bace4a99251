//! Client session
//!
//! A `Session` is the connection-level driver the storage layer calls into.
//! It owns at most one open `Transaction` and runs the replication hooks
//! at the points of the statement and commit lifecycle:
//!
//! ```text
//! begin -> (begin_statement -> write_row* -> end_statement)* -> commit | rollback
//! ```
//!
//! Every command settles pending conflicts first: a BF-aborted transaction
//! is rolled back and reported as a deadlock, a certified one scheduled
//! for replay is replayed.

use std::sync::Arc;

use crate::commit::{Orchestrator, RollbackScope, WsrepError, WsrepResult};
use crate::config::FragmentUnit;
use crate::context::ReplicationContext;
use crate::engine::{EngineTxnId, StorageEngine};
use crate::observability::{Event, Logger};
use crate::replay::ReplayEngine;
use crate::streaming::{FragmentManager, StreamingState};
use crate::types::{ConflictState, ConnId, QueryState, TrxId};
use crate::writeset::{CertKey, ChangeRecord};

use super::handle::TransactionHandle;
use super::trx::{StatementResult, Transaction};

/// One client connection's view of the replication layer.
pub struct Session {
    ctx: Arc<ReplicationContext>,
    handle: Arc<TransactionHandle>,
    trx: Option<Transaction>,
    /// Session override of the configured fragment unit and size.
    streaming: Option<StreamingState>,
}

impl Session {
    pub fn new(ctx: Arc<ReplicationContext>) -> Self {
        let conn_id = ctx.next_conn_id();
        let handle = Arc::new(TransactionHandle::new(ctx.node_id(), conn_id));
        Self {
            ctx,
            handle,
            trx: None,
            streaming: None,
        }
    }

    pub fn conn_id(&self) -> ConnId {
        self.handle.conn_id()
    }

    /// Shared handle, for conflict resolution from other threads.
    pub fn handle(&self) -> &Arc<TransactionHandle> {
        &self.handle
    }

    pub fn transaction(&self) -> Option<&Transaction> {
        self.trx.as_ref()
    }

    pub fn in_transaction(&self) -> bool {
        self.trx.is_some()
    }

    /// Override streaming for this session. A `size` of 0 turns it off.
    /// Takes effect immediately for an open transaction.
    pub fn set_streaming(&mut self, unit: FragmentUnit, size: u64) {
        let state = StreamingState::new(unit, size);
        self.streaming = Some(state);
        if let Some(trx) = self.trx.as_mut() {
            trx.streaming = state;
        }
    }

    fn streaming_state(&self) -> StreamingState {
        self.streaming
            .unwrap_or_else(|| StreamingState::from_config(self.ctx.config()))
    }

    /// Open a replicated transaction.
    pub fn begin(&mut self) -> WsrepResult<()> {
        self.begin_with(false)
    }

    fn begin_with(&mut self, autocommit: bool) -> WsrepResult<()> {
        if self.trx.is_some() {
            return Err(WsrepError::invalid_state(format!(
                "connection {} already has an open transaction",
                self.conn_id()
            )));
        }
        self.wait_background_rollback()?;

        let trx_id = self.ctx.ids().next_id();
        let streaming = self.streaming_state();
        self.handle
            .lock()
            .start(trx_id, autocommit, streaming.is_enabled())?;
        let engine_txn = self.ctx.engine().begin();
        self.handle.lock().engine_txn = Some(engine_txn);
        self.trx = Some(Transaction::new(
            Arc::clone(&self.handle),
            trx_id,
            self.ctx.config().max_ws_rows,
            streaming,
        ));
        Ok(())
    }

    /// Mark the start of a statement so it can be rolled back alone.
    pub fn begin_statement(&mut self) -> WsrepResult<()> {
        self.after_command()?;
        let engine_txn = self.engine_txn()?;
        let savepoint = self.ctx.engine().savepoint(engine_txn)?;
        let trx = self.trx.as_mut().ok_or(WsrepError::NoTransaction)?;
        trx.statement_savepoint = Some(savepoint);
        trx.builder.begin_statement();
        let mut st = trx.handle.lock();
        st.query_state = QueryState::Exec;
        st.touch();
        Ok(())
    }

    /// Apply one row change locally and record it for replication.
    pub fn write_row(&mut self, record: ChangeRecord) -> WsrepResult<()> {
        self.after_command()?;
        let engine_txn = self.engine_txn()?;
        let ctx = Arc::clone(&self.ctx);
        let trx = self.trx.as_mut().ok_or(WsrepError::NoTransaction)?;

        ctx.engine().apply(engine_txn, &record)?;
        if ctx.is_enabled() {
            trx.builder.append(&record)?;
        }
        trx.affected_rows += 1;
        if ctx.is_enabled() {
            let cut = FragmentManager::new(&ctx).after_row(trx);
            return self.settle(cut);
        }
        Ok(())
    }

    /// Close the current statement; may cut a streaming fragment.
    pub fn end_statement(&mut self) -> WsrepResult<StatementResult> {
        let ctx = Arc::clone(&self.ctx);
        let trx = self.trx.as_mut().ok_or(WsrepError::NoTransaction)?;
        let cut = if ctx.is_enabled() {
            FragmentManager::new(&ctx).after_statement(trx)
        } else {
            Ok(())
        };
        let result = trx.result();
        {
            let mut st = trx.handle.lock();
            if st.query_state() == QueryState::Exec {
                st.query_state = QueryState::Idle;
            }
            st.touch();
        }
        self.settle(cut)?;
        Ok(result)
    }

    /// Undo the current statement. An unsafe statement rollback of a
    /// streaming transaction rolls back the whole transaction instead.
    pub fn rollback_statement(&mut self) -> WsrepResult<()> {
        let ctx = Arc::clone(&self.ctx);
        let trx = self.trx.as_mut().ok_or(WsrepError::NoTransaction)?;
        let outcome = Orchestrator::new(&ctx).after_rollback(trx, RollbackScope::Statement);
        self.settle(outcome)
    }

    /// Commit the open transaction.
    pub fn commit(&mut self) -> WsrepResult<StatementResult> {
        self.after_command()?;
        let mut trx = self.trx.take().ok_or(WsrepError::NoTransaction)?;
        let outcome = self.run_commit(&mut trx);
        self.finish_commit(trx, outcome)
    }

    fn run_commit(&self, trx: &mut Transaction) -> WsrepResult<()> {
        let orchestrator = Orchestrator::new(&self.ctx);
        orchestrator.before_prepare(trx)?;
        orchestrator.after_prepare(trx)?;
        orchestrator.before_commit(trx)?;
        orchestrator.ordered_commit(trx)?;
        orchestrator.after_commit(trx)
    }

    fn finish_commit(
        &mut self,
        mut trx: Transaction,
        outcome: WsrepResult<()>,
    ) -> WsrepResult<StatementResult> {
        if self.handle.conflict_state() == ConflictState::MustReplay {
            return self.replay(trx);
        }
        match outcome {
            Ok(()) => {
                let result = trx.result();
                self.handle.lock().reset(false)?;
                Ok(result)
            }
            Err(e) => {
                let conflict = self.handle.conflict_state();
                self.rollback_transaction(&mut trx)?;
                Err(conflict_error(conflict, trx.trx_id).unwrap_or(e))
            }
        }
    }

    /// Roll back the open transaction at the client's request.
    pub fn rollback(&mut self) -> WsrepResult<()> {
        self.wait_background_rollback()?;
        let mut trx = self.trx.take().ok_or(WsrepError::NoTransaction)?;
        if self.handle.conflict_state() == ConflictState::MustReplay {
            // Already certified and ordered: the commit must happen.
            return self.replay(trx).map(|_| ());
        }
        self.rollback_transaction(&mut trx)
    }

    fn rollback_transaction(&mut self, trx: &mut Transaction) -> WsrepResult<()> {
        let orchestrator = Orchestrator::new(&self.ctx);
        orchestrator.before_rollback(trx)?;
        let engine_txn = trx.handle.lock().engine_txn.take();
        if let Some(txn) = engine_txn {
            self.ctx.engine().rollback(txn)?;
        }
        orchestrator.after_rollback(trx, RollbackScope::Transaction)?;
        trx.handle.lock().reset(false)
    }

    fn replay(&mut self, mut trx: Transaction) -> WsrepResult<StatementResult> {
        let outcome = ReplayEngine::new(&self.ctx).replay(&mut trx);
        let reset = self.handle.lock().reset(false);
        let result = outcome?;
        reset?;
        Ok(result)
    }

    /// Settle the conflict state after a command.
    ///
    /// - `MustAbort` / `CertFailure`: client rollback, deadlock error
    /// - `MustReplay`: replay, the transaction ends committed
    /// - otherwise nothing to do
    pub fn after_command(&mut self) -> WsrepResult<()> {
        self.wait_background_rollback()?;
        let conflict = self.handle.conflict_state();
        let Some(mut trx) = self.trx.take() else {
            return Ok(());
        };
        match conflict {
            ConflictState::MustReplay => self.replay(trx).map(|_| ()),
            ConflictState::MustAbort
            | ConflictState::Aborting
            | ConflictState::Aborted
            | ConflictState::CertFailure => {
                Logger::info(
                    Event::ClientRollback,
                    &[
                        ("conn_id", &self.conn_id().to_string()),
                        ("trx_id", &trx.trx_id.to_string()),
                        ("state", conflict.as_str()),
                    ],
                );
                self.rollback_transaction(&mut trx)?;
                Err(conflict_error(conflict, trx.trx_id)
                    .unwrap_or(WsrepError::Deadlock { trx_id: trx.trx_id }))
            }
            _ => {
                self.trx = Some(trx);
                Ok(())
            }
        }
    }

    /// Run `body` as one autocommit statement, retrying on deadlock up to
    /// the configured number of times.
    pub fn execute_autocommit<F>(&mut self, mut body: F) -> WsrepResult<StatementResult>
    where
        F: FnMut(&mut Session) -> WsrepResult<()>,
    {
        let retries = self.ctx.config().retry_autocommit;
        let mut attempt = 0;
        loop {
            let outcome = self.autocommit_once(&mut body);
            match outcome {
                Err(e) if e.is_retryable() && attempt < retries => {
                    attempt += 1;
                    if let Some(mut trx) = self.trx.take() {
                        self.rollback_transaction(&mut trx)?;
                    }
                    self.handle.lock().reset(true)?;
                    Logger::info(
                        Event::AutocommitRetry,
                        &[
                            ("conn_id", &self.conn_id().to_string()),
                            ("attempt", &attempt.to_string()),
                            ("error", &e.to_string()),
                        ],
                    );
                }
                Err(e) => {
                    if let Some(mut trx) = self.trx.take() {
                        self.rollback_transaction(&mut trx)?;
                    }
                    return Err(e);
                }
                Ok(result) => return Ok(result),
            }
        }
    }

    fn autocommit_once<F>(&mut self, body: &mut F) -> WsrepResult<StatementResult>
    where
        F: FnMut(&mut Session) -> WsrepResult<()>,
    {
        self.begin_with(true)?;
        self.begin_statement()?;
        body(self)?;
        self.end_statement()?;
        self.commit()
    }

    /// Run `body` under total order isolation. The engine work commits
    /// at the isolation GTID.
    pub fn execute_isolated<F>(&mut self, keys: &[CertKey], payload: &[u8], body: F) -> WsrepResult<()>
    where
        F: FnOnce(&dyn StorageEngine, EngineTxnId) -> WsrepResult<()>,
    {
        if self.trx.is_some() {
            return Err(WsrepError::invalid_state(
                "isolated execution inside an open transaction",
            ));
        }
        let orchestrator = Orchestrator::new(&self.ctx);
        let meta = orchestrator.to_isolation_begin(&self.handle, keys, payload)?;

        let engine = self.ctx.engine();
        let txn = engine.begin();
        let outcome = match body(engine, txn) {
            Ok(()) => engine.commit(txn, Some(meta.gtid)).map_err(WsrepError::from),
            Err(e) => {
                if let Err(rollback) = engine.rollback(txn) {
                    Logger::warn(
                        Event::IsolationFailed,
                        &[
                            ("conn_id", &self.conn_id().to_string()),
                            ("error", &rollback.to_string()),
                        ],
                    );
                }
                Err(e)
            }
        };
        let ended = orchestrator.to_isolation_end(&self.handle);
        outcome.and(ended)
    }

    /// End the session. An open transaction is rolled back, unless it
    /// was certified and must be replayed.
    pub fn close(&mut self) -> WsrepResult<()> {
        if self.trx.is_none() {
            return Ok(());
        }
        self.rollback()
    }

    fn engine_txn(&self) -> WsrepResult<EngineTxnId> {
        self.handle
            .lock()
            .engine_txn
            .ok_or(WsrepError::NoTransaction)
    }

    /// Errors from hooks inside an open transaction: settle conflicts
    /// the failure may have caused.
    fn settle(&mut self, outcome: WsrepResult<()>) -> WsrepResult<()> {
        let settled = self.after_command();
        match (outcome, settled) {
            (Ok(()), settled) => settled,
            (Err(_), Err(e)) => Err(e),
            (Err(e), Ok(())) => Err(e),
        }
    }

    /// Block while the rollbacker works on this session's transaction.
    fn wait_background_rollback(&self) -> WsrepResult<()> {
        let poll = self.ctx.replay_gate().poll_interval();
        let mut st = self.handle.lock();
        while st.background_rollback {
            if self.ctx.cancel_token().is_cancelled() {
                return Err(WsrepError::Interrupted);
            }
            self.handle.wait_for(&mut st, poll);
        }
        Ok(())
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            Logger::warn(
                Event::ClientRollback,
                &[
                    ("conn_id", &self.conn_id().to_string()),
                    ("error", &e.to_string()),
                ],
            );
        }
    }
}

/// Client-visible error for a transaction that ended in `conflict`.
fn conflict_error(conflict: ConflictState, trx_id: TrxId) -> Option<WsrepError> {
    match conflict {
        ConflictState::CertFailure => Some(WsrepError::CertificationFailure { trx_id }),
        ConflictState::MustAbort | ConflictState::Aborting | ConflictState::Aborted => {
            Some(WsrepError::Deadlock { trx_id })
        }
        _ => None,
    }
}

//! Background rollbacker
//!
//! An idle streaming victim has no thread of its own to unwind it and
//! holds fragments on every node. The rollbacker replicates the rollback
//! event, drops the stored fragments and rolls the engine transaction
//! back; the session later finds its transaction `Aborted`.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use crate::commit::replicate_rollback;
use crate::context::{CancelToken, ReplicationContext};
use crate::observability::{Event, Logger};
use crate::transaction::TransactionHandle;
use crate::types::{ClientExecMode, ConflictState, QueryState, TrxId};

/// Work queue of the rollbacker thread.
#[derive(Debug, Default)]
pub struct RollbackQueue {
    queue: Mutex<VecDeque<TrxId>>,
    cond: Condvar,
    running: AtomicBool,
}

impl RollbackQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&self, trx_id: TrxId) {
        self.queue.lock().push_back(trx_id);
        self.cond.notify_one();
    }

    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }

    /// True while a rollbacker thread consumes the queue.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn wake(&self) {
        self.cond.notify_all();
    }

    fn next(&self, ctx: &ReplicationContext, stop: &CancelToken) -> Option<TrxId> {
        let poll = ctx.replay_gate().poll_interval().max(std::time::Duration::from_millis(10));
        let mut queue = self.queue.lock();
        loop {
            if stop.is_cancelled() || ctx.cancel_token().is_cancelled() {
                return None;
            }
            if let Some(trx_id) = queue.pop_front() {
                return Some(trx_id);
            }
            self.cond.wait_for(&mut queue, poll);
        }
    }
}

/// Rollbacker thread body. Returns when `stop` or the context is cancelled.
pub fn run(ctx: &Arc<ReplicationContext>, stop: &CancelToken) {
    let queue = ctx.rollbacker();
    queue.running.store(true, Ordering::SeqCst);
    while let Some(trx_id) = queue.next(ctx, stop) {
        match ctx.streaming_handle(trx_id) {
            Some(handle) => roll_back(ctx, &handle, trx_id),
            None => Logger::trace(
                Event::RollbackerComplete,
                &[("trx_id", &trx_id.to_string()), ("reason", "gone")],
            ),
        }
    }
    queue.running.store(false, Ordering::SeqCst);

    // Victims still queued are unwound by their own sessions.
    let leftover: Vec<TrxId> = queue.queue.lock().drain(..).collect();
    for trx_id in leftover {
        if let Some(handle) = ctx.streaming_handle(trx_id) {
            handle.lock().background_rollback = false;
            handle.notify();
        }
    }
}

/// Roll back one victim on behalf of its session.
pub(crate) fn roll_back(ctx: &ReplicationContext, handle: &TransactionHandle, trx_id: TrxId) {
    let (engine_txn, replicate) = {
        let mut st = handle.lock();
        if st.trx_id() != Some(trx_id) || st.conflict() != ConflictState::MustAbort {
            st.background_rollback = false;
            drop(st);
            handle.notify();
            return;
        }
        // MustAbort -> Aborting is always legal.
        let _ = st.transition(ConflictState::Aborting);
        st.exec_mode = ClientExecMode::LocalRollback;
        let replicate = !st.rollback_replicated;
        st.rollback_replicated = true;
        (st.engine_txn.take(), replicate)
    };
    let trx_label = trx_id.to_string();

    if replicate {
        replicate_rollback(ctx, trx_id);
    }
    if let Some(txn) = engine_txn {
        if let Err(e) = ctx.engine().rollback(txn) {
            Logger::error(
                Event::RollbackerComplete,
                &[("trx_id", &trx_label), ("error", &e.to_string())],
            );
        }
    }
    match ctx.store().remove_all(ctx.node_id(), trx_id) {
        Ok(removed) => Logger::trace(
            Event::FragmentsRemoved,
            &[("trx_id", &trx_label), ("count", &removed.to_string())],
        ),
        Err(e) => Logger::error(
            Event::StoreFailure,
            &[("trx_id", &trx_label), ("error", &e.to_string())],
        ),
    }
    ctx.unregister_streaming(trx_id);

    {
        let mut st = handle.lock();
        // Aborting -> Aborted is always legal.
        let _ = st.transition(ConflictState::Aborted);
        st.query_state = QueryState::Idle;
        st.background_rollback = false;
    }
    handle.notify();
    ctx.metrics().increment_rollbacks();
    Logger::info(Event::RollbackerComplete, &[("trx_id", &trx_label)]);
}

//! BF-abort delivery

use crate::context::ReplicationContext;
use crate::observability::{Event, Logger};
use crate::transaction::{KillGuard, TransactionHandle};
use crate::types::{ClientExecMode, ConflictState, QueryState, Seqno};

/// Outcome of a row lock conflict between two executions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockConflict {
    /// The requester waits for the holder as usual
    Wait,
    /// The holder was BF-aborted
    HolderAborted,
    /// Both are high priority; neither is aborted
    BruteForceConflict,
}

/// Delivers BF-abort signals under the lock order
/// `kill_lock -> handle state -> replay gate`.
pub struct ConflictResolver<'a> {
    ctx: &'a ReplicationContext,
}

impl<'a> ConflictResolver<'a> {
    pub fn new(ctx: &'a ReplicationContext) -> Self {
        Self { ctx }
    }

    /// Abort the victim on behalf of `aborter_id`, a higher priority
    /// execution ordered at `bf_seqno`.
    ///
    /// Returns false when the signal does not apply: no replicated
    /// transaction (the ordinary kill path handles the session), a high
    /// priority victim, a victim already aborted by an earlier aborter,
    /// or a victim inside the commit order critical section.
    pub fn bf_abort(&self, aborter_id: u64, bf_seqno: Seqno, victim: &KillGuard<'_>) -> bool {
        let conn_id = victim.conn_id().to_string();
        let mut st = victim.lock();

        let Some(trx_id) = st.trx_id() else {
            Logger::trace(
                Event::BfAbortIgnored,
                &[("conn_id", &conn_id), ("reason", "no_transaction")],
            );
            return false;
        };
        let trx_label = trx_id.to_string();
        let ignore = |reason: &str| {
            Logger::info(
                Event::BfAbortIgnored,
                &[
                    ("aborter", &aborter_id.to_string()),
                    ("reason", reason),
                    ("trx_id", &trx_label),
                ],
            );
            false
        };

        if st.exec_mode().is_high_priority() {
            return ignore("high_priority");
        }
        if st.exec_mode() == ClientExecMode::LocalRollback {
            return ignore("rolling_back");
        }
        if st.conflict() != ConflictState::NoConflict || st.aborter.is_some() || st.pending_bf {
            return ignore("already_aborted");
        }
        if st.query_state() == QueryState::OrderedCommit {
            return ignore("ordered_commit");
        }

        let provider = self.ctx.provider();
        let mut background = false;
        if st.exec_mode() == ClientExecMode::LocalCommit {
            // Certified: the commit position must be honoured by a replay.
            if st.transition(ConflictState::MustReplay).is_err() {
                return ignore("illegal_transition");
            }
            self.ctx.replay_gate().enter();
            if st.waiting_in_provider {
                provider.abort_pre_commit(bf_seqno, trx_id);
            }
        } else if st.query_state() == QueryState::Committing {
            // Inside certification: the outcome of pre_commit decides
            // between replay and abort.
            st.pending_bf = true;
            provider.abort_pre_commit(bf_seqno, trx_id);
        } else {
            if st.transition(ConflictState::MustAbort).is_err() {
                return ignore("illegal_transition");
            }
            if st.is_streaming()
                && st.query_state() == QueryState::Idle
                && self.ctx.rollbacker().is_running()
            {
                st.background_rollback = true;
                background = true;
            }
        }
        st.aborter = Some(aborter_id);
        let state = st.conflict();
        drop(st);

        if background {
            self.ctx.rollbacker().enqueue(trx_id);
            Logger::info(Event::RollbackerEnqueued, &[("trx_id", &trx_label)]);
        }
        victim.notify();
        self.ctx.replay_gate().wake();
        self.ctx.metrics().increment_bf_aborts();
        Logger::info(
            Event::BfAbort,
            &[
                ("aborter", &aborter_id.to_string()),
                ("bf_seqno", &bf_seqno.to_string()),
                ("conn_id", &conn_id),
                ("state", state.as_str()),
                ("trx_id", &trx_label),
            ],
        );
        true
    }

    /// Arbitrate a row lock wanted by `requester` and held by `holder`.
    ///
    /// Only a high priority requester aborts a holder, and never a high
    /// priority one.
    pub fn resolve_lock_conflict(
        &self,
        requester: &TransactionHandle,
        holder: &TransactionHandle,
    ) -> LockConflict {
        let (requester_mode, bf_seqno) = {
            let st = requester.lock();
            (st.exec_mode(), st.meta().seqno())
        };
        if !requester_mode.is_high_priority() {
            return LockConflict::Wait;
        }
        if holder.exec_mode().is_high_priority() {
            Logger::warn(
                Event::BfBfConflict,
                &[
                    ("holder", &holder.conn_id().to_string()),
                    ("requester", &requester.conn_id().to_string()),
                    ("seqno", &bf_seqno.to_string()),
                ],
            );
            return LockConflict::BruteForceConflict;
        }

        let guard = holder.lock_kill();
        if self.bf_abort(requester.conn_id(), bf_seqno, &guard) {
            LockConflict::HolderAborted
        } else {
            LockConflict::Wait
        }
    }
}

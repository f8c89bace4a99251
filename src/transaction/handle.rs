//! Shared per-session transaction handle
//!
//! The session thread owns the `Transaction` value; everything another
//! thread may touch (the BF-abort resolver, the rollbacker, the reaper)
//! lives here behind the handle's own lock.
//!
//! Lock order: `kill_lock` before `state`. BF-abort callers take the
//! kill lock through `lock_kill()` and the resolver takes `state` under it.

use std::ops::Deref;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, MutexGuard};

use crate::commit::{WsrepError, WsrepResult};
use crate::engine::EngineTxnId;
use crate::types::{
    ClientExecMode, ConflictState, ConnId, QueryState, Stid, TrxId, WriteSetMeta,
};
use uuid::Uuid;

/// Mutable replication state of one session's transaction.
#[derive(Debug, Clone)]
pub struct TrxState {
    pub(crate) trx_id: Option<TrxId>,
    conflict: ConflictState,
    pub(crate) exec_mode: ClientExecMode,
    pub(crate) query_state: QueryState,
    /// Fragments certified for this transaction. Never decremented.
    pub(crate) fragments_sent: u64,
    pub(crate) meta: WriteSetMeta,
    /// Id of the first BF-aborter that won.
    pub(crate) aborter: Option<u64>,
    /// BF-abort arrived while the victim was inside certification.
    pub(crate) pending_bf: bool,
    /// Victim is blocked inside an interruptible provider call.
    pub(crate) waiting_in_provider: bool,
    pub(crate) streaming: bool,
    pub(crate) autocommit: bool,
    pub(crate) engine_txn: Option<EngineTxnId>,
    /// Victim was handed to the rollbacker thread.
    pub(crate) background_rollback: bool,
    /// Peers were told to discard this transaction's fragments.
    pub(crate) rollback_replicated: bool,
    pub(crate) last_activity: Instant,
}

impl TrxState {
    fn new(node: Uuid, conn_id: ConnId) -> Self {
        Self {
            trx_id: None,
            conflict: ConflictState::NoConflict,
            exec_mode: ClientExecMode::LocalState,
            query_state: QueryState::Idle,
            fragments_sent: 0,
            meta: WriteSetMeta::new(Stid::new(node, 0, conn_id)),
            aborter: None,
            pending_bf: false,
            waiting_in_provider: false,
            streaming: false,
            autocommit: false,
            engine_txn: None,
            background_rollback: false,
            rollback_replicated: false,
            last_activity: Instant::now(),
        }
    }

    pub fn conflict(&self) -> ConflictState {
        self.conflict
    }

    pub fn trx_id(&self) -> Option<TrxId> {
        self.trx_id
    }

    pub fn exec_mode(&self) -> ClientExecMode {
        self.exec_mode
    }

    pub fn query_state(&self) -> QueryState {
        self.query_state
    }

    pub fn fragments_sent(&self) -> u64 {
        self.fragments_sent
    }

    pub fn meta(&self) -> &WriteSetMeta {
        &self.meta
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming && self.fragments_sent > 0
    }

    /// Move along one edge of the conflict state machine.
    pub fn transition(&mut self, next: ConflictState) -> WsrepResult<()> {
        if !self.conflict.can_transition_to(next) {
            return Err(WsrepError::InvalidTransition {
                from: self.conflict,
                to: next,
            });
        }
        self.conflict = next;
        Ok(())
    }

    /// End of the transaction lifecycle. The conflict state starts over
    /// from `NoConflict`, or from `RetryAutocommit` for a statement that
    /// will be retried.
    /// Conflict state once the commit went through. A `MustAbort` that
    /// arrived too late is kept for the caller to report.
    pub(crate) fn end_commit(&mut self) -> WsrepResult<()> {
        match self.conflict {
            ConflictState::NoConflict | ConflictState::MustAbort => Ok(()),
            other if other.is_settled() => {
                self.conflict = ConflictState::NoConflict;
                Ok(())
            }
            other => Err(WsrepError::InvalidTransition {
                from: other,
                to: ConflictState::NoConflict,
            }),
        }
    }

    /// Refused while a rollback or replay is still owed.
    pub(crate) fn reset(&mut self, retry: bool) -> WsrepResult<()> {
        let next = if retry {
            ConflictState::RetryAutocommit
        } else {
            ConflictState::NoConflict
        };
        if !self.conflict.is_settled() {
            return Err(WsrepError::InvalidTransition {
                from: self.conflict,
                to: next,
            });
        }
        let node = self.meta.stid.node;
        let conn_id = self.meta.stid.conn_id;
        *self = Self::new(node, conn_id);
        self.conflict = next;
        Ok(())
    }

    /// Begin a new replicated transaction on this handle. The previous one
    /// must have been reset.
    pub(crate) fn start(&mut self, trx_id: TrxId, autocommit: bool, streaming: bool) -> WsrepResult<()> {
        if !matches!(
            self.conflict,
            ConflictState::NoConflict | ConflictState::RetryAutocommit
        ) {
            return Err(WsrepError::InvalidTransition {
                from: self.conflict,
                to: ConflictState::NoConflict,
            });
        }
        self.trx_id = Some(trx_id);
        self.conflict = ConflictState::NoConflict;
        self.exec_mode = ClientExecMode::LocalState;
        self.query_state = QueryState::Exec;
        self.meta = WriteSetMeta::new(Stid::new(self.meta.stid.node, trx_id, self.meta.stid.conn_id));
        self.autocommit = autocommit;
        self.streaming = streaming;
        self.last_activity = Instant::now();
        Ok(())
    }

    pub(crate) fn touch(&mut self) {
        self.last_activity = Instant::now();
    }
}

/// Transaction state shared between the session and conflict resolution.
#[derive(Debug)]
pub struct TransactionHandle {
    conn_id: ConnId,
    kill_lock: Mutex<()>,
    state: Mutex<TrxState>,
    cond: Condvar,
}

impl TransactionHandle {
    pub fn new(node: Uuid, conn_id: ConnId) -> Self {
        Self {
            conn_id,
            kill_lock: Mutex::new(()),
            state: Mutex::new(TrxState::new(node, conn_id)),
            cond: Condvar::new(),
        }
    }

    pub fn conn_id(&self) -> ConnId {
        self.conn_id
    }

    /// Take the kill lock. Required before signalling a BF-abort.
    pub fn lock_kill(&self) -> KillGuard<'_> {
        KillGuard {
            handle: self,
            _guard: self.kill_lock.lock(),
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, TrxState> {
        self.state.lock()
    }

    pub fn conflict_state(&self) -> ConflictState {
        self.state.lock().conflict
    }

    pub fn trx_id(&self) -> Option<TrxId> {
        self.state.lock().trx_id
    }

    pub fn exec_mode(&self) -> ClientExecMode {
        self.state.lock().exec_mode
    }

    pub fn query_state(&self) -> QueryState {
        self.state.lock().query_state
    }

    pub fn fragments_sent(&self) -> u64 {
        self.state.lock().fragments_sent
    }

    pub fn meta(&self) -> WriteSetMeta {
        self.state.lock().meta
    }

    /// Copy of the whole state, for inspection.
    pub fn snapshot(&self) -> TrxState {
        self.state.lock().clone()
    }

    /// Wake the owning thread if it waits on this handle.
    pub fn notify(&self) {
        self.cond.notify_all();
    }

    /// Bounded wait on the handle condition.
    pub(crate) fn wait_for(&self, guard: &mut MutexGuard<'_, TrxState>, timeout: Duration) {
        self.cond.wait_for(guard, timeout);
    }
}

/// Proof that the holder owns the victim's kill lock.
pub struct KillGuard<'a> {
    handle: &'a TransactionHandle,
    _guard: MutexGuard<'a, ()>,
}

impl Deref for KillGuard<'_> {
    type Target = TransactionHandle;

    fn deref(&self) -> &TransactionHandle {
        self.handle
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transition_rejects_illegal_edge() {
        let handle = TransactionHandle::new(Uuid::new_v4(), 1);
        let mut st = handle.lock();
        assert!(st.transition(ConflictState::Aborted).is_err());
        assert_eq!(st.conflict(), ConflictState::NoConflict);
        st.transition(ConflictState::MustAbort).unwrap();
        st.transition(ConflictState::Aborting).unwrap();
        st.transition(ConflictState::Aborted).unwrap();
    }

    #[test]
    fn test_reset_keeps_identity() {
        let node = Uuid::new_v4();
        let handle = TransactionHandle::new(node, 9);
        let mut st = handle.lock();
        st.start(44, true, false).unwrap();
        st.fragments_sent = 3;
        st.transition(ConflictState::CertFailure).unwrap();
        st.reset(true).unwrap();
        assert_eq!(st.trx_id(), None);
        assert_eq!(st.fragments_sent(), 0);
        assert_eq!(st.conflict(), ConflictState::RetryAutocommit);
        assert_eq!(st.meta().stid, Stid::new(node, 0, 9));
    }

    #[test]
    fn test_reset_refused_while_replay_owed() {
        let handle = TransactionHandle::new(Uuid::new_v4(), 4);
        let mut st = handle.lock();
        st.start(5, false, false).unwrap();
        st.transition(ConflictState::MustReplay).unwrap();
        assert!(matches!(
            st.reset(false),
            Err(WsrepError::InvalidTransition { from: ConflictState::MustReplay, .. })
        ));
        assert_eq!(st.trx_id(), Some(5));
        assert!(st.start(6, false, false).is_err());

        st.transition(ConflictState::Replaying).unwrap();
        assert!(st.reset(false).is_err());
        st.transition(ConflictState::Aborted).unwrap();
        st.reset(false).unwrap();
        assert_eq!(st.conflict(), ConflictState::NoConflict);
        st.start(6, false, false).unwrap();
    }

    #[test]
    fn test_start_assigns_stid() {
        let node = Uuid::new_v4();
        let handle = TransactionHandle::new(node, 2);
        handle.lock().start(17, false, true).unwrap();
        let meta = handle.meta();
        assert_eq!(meta.stid, Stid::new(node, 17, 2));
        assert!(!meta.is_ordered());
        assert_eq!(handle.query_state(), QueryState::Exec);
    }
}

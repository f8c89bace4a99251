//! Single-process provider
//!
//! Certification is first-committer-wins by key overlap: a write-set
//! fails when a write-set from a different transaction, ordered after
//! this one started, touched one of its keys. Commit order is the
//! assigned seqno, enforced by blocking in `commit_order_enter`.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::{Condvar, Mutex, MutexGuard};
use uuid::Uuid;

use super::{Provider, ReceivedWriteSet, Status, WsHandle};
use crate::types::{ConnId, Gtid, Seqno, Stid, TrxId, WriteSetFlags, WriteSetMeta};
use crate::writeset::CertKey;

const ORDER_POLL: Duration = Duration::from_millis(5);
const DEFAULT_ORDER_TIMEOUT: Duration = Duration::from_secs(10);

/// Reserved transaction id space for isolated executions.
const ISOLATION_TRX_BASE: TrxId = 1 << 63;

type EntryKey = (TrxId, u64);
type Origin = (Uuid, TrxId);

/// A write-set that passed certification, kept for inspection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertifiedRecord {
    pub meta: WriteSetMeta,
    pub data: Bytes,
    pub keys: Vec<CertKey>,
}

#[derive(Debug)]
struct PendingWriteSet {
    keys: BTreeSet<CertKey>,
    data: Vec<u8>,
    last_seen: Seqno,
    seqno: Option<Seqno>,
}

impl PendingWriteSet {
    fn new(last_seen: Seqno) -> Self {
        Self {
            keys: BTreeSet::new(),
            data: Vec::new(),
            last_seen,
            seqno: None,
        }
    }
}

#[derive(Debug)]
struct HistoryEntry {
    seqno: Seqno,
    origin: Origin,
    keys: BTreeSet<CertKey>,
}

#[derive(Debug, Default)]
struct State {
    last_seqno: Seqno,
    last_committed: Seqno,
    pending: HashMap<EntryKey, PendingWriteSet>,
    history: Vec<HistoryEntry>,
    certified: Vec<CertifiedRecord>,
    injected: HashMap<TrxId, VecDeque<Status>>,
    waiting: HashSet<TrxId>,
    interrupted: HashSet<TrxId>,
    rollbacks: Vec<TrxId>,
    isolated: HashMap<ConnId, Seqno>,
    next_opaque: u64,
}

impl State {
    fn pending_mut(&mut self, key: EntryKey) -> &mut PendingWriteSet {
        let last_seen = self.last_seqno;
        self.pending
            .entry(key)
            .or_insert_with(|| PendingWriteSet::new(last_seen))
    }

    fn conflicts(&self, origin: Origin, keys: &BTreeSet<CertKey>, last_seen: Seqno) -> bool {
        self.history
            .iter()
            .any(|h| h.seqno > last_seen && h.origin != origin && !h.keys.is_disjoint(keys))
    }

    /// Assign the next seqno and record the write-set as certified.
    fn order(
        &mut self,
        cluster: Uuid,
        origin: Origin,
        keys: BTreeSet<CertKey>,
        data: Bytes,
        meta: &mut WriteSetMeta,
    ) -> Seqno {
        self.last_seqno += 1;
        let seqno = self.last_seqno;
        meta.gtid = Gtid::new(cluster, seqno);
        meta.depends_on = self.last_committed;
        self.certified.push(CertifiedRecord {
            meta: *meta,
            data,
            keys: keys.iter().cloned().collect(),
        });
        self.history.push(HistoryEntry {
            seqno,
            origin,
            keys,
        });
        seqno
    }

    /// History older than every open write-set can never conflict again.
    fn prune_history(&mut self) {
        let horizon = self
            .pending
            .values()
            .map(|p| p.last_seen)
            .min()
            .unwrap_or(self.last_seqno);
        self.history.retain(|h| h.seqno > horizon);
    }
}

/// In-process provider with real certification and commit ordering.
pub struct LoopbackProvider {
    cluster: Uuid,
    node: Uuid,
    state: Mutex<State>,
    order: Condvar,
    order_timeout: Duration,
}

impl LoopbackProvider {
    /// Provider for `node` in a fresh cluster starting at seqno 0.
    pub fn new(node: Uuid) -> Self {
        Self::with_position(Uuid::new_v4(), node, 0)
    }

    /// Provider whose history already reached `seqno`.
    pub fn with_position(cluster: Uuid, node: Uuid, seqno: Seqno) -> Self {
        Self {
            cluster,
            node,
            state: Mutex::new(State {
                last_seqno: seqno,
                last_committed: seqno,
                next_opaque: 1,
                ..State::default()
            }),
            order: Condvar::new(),
            order_timeout: DEFAULT_ORDER_TIMEOUT,
        }
    }

    /// Upper bound on any commit order wait before reporting `NodeFail`.
    pub fn with_order_timeout(mut self, timeout: Duration) -> Self {
        self.order_timeout = timeout;
        self
    }

    pub fn cluster_uuid(&self) -> Uuid {
        self.cluster
    }

    pub fn node_uuid(&self) -> Uuid {
        self.node
    }

    /// Make the next `pre_commit` of `trx_id` report `status`.
    ///
    /// An injected `BfAbort` still certifies and orders the write-set,
    /// as a real provider does when the abort races with replication.
    pub fn inject_pre_commit(&self, trx_id: TrxId, status: Status) {
        self.state
            .lock()
            .injected
            .entry(trx_id)
            .or_default()
            .push_back(status);
    }

    /// Certify a write-set produced on another node and hand it out for
    /// local apply. `last_seen` is the position the remote transaction
    /// executed against. Returns `None` when certification fails.
    pub fn deliver(
        &self,
        stid: Stid,
        flags: WriteSetFlags,
        keys: &[CertKey],
        data: Bytes,
        last_seen: Seqno,
    ) -> Option<ReceivedWriteSet> {
        let mut st = self.state.lock();
        let keys: BTreeSet<CertKey> = keys.iter().cloned().collect();
        let origin = (stid.node, stid.trx_id);
        if st.conflicts(origin, &keys, last_seen) {
            return None;
        }

        let mut meta = WriteSetMeta::new(stid);
        meta.flags = flags;
        let seqno = st.order(self.cluster, origin, keys, data.clone(), &mut meta);

        let opaque = st.next_opaque;
        st.next_opaque += 1;
        let pending = st.pending_mut((stid.trx_id, opaque));
        pending.seqno = Some(seqno);

        Some(ReceivedWriteSet {
            handle: WsHandle::with_opaque(stid.trx_id, opaque),
            meta,
            data,
        })
    }

    /// Every certified write-set, in seqno order.
    pub fn certified(&self) -> Vec<CertifiedRecord> {
        self.state.lock().certified.clone()
    }

    /// Transactions for which a rollback event was replicated.
    pub fn rollbacks(&self) -> Vec<TrxId> {
        self.state.lock().rollbacks.clone()
    }

    pub fn last_committed(&self) -> Seqno {
        self.state.lock().last_committed
    }

    pub fn last_seqno(&self) -> Seqno {
        self.state.lock().last_seqno
    }

    /// Number of write-sets the provider still tracks.
    pub fn open_write_sets(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// Wait until `seqno` is next to commit. `interruptible` waits give
    /// up with `BfAbort` when `abort_pre_commit` targets `trx_id`.
    fn wait_for_turn(
        &self,
        st: &mut MutexGuard<'_, State>,
        trx_id: TrxId,
        seqno: Seqno,
        interruptible: bool,
    ) -> Status {
        let deadline = Instant::now() + self.order_timeout;
        if interruptible {
            st.waiting.insert(trx_id);
        }
        let status = loop {
            if interruptible && st.interrupted.remove(&trx_id) {
                break Status::BfAbort;
            }
            if st.last_committed + 1 == seqno {
                break Status::Ok;
            }
            if st.last_committed >= seqno || Instant::now() >= deadline {
                break Status::NodeFail;
            }
            self.order.wait_for(st, ORDER_POLL);
        };
        st.waiting.remove(&trx_id);
        status
    }

    fn advance(&self, st: &mut MutexGuard<'_, State>, seqno: Seqno) -> Status {
        if st.last_committed + 1 != seqno {
            return Status::NodeFail;
        }
        st.last_committed = seqno;
        self.order.notify_all();
        Status::Ok
    }
}

impl Provider for LoopbackProvider {
    fn append_key(&self, ws: &WsHandle, key: &CertKey) -> Status {
        let mut st = self.state.lock();
        st.pending_mut((ws.trx_id(), ws.opaque()))
            .keys
            .insert(key.clone());
        Status::Ok
    }

    fn append_data(&self, ws: &WsHandle, data: &[u8]) -> Status {
        let mut st = self.state.lock();
        st.pending_mut((ws.trx_id(), ws.opaque()))
            .data
            .extend_from_slice(data);
        Status::Ok
    }

    fn pre_commit(
        &self,
        conn_id: ConnId,
        ws: &WsHandle,
        flags: WriteSetFlags,
        meta: &mut WriteSetMeta,
    ) -> Status {
        let mut st = self.state.lock();
        let trx_id = ws.trx_id();

        let injected = st
            .injected
            .get_mut(&trx_id)
            .and_then(|queue| queue.pop_front());
        if let Some(status) = injected {
            if status != Status::BfAbort {
                return status;
            }
        }

        let pending = st.pending_mut((trx_id, ws.opaque()));
        let keys = pending.keys.clone();
        let last_seen = pending.last_seen;
        let data = Bytes::from(std::mem::take(&mut pending.data));

        let origin = (self.node, trx_id);
        if st.conflicts(origin, &keys, last_seen) {
            return Status::TrxFail;
        }

        meta.stid = Stid::new(self.node, trx_id, conn_id);
        meta.flags = flags;
        let seqno = st.order(self.cluster, origin, keys, data, meta);
        st.pending_mut((trx_id, ws.opaque())).seqno = Some(seqno);

        match injected {
            Some(status) => status,
            None => Status::Ok,
        }
    }

    fn commit_order_enter(&self, ws: &WsHandle, meta: &WriteSetMeta) -> Status {
        if !meta.is_ordered() {
            return Status::TrxFail;
        }
        let mut st = self.state.lock();
        self.wait_for_turn(&mut st, ws.trx_id(), meta.seqno(), true)
    }

    fn commit_order_leave(&self, _ws: &WsHandle, meta: &WriteSetMeta) -> Status {
        let mut st = self.state.lock();
        self.advance(&mut st, meta.seqno())
    }

    fn post_commit(&self, _ws: &WsHandle) -> Status {
        Status::Ok
    }

    fn post_rollback(&self, ws: &WsHandle) -> Status {
        let mut st = self.state.lock();
        let seqno = st
            .pending
            .get(&(ws.trx_id(), ws.opaque()))
            .and_then(|p| p.seqno);
        match seqno {
            Some(seqno) if seqno > st.last_committed => {
                let status = self.wait_for_turn(&mut st, ws.trx_id(), seqno, false);
                if !status.is_ok() {
                    return status;
                }
                self.advance(&mut st, seqno)
            }
            _ => Status::Ok,
        }
    }

    fn release(&self, ws: &WsHandle) -> Status {
        let mut st = self.state.lock();
        st.pending.remove(&(ws.trx_id(), ws.opaque()));
        st.injected.remove(&ws.trx_id());
        st.prune_history();
        Status::Ok
    }

    fn rollback(&self, trx_id: TrxId, _data: &[u8]) -> Status {
        self.state.lock().rollbacks.push(trx_id);
        Status::Ok
    }

    fn abort_pre_commit(&self, _bf_seqno: Seqno, victim: TrxId) -> Status {
        let mut st = self.state.lock();
        if st.waiting.contains(&victim) {
            st.interrupted.insert(victim);
            self.order.notify_all();
            Status::Ok
        } else {
            Status::TrxFail
        }
    }

    fn to_execute_start(
        &self,
        conn_id: ConnId,
        keys: &[CertKey],
        data: &[u8],
        meta: &mut WriteSetMeta,
    ) -> Status {
        let mut st = self.state.lock();
        if st.isolated.contains_key(&conn_id) {
            return Status::TrxFail;
        }
        let trx_id = ISOLATION_TRX_BASE | conn_id;
        let keys: BTreeSet<CertKey> = keys.iter().cloned().collect();
        meta.stid = Stid::new(self.node, trx_id, conn_id);
        meta.flags = WriteSetFlags::ISOLATION | WriteSetFlags::TRX_START | WriteSetFlags::TRX_END;
        let seqno = st.order(
            self.cluster,
            (self.node, trx_id),
            keys,
            Bytes::copy_from_slice(data),
            meta,
        );

        let status = self.wait_for_turn(&mut st, trx_id, seqno, false);
        if status.is_ok() {
            st.isolated.insert(conn_id, seqno);
        }
        status
    }

    fn to_execute_end(&self, conn_id: ConnId) -> Status {
        let mut st = self.state.lock();
        match st.isolated.remove(&conn_id) {
            Some(seqno) => self.advance(&mut st, seqno),
            None => Status::TrxFail,
        }
    }
}

//! Shared fixtures for the integration tests
#![allow(dead_code)]

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};

use bytes::Bytes;
use uuid::Uuid;
use wsrep_core::config::ReplicationConfig;
use wsrep_core::context::ReplicationContext;
use wsrep_core::engine::MemoryEngine;
use wsrep_core::fragment::{FragmentStore, MemoryFragmentStore};
use wsrep_core::provider::{LoopbackProvider, Provider, Status, WsHandle};
use wsrep_core::types::{ConnId, Seqno, TrxId, WriteSetFlags, WriteSetMeta};
use wsrep_core::writeset::{CertKey, ChangeRecord};

/// One node: provider, engine and fragment store wired into a context.
pub struct Node {
    pub ctx: Arc<ReplicationContext>,
    pub provider: Arc<TappedProvider>,
    pub engine: Arc<MemoryEngine>,
    pub store: Arc<dyn FragmentStore>,
}

pub fn node() -> Node {
    node_with(ReplicationConfig::default())
}

pub fn node_with(config: ReplicationConfig) -> Node {
    let provider = Arc::new(TappedProvider::new(LoopbackProvider::new(Uuid::new_v4())));
    node_from_parts(config, provider, Arc::new(MemoryFragmentStore::new()))
}

pub fn node_from_parts(
    config: ReplicationConfig,
    provider: Arc<TappedProvider>,
    store: Arc<dyn FragmentStore>,
) -> Node {
    let engine = Arc::new(MemoryEngine::new());
    let ctx = ReplicationContext::builder(config)
        .provider(provider.clone())
        .engine(engine.clone())
        .store(store.clone())
        .fatal_handler(|reason| panic!("fatal: {}", reason))
        .build()
        .expect("build replication context");
    Node {
        ctx,
        provider,
        engine,
        store,
    }
}

/// 100 encoded bytes: frame overhead + "t" + 4-byte key + 74-byte image.
pub fn row(n: u32) -> ChangeRecord {
    ChangeRecord::insert("t", n.to_be_bytes().to_vec(), vec![b'v'; 74])
}

pub fn insert(key: &str, value: &str) -> ChangeRecord {
    ChangeRecord::insert("t", key.as_bytes().to_vec(), value.as_bytes().to_vec())
}

pub fn update(key: &str, value: &str) -> ChangeRecord {
    ChangeRecord::update("t", key.as_bytes().to_vec(), value.as_bytes().to_vec())
}

pub fn payload(records: &[ChangeRecord]) -> Bytes {
    let mut buf = Vec::new();
    for record in records {
        record.encode_into(&mut buf);
    }
    Bytes::from(buf)
}

/// Poll `cond` until it holds, panicking after five seconds.
pub fn wait_until(what: &str, mut cond: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !cond() {
        assert!(Instant::now() < deadline, "timed out waiting for {}", what);
        thread::sleep(Duration::from_millis(1));
    }
}

/// Loopback provider that counts what reaches it and can hold
/// certification until several transactions arrived.
pub struct TappedProvider {
    inner: LoopbackProvider,
    appended_bytes: AtomicU64,
    appended_keys: AtomicU64,
    pre_commit_gate: Option<Barrier>,
}

impl TappedProvider {
    pub fn new(inner: LoopbackProvider) -> Self {
        Self {
            inner,
            appended_bytes: AtomicU64::new(0),
            appended_keys: AtomicU64::new(0),
            pre_commit_gate: None,
        }
    }

    /// Every `pre_commit` waits until `parties` callers arrived.
    pub fn with_pre_commit_gate(mut self, parties: usize) -> Self {
        self.pre_commit_gate = Some(Barrier::new(parties));
        self
    }

    pub fn loopback(&self) -> &LoopbackProvider {
        &self.inner
    }

    pub fn appended_bytes(&self) -> u64 {
        self.appended_bytes.load(Ordering::SeqCst)
    }

    pub fn appended_keys(&self) -> u64 {
        self.appended_keys.load(Ordering::SeqCst)
    }
}

impl Provider for TappedProvider {
    fn append_key(&self, ws: &WsHandle, key: &CertKey) -> Status {
        self.appended_keys.fetch_add(1, Ordering::SeqCst);
        self.inner.append_key(ws, key)
    }

    fn append_data(&self, ws: &WsHandle, data: &[u8]) -> Status {
        self.appended_bytes.fetch_add(data.len() as u64, Ordering::SeqCst);
        self.inner.append_data(ws, data)
    }

    fn pre_commit(
        &self,
        conn_id: ConnId,
        ws: &WsHandle,
        flags: WriteSetFlags,
        meta: &mut WriteSetMeta,
    ) -> Status {
        if let Some(gate) = &self.pre_commit_gate {
            gate.wait();
        }
        self.inner.pre_commit(conn_id, ws, flags, meta)
    }

    fn commit_order_enter(&self, ws: &WsHandle, meta: &WriteSetMeta) -> Status {
        self.inner.commit_order_enter(ws, meta)
    }

    fn commit_order_leave(&self, ws: &WsHandle, meta: &WriteSetMeta) -> Status {
        self.inner.commit_order_leave(ws, meta)
    }

    fn post_commit(&self, ws: &WsHandle) -> Status {
        self.inner.post_commit(ws)
    }

    fn post_rollback(&self, ws: &WsHandle) -> Status {
        self.inner.post_rollback(ws)
    }

    fn release(&self, ws: &WsHandle) -> Status {
        self.inner.release(ws)
    }

    fn rollback(&self, trx_id: TrxId, data: &[u8]) -> Status {
        self.inner.rollback(trx_id, data)
    }

    fn abort_pre_commit(&self, bf_seqno: Seqno, victim: TrxId) -> Status {
        self.inner.abort_pre_commit(bf_seqno, victim)
    }

    fn to_execute_start(
        &self,
        conn_id: ConnId,
        keys: &[CertKey],
        data: &[u8],
        meta: &mut WriteSetMeta,
    ) -> Status {
        self.inner.to_execute_start(conn_id, keys, data, meta)
    }

    fn to_execute_end(&self, conn_id: ConnId) -> Status {
        self.inner.to_execute_end(conn_id)
    }
}

//! Replication context
//!
//! One `ReplicationContext` per node, shared through `Arc` by every
//! session, applier and background thread. It owns what would otherwise
//! be process-wide state:
//! - provider, storage engine and fragment store handles
//! - the replay gate and the cancellation token
//! - the pool of replayer contexts
//! - the rollbacker queue and the registry of streaming transactions
//! - counters and the apply error log

mod gate;
mod pool;

pub use gate::{CancelToken, ReplayGate};
pub use pool::{ContextPool, Pooled, Recycle};

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;
use uuid::Uuid;

use crate::applier::{ApplyErrorLog, HighPriorityContext};
use crate::collaborators::{AtomicIdGenerator, IdGenerator, SstRequest, StateTransfer};
use crate::commit::{WsrepError, WsrepResult};
use crate::config::ReplicationConfig;
use crate::conflict::{reaper, rollbacker, RollbackQueue};
use crate::engine::StorageEngine;
use crate::fragment::{FileFragmentStore, FragmentStore};
use crate::observability::{Event, Logger, MetricsRegistry};
use crate::provider::Provider;
use crate::transaction::TransactionHandle;
use crate::types::{ConnId, Gtid, Seqno, TrxId};

/// Called with the reason of an unrecoverable inconsistency.
pub type FatalHandler = Box<dyn Fn(&str) + Send + Sync>;

/// Idle replayer contexts kept around.
const MAX_IDLE_REPLAYERS: usize = 8;

pub struct ReplicationContext {
    config: ReplicationConfig,
    node_id: Uuid,
    provider: Arc<dyn Provider>,
    engine: Arc<dyn StorageEngine>,
    store: Arc<dyn FragmentStore>,
    ids: Arc<dyn IdGenerator>,
    sst: Option<Arc<dyn StateTransfer>>,
    replay_gate: ReplayGate,
    metrics: MetricsRegistry,
    cancel: CancelToken,
    rollbacker: RollbackQueue,
    replayers: ContextPool<HighPriorityContext>,
    apply_errors: Option<ApplyErrorLog>,
    fatal_handler: FatalHandler,
    streaming: Mutex<HashMap<TrxId, Weak<TransactionHandle>>>,
    next_conn: AtomicU64,
}

impl ReplicationContext {
    pub fn builder(config: ReplicationConfig) -> ReplicationContextBuilder {
        ReplicationContextBuilder {
            config,
            provider: None,
            engine: None,
            store: None,
            ids: None,
            sst: None,
            fatal_handler: None,
        }
    }

    pub fn config(&self) -> &ReplicationConfig {
        &self.config
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    pub fn node_id(&self) -> Uuid {
        self.node_id
    }

    pub fn provider(&self) -> &dyn Provider {
        self.provider.as_ref()
    }

    pub fn engine(&self) -> &dyn StorageEngine {
        self.engine.as_ref()
    }

    pub fn engine_arc(&self) -> Arc<dyn StorageEngine> {
        Arc::clone(&self.engine)
    }

    pub fn store(&self) -> &dyn FragmentStore {
        self.store.as_ref()
    }

    pub fn ids(&self) -> &dyn IdGenerator {
        self.ids.as_ref()
    }

    pub fn replay_gate(&self) -> &ReplayGate {
        &self.replay_gate
    }

    pub fn metrics(&self) -> &MetricsRegistry {
        &self.metrics
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    pub fn rollbacker(&self) -> &RollbackQueue {
        &self.rollbacker
    }

    pub fn replayers(&self) -> &ContextPool<HighPriorityContext> {
        &self.replayers
    }

    pub fn apply_errors(&self) -> Option<&ApplyErrorLog> {
        self.apply_errors.as_ref()
    }

    /// Connection id for a new session.
    pub fn next_conn_id(&self) -> ConnId {
        self.next_conn.fetch_add(1, Ordering::Relaxed)
    }

    /// Report an unrecoverable inconsistency. Never returns.
    pub fn fatal(&self, reason: &str) -> ! {
        Logger::fatal(
            Event::FatalInconsistency,
            &[("node", &self.node_id.to_string()), ("reason", reason)],
        );
        (self.fatal_handler)(reason);
        std::process::abort()
    }

    /// Track a transaction that has replicated at least one fragment.
    pub fn register_streaming(&self, trx_id: TrxId, handle: &Arc<TransactionHandle>) {
        self.streaming.lock().insert(trx_id, Arc::downgrade(handle));
    }

    pub fn unregister_streaming(&self, trx_id: TrxId) {
        self.streaming.lock().remove(&trx_id);
    }

    /// Handle of a registered streaming transaction, if it is still alive.
    pub fn streaming_handle(&self, trx_id: TrxId) -> Option<Arc<TransactionHandle>> {
        self.streaming.lock().get(&trx_id).and_then(Weak::upgrade)
    }

    /// Live streaming transactions; dead entries are pruned.
    pub fn streaming_handles(&self) -> Vec<Arc<TransactionHandle>> {
        let mut registry = self.streaming.lock();
        registry.retain(|_, weak| weak.strong_count() > 0);
        registry.values().filter_map(Weak::upgrade).collect()
    }

    /// Ask the state transfer helper for a snapshot request.
    pub fn request_snapshot(&self) -> Option<SstRequest> {
        self.sst.as_ref().map(|sst| sst.request_transfer())
    }

    /// A snapshot was installed: the engine now sits at `(uuid, seqno)`.
    pub fn snapshot_received(&self, uuid: Uuid, seqno: Seqno) -> WsrepResult<()> {
        let gtid = Gtid::new(uuid, seqno);
        self.engine.set_checkpoint(gtid)?;
        if let Some(sst) = &self.sst {
            sst.on_snapshot_received(uuid, seqno)?;
        }
        Logger::info(Event::SnapshotReceived, &[("gtid", &gtid.to_string())]);
        Ok(())
    }

    /// Serve a joiner's snapshot request from the current checkpoint.
    pub fn donate_snapshot(&self, request: &SstRequest) -> WsrepResult<()> {
        let sst = self
            .sst
            .as_ref()
            .ok_or_else(|| WsrepError::invalid_state("no state transfer helper configured"))?;
        let checkpoint = self.engine.checkpoint();
        sst.donate(request, checkpoint)?;
        Logger::info(Event::SnapshotDonated, &[("gtid", &checkpoint.to_string())]);
        Ok(())
    }

    /// Start the rollbacker and, when configured, the idle streaming reaper.
    pub fn start_background(self: &Arc<Self>) -> BackgroundWorkers {
        let stop = CancelToken::new();
        let mut threads = Vec::new();

        let ctx = Arc::clone(self);
        let token = stop.clone();
        threads.push(
            thread::Builder::new()
                .name("wsrep-rollbacker".to_string())
                .spawn(move || rollbacker::run(&ctx, &token)),
        );

        if let Some(timeout) = self.config.sr_idle_timeout() {
            let ctx = Arc::clone(self);
            let token = stop.clone();
            threads.push(
                thread::Builder::new()
                    .name("wsrep-sr-reaper".to_string())
                    .spawn(move || reaper::run(&ctx, &token, timeout)),
            );
        }

        let threads = threads
            .into_iter()
            .filter_map(|spawned| match spawned {
                Ok(handle) => Some(handle),
                Err(e) => {
                    Logger::error(Event::ReplicationInit, &[("error", &e.to_string())]);
                    None
                }
            })
            .collect();

        BackgroundWorkers {
            ctx: Arc::clone(self),
            stop,
            threads,
        }
    }

    /// Cancel every wait in progress. Sessions observe `Interrupted`.
    pub fn shutdown(&self) {
        self.cancel.cancel();
        self.replay_gate.wake();
        self.rollbacker.wake();
        Logger::info(Event::ReplicationShutdown, &[("node", &self.node_id.to_string())]);
    }
}

/// Handles of the background threads started by `start_background`.
pub struct BackgroundWorkers {
    ctx: Arc<ReplicationContext>,
    stop: CancelToken,
    threads: Vec<JoinHandle<()>>,
}

impl BackgroundWorkers {
    pub fn len(&self) -> usize {
        self.threads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.threads.is_empty()
    }

    /// Stop the threads and wait for them.
    pub fn shutdown(self) {
        self.stop.cancel();
        self.ctx.rollbacker.wake();
        for handle in self.threads {
            let _ = handle.join();
        }
    }
}

pub struct ReplicationContextBuilder {
    config: ReplicationConfig,
    provider: Option<Arc<dyn Provider>>,
    engine: Option<Arc<dyn StorageEngine>>,
    store: Option<Arc<dyn FragmentStore>>,
    ids: Option<Arc<dyn IdGenerator>>,
    sst: Option<Arc<dyn StateTransfer>>,
    fatal_handler: Option<FatalHandler>,
}

impl ReplicationContextBuilder {
    pub fn provider(mut self, provider: Arc<dyn Provider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn engine(mut self, engine: Arc<dyn StorageEngine>) -> Self {
        self.engine = Some(engine);
        self
    }

    /// Defaults to a file store under `<data_dir>/sr`.
    pub fn store(mut self, store: Arc<dyn FragmentStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Defaults to an `AtomicIdGenerator` over the engine.
    pub fn ids(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = Some(ids);
        self
    }

    pub fn state_transfer(mut self, sst: Arc<dyn StateTransfer>) -> Self {
        self.sst = Some(sst);
        self
    }

    /// Replace the default fatal handler, which aborts the process.
    pub fn fatal_handler(mut self, handler: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.fatal_handler = Some(Box::new(handler));
        self
    }

    pub fn build(self) -> WsrepResult<Arc<ReplicationContext>> {
        let mut config = self.config;
        let node_id = config.resolve_node_id();
        config.validate()?;

        let provider = self
            .provider
            .ok_or_else(|| WsrepError::invalid_state("replication context needs a provider"))?;
        let engine = self
            .engine
            .ok_or_else(|| WsrepError::invalid_state("replication context needs a storage engine"))?;
        let store: Arc<dyn FragmentStore> = match self.store {
            Some(store) => store,
            None => Arc::new(FileFragmentStore::open(config.fragment_dir())?),
        };
        let ids = self
            .ids
            .unwrap_or_else(|| Arc::new(AtomicIdGenerator::new(Arc::clone(&engine))));
        let apply_errors = config.apply_error_log.as_ref().map(ApplyErrorLog::new);
        let fatal_handler = self.fatal_handler.unwrap_or_else(|| Box::new(|_: &str| {}));

        Logger::info(
            Event::ReplicationInit,
            &[
                ("node", &node_id.to_string()),
                ("node_name", &config.node_name),
                ("max_ws_size", &config.max_ws_size.to_string()),
                ("fragment_unit", config.fragment_unit.as_str()),
                ("fragment_size", &config.fragment_size.to_string()),
                ("enabled", &config.enabled.to_string()),
            ],
        );

        Ok(Arc::new(ReplicationContext {
            replay_gate: ReplayGate::new(config.replay_poll_interval()),
            replayers: ContextPool::new(MAX_IDLE_REPLAYERS, move |seq| {
                HighPriorityContext::replayer(node_id, seq)
            }),
            config,
            node_id,
            provider,
            engine,
            store,
            ids,
            sst: self.sst,
            metrics: MetricsRegistry::new(),
            cancel: CancelToken::new(),
            rollbacker: RollbackQueue::new(),
            apply_errors,
            fatal_handler,
            streaming: Mutex::new(HashMap::new()),
            next_conn: AtomicU64::new(1),
        }))
    }
}

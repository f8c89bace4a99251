//! Applier thread pool
//!
//! Delivered write-sets go into one channel shared by `applier_threads`
//! workers, in delivery order. Workers apply in parallel and the
//! provider's commit order serializes them at commit time.

use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;

use super::remote::RemoteApplier;
use crate::commit::{WsrepError, WsrepResult};
use crate::context::ReplicationContext;
use crate::observability::{Event, Logger};
use crate::provider::ReceivedWriteSet;

pub struct ApplierPool {
    sender: Option<Sender<ReceivedWriteSet>>,
    workers: Vec<JoinHandle<()>>,
}

impl ApplierPool {
    /// Start `threads` appliers (at least one).
    pub fn start(ctx: &Arc<ReplicationContext>, threads: usize) -> WsrepResult<Self> {
        let (sender, receiver) = mpsc::channel();
        let receiver = Arc::new(Mutex::new(receiver));

        let mut workers = Vec::new();
        for id in 0..threads.max(1) {
            let ctx = Arc::clone(ctx);
            let receiver = Arc::clone(&receiver);
            let worker = thread::Builder::new()
                .name(format!("wsrep-applier-{}", id))
                .spawn(move || worker_loop(&ctx, id, &receiver))
                .map_err(|e| WsrepError::invalid_state(format!("spawn applier thread: {}", e)))?;
            workers.push(worker);
        }

        Ok(Self {
            sender: Some(sender),
            workers,
        })
    }

    /// Start as many appliers as the configuration asks for.
    pub fn from_config(ctx: &Arc<ReplicationContext>) -> WsrepResult<Self> {
        Self::start(ctx, ctx.config().applier_threads)
    }

    pub fn threads(&self) -> usize {
        self.workers.len()
    }

    /// Hand a delivered write-set to the next free applier. Must be
    /// called in delivery order.
    pub fn submit(&self, ws: ReceivedWriteSet) -> WsrepResult<()> {
        let sender = self
            .sender
            .as_ref()
            .ok_or_else(|| WsrepError::invalid_state("applier pool is shut down"))?;
        sender
            .send(ws)
            .map_err(|_| WsrepError::invalid_state("applier threads exited"))
    }

    /// Apply everything already submitted, then stop the workers.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        self.sender = None;
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

impl Drop for ApplierPool {
    fn drop(&mut self) {
        self.stop();
    }
}

fn worker_loop(ctx: &ReplicationContext, id: usize, receiver: &Mutex<Receiver<ReceivedWriteSet>>) {
    let mut applier = RemoteApplier::new(ctx, id);
    loop {
        // The lock is held only while waiting, never while applying.
        let next = receiver.lock().recv();
        let Ok(ws) = next else {
            break;
        };
        let seqno = ws.meta.seqno();
        if let Err(e) = applier.apply(ws) {
            Logger::error(
                Event::ApplyError,
                &[
                    ("applier", &id.to_string()),
                    ("seqno", &seqno.to_string()),
                    ("error", &e.to_string()),
                ],
            );
        }
    }
}

//! Idle streaming transaction reaper
//!
//! A streaming transaction pins its fragments on every node. One left
//! idle between statements for longer than the configured timeout is
//! BF-aborted and handed to the rollbacker.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use super::ConflictResolver;
use crate::context::{CancelToken, ReplicationContext};
use crate::observability::{Event, Logger};
use crate::types::{QueryState, SEQNO_UNDEFINED};

/// Aborter id the reaper signs its BF-aborts with.
pub const REAPER_ID: u64 = 0;

const MAX_SWEEP_INTERVAL: Duration = Duration::from_millis(100);

/// Reaper thread body. Returns when `stop` or the context is cancelled.
pub fn run(ctx: &Arc<ReplicationContext>, stop: &CancelToken, timeout: Duration) {
    let interval = (timeout / 2).min(MAX_SWEEP_INTERVAL).max(Duration::from_millis(1));
    while !stop.is_cancelled() && !ctx.cancel_token().is_cancelled() {
        sweep(ctx, timeout);
        thread::sleep(interval);
    }
}

/// Abort every streaming transaction idle for longer than `timeout`.
/// Returns how many were aborted.
pub fn sweep(ctx: &ReplicationContext, timeout: Duration) -> usize {
    let resolver = ConflictResolver::new(ctx);
    let mut reaped = 0;
    for handle in ctx.streaming_handles() {
        let guard = handle.lock_kill();
        let (idle, trx_id) = {
            let st = guard.lock();
            let idle = st.is_streaming()
                && st.query_state() == QueryState::Idle
                && st.last_activity.elapsed() > timeout;
            (idle, st.trx_id())
        };
        if idle && resolver.bf_abort(REAPER_ID, SEQNO_UNDEFINED, &guard) {
            reaped += 1;
            Logger::info(
                Event::ReaperAbort,
                &[
                    ("conn_id", &guard.conn_id().to_string()),
                    ("timeout_ms", &timeout.as_millis().to_string()),
                    ("trx_id", &trx_id.map(|id| id.to_string()).unwrap_or_default()),
                ],
            );
        }
    }
    reaped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ReplicationConfig;
    use crate::engine::MemoryEngine;
    use crate::fragment::MemoryFragmentStore;
    use crate::provider::LoopbackProvider;
    use crate::transaction::TransactionHandle;
    use crate::types::ConflictState;
    use uuid::Uuid;

    #[test]
    fn test_sweep_aborts_only_idle_streaming() {
        let ctx = ReplicationContext::builder(ReplicationConfig::default())
            .provider(Arc::new(LoopbackProvider::new(Uuid::new_v4())))
            .engine(Arc::new(MemoryEngine::new()))
            .store(Arc::new(MemoryFragmentStore::new()))
            .build()
            .unwrap();

        let idle = Arc::new(TransactionHandle::new(ctx.node_id(), 1));
        let busy = Arc::new(TransactionHandle::new(ctx.node_id(), 2));
        for (handle, trx_id, query) in [(&idle, 1, QueryState::Idle), (&busy, 2, QueryState::Exec)] {
            let mut st = handle.lock();
            st.start(trx_id, false, true).unwrap();
            st.fragments_sent = 1;
            st.query_state = query;
            drop(st);
            ctx.register_streaming(trx_id, handle);
        }

        thread::sleep(Duration::from_millis(20));
        assert_eq!(sweep(&ctx, Duration::from_millis(5)), 1);
        assert_eq!(idle.conflict_state(), ConflictState::MustAbort);
        assert_eq!(busy.conflict_state(), ConflictState::NoConflict);
        assert_eq!(idle.snapshot().aborter, Some(REAPER_ID));

        assert_eq!(sweep(&ctx, Duration::from_secs(60)), 0);
    }
}

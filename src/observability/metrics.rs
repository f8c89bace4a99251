//! Replication counters
//!
//! - Counters only, monotonic
//! - Reset only on process start
//! - Relaxed atomics; values are informational

use std::sync::atomic::{AtomicU64, Ordering};

/// Operational counters shared through the replication context.
#[derive(Debug, Default)]
pub struct MetricsRegistry {
    commits: AtomicU64,
    rollbacks: AtomicU64,
    cert_failures: AtomicU64,
    bf_aborts: AtomicU64,
    replays: AtomicU64,
    replay_failures: AtomicU64,
    fragments_replicated: AtomicU64,
    ws_bytes_replicated: AtomicU64,
    remote_applied: AtomicU64,
    apply_failures: AtomicU64,
}

/// Point-in-time copy of every counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MetricsSnapshot {
    pub commits: u64,
    pub rollbacks: u64,
    pub cert_failures: u64,
    pub bf_aborts: u64,
    pub replays: u64,
    pub replay_failures: u64,
    pub fragments_replicated: u64,
    pub ws_bytes_replicated: u64,
    pub remote_applied: u64,
    pub apply_failures: u64,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment_commits(&self) {
        self.commits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_rollbacks(&self) {
        self.rollbacks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_cert_failures(&self) {
        self.cert_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_bf_aborts(&self) {
        self.bf_aborts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_replays(&self) {
        self.replays.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_replay_failures(&self) {
        self.replay_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_fragments(&self) {
        self.fragments_replicated.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_ws_bytes(&self, bytes: u64) {
        self.ws_bytes_replicated.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn increment_remote_applied(&self) {
        self.remote_applied.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_apply_failures(&self) {
        self.apply_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            commits: self.commits.load(Ordering::Relaxed),
            rollbacks: self.rollbacks.load(Ordering::Relaxed),
            cert_failures: self.cert_failures.load(Ordering::Relaxed),
            bf_aborts: self.bf_aborts.load(Ordering::Relaxed),
            replays: self.replays.load(Ordering::Relaxed),
            replay_failures: self.replay_failures.load(Ordering::Relaxed),
            fragments_replicated: self.fragments_replicated.load(Ordering::Relaxed),
            ws_bytes_replicated: self.ws_bytes_replicated.load(Ordering::Relaxed),
            remote_applied: self.remote_applied.load(Ordering::Relaxed),
            apply_failures: self.apply_failures.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_counters_start_at_zero() {
        assert_eq!(MetricsRegistry::new().snapshot(), MetricsSnapshot::default());
    }

    #[test]
    fn test_concurrent_increments() {
        let metrics = Arc::new(MetricsRegistry::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let m = Arc::clone(&metrics);
                thread::spawn(move || {
                    for _ in 0..100 {
                        m.increment_bf_aborts();
                        m.add_ws_bytes(10);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        let snap = metrics.snapshot();
        assert_eq!(snap.bf_aborts, 400);
        assert_eq!(snap.ws_bytes_replicated, 4000);
    }
}

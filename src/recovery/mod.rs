//! Startup recovery of streaming fragments
//!
//! # Sequence
//!
//! 1. Note whether the previous run shut down cleanly
//! 2. Scan the fragment store
//! 3. Delete orphans: fragments recorded but never certified, left by a
//!    crash between append and certification
//! 4. Apply each remaining transaction's fragments in ascending seqno
//!    order through the headless storage service, then remove them
//! 5. Remove the clean shutdown marker
//!
//! Any failure halts startup.

mod errors;
mod marker;

pub use errors::{RecoveryError, RecoveryResult};
pub use marker::ShutdownMarker;

use std::collections::BTreeMap;

use serde::Serialize;
use uuid::Uuid;

use crate::applier::{ApplierService, StorageService};
use crate::context::ReplicationContext;
use crate::crash_point::{maybe_crash, points};
use crate::fragment::Fragment;
use crate::observability::{Event, Logger};
use crate::types::{Stid, TrxId, WriteSetFlags, WriteSetMeta};

/// What a recovery run did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RecoveryStats {
    pub orphans_removed: usize,
    pub transactions_replayed: usize,
    pub fragments_replayed: usize,
    pub was_clean_shutdown: bool,
}

pub struct FragmentRecovery<'a> {
    ctx: &'a ReplicationContext,
    marker: ShutdownMarker,
}

impl<'a> FragmentRecovery<'a> {
    pub fn new(ctx: &'a ReplicationContext) -> Self {
        Self {
            ctx,
            marker: ShutdownMarker::new(&ctx.config().data_dir),
        }
    }

    pub fn marker(&self) -> &ShutdownMarker {
        &self.marker
    }

    /// Called on graceful shutdown.
    pub fn mark_clean_shutdown(&self) -> RecoveryResult<()> {
        self.marker.write()
    }

    /// Run the full recovery sequence.
    pub fn run(&self) -> RecoveryResult<RecoveryStats> {
        let result = self.recover();
        if let Err(e) = &result {
            Logger::fatal(Event::RecoveryFailed, &[("error", &e.to_string())]);
        }
        result
    }

    /// Delete every uncertified fragment. Returns the number removed.
    pub fn purge_orphans(&self) -> RecoveryResult<usize> {
        let service = StorageService::new(self.ctx);
        let mut removed = 0;
        for orphan in self.ctx.store().scan_all()?.filter(Fragment::is_orphan) {
            self.remove_orphan(&service, &orphan)?;
            removed += 1;
        }
        Ok(removed)
    }

    fn recover(&self) -> RecoveryResult<RecoveryStats> {
        let mut stats = RecoveryStats {
            was_clean_shutdown: self.marker.exists(),
            ..RecoveryStats::default()
        };
        Logger::info(
            Event::RecoveryStart,
            &[
                ("clean_shutdown", &stats.was_clean_shutdown.to_string()),
                ("fragments", &self.ctx.store().len().to_string()),
            ],
        );

        let (orphans, certified): (Vec<Fragment>, Vec<Fragment>) =
            self.ctx.store().scan_all()?.partition(Fragment::is_orphan);

        let mut service = StorageService::new(self.ctx);
        for orphan in &orphans {
            self.remove_orphan(&service, orphan)?;
            stats.orphans_removed += 1;
        }
        maybe_crash(points::RECOVERY_AFTER_ORPHAN_PURGE);

        for fragments in by_transaction(certified) {
            stats.fragments_replayed += self.replay_transaction(&mut service, &fragments)?;
            stats.transactions_replayed += 1;
        }

        self.marker.remove()?;
        Logger::info(
            Event::RecoveryComplete,
            &[
                ("orphans_removed", &stats.orphans_removed.to_string()),
                ("transactions_replayed", &stats.transactions_replayed.to_string()),
                ("fragments_replayed", &stats.fragments_replayed.to_string()),
            ],
        );
        Ok(stats)
    }

    fn remove_orphan(&self, service: &StorageService<'_>, orphan: &Fragment) -> RecoveryResult<()> {
        service.remove_fragment(orphan.key())?;
        Logger::info(
            Event::RecoveryOrphanRemoved,
            &[
                ("server_id", &orphan.server_id.to_string()),
                ("trx_id", &orphan.trx_id.to_string()),
                ("bytes", &orphan.payload.len().to_string()),
            ],
        );
        Ok(())
    }

    /// Apply one transaction's certified fragments and drop them from the
    /// store in the same commit.
    fn replay_transaction(
        &self,
        service: &mut StorageService<'_>,
        fragments: &[Fragment],
    ) -> RecoveryResult<usize> {
        let Some(first) = fragments.first() else {
            return Ok(0);
        };
        let (server_id, trx_id) = (first.server_id, first.trx_id);
        let mut meta = WriteSetMeta::new(Stid::new(server_id, trx_id, 0));
        meta.flags = fragments
            .iter()
            .fold(WriteSetFlags::empty(), |flags, f| flags | f.flags);

        service
            .start_transaction(None, &meta)
            .map_err(|source| RecoveryError::Apply {
                server_id,
                trx_id,
                source,
            })?;
        for fragment in fragments {
            if let Err(source) = service.apply_write_set(&meta, &fragment.payload) {
                let _ = service.rollback(&meta);
                service.cleanup();
                return Err(RecoveryError::Apply {
                    server_id,
                    trx_id,
                    source,
                });
            }
        }

        service.stage_removal(server_id, trx_id);
        let committed = service.commit(&meta);
        service.cleanup();
        committed.map_err(|source| RecoveryError::Commit {
            server_id,
            trx_id,
            source,
        })?;
        maybe_crash(points::RECOVERY_AFTER_TRX_APPLY);

        let last_seqno = fragments.last().and_then(|f| f.seqno).unwrap_or_default();
        Logger::info(
            Event::RecoveryTransactionReplayed,
            &[
                ("server_id", &server_id.to_string()),
                ("trx_id", &trx_id.to_string()),
                ("fragments", &fragments.len().to_string()),
                ("last_seqno", &last_seqno.to_string()),
            ],
        );
        Ok(fragments.len())
    }
}

/// Certified fragments grouped per transaction, each group in ascending
/// seqno order, groups ordered by their first seqno.
fn by_transaction(certified: Vec<Fragment>) -> Vec<Vec<Fragment>> {
    let mut groups: BTreeMap<(Uuid, TrxId), Vec<Fragment>> = BTreeMap::new();
    for fragment in certified {
        groups
            .entry((fragment.server_id, fragment.trx_id))
            .or_default()
            .push(fragment);
    }
    let mut groups: Vec<Vec<Fragment>> = groups.into_values().collect();
    for group in &mut groups {
        group.sort_by_key(|f| f.seqno);
    }
    groups.sort_by_key(|group| group.first().and_then(|f| f.seqno));
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ReplicationConfig;
    use crate::engine::MemoryEngine;
    use crate::fragment::{FragmentStore, MemoryFragmentStore};
    use crate::provider::LoopbackProvider;
    use crate::writeset::ChangeRecord;
    use bytes::Bytes;
    use std::sync::Arc;
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        ctx: Arc<ReplicationContext>,
        engine: Arc<MemoryEngine>,
        store: Arc<MemoryFragmentStore>,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let engine = Arc::new(MemoryEngine::new());
        let store = Arc::new(MemoryFragmentStore::new());
        let ctx = ReplicationContext::builder(ReplicationConfig::with_data_dir(dir.path()))
            .provider(Arc::new(LoopbackProvider::new(Uuid::new_v4())))
            .engine(engine.clone())
            .store(store.clone())
            .build()
            .unwrap();
        Fixture {
            _dir: dir,
            ctx,
            engine,
            store,
        }
    }

    fn payload(key: &str) -> Bytes {
        Bytes::from(ChangeRecord::insert("t", key.as_bytes().to_vec(), b"v".to_vec()).encode())
    }

    #[test]
    fn test_orphans_removed_and_certified_applied() {
        let f = fixture();
        let node = f.ctx.node_id();
        let peer = Uuid::new_v4();
        f.store
            .append(Fragment::certified(node, 2, 3, WriteSetFlags::TRX_START, payload("a")))
            .unwrap();
        f.store
            .append(Fragment::certified(node, 2, 5, WriteSetFlags::empty(), payload("b")))
            .unwrap();
        f.store
            .append(Fragment::uncertified(node, 2, WriteSetFlags::empty(), payload("c")))
            .unwrap();
        f.store
            .append(Fragment::uncertified(peer, 9, WriteSetFlags::TRX_START, payload("d")))
            .unwrap();

        let stats = FragmentRecovery::new(&f.ctx).run().unwrap();
        assert_eq!(stats.orphans_removed, 2);
        assert_eq!(stats.transactions_replayed, 1);
        assert_eq!(stats.fragments_replayed, 2);
        assert!(!stats.was_clean_shutdown);

        assert!(f.store.is_empty());
        assert!(f.engine.get("t", b"a").is_some());
        assert!(f.engine.get("t", b"b").is_some());
        assert!(f.engine.get("t", b"c").is_none());
        assert!(f.engine.get("t", b"d").is_none());
        assert_eq!(f.engine.commit_log(), vec![None]);
    }

    #[test]
    fn test_clean_shutdown_marker_consumed() {
        let f = fixture();
        let recovery = FragmentRecovery::new(&f.ctx);
        recovery.mark_clean_shutdown().unwrap();

        let stats = recovery.run().unwrap();
        assert!(stats.was_clean_shutdown);
        assert_eq!(stats, RecoveryStats {
            was_clean_shutdown: true,
            ..RecoveryStats::default()
        });
        assert!(!recovery.marker().exists());
    }

    #[test]
    fn test_unappliable_fragment_halts_recovery() {
        let f = fixture();
        let node = f.ctx.node_id();
        f.store
            .append(Fragment::certified(node, 4, 1, WriteSetFlags::TRX_START, Bytes::from_static(b"\xff")))
            .unwrap();

        let err = FragmentRecovery::new(&f.ctx).run().unwrap_err();
        assert!(matches!(err, RecoveryError::Apply { trx_id: 4, .. }));
        assert!(err.is_fatal());
        assert_eq!(f.store.len(), 1);
        assert_eq!(f.engine.open_transactions(), 0);
    }

    #[test]
    fn test_purge_orphans_keeps_certified() {
        let f = fixture();
        let node = f.ctx.node_id();
        f.store
            .append(Fragment::certified(node, 1, 1, WriteSetFlags::TRX_START, payload("a")))
            .unwrap();
        f.store
            .append(Fragment::uncertified(node, 1, WriteSetFlags::empty(), payload("b")))
            .unwrap();

        assert_eq!(FragmentRecovery::new(&f.ctx).purge_orphans().unwrap(), 1);
        let left = f.store.fragments_of(node, 1).unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].seqno, Some(1));
    }

    #[test]
    fn test_groups_ordered_by_first_seqno() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let groups = by_transaction(vec![
            Fragment::certified(a, 1, 7, WriteSetFlags::empty(), Bytes::new()),
            Fragment::certified(a, 1, 4, WriteSetFlags::TRX_START, Bytes::new()),
            Fragment::certified(b, 5, 2, WriteSetFlags::TRX_START, Bytes::new()),
        ]);
        let seqnos: Vec<Vec<Option<i64>>> = groups
            .iter()
            .map(|g| g.iter().map(|f| f.seqno).collect())
            .collect();
        assert_eq!(seqnos, vec![vec![Some(2)], vec![Some(4), Some(7)]]);
    }
}

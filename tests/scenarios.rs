//! End-to-end replication scenarios
//!
//! - A: concurrent conflicting certification, first committer wins
//! - B: BF-abort between certification and ordered commit ends in replay
//! - C: byte-unit streaming cuts fragments with correct flags
//! - D: an uncertified fragment left by a crash is purged, not replayed
//! - E: an oversized write-set never reaches the provider

mod common;

use std::sync::mpsc;
use std::sync::Arc;
use std::thread;

use common::{insert, node, node_from_parts, node_with, row, wait_until, TappedProvider};
use tempfile::TempDir;
use uuid::Uuid;
use wsrep_core::applier::{ApplyOutcome, RemoteApplier};
use wsrep_core::commit::{SqlError, WsrepError};
use wsrep_core::config::{FragmentUnit, ReplicationConfig};
use wsrep_core::conflict::ConflictResolver;
use wsrep_core::engine::StorageEngine;
use wsrep_core::fragment::{FileFragmentStore, Fragment, FragmentStore};
use wsrep_core::provider::LoopbackProvider;
use wsrep_core::recovery::FragmentRecovery;
use wsrep_core::transaction::Session;
use wsrep_core::types::{ClientExecMode, ConflictState, Stid, WriteSetFlags};

// =============================================================================
// Scenario A: concurrent certification of conflicting keys
// =============================================================================

#[test]
fn test_scenario_a_one_of_two_conflicting_transactions_certifies() {
    let provider = Arc::new(
        TappedProvider::new(LoopbackProvider::new(Uuid::new_v4())).with_pre_commit_gate(2),
    );
    let n = node_from_parts(
        ReplicationConfig::default(),
        provider,
        Arc::new(wsrep_core::fragment::MemoryFragmentStore::new()),
    );

    let workers: Vec<_> = ["left", "right"]
        .into_iter()
        .map(|value| {
            let ctx = Arc::clone(&n.ctx);
            thread::spawn(move || {
                let mut session = Session::new(ctx);
                session.begin()?;
                session.write_row(insert("k", value))?;
                session.commit().map(|_| value)
            })
        })
        .collect();
    let outcomes: Vec<_> = workers.into_iter().map(|w| w.join().unwrap()).collect();

    let winners: Vec<&str> = outcomes.iter().filter_map(|o| o.as_ref().ok().copied()).collect();
    assert_eq!(winners.len(), 1, "outcomes: {:?}", outcomes);
    let loser = outcomes.iter().find_map(|o| o.as_ref().err()).unwrap();
    assert!(matches!(loser, WsrepError::CertificationFailure { .. }));
    assert_eq!(loser.to_sql_error(), SqlError::Deadlock);

    assert_eq!(n.engine.get("t", b"k"), Some(winners[0].as_bytes().to_vec()));
    assert_eq!(n.engine.open_transactions(), 0);
    assert_eq!(n.provider.loopback().certified().len(), 1);
    assert_eq!(n.provider.loopback().last_committed(), 1);
    assert_eq!(n.provider.loopback().open_write_sets(), 0);

    let metrics = n.ctx.metrics().snapshot();
    assert_eq!(metrics.commits, 1);
    assert_eq!(metrics.cert_failures, 1);
}

// =============================================================================
// Scenario B: BF-abort after certification
// =============================================================================

#[test]
fn test_scenario_b_certified_victim_is_replayed() {
    let n = node();
    let loopback = n.provider.loopback();

    // A remote write-set ordered first keeps the local commit waiting.
    let remote_record = insert("r", "remote");
    let remote = loopback
        .deliver(
            Stid::new(Uuid::new_v4(), 77, 1),
            WriteSetFlags::TRX_START | WriteSetFlags::TRX_END,
            &[remote_record.cert_key()],
            common::payload(&[remote_record]),
            loopback.last_seqno(),
        )
        .unwrap();
    let bf_seqno = remote.meta.seqno();

    let (tx, rx) = mpsc::channel();
    let ctx = Arc::clone(&n.ctx);
    let local = thread::spawn(move || {
        let mut session = Session::new(ctx);
        session.begin()?;
        session.begin_statement()?;
        session.write_row(insert("a", "1"))?;
        session.write_row(insert("b", "2"))?;
        session.end_statement()?;
        tx.send(Arc::clone(session.handle())).unwrap();
        session.commit()
    });

    let victim = rx.recv().unwrap();
    wait_until("victim certification", || {
        victim.exec_mode() == ClientExecMode::LocalCommit
    });
    let resolver = ConflictResolver::new(&n.ctx);
    assert!(resolver.bf_abort(1000, bf_seqno, &victim.lock_kill()));
    assert!(matches!(
        victim.conflict_state(),
        ConflictState::MustReplay | ConflictState::Replaying
    ));

    let mut applier = RemoteApplier::new(&n.ctx, 0);
    assert_eq!(applier.apply(remote).unwrap(), ApplyOutcome::Committed);

    let result = local.join().unwrap().unwrap();
    assert_eq!(result.affected_rows, 2);
    assert_eq!(n.engine.get("t", b"a"), Some(b"1".to_vec()));
    assert_eq!(n.engine.get("t", b"b"), Some(b"2".to_vec()));
    assert_eq!(n.engine.get("t", b"r"), Some(b"remote".to_vec()));

    let seqnos: Vec<i64> = n
        .engine
        .commit_log()
        .into_iter()
        .map(|gtid| gtid.unwrap().seqno)
        .collect();
    assert_eq!(seqnos, vec![1, 2]);
    assert_eq!(victim.conflict_state(), ConflictState::NoConflict);
    assert_eq!(n.ctx.replay_gate().active(), 0);

    let metrics = n.ctx.metrics().snapshot();
    assert_eq!(metrics.replays, 1);
    assert_eq!(metrics.bf_aborts, 1);
    assert_eq!(metrics.replay_failures, 0);
}

// =============================================================================
// Scenario C: byte-unit streaming
// =============================================================================

#[test]
fn test_scenario_c_byte_threshold_cuts_five_write_sets() {
    let config = ReplicationConfig {
        fragment_unit: FragmentUnit::Bytes,
        fragment_size: 1024,
        ..ReplicationConfig::default()
    };
    let n = node_with(config);
    let mut session = Session::new(Arc::clone(&n.ctx));
    session.begin().unwrap();
    for i in 0..50 {
        session.write_row(row(i)).unwrap();
    }
    assert_eq!(session.handle().fragments_sent(), 4);
    assert_eq!(n.store.len(), 4);
    session.commit().unwrap();

    let certified = n.provider.loopback().certified();
    assert_eq!(certified.len(), 5);
    let total: usize = certified.iter().map(|c| c.data.len()).sum();
    assert_eq!(total, 5000);

    for (i, ws) in certified.iter().enumerate() {
        let flags = ws.meta.flags;
        assert_eq!(flags.contains(WriteSetFlags::TRX_START), i == 0, "fragment {}", i);
        assert_eq!(flags.contains(WriteSetFlags::TRX_END), i == 4, "fragment {}", i);
        assert_eq!(ws.meta.seqno(), i as i64 + 1);
    }
    assert!(certified[4].data.len() <= 1024);

    assert!(n.store.is_empty());
    assert_eq!(n.engine.rows().len(), 50);
    assert_eq!(n.engine.checkpoint().seqno, 5);
    assert_eq!(n.ctx.metrics().snapshot().fragments_replicated, 4);
    assert!(n.ctx.streaming_handles().is_empty());
}

// =============================================================================
// Scenario D: crash between fragment append and seqno update
// =============================================================================

#[test]
fn test_scenario_d_orphan_fragment_is_purged_on_restart() {
    let dir = TempDir::new().unwrap();
    let config = ReplicationConfig::with_data_dir(dir.path());
    let node_id = config.node_uuid();

    // The process dies right after the uncertified append.
    {
        let store = FileFragmentStore::open(config.fragment_dir()).unwrap();
        store
            .append(Fragment::uncertified(
                node_id,
                7,
                WriteSetFlags::TRX_START,
                common::payload(&[insert("ghost", "x")]),
            ))
            .unwrap();
    }

    let store = Arc::new(FileFragmentStore::open(config.fragment_dir()).unwrap());
    assert_eq!(store.len(), 1);
    let provider = Arc::new(TappedProvider::new(LoopbackProvider::new(node_id)));
    let restarted = node_from_parts(config.clone(), provider, store);

    let stats = FragmentRecovery::new(&restarted.ctx).run().unwrap();
    assert_eq!(stats.orphans_removed, 1);
    assert_eq!(stats.transactions_replayed, 0);
    assert!(!stats.was_clean_shutdown);
    assert_eq!(restarted.engine.get("t", b"ghost"), None);
    assert!(restarted.engine.commit_log().is_empty());

    let reopened = FileFragmentStore::open(config.fragment_dir()).unwrap();
    assert!(reopened.is_empty());
}

// =============================================================================
// Scenario E: size limit
// =============================================================================

#[test]
fn test_scenario_e_oversized_write_set_appends_nothing() {
    let config = ReplicationConfig {
        max_ws_size: 256,
        ..ReplicationConfig::default()
    };
    let n = node_with(config);
    let mut session = Session::new(Arc::clone(&n.ctx));
    session.begin().unwrap();
    for i in 0..3 {
        session.write_row(row(i)).unwrap();
    }

    let err = session.commit().unwrap_err();
    assert!(matches!(err, WsrepError::SizeExceeded { max: 256, .. }));
    assert_eq!(err.to_sql_error(), SqlError::ErrorDuringCommit);

    assert_eq!(n.provider.appended_bytes(), 0);
    assert_eq!(n.provider.appended_keys(), 0);
    assert!(n.provider.loopback().certified().is_empty());
    assert_eq!(n.provider.loopback().open_write_sets(), 0);
    assert_eq!(n.engine.get("t", &0u32.to_be_bytes()), None);
    assert_eq!(n.engine.open_transactions(), 0);
    assert!(!session.in_transaction());
}

//! Startup recovery of the durable fragment store
//!
//! After a simulated crash every uncertified fragment is deleted and
//! every certified one is applied exactly once, in ascending seqno order
//! per transaction. Recovery failures halt startup with nothing applied
//! from the failing transaction.

mod common;

use std::sync::Arc;

use bytes::Bytes;
use common::{insert, node_from_parts, payload, update, Node, TappedProvider};
use tempfile::TempDir;
use uuid::Uuid;
use wsrep_core::config::{FragmentUnit, ReplicationConfig};
use wsrep_core::engine::StorageEngine;
use wsrep_core::fragment::{FileFragmentStore, Fragment, FragmentStore};
use wsrep_core::provider::LoopbackProvider;
use wsrep_core::recovery::{FragmentRecovery, RecoveryError};
use wsrep_core::transaction::Session;
use wsrep_core::types::WriteSetFlags;

fn restart(config: &ReplicationConfig) -> Node {
    let store = Arc::new(FileFragmentStore::open(config.fragment_dir()).unwrap());
    let provider = Arc::new(TappedProvider::new(LoopbackProvider::new(config.node_uuid())));
    node_from_parts(config.clone(), provider, store)
}

#[test]
fn test_recovery_applies_each_certified_fragment_once_in_order() {
    let dir = TempDir::new().unwrap();
    let config = ReplicationConfig::with_data_dir(dir.path());
    let local = config.node_uuid();
    let peer = Uuid::new_v4();

    {
        let store = FileFragmentStore::open(config.fragment_dir()).unwrap();
        // The local transaction's last fragment updates a row the peer
        // transaction inserts at a lower seqno, so it only applies when
        // the peer group goes first.
        store
            .append(Fragment::certified(local, 1, 3, WriteSetFlags::TRX_START, payload(&[insert("a", "1")])))
            .unwrap();
        store
            .append(Fragment::certified(local, 1, 6, WriteSetFlags::empty(), payload(&[update("a", "2")])))
            .unwrap();
        store
            .append(Fragment::certified(
                local,
                1,
                9,
                WriteSetFlags::empty(),
                payload(&[update("a", "3"), update("p", "local")]),
            ))
            .unwrap();
        store
            .append(Fragment::uncertified(local, 1, WriteSetFlags::empty(), payload(&[update("a", "lost")])))
            .unwrap();

        store
            .append(Fragment::certified(peer, 40, 2, WriteSetFlags::TRX_START, payload(&[insert("p", "1")])))
            .unwrap();
        store
            .append(Fragment::uncertified(peer, 41, WriteSetFlags::TRX_START, payload(&[insert("q", "1")])))
            .unwrap();
    }

    let n = restart(&config);
    let stats = FragmentRecovery::new(&n.ctx).run().unwrap();
    assert_eq!(stats.orphans_removed, 2);
    assert_eq!(stats.transactions_replayed, 2);
    assert_eq!(stats.fragments_replayed, 4);

    assert_eq!(n.engine.get("t", b"a"), Some(b"3".to_vec()));
    assert_eq!(n.engine.get("t", b"p"), Some(b"local".to_vec()));
    assert_eq!(n.engine.get("t", b"q"), None);
    assert_eq!(n.engine.commit_log().len(), 2);
    assert!(!n.engine.checkpoint().is_defined());
    drop(n);

    // Nothing is left for a second start.
    assert!(FileFragmentStore::open(config.fragment_dir()).unwrap().is_empty());
    let again = restart(&config);
    let stats = FragmentRecovery::new(&again.ctx).run().unwrap();
    assert_eq!(stats.transactions_replayed, 0);
    assert_eq!(stats.orphans_removed, 0);
}

#[test]
fn test_streaming_session_state_survives_restart() {
    let dir = TempDir::new().unwrap();
    let config = ReplicationConfig {
        fragment_unit: FragmentUnit::Rows,
        fragment_size: 1,
        ..ReplicationConfig::with_data_dir(dir.path())
    };

    {
        let n = restart(&config);
        let mut session = Session::new(Arc::clone(&n.ctx));
        session.begin().unwrap();
        session.write_row(insert("x", "1")).unwrap();
        session.write_row(insert("y", "2")).unwrap();
        assert_eq!(n.store.len(), 2);
        // Crash: the session never commits or rolls back.
        std::mem::forget(session);
    }

    let n = restart(&config);
    let recovery = FragmentRecovery::new(&n.ctx);
    let stats = recovery.run().unwrap();
    assert_eq!(stats.orphans_removed, 0);
    assert_eq!(stats.transactions_replayed, 1);
    assert_eq!(stats.fragments_replayed, 2);
    assert_eq!(n.engine.get("t", b"x"), Some(b"1".to_vec()));
    assert_eq!(n.engine.get("t", b"y"), Some(b"2".to_vec()));
    assert!(n.store.is_empty());
}

#[test]
fn test_clean_shutdown_is_reported_once() {
    let dir = TempDir::new().unwrap();
    let config = ReplicationConfig::with_data_dir(dir.path());

    let n = restart(&config);
    FragmentRecovery::new(&n.ctx).mark_clean_shutdown().unwrap();
    drop(n);

    let n = restart(&config);
    assert!(FragmentRecovery::new(&n.ctx).run().unwrap().was_clean_shutdown);
    assert!(!FragmentRecovery::new(&n.ctx).run().unwrap().was_clean_shutdown);
}

#[test]
fn test_unreadable_fragment_halts_startup() {
    let dir = TempDir::new().unwrap();
    let config = ReplicationConfig::with_data_dir(dir.path());
    let local = config.node_uuid();

    {
        let store = FileFragmentStore::open(config.fragment_dir()).unwrap();
        store
            .append(Fragment::certified(local, 2, 1, WriteSetFlags::TRX_START, payload(&[insert("ok", "1")])))
            .unwrap();
        store
            .append(Fragment::certified(local, 2, 2, WriteSetFlags::empty(), Bytes::from_static(b"garbage!")))
            .unwrap();
    }

    let n = restart(&config);
    let err = FragmentRecovery::new(&n.ctx).run().unwrap_err();
    assert!(matches!(err, RecoveryError::Apply { trx_id: 2, .. }));
    assert!(err.is_fatal());
    assert_eq!(n.engine.get("t", b"ok"), None);
    assert_eq!(n.store.len(), 2);
}

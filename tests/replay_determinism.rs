//! Replay determinism
//!
//! Replaying a BF-aborted certified transaction must leave exactly the
//! row state that applying its certified write-set anywhere else leaves.

mod common;

use std::sync::Arc;

use common::{insert, node, update, Node};
use uuid::Uuid;
use wsrep_core::applier::{ApplyOutcome, RemoteApplier};
use wsrep_core::engine::StorageEngine;
use wsrep_core::provider::Status;
use wsrep_core::transaction::{Session, StatementResult};
use wsrep_core::types::{Stid, WriteSetFlags};

/// Run the workload on `n`, BF-aborting it right after certification.
fn replayed_workload(n: &Node) -> StatementResult {
    let trx_id = n.ctx.ids().next_id() + 1;
    n.provider.loopback().inject_pre_commit(trx_id, Status::BfAbort);

    let mut session = Session::new(Arc::clone(&n.ctx));
    session.begin().unwrap();
    session.begin_statement().unwrap();
    session.write_row(insert("a", "1")).unwrap();
    session.write_row(insert("b", "2")).unwrap();
    session.write_row(update("a", "3")).unwrap();
    session.end_statement().unwrap();
    let result = session.commit().unwrap();

    assert_eq!(n.ctx.metrics().snapshot().replays, 1);
    result
}

#[test]
fn test_replay_matches_remote_apply() {
    let origin = node();
    let result = replayed_workload(&origin);
    assert_eq!(result.affected_rows, 3);

    let certified = origin.provider.loopback().certified();
    assert_eq!(certified.len(), 1);
    let ws = &certified[0];

    let peer = node();
    let loopback = peer.provider.loopback();
    let received = loopback
        .deliver(
            Stid::new(Uuid::new_v4(), ws.meta.stid.trx_id, 1),
            WriteSetFlags::TRX_START | WriteSetFlags::TRX_END,
            &ws.keys,
            ws.data.clone(),
            loopback.last_seqno(),
        )
        .unwrap();
    let outcome = RemoteApplier::new(&peer.ctx, 0).apply(received).unwrap();
    assert_eq!(outcome, ApplyOutcome::Committed);

    assert_eq!(origin.engine.rows(), peer.engine.rows());
    assert_eq!(origin.engine.get("t", b"a"), Some(b"3".to_vec()));
}

#[test]
fn test_replay_twice_gives_identical_effects() {
    let first = node();
    let second = node();
    replayed_workload(&first);
    replayed_workload(&second);

    assert_eq!(first.engine.rows(), second.engine.rows());
    assert_eq!(first.engine.checkpoint().seqno, second.engine.checkpoint().seqno);
    assert_eq!(
        first.provider.loopback().certified()[0].data,
        second.provider.loopback().certified()[0].data
    );
    assert_eq!(first.engine.commit_log().len(), 1);
}

#[test]
fn test_replay_keeps_commit_position() {
    let n = node();
    let mut early = Session::new(Arc::clone(&n.ctx));
    early
        .execute_autocommit(|s| s.write_row(insert("before", "x")))
        .unwrap();

    replayed_workload(&n);

    let mut late = Session::new(Arc::clone(&n.ctx));
    late.execute_autocommit(|s| s.write_row(insert("after", "y")))
        .unwrap();

    let seqnos: Vec<i64> = n
        .engine
        .commit_log()
        .into_iter()
        .map(|gtid| gtid.unwrap().seqno)
        .collect();
    assert_eq!(seqnos, vec![1, 2, 3]);
    assert_eq!(n.provider.loopback().last_committed(), 3);
    assert_eq!(n.ctx.replay_gate().active(), 0);
}

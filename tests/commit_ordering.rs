//! Global commit order
//!
//! Local committers and remote appliers reach the engine in exactly the
//! provider-assigned seqno order, whatever the thread scheduling.

mod common;

use std::sync::Arc;
use std::thread;

use bytes::Bytes;
use common::node_with;
use uuid::Uuid;
use wsrep_core::applier::ApplierPool;
use wsrep_core::config::ReplicationConfig;
use wsrep_core::engine::StorageEngine;
use wsrep_core::transaction::Session;
use wsrep_core::types::{Stid, WriteSetFlags};
use wsrep_core::writeset::ChangeRecord;

const LOCAL_THREADS: u32 = 4;
const COMMITS_PER_THREAD: u32 = 10;
const REMOTE_WRITE_SETS: u64 = 20;

fn committed_seqnos(n: &common::Node) -> Vec<i64> {
    n.engine
        .commit_log()
        .into_iter()
        .map(|gtid| gtid.expect("every commit carries a checkpoint").seqno)
        .collect()
}

#[test]
fn test_local_and_remote_commits_follow_seqno() {
    let config = ReplicationConfig {
        applier_threads: 4,
        ..ReplicationConfig::default()
    };
    let n = node_with(config);
    let pool = ApplierPool::from_config(&n.ctx).unwrap();
    assert_eq!(pool.threads(), 4);

    let locals: Vec<_> = (0..LOCAL_THREADS)
        .map(|t| {
            let ctx = Arc::clone(&n.ctx);
            thread::spawn(move || {
                let mut session = Session::new(ctx);
                for i in 0..COMMITS_PER_THREAD {
                    let key = format!("local-{}-{}", t, i);
                    session
                        .execute_autocommit(|s| {
                            s.write_row(ChangeRecord::insert("t", key.as_bytes().to_vec(), b"l".to_vec()))
                        })
                        .unwrap();
                }
            })
        })
        .collect();

    let remote_node = Uuid::new_v4();
    let loopback = n.provider.loopback();
    for i in 0..REMOTE_WRITE_SETS {
        let record = ChangeRecord::insert("t", format!("remote-{}", i).into_bytes(), b"r".to_vec());
        let ws = loopback
            .deliver(
                Stid::new(remote_node, i + 1, 1),
                WriteSetFlags::TRX_START | WriteSetFlags::TRX_END,
                &[record.cert_key()],
                Bytes::from(record.encode()),
                loopback.last_seqno(),
            )
            .unwrap();
        pool.submit(ws).unwrap();
    }

    for local in locals {
        local.join().unwrap();
    }
    pool.shutdown();

    let total = (LOCAL_THREADS * COMMITS_PER_THREAD) as i64 + REMOTE_WRITE_SETS as i64;
    assert_eq!(committed_seqnos(&n), (1..=total).collect::<Vec<_>>());
    assert_eq!(n.engine.rows().len() as i64, total);
    assert_eq!(n.engine.checkpoint().seqno, total);
    assert_eq!(loopback.last_committed(), total);
    assert_eq!(loopback.open_write_sets(), 0);

    let metrics = n.ctx.metrics().snapshot();
    assert_eq!(metrics.remote_applied, REMOTE_WRITE_SETS);
    assert_eq!(metrics.cert_failures, 0);
}

//! In-memory storage engine
//!
//! Rows live in an ordered map keyed by (table, key). Changes are
//! buffered per transaction and validated against the committed state
//! plus the transaction's own earlier changes.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use super::errors::{EngineError, EngineResult};
use super::{EngineTxnId, Savepoint, StorageEngine};
use crate::types::Gtid;
use crate::writeset::{ChangeRecord, RowOp};

type RowKey = (String, Vec<u8>);

#[derive(Debug, Default)]
struct Inner {
    rows: BTreeMap<RowKey, Vec<u8>>,
    open: HashMap<EngineTxnId, Vec<ChangeRecord>>,
    checkpoint: Gtid,
    commit_log: Vec<Option<Gtid>>,
}

impl Inner {
    /// Current image of a row as seen from inside `txn`.
    fn visible(&self, txn: &[ChangeRecord], key: &RowKey) -> Option<Vec<u8>> {
        let mut image = self.rows.get(key).cloned();
        for change in txn
            .iter()
            .filter(|c| c.table == key.0 && c.key == key.1)
        {
            image = match change.op {
                RowOp::Insert | RowOp::Update => Some(change.value.clone()),
                RowOp::Delete => None,
            };
        }
        image
    }
}

/// Ordered in-memory engine.
#[derive(Debug, Default)]
pub struct MemoryEngine {
    inner: Mutex<Inner>,
    next_txn: AtomicU64,
}

impl MemoryEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Committed value of one row.
    pub fn get(&self, table: &str, key: &[u8]) -> Option<Vec<u8>> {
        self.inner
            .lock()
            .rows
            .get(&(table.to_string(), key.to_vec()))
            .cloned()
    }

    /// Every committed row, in key order.
    pub fn rows(&self) -> Vec<(String, Vec<u8>, Vec<u8>)> {
        self.inner
            .lock()
            .rows
            .iter()
            .map(|((t, k), v)| (t.clone(), k.clone(), v.clone()))
            .collect()
    }

    /// Checkpoints passed to `commit`, in commit order.
    pub fn commit_log(&self) -> Vec<Option<Gtid>> {
        self.inner.lock().commit_log.clone()
    }

    pub fn open_transactions(&self) -> usize {
        self.inner.lock().open.len()
    }
}

impl StorageEngine for MemoryEngine {
    fn begin(&self) -> EngineTxnId {
        let txn = self.next_txn.fetch_add(1, Ordering::Relaxed) + 1;
        self.inner.lock().open.insert(txn, Vec::new());
        txn
    }

    fn apply(&self, txn: EngineTxnId, record: &ChangeRecord) -> EngineResult<()> {
        let mut inner = self.inner.lock();
        let pending = inner
            .open
            .get(&txn)
            .ok_or(EngineError::UnknownTransaction(txn))?;

        let key = (record.table.clone(), record.key.clone());
        let exists = inner.visible(pending, &key).is_some();
        match (record.op, exists) {
            (RowOp::Insert, true) => {
                return Err(EngineError::DuplicateKey {
                    table: record.table.clone(),
                    key: record.key.clone(),
                })
            }
            (RowOp::Update, false) | (RowOp::Delete, false) => {
                return Err(EngineError::KeyNotFound {
                    table: record.table.clone(),
                    key: record.key.clone(),
                })
            }
            _ => {}
        }

        if let Some(pending) = inner.open.get_mut(&txn) {
            pending.push(record.clone());
        }
        Ok(())
    }

    fn commit(&self, txn: EngineTxnId, checkpoint: Option<Gtid>) -> EngineResult<()> {
        let mut inner = self.inner.lock();
        if let Some(gtid) = checkpoint {
            let current = inner.checkpoint;
            if current.is_defined() && current.uuid == gtid.uuid && gtid.seqno < current.seqno {
                return Err(EngineError::CheckpointRegression {
                    current,
                    requested: gtid,
                });
            }
        }

        let changes = inner
            .open
            .remove(&txn)
            .ok_or(EngineError::UnknownTransaction(txn))?;
        for change in changes {
            let key = (change.table, change.key);
            match change.op {
                RowOp::Insert | RowOp::Update => {
                    inner.rows.insert(key, change.value);
                }
                RowOp::Delete => {
                    inner.rows.remove(&key);
                }
            }
        }
        if let Some(gtid) = checkpoint {
            inner.checkpoint = gtid;
        }
        inner.commit_log.push(checkpoint);
        Ok(())
    }

    fn rollback(&self, txn: EngineTxnId) -> EngineResult<()> {
        self.inner
            .lock()
            .open
            .remove(&txn)
            .map(|_| ())
            .ok_or(EngineError::UnknownTransaction(txn))
    }

    fn savepoint(&self, txn: EngineTxnId) -> EngineResult<Savepoint> {
        self.inner
            .lock()
            .open
            .get(&txn)
            .map(|changes| Savepoint(changes.len()))
            .ok_or(EngineError::UnknownTransaction(txn))
    }

    fn rollback_to_savepoint(&self, txn: EngineTxnId, savepoint: Savepoint) -> EngineResult<()> {
        let mut inner = self.inner.lock();
        let changes = inner
            .open
            .get_mut(&txn)
            .ok_or(EngineError::UnknownTransaction(txn))?;
        changes.truncate(savepoint.0);
        Ok(())
    }

    fn checkpoint(&self) -> Gtid {
        self.inner.lock().checkpoint
    }

    fn set_checkpoint(&self, gtid: Gtid) -> EngineResult<()> {
        self.inner.lock().checkpoint = gtid;
        Ok(())
    }
}

//! In-memory fragment store
//!
//! Same table semantics as the file store without durability. Used by
//! tests and by nodes that run with streaming disabled.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;
use uuid::Uuid;

use super::errors::{FragmentStoreError, StoreResult};
use super::fragment::{Fragment, FragmentBatch};
use super::table::FragmentTable;
use super::{FragmentScan, FragmentStore};
use crate::types::TrxId;

#[derive(Debug, Default)]
pub struct MemoryFragmentStore {
    table: RwLock<FragmentTable>,
    failing: AtomicBool,
}

impl MemoryFragmentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent mutation fail with an I/O error.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

impl FragmentStore for MemoryFragmentStore {
    fn apply(&self, batch: FragmentBatch) -> StoreResult<usize> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(FragmentStoreError::io(
                "apply batch",
                io::Error::new(io::ErrorKind::Other, "injected store failure"),
            ));
        }
        let mut table = self.table.write();
        let mut staged = table.clone();
        let mut affected = 0;
        for op in batch.into_ops() {
            affected += staged.apply(op)?;
        }
        *table = staged;
        Ok(affected)
    }

    fn fragments_of(&self, server_id: Uuid, trx_id: TrxId) -> StoreResult<Vec<Fragment>> {
        Ok(self.table.read().of(server_id, trx_id))
    }

    fn scan_all(&self) -> StoreResult<FragmentScan> {
        Ok(FragmentScan::new(self.table.read().all()))
    }

    fn len(&self) -> usize {
        self.table.read().len()
    }
}

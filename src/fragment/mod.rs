//! Fragment persistent store
//!
//! Durable table of in-flight streaming fragments keyed by
//! `(node_uuid, trx_id, seqno)`:
//! - `append`: record a fragment with an unset seqno before certification
//! - `update_seqno`: stamp the certified seqno
//! - `remove_all`: drop every fragment of a transaction on final commit or rollback
//! - `scan_all`: recovery scan
//!
//! Mutations may be grouped into a `FragmentBatch`, which is committed
//! atomically. The committing transaction stages its removals in a batch
//! so that they become durable together with the commit.

mod codec;
mod errors;
mod file;
mod fragment;
mod memory;
mod table;

pub use errors::{FragmentStoreError, StoreResult};
pub use file::FileFragmentStore;
pub use fragment::{Fragment, FragmentBatch, FragmentKey, FragmentOp, FragmentSummary};
pub use memory::MemoryFragmentStore;

use uuid::Uuid;

use crate::types::{Seqno, TrxId};

/// Snapshot of the whole fragment table, in key order.
#[derive(Debug)]
pub struct FragmentScan {
    rows: std::vec::IntoIter<Fragment>,
}

impl FragmentScan {
    pub(crate) fn new(rows: Vec<Fragment>) -> Self {
        Self {
            rows: rows.into_iter(),
        }
    }
}

impl Iterator for FragmentScan {
    type Item = Fragment;

    fn next(&mut self) -> Option<Fragment> {
        self.rows.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.rows.size_hint()
    }
}

/// Durable storage for streaming fragments.
pub trait FragmentStore: Send + Sync {
    /// Commit a batch of mutations atomically. Returns the number of rows
    /// affected. On error nothing from the batch is applied.
    fn apply(&self, batch: FragmentBatch) -> StoreResult<usize>;

    /// Fragments of one transaction, the uncertified row (if any) first,
    /// then ascending seqno.
    fn fragments_of(&self, server_id: Uuid, trx_id: TrxId) -> StoreResult<Vec<Fragment>>;

    fn scan_all(&self) -> StoreResult<FragmentScan>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn append(&self, fragment: Fragment) -> StoreResult<()> {
        self.apply(FragmentOp::Append(fragment).into()).map(|_| ())
    }

    fn update_seqno(&self, server_id: Uuid, trx_id: TrxId, seqno: Seqno) -> StoreResult<()> {
        self.apply(
            FragmentOp::UpdateSeqno {
                server_id,
                trx_id,
                seqno,
            }
            .into(),
        )
        .map(|_| ())
    }

    fn remove(&self, key: FragmentKey) -> StoreResult<bool> {
        self.apply(FragmentOp::Remove(key).into()).map(|n| n > 0)
    }

    fn remove_all(&self, server_id: Uuid, trx_id: TrxId) -> StoreResult<usize> {
        self.apply(FragmentOp::RemoveAll { server_id, trx_id }.into())
    }
}

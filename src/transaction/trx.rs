//! The `Transaction` value owned by a session

use std::sync::Arc;

use bytes::Bytes;

use super::handle::TransactionHandle;
use crate::commit::{WsrepError, WsrepResult};
use crate::engine::Savepoint;
use crate::fragment::FragmentBatch;
use crate::provider::WsHandle;
use crate::streaming::StreamingState;
use crate::types::TrxId;
use crate::writeset::WriteSetBuilder;

/// Outcome of a statement or commit as reported to the client.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatementResult {
    pub affected_rows: u64,
    pub last_insert_id: u64,
    pub message: String,
}

impl StatementResult {
    pub fn new(affected_rows: u64, last_insert_id: u64) -> Self {
        Self {
            affected_rows,
            last_insert_id,
            message: String::new(),
        }
    }
}

/// One replicated transaction, exclusively owned by its session.
///
/// Holds the provider write-set reference, so at most one `Transaction`
/// refers to a given write-set at a time.
#[derive(Debug)]
pub struct Transaction {
    pub(crate) handle: Arc<TransactionHandle>,
    pub(crate) trx_id: TrxId,
    /// `None` once a replayer took the write-set over.
    pub(crate) ws: Option<WsHandle>,
    pub(crate) builder: WriteSetBuilder,
    pub(crate) streaming: StreamingState,
    /// Final write-set payload handed to certification.
    pub(crate) certified_payload: Bytes,
    /// Store mutations applied inside the ordered commit.
    pub(crate) staged: FragmentBatch,
    pub(crate) certified: bool,
    /// Nothing to replicate; commit locally only.
    pub(crate) read_only: bool,
    pub(crate) order_entered: bool,
    /// Some fragment was ordered, so peers hold state for this transaction.
    pub(crate) replicated_any: bool,
    pub(crate) affected_rows: u64,
    pub(crate) last_insert_id: u64,
    pub(crate) statement_savepoint: Option<Savepoint>,
}

impl Transaction {
    pub(crate) fn new(
        handle: Arc<TransactionHandle>,
        trx_id: TrxId,
        max_rows: u64,
        streaming: StreamingState,
    ) -> Self {
        Self {
            handle,
            trx_id,
            ws: Some(WsHandle::new(trx_id)),
            builder: WriteSetBuilder::new(max_rows),
            streaming,
            certified_payload: Bytes::new(),
            staged: FragmentBatch::new(),
            certified: false,
            read_only: false,
            order_entered: false,
            replicated_any: false,
            affected_rows: 0,
            last_insert_id: 0,
            statement_savepoint: None,
        }
    }

    pub fn trx_id(&self) -> TrxId {
        self.trx_id
    }

    pub fn handle(&self) -> &Arc<TransactionHandle> {
        &self.handle
    }

    pub fn ws(&self) -> WsrepResult<&WsHandle> {
        self.ws
            .as_ref()
            .ok_or_else(|| WsrepError::invalid_state("write-set handle already handed to a replayer"))
    }

    pub fn builder(&self) -> &WriteSetBuilder {
        &self.builder
    }

    pub fn is_certified(&self) -> bool {
        self.certified
    }

    pub fn affected_rows(&self) -> u64 {
        self.affected_rows
    }

    pub(crate) fn result(&self) -> StatementResult {
        StatementResult::new(self.affected_rows, self.last_insert_id)
    }
}

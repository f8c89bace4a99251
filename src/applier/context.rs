//! High priority execution context
//!
//! Remote appliers, replayers and the headless storage service all run
//! with a handle in `ReplRecv` mode, which the BF-abort resolver never
//! picks as a victim. Contexts are recycled through a `ContextPool`.

use std::fmt;

use uuid::Uuid;

use super::errors::{ApplyError, ApplyResult};
use crate::context::Recycle;
use crate::engine::{EngineTxnId, StorageEngine};
use crate::fragment::{FragmentBatch, FragmentOp};
use crate::provider::WsHandle;
use crate::transaction::TransactionHandle;
use crate::types::{ClientExecMode, ConnId, WriteSetMeta};
use crate::writeset::parse_write_set;

/// Connection ids of high priority contexts live above this base.
const HIGH_PRIORITY_CONN_BASE: ConnId = 1 << 62;

/// What a high priority context is used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Applier,
    Replayer,
    Storage,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Applier => "applier",
            Role::Replayer => "replayer",
            Role::Storage => "storage",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reusable brute force execution context.
#[derive(Debug)]
pub struct HighPriorityContext {
    role: Role,
    id: usize,
    handle: TransactionHandle,
    ws: Option<WsHandle>,
    meta: Option<WriteSetMeta>,
    engine_txn: Option<EngineTxnId>,
    /// Fragment store mutations to apply with the commit.
    staged: FragmentBatch,
    rows_applied: u64,
}

impl HighPriorityContext {
    pub fn new(role: Role, node: Uuid, id: usize) -> Self {
        let conn_id = HIGH_PRIORITY_CONN_BASE | ((role as ConnId) << 48) | id as ConnId;
        let handle = TransactionHandle::new(node, conn_id);
        handle.lock().exec_mode = ClientExecMode::ReplRecv;
        Self {
            role,
            id,
            handle,
            ws: None,
            meta: None,
            engine_txn: None,
            staged: FragmentBatch::new(),
            rows_applied: 0,
        }
    }

    pub fn applier(node: Uuid, id: usize) -> Self {
        Self::new(Role::Applier, node, id)
    }

    pub fn replayer(node: Uuid, id: usize) -> Self {
        Self::new(Role::Replayer, node, id)
    }

    pub fn storage(node: Uuid) -> Self {
        Self::new(Role::Storage, node, 0)
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn id(&self) -> usize {
        self.id
    }

    /// Handle seen by lock conflict arbitration.
    pub fn handle(&self) -> &TransactionHandle {
        &self.handle
    }

    /// Rows applied over the context's lifetime in the pool.
    pub fn rows_applied(&self) -> u64 {
        self.rows_applied
    }

    pub fn is_busy(&self) -> bool {
        self.ws.is_some() || self.engine_txn.is_some()
    }

    pub(crate) fn ws(&self) -> ApplyResult<&WsHandle> {
        self.ws.as_ref().ok_or(ApplyError::NoTransaction)
    }

    pub(crate) fn meta(&self) -> Option<&WriteSetMeta> {
        self.meta.as_ref()
    }

    /// Take ownership of `ws` and open an engine transaction for it.
    pub(crate) fn begin(
        &mut self,
        engine: &dyn StorageEngine,
        ws: Option<WsHandle>,
        meta: &WriteSetMeta,
    ) -> ApplyResult<()> {
        if self.is_busy() {
            return Err(ApplyError::Busy);
        }
        self.ws = ws;
        self.meta = Some(*meta);
        self.engine_txn = Some(engine.begin());
        let mut st = self.handle.lock();
        st.meta = *meta;
        st.trx_id = Some(meta.stid.trx_id);
        Ok(())
    }

    /// Decode `data` and apply every change record.
    pub(crate) fn apply(&mut self, engine: &dyn StorageEngine, data: &[u8]) -> ApplyResult<()> {
        let txn = self.engine_txn.ok_or(ApplyError::NoTransaction)?;
        for record in parse_write_set(data)? {
            engine.apply(txn, &record)?;
            self.rows_applied += 1;
        }
        Ok(())
    }

    pub(crate) fn take_engine_txn(&mut self) -> Option<EngineTxnId> {
        self.engine_txn.take()
    }

    pub(crate) fn take_ws(&mut self) -> Option<WsHandle> {
        self.ws.take()
    }

    pub(crate) fn stage(&mut self, op: FragmentOp) {
        self.staged.push(op);
    }

    pub(crate) fn take_staged(&mut self) -> FragmentBatch {
        std::mem::take(&mut self.staged)
    }

    /// Forget the current write-set. The engine transaction must have
    /// been finished already.
    pub(crate) fn clear(&mut self) {
        self.ws = None;
        self.meta = None;
        self.engine_txn = None;
        self.staged.clear();
        let mut st = self.handle.lock();
        st.trx_id = None;
        st.meta.reset_gtid();
    }
}

impl Recycle for HighPriorityContext {
    fn recycle(&mut self) {
        self.clear();
    }
}

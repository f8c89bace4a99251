//! Total order isolation
//!
//! An isolated operation (DDL) is ordered by the provider like a
//! write-set but executed while holding the commit slot, so nothing
//! commits around it. The session runs in `TotalOrder` mode for the
//! duration and is never picked as a BF-abort victim.

use super::{Orchestrator, WsrepError, WsrepResult};
use crate::observability::{Event, Logger};
use crate::transaction::TransactionHandle;
use crate::types::{ClientExecMode, QueryState, WriteSetMeta};
use crate::writeset::CertKey;

impl Orchestrator<'_> {
    /// Enter isolated execution. Returns the ordered metadata.
    pub fn to_isolation_begin(
        &self,
        handle: &TransactionHandle,
        keys: &[CertKey],
        payload: &[u8],
    ) -> WsrepResult<WriteSetMeta> {
        let mut meta = {
            let mut st = handle.lock();
            if st.trx_id().is_some() {
                return Err(WsrepError::invalid_state(
                    "isolated execution inside an open transaction",
                ));
            }
            if st.exec_mode() != ClientExecMode::LocalState {
                return Err(WsrepError::invalid_state(format!(
                    "isolated execution from {} mode",
                    st.exec_mode()
                )));
            }
            st.exec_mode = ClientExecMode::TotalOrder;
            st.query_state = QueryState::Exec;
            st.meta
        };

        let status = self
            .ctx
            .provider()
            .to_execute_start(handle.conn_id(), keys, payload, &mut meta);

        let mut st = handle.lock();
        if !status.is_ok() {
            st.exec_mode = ClientExecMode::LocalState;
            st.query_state = QueryState::Idle;
            Logger::warn(
                Event::IsolationFailed,
                &[
                    ("conn_id", &handle.conn_id().to_string()),
                    ("status", status.as_str()),
                ],
            );
            return Err(WsrepError::Deadlock {
                trx_id: meta.stid.trx_id,
            });
        }
        st.meta = meta;
        st.query_state = QueryState::OrderedCommit;
        Logger::info(
            Event::IsolationBegin,
            &[
                ("conn_id", &handle.conn_id().to_string()),
                ("seqno", &meta.seqno().to_string()),
                ("keys", &keys.len().to_string()),
            ],
        );
        Ok(meta)
    }

    /// Leave isolated execution and release the commit slot.
    pub fn to_isolation_end(&self, handle: &TransactionHandle) -> WsrepResult<()> {
        let meta = {
            let st = handle.lock();
            if st.exec_mode() != ClientExecMode::TotalOrder {
                return Err(WsrepError::invalid_state("not in isolated execution"));
            }
            st.meta
        };

        let status = self.ctx.provider().to_execute_end(handle.conn_id());

        let mut st = handle.lock();
        st.exec_mode = ClientExecMode::LocalState;
        st.query_state = QueryState::Idle;
        st.meta.reset_gtid();
        if !status.is_ok() {
            Logger::error(
                Event::ProviderFailure,
                &[
                    ("conn_id", &handle.conn_id().to_string()),
                    ("status", status.as_str()),
                ],
            );
            return Err(WsrepError::from_status(status, meta.stid.trx_id));
        }
        Logger::info(
            Event::IsolationEnd,
            &[
                ("conn_id", &handle.conn_id().to_string()),
                ("seqno", &meta.seqno().to_string()),
            ],
        );
        Ok(())
    }
}

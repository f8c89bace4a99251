//! Ordered fragment table shared by every store implementation
//!
//! Enforces the table invariants:
//! - at most one uncertified row per transaction
//! - certified seqnos strictly increase per transaction
//! - a certified seqno is never rewritten

use std::collections::BTreeMap;

use uuid::Uuid;

use super::errors::{FragmentStoreError, StoreResult};
use super::fragment::{Fragment, FragmentKey, FragmentOp};
use crate::types::{Seqno, TrxId, SEQNO_UNDEFINED};

#[derive(Debug, Clone, Default)]
pub(crate) struct FragmentTable {
    rows: BTreeMap<FragmentKey, Fragment>,
}

impl FragmentTable {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn len(&self) -> usize {
        self.rows.len()
    }

    pub(crate) fn all(&self) -> Vec<Fragment> {
        self.rows.values().cloned().collect()
    }

    /// Rows of one transaction, uncertified first, then ascending seqno.
    pub(crate) fn of(&self, server_id: Uuid, trx_id: TrxId) -> Vec<Fragment> {
        self.rows
            .range(FragmentKey::first_of(server_id, trx_id)..=FragmentKey::last_of(server_id, trx_id))
            .map(|(_, f)| f.clone())
            .collect()
    }

    fn last_certified(&self, server_id: Uuid, trx_id: TrxId) -> Option<Seqno> {
        self.rows
            .range(FragmentKey::first_of(server_id, trx_id)..=FragmentKey::last_of(server_id, trx_id))
            .next_back()
            .map(|(k, _)| k.seqno)
            .filter(|s| *s != SEQNO_UNDEFINED)
    }

    fn check_monotonic(&self, server_id: Uuid, trx_id: TrxId, seqno: Seqno) -> StoreResult<()> {
        if seqno < 0 {
            return Err(FragmentStoreError::InvalidSeqno(seqno));
        }
        match self.last_certified(server_id, trx_id) {
            Some(last) if seqno <= last => Err(FragmentStoreError::NonMonotonic {
                server_id,
                trx_id,
                last,
                requested: seqno,
            }),
            _ => Ok(()),
        }
    }

    /// Apply one mutation. Returns the number of rows affected.
    ///
    /// A failed mutation leaves the table unchanged.
    pub(crate) fn apply(&mut self, op: FragmentOp) -> StoreResult<usize> {
        match op {
            FragmentOp::Append(fragment) => {
                let key = fragment.key();
                match fragment.seqno {
                    None => {
                        if self.rows.contains_key(&key) {
                            return Err(FragmentStoreError::DuplicateUnset {
                                server_id: key.server_id,
                                trx_id: key.trx_id,
                            });
                        }
                    }
                    Some(seqno) => {
                        if self.rows.contains_key(&key) {
                            return Err(FragmentStoreError::Duplicate {
                                server_id: key.server_id,
                                trx_id: key.trx_id,
                                seqno,
                            });
                        }
                        self.check_monotonic(key.server_id, key.trx_id, seqno)?;
                    }
                }
                self.rows.insert(key, fragment);
                Ok(1)
            }
            FragmentOp::UpdateSeqno {
                server_id,
                trx_id,
                seqno,
            } => {
                let unset = FragmentKey::new(server_id, trx_id, None);
                if !self.rows.contains_key(&unset) {
                    return Err(FragmentStoreError::NotFound { server_id, trx_id });
                }
                self.check_monotonic(server_id, trx_id, seqno)?;
                let mut fragment = self
                    .rows
                    .remove(&unset)
                    .ok_or(FragmentStoreError::NotFound { server_id, trx_id })?;
                fragment.seqno = Some(seqno);
                self.rows.insert(fragment.key(), fragment);
                Ok(1)
            }
            FragmentOp::Remove(key) => Ok(usize::from(self.rows.remove(&key).is_some())),
            FragmentOp::RemoveAll { server_id, trx_id } => {
                let keys: Vec<FragmentKey> = self
                    .rows
                    .range(FragmentKey::first_of(server_id, trx_id)..=FragmentKey::last_of(server_id, trx_id))
                    .map(|(k, _)| *k)
                    .collect();
                for key in &keys {
                    self.rows.remove(key);
                }
                Ok(keys.len())
            }
        }
    }
}

//! wsrep-core - certified write-set replication for a transactional engine
//!
//! Sits between a storage engine's commit path and a replication provider:
//! - builds write-sets from row changes and certifies them
//! - orders local commits and remote applies by global seqno
//! - resolves conflicts with brute-force aborts and replays certified victims
//! - streams large transactions as persisted fragments
//! - recovers fragments left behind by a crash

pub mod applier;
pub mod cli;
pub mod collaborators;
pub mod commit;
pub mod config;
pub mod conflict;
pub mod context;
pub mod crash_point;
pub mod engine;
pub mod fragment;
pub mod observability;
pub mod provider;
pub mod recovery;
pub mod replay;
pub mod streaming;
pub mod transaction;
pub mod types;
pub mod writeset;

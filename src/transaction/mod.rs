//! Session-side transaction state
//!
//! - `TransactionHandle`: the part of a transaction other threads may touch
//! - `Transaction`: the value a session owns for one replicated transaction
//! - `Session`: drives statements and commits through the replication hooks

mod handle;
mod session;
mod trx;

pub use handle::{KillGuard, TransactionHandle, TrxState};
pub use session::Session;
pub use trx::{StatementResult, Transaction};

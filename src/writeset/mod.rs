//! Write-set construction and parsing
//!
//! - `ChangeRecord`: one framed, checksummed row change
//! - `WriteSetBuilder`: per-transaction buffer with size and row limits
//! - `parse_write_set`: provider/applier side decoding of a flushed buffer

mod builder;
mod errors;
mod record;

pub use builder::{FlushedWriteSet, WriteSetBuilder};
pub use errors::{WriteSetError, WriteSetResult};
pub use record::{parse_write_set, CertKey, ChangeRecord, RowOp, FRAME_OVERHEAD};

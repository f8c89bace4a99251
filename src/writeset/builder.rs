//! Write-set builder
//!
//! Accumulates framed change records for the current transaction.
//! `flush` hands out everything appended since the previous flush, which
//! is either the whole transaction or the next streaming fragment.

use bytes::{Bytes, BytesMut};

use super::errors::{WriteSetError, WriteSetResult};
use super::record::{CertKey, ChangeRecord};

/// One flushed unit: the byte payload and the keys it touches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlushedWriteSet {
    pub data: Bytes,
    pub keys: Vec<CertKey>,
    pub rows: u64,
}

impl FlushedWriteSet {
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }
}

/// Position of the current statement inside the pending buffer.
#[derive(Debug, Clone, Copy, Default)]
struct StatementMark {
    bytes: usize,
    keys: usize,
    rows: u64,
    /// A flush happened after the statement began.
    crossed_flush: bool,
}

/// Growable write-set buffer for one transaction.
#[derive(Debug)]
pub struct WriteSetBuilder {
    buf: BytesMut,
    keys: Vec<CertKey>,
    pending_rows: u64,
    total_rows: u64,
    total_bytes: u64,
    max_rows: u64,
    mark: StatementMark,
}

impl WriteSetBuilder {
    /// `max_rows` of 0 means unlimited.
    pub fn new(max_rows: u64) -> Self {
        Self {
            buf: BytesMut::new(),
            keys: Vec::new(),
            pending_rows: 0,
            total_rows: 0,
            total_bytes: 0,
            max_rows,
            mark: StatementMark::default(),
        }
    }

    /// Append one row change.
    ///
    /// Fails with `TooManyRows` once the transaction exceeds the row
    /// limit; the record is not appended in that case.
    pub fn append(&mut self, record: &ChangeRecord) -> WriteSetResult<()> {
        if self.max_rows > 0 && self.total_rows + 1 > self.max_rows {
            return Err(WriteSetError::TooManyRows {
                rows: self.total_rows + 1,
                max: self.max_rows,
            });
        }
        self.buf.extend_from_slice(&record.encode());
        self.keys.push(record.cert_key());
        self.pending_rows += 1;
        self.total_rows += 1;
        Ok(())
    }

    /// Bytes appended since the last flush.
    pub fn pending_bytes(&self) -> usize {
        self.buf.len()
    }

    pub fn pending_rows(&self) -> u64 {
        self.pending_rows
    }

    /// Rows appended over the whole transaction, flushed or not.
    pub fn total_rows(&self) -> u64 {
        self.total_rows
    }

    /// Bytes handed out by flushes so far.
    pub fn flushed_bytes(&self) -> u64 {
        self.total_bytes
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Hand out the pending buffer if it fits in `max_size`.
    ///
    /// On `SizeExceeded` nothing is consumed: the buffer stays intact and
    /// the caller is expected to roll the transaction back.
    pub fn flush(&mut self, max_size: u64) -> WriteSetResult<FlushedWriteSet> {
        let size = self.buf.len() as u64;
        if size > max_size {
            return Err(WriteSetError::SizeExceeded {
                size,
                max: max_size,
            });
        }

        if self.buf.is_empty() {
            return Ok(FlushedWriteSet {
                data: Bytes::new(),
                keys: Vec::new(),
                rows: 0,
            });
        }

        let mut keys = std::mem::take(&mut self.keys);
        keys.sort();
        keys.dedup();

        let flushed = FlushedWriteSet {
            data: self.buf.split().freeze(),
            keys,
            rows: self.pending_rows,
        };
        self.pending_rows = 0;
        self.total_bytes += size;
        self.mark = StatementMark {
            crossed_flush: true,
            ..StatementMark::default()
        };
        Ok(flushed)
    }

    /// Remember where the current statement starts.
    pub fn begin_statement(&mut self) {
        self.mark = StatementMark {
            bytes: self.buf.len(),
            keys: self.keys.len(),
            rows: self.pending_rows,
            crossed_flush: false,
        };
    }

    /// True when the current statement's changes can be dropped locally,
    /// that is, none of them has been flushed into a fragment yet.
    pub fn statement_rollback_is_safe(&self) -> bool {
        !self.mark.crossed_flush
    }

    /// Drop the changes of the current statement.
    ///
    /// Returns false when the statement already crossed a flush and could
    /// not be rolled back in isolation.
    pub fn rollback_statement(&mut self) -> bool {
        if self.mark.crossed_flush {
            return false;
        }
        let dropped = self.pending_rows - self.mark.rows;
        self.buf.truncate(self.mark.bytes);
        self.keys.truncate(self.mark.keys);
        self.pending_rows = self.mark.rows;
        self.total_rows -= dropped;
        true
    }

    /// Discard everything, for rollback or transaction cleanup.
    pub fn clear(&mut self) {
        self.buf.clear();
        self.keys.clear();
        self.pending_rows = 0;
        self.total_rows = 0;
        self.total_bytes = 0;
        self.mark = StatementMark::default();
    }
}

impl Default for WriteSetBuilder {
    fn default() -> Self {
        Self::new(0)
    }
}

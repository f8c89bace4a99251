//! Write-set errors

use thiserror::Error;

/// Write-set building and parsing failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WriteSetError {
    /// Buffer exceeded the hard write-set size limit.
    #[error("Write-set size {size} exceeds limit {max}")]
    SizeExceeded { size: u64, max: u64 },

    /// Transaction exceeded the row limit.
    #[error("Write-set row count {rows} exceeds limit {max}")]
    TooManyRows { rows: u64, max: u64 },

    /// Byte buffer could not be parsed back into change records.
    #[error("Corrupt write-set at offset {offset}: {reason}")]
    Corrupt { offset: usize, reason: String },
}

impl WriteSetError {
    pub fn corrupt(offset: usize, reason: impl Into<String>) -> Self {
        Self::Corrupt {
            offset,
            reason: reason.into(),
        }
    }

    /// Size and row limit violations are both reported as size exceeded.
    pub fn is_size_exceeded(&self) -> bool {
        matches!(self, Self::SizeExceeded { .. } | Self::TooManyRows { .. })
    }
}

/// Result type for write-set operations
pub type WriteSetResult<T> = Result<T, WriteSetError>;

//! Change records and their binary framing
//!
//! Every record in a write-set buffer is framed as:
//! - Frame length (u32 LE, whole frame including this field)
//! - Operation (u8): INSERT / UPDATE / DELETE
//! - Table name (u32 LE length + UTF-8)
//! - Row key (u32 LE length + bytes)
//! - Row image (u32 LE length + bytes, empty for DELETE)
//! - Checksum (u32 LE, CRC32 over everything before it)

use crc32fast::Hasher;
use serde::{Deserialize, Serialize};

use super::errors::{WriteSetError, WriteSetResult};

/// Fixed bytes in every frame: length + op + three length prefixes + checksum.
pub const FRAME_OVERHEAD: usize = 4 + 1 + 4 + 4 + 4 + 4;

/// Row operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum RowOp {
    Insert = 0,
    Update = 1,
    Delete = 2,
}

impl RowOp {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(RowOp::Insert),
            1 => Some(RowOp::Update),
            2 => Some(RowOp::Delete),
            _ => None,
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

/// Certification key: the row identity a write-set touches.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CertKey {
    pub table: String,
    pub key: Vec<u8>,
}

impl CertKey {
    pub fn new(table: impl Into<String>, key: impl Into<Vec<u8>>) -> Self {
        Self {
            table: table.into(),
            key: key.into(),
        }
    }
}

/// One row change produced by local execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeRecord {
    pub op: RowOp,
    pub table: String,
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

impl ChangeRecord {
    pub fn insert(table: impl Into<String>, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            op: RowOp::Insert,
            table: table.into(),
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn update(table: impl Into<String>, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            op: RowOp::Update,
            table: table.into(),
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn delete(table: impl Into<String>, key: impl Into<Vec<u8>>) -> Self {
        Self {
            op: RowOp::Delete,
            table: table.into(),
            key: key.into(),
            value: Vec::new(),
        }
    }

    pub fn cert_key(&self) -> CertKey {
        CertKey::new(self.table.clone(), self.key.clone())
    }

    /// Exact number of bytes `encode_into` appends.
    pub fn encoded_len(&self) -> usize {
        FRAME_OVERHEAD + self.table.len() + self.key.len() + self.value.len()
    }

    /// Append the framed record to `buf`.
    pub fn encode_into(&self, buf: &mut Vec<u8>) {
        let start = buf.len();
        buf.extend_from_slice(&(self.encoded_len() as u32).to_le_bytes());
        buf.push(self.op.as_u8());

        buf.extend_from_slice(&(self.table.len() as u32).to_le_bytes());
        buf.extend_from_slice(self.table.as_bytes());

        buf.extend_from_slice(&(self.key.len() as u32).to_le_bytes());
        buf.extend_from_slice(&self.key);

        buf.extend_from_slice(&(self.value.len() as u32).to_le_bytes());
        buf.extend_from_slice(&self.value);

        let checksum = compute_checksum(&buf[start..]);
        buf.extend_from_slice(&checksum.to_le_bytes());
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.encoded_len());
        self.encode_into(&mut buf);
        buf
    }

    /// Decode one framed record from the start of `data`.
    ///
    /// `offset` is only used for error reporting. Returns the record and
    /// the number of bytes consumed.
    pub fn decode(data: &[u8], offset: usize) -> WriteSetResult<(Self, usize)> {
        if data.len() < FRAME_OVERHEAD {
            return Err(WriteSetError::corrupt(
                offset,
                format!("truncated frame: {} bytes", data.len()),
            ));
        }

        let frame_len = read_u32(data, 0) as usize;
        if frame_len < FRAME_OVERHEAD || frame_len > data.len() {
            return Err(WriteSetError::corrupt(
                offset,
                format!("invalid frame length {}", frame_len),
            ));
        }

        let frame = &data[..frame_len];
        let body_end = frame_len - 4;
        let stored = read_u32(frame, body_end);
        if compute_checksum(&frame[..body_end]) != stored {
            return Err(WriteSetError::corrupt(offset, "checksum mismatch"));
        }

        let op = RowOp::from_u8(frame[4])
            .ok_or_else(|| WriteSetError::corrupt(offset, format!("unknown op {}", frame[4])))?;

        let mut pos = 5;
        let table = read_field(frame, &mut pos, body_end, offset)?;
        let key = read_field(frame, &mut pos, body_end, offset)?;
        let value = read_field(frame, &mut pos, body_end, offset)?;

        if pos != body_end {
            return Err(WriteSetError::corrupt(offset, "trailing bytes in frame"));
        }

        let table = String::from_utf8(table)
            .map_err(|e| WriteSetError::corrupt(offset, format!("invalid table name: {}", e)))?;

        Ok((
            Self {
                op,
                table,
                key,
                value,
            },
            frame_len,
        ))
    }
}

/// Parse a flushed write-set buffer back into its change records.
pub fn parse_write_set(data: &[u8]) -> WriteSetResult<Vec<ChangeRecord>> {
    let mut records = Vec::new();
    let mut offset = 0;
    while offset < data.len() {
        let (record, consumed) = ChangeRecord::decode(&data[offset..], offset)?;
        records.push(record);
        offset += consumed;
    }
    Ok(records)
}

fn compute_checksum(data: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(data);
    hasher.finalize()
}

fn read_u32(data: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([data[at], data[at + 1], data[at + 2], data[at + 3]])
}

fn read_field(frame: &[u8], pos: &mut usize, end: usize, offset: usize) -> WriteSetResult<Vec<u8>> {
    if *pos + 4 > end {
        return Err(WriteSetError::corrupt(offset, "field length past frame end"));
    }
    let len = read_u32(frame, *pos) as usize;
    *pos += 4;
    if *pos + len > end {
        return Err(WriteSetError::corrupt(offset, "field body past frame end"));
    }
    let field = frame[*pos..*pos + len].to_vec();
    *pos += len;
    Ok(field)
}

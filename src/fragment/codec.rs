//! On-disk encoding of fragment store log records
//!
//! Each record commits one batch:
//! - Record length (u32 LE, whole record)
//! - Op count (u32 LE)
//! - Ops, each prefixed by a type byte
//! - Checksum (u32 LE, CRC32 over everything before it)
//!
//! Op bodies use fixed-width little-endian fields; node ids are the 16
//! raw uuid bytes and an unset seqno is -1.

use bytes::Bytes;
use crc32fast::Hasher;
use uuid::Uuid;

use super::fragment::{Fragment, FragmentKey, FragmentOp};
use crate::types::{Seqno, TrxId, WriteSetFlags, SEQNO_UNDEFINED};

const OP_APPEND: u8 = 1;
const OP_UPDATE_SEQNO: u8 = 2;
const OP_REMOVE: u8 = 3;
const OP_REMOVE_ALL: u8 = 4;

/// Length + count + checksum.
pub(crate) const RECORD_OVERHEAD: usize = 4 + 4 + 4;

/// Outcome of decoding one record from the log tail.
#[derive(Debug)]
pub(crate) enum Decoded {
    Record { ops: Vec<FragmentOp>, len: usize },
    /// Incomplete record at the end of the log.
    Torn,
    /// Complete record that fails validation.
    Corrupt(String),
}

pub(crate) fn encode_record(ops: &[FragmentOp]) -> Vec<u8> {
    let mut buf = vec![0u8; 4];
    buf.extend_from_slice(&(ops.len() as u32).to_le_bytes());
    for op in ops {
        encode_op(op, &mut buf);
    }
    let total = (buf.len() + 4) as u32;
    buf[0..4].copy_from_slice(&total.to_le_bytes());
    let checksum = checksum(&buf);
    buf.extend_from_slice(&checksum.to_le_bytes());
    buf
}

fn encode_op(op: &FragmentOp, buf: &mut Vec<u8>) {
    match op {
        FragmentOp::Append(f) => {
            buf.push(OP_APPEND);
            put_id(buf, f.server_id, f.trx_id);
            buf.extend_from_slice(&f.seqno.unwrap_or(SEQNO_UNDEFINED).to_le_bytes());
            buf.extend_from_slice(&f.flags.bits().to_le_bytes());
            buf.extend_from_slice(&(f.payload.len() as u32).to_le_bytes());
            buf.extend_from_slice(&f.payload);
        }
        FragmentOp::UpdateSeqno {
            server_id,
            trx_id,
            seqno,
        } => {
            buf.push(OP_UPDATE_SEQNO);
            put_id(buf, *server_id, *trx_id);
            buf.extend_from_slice(&seqno.to_le_bytes());
        }
        FragmentOp::Remove(key) => {
            buf.push(OP_REMOVE);
            put_id(buf, key.server_id, key.trx_id);
            buf.extend_from_slice(&key.seqno.to_le_bytes());
        }
        FragmentOp::RemoveAll { server_id, trx_id } => {
            buf.push(OP_REMOVE_ALL);
            put_id(buf, *server_id, *trx_id);
        }
    }
}

fn put_id(buf: &mut Vec<u8>, server_id: Uuid, trx_id: TrxId) {
    buf.extend_from_slice(server_id.as_bytes());
    buf.extend_from_slice(&trx_id.to_le_bytes());
}

/// Decode the record at the start of `data`.
pub(crate) fn decode_record(data: &[u8]) -> Decoded {
    if data.len() < 4 {
        return Decoded::Torn;
    }
    let len = u32::from_le_bytes([data[0], data[1], data[2], data[3]]) as usize;
    if len > data.len() {
        return Decoded::Torn;
    }
    if len < RECORD_OVERHEAD {
        return Decoded::Corrupt(format!("invalid record length {}", len));
    }

    let body_end = len - 4;
    let stored = u32::from_le_bytes([
        data[body_end],
        data[body_end + 1],
        data[body_end + 2],
        data[body_end + 3],
    ]);
    if checksum(&data[..body_end]) != stored {
        return Decoded::Corrupt("checksum mismatch".to_string());
    }

    let mut cursor = Cursor {
        data: &data[..body_end],
        pos: 4,
    };
    match decode_ops(&mut cursor) {
        Ok(ops) if cursor.pos == body_end => Decoded::Record { ops, len },
        Ok(_) => Decoded::Corrupt("trailing bytes in record".to_string()),
        Err(reason) => Decoded::Corrupt(reason),
    }
}

fn decode_ops(cursor: &mut Cursor<'_>) -> Result<Vec<FragmentOp>, String> {
    let count = cursor.u32()? as usize;
    let mut ops = Vec::with_capacity(count.min(1024));
    for _ in 0..count {
        let op_type = cursor.u8()?;
        let server_id = cursor.uuid()?;
        let trx_id = cursor.u64()?;
        let op = match op_type {
            OP_APPEND => {
                let seqno = cursor.i64()?;
                let bits = cursor.u32()?;
                let flags = WriteSetFlags::from_persisted(bits)
                    .ok_or_else(|| format!("unknown flag bits {:#x}", bits))?;
                let payload_len = cursor.u32()? as usize;
                let payload = Bytes::copy_from_slice(cursor.take(payload_len)?);
                FragmentOp::Append(Fragment {
                    server_id,
                    trx_id,
                    seqno: seqno_from_disk(seqno),
                    flags,
                    payload,
                })
            }
            OP_UPDATE_SEQNO => FragmentOp::UpdateSeqno {
                server_id,
                trx_id,
                seqno: cursor.i64()?,
            },
            OP_REMOVE => {
                let seqno = cursor.i64()?;
                FragmentOp::Remove(FragmentKey::new(server_id, trx_id, seqno_from_disk(seqno)))
            }
            OP_REMOVE_ALL => FragmentOp::RemoveAll { server_id, trx_id },
            other => return Err(format!("unknown op type {}", other)),
        };
        ops.push(op);
    }
    Ok(ops)
}

fn seqno_from_disk(seqno: Seqno) -> Option<Seqno> {
    if seqno == SEQNO_UNDEFINED {
        None
    } else {
        Some(seqno)
    }
}

fn checksum(data: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(data);
    hasher.finalize()
}

struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], String> {
        if self.pos + n > self.data.len() {
            return Err(format!("field of {} bytes past record end", n));
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, String> {
        Ok(self.take(1)?[0])
    }

    fn u32(&mut self) -> Result<u32, String> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn u64(&mut self) -> Result<u64, String> {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(self.take(8)?);
        Ok(u64::from_le_bytes(buf))
    }

    fn i64(&mut self) -> Result<i64, String> {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(self.take(8)?);
        Ok(i64::from_le_bytes(buf))
    }

    fn uuid(&mut self) -> Result<Uuid, String> {
        let mut buf = [0u8; 16];
        buf.copy_from_slice(self.take(16)?);
        Ok(Uuid::from_bytes(buf))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_ops() -> Vec<FragmentOp> {
        let server = Uuid::new_v4();
        vec![
            FragmentOp::Append(Fragment::uncertified(
                server,
                7,
                WriteSetFlags::TRX_START,
                Bytes::from_static(b"payload"),
            )),
            FragmentOp::UpdateSeqno {
                server_id: server,
                trx_id: 7,
                seqno: 42,
            },
            FragmentOp::Remove(FragmentKey::new(server, 7, None)),
            FragmentOp::RemoveAll {
                server_id: server,
                trx_id: 7,
            },
        ]
    }

    #[test]
    fn test_decode_batch() {
        let ops = sample_ops();
        let encoded = encode_record(&ops);
        match decode_record(&encoded) {
            Decoded::Record { ops: decoded, len } => {
                assert_eq!(decoded, ops);
                assert_eq!(len, encoded.len());
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_truncated_record_is_torn() {
        let encoded = encode_record(&sample_ops());
        assert!(matches!(decode_record(&encoded[..encoded.len() - 1]), Decoded::Torn));
        assert!(matches!(decode_record(&encoded[..2]), Decoded::Torn));
    }

    #[test]
    fn test_flipped_bit_is_corrupt() {
        let mut encoded = encode_record(&sample_ops());
        encoded[20] ^= 0x01;
        assert!(matches!(decode_record(&encoded), Decoded::Corrupt(_)));
    }
}

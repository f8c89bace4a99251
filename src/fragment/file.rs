//! File-backed fragment store
//!
//! Append-only operation log at `<dir>/fragments.log`:
//! - One checksummed record per committed batch
//! - fsync after every record; the in-memory table changes only after fsync
//! - Replayed into the ordered table on open
//! - A torn trailing record is dropped with a WARN; a complete record
//!   with a bad checksum is corruption
//! - `compact()` rewrites the live rows to a temp file and renames it over
//!   the log

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use uuid::Uuid;

use super::codec::{decode_record, encode_record, Decoded};
use super::errors::{FragmentStoreError, StoreResult};
use super::fragment::{Fragment, FragmentBatch, FragmentOp};
use super::table::FragmentTable;
use super::{FragmentScan, FragmentStore};
use crate::crash_point::{maybe_crash, points};
use crate::observability::{Event, Logger};
use crate::types::TrxId;

const LOG_FILE: &str = "fragments.log";
const COMPACT_FILE: &str = "fragments.log.compact";

pub struct FileFragmentStore {
    dir: PathBuf,
    inner: Mutex<Inner>,
}

struct Inner {
    file: File,
    table: FragmentTable,
    log_bytes: u64,
}

impl FileFragmentStore {
    /// Open or create the store in `dir`, replaying the existing log.
    pub fn open(dir: impl AsRef<Path>) -> StoreResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).map_err(|e| {
            FragmentStoreError::io(format!("create directory {}", dir.display()), e)
        })?;

        // Leftover from an interrupted compaction; the log itself is intact.
        let compact_path = dir.join(COMPACT_FILE);
        if compact_path.exists() {
            fs::remove_file(&compact_path)
                .map_err(|e| FragmentStoreError::io("remove stale compaction file", e))?;
        }

        let path = dir.join(LOG_FILE);
        let data = match fs::read(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => Vec::new(),
            Err(e) => {
                return Err(FragmentStoreError::io(
                    format!("read {}", path.display()),
                    e,
                ))
            }
        };

        let (table, valid_len) = Self::replay(&path, &data)?;

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| FragmentStoreError::io(format!("open {}", path.display()), e))?;

        if valid_len < data.len() as u64 {
            file.set_len(valid_len)
                .and_then(|_| file.sync_all())
                .map_err(|e| FragmentStoreError::io("truncate torn tail", e))?;
        }

        Logger::info(
            Event::StoreOpened,
            &[
                ("path", &path.display().to_string()),
                ("fragments", &table.len().to_string()),
                ("log_bytes", &valid_len.to_string()),
            ],
        );

        Ok(Self {
            dir,
            inner: Mutex::new(Inner {
                file,
                table,
                log_bytes: valid_len,
            }),
        })
    }

    fn replay(path: &Path, data: &[u8]) -> StoreResult<(FragmentTable, u64)> {
        let mut table = FragmentTable::new();
        let mut offset = 0usize;

        while offset < data.len() {
            match decode_record(&data[offset..]) {
                Decoded::Record { ops, len } => {
                    for op in ops {
                        table.apply(op).map_err(|e| {
                            Self::corrupt(path, offset, format!("replay rejected: {}", e))
                        })?;
                    }
                    offset += len;
                }
                Decoded::Torn => {
                    Logger::warn(
                        Event::StoreTornTail,
                        &[
                            ("path", &path.display().to_string()),
                            ("offset", &offset.to_string()),
                            ("dropped_bytes", &(data.len() - offset).to_string()),
                        ],
                    );
                    break;
                }
                Decoded::Corrupt(reason) => return Err(Self::corrupt(path, offset, reason)),
            }
        }

        Ok((table, offset as u64))
    }

    fn corrupt(path: &Path, offset: usize, reason: String) -> FragmentStoreError {
        Logger::fatal(
            Event::StoreCorruption,
            &[
                ("path", &path.display().to_string()),
                ("offset", &offset.to_string()),
                ("reason", &reason),
            ],
        );
        FragmentStoreError::corruption(offset as u64, reason)
    }

    pub fn path(&self) -> PathBuf {
        self.dir.join(LOG_FILE)
    }

    /// Current size of the operation log.
    pub fn log_bytes(&self) -> u64 {
        self.inner.lock().log_bytes
    }

    /// Rewrite the log so that it holds only the live rows.
    pub fn compact(&self) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        let before = inner.log_bytes;
        let path = self.path();
        let compact_path = self.dir.join(COMPACT_FILE);

        let ops: Vec<FragmentOp> = inner.table.all().into_iter().map(FragmentOp::Append).collect();
        let record = if ops.is_empty() {
            Vec::new()
        } else {
            encode_record(&ops)
        };

        let mut tmp = File::create(&compact_path)
            .map_err(|e| FragmentStoreError::io("create compaction file", e))?;
        tmp.write_all(&record)
            .and_then(|_| tmp.sync_all())
            .map_err(|e| FragmentStoreError::io("write compaction file", e))?;
        drop(tmp);

        maybe_crash(points::STORE_BEFORE_COMPACT_RENAME);

        fs::rename(&compact_path, &path)
            .map_err(|e| FragmentStoreError::io("rename compaction file", e))?;
        File::open(&self.dir)
            .and_then(|d| d.sync_all())
            .map_err(|e| FragmentStoreError::io("sync store directory", e))?;

        inner.file = OpenOptions::new()
            .append(true)
            .open(&path)
            .map_err(|e| FragmentStoreError::io(format!("reopen {}", path.display()), e))?;
        inner.log_bytes = record.len() as u64;

        Logger::info(
            Event::StoreCompacted,
            &[
                ("before_bytes", &before.to_string()),
                ("after_bytes", &inner.log_bytes.to_string()),
            ],
        );
        Ok(())
    }

    fn write_record(inner: &mut Inner, record: &[u8]) -> io::Result<()> {
        if let Err(e) = inner.file.write_all(record) {
            // Drop whatever part of the record reached the file.
            let _ = inner.file.set_len(inner.log_bytes);
            return Err(e);
        }
        maybe_crash(points::STORE_BEFORE_FSYNC);
        inner.file.sync_data()
    }
}

impl FragmentStore for FileFragmentStore {
    fn apply(&self, batch: FragmentBatch) -> StoreResult<usize> {
        if batch.is_empty() {
            return Ok(0);
        }
        let ops = batch.into_ops();

        let mut inner = self.inner.lock();
        let mut staged = inner.table.clone();
        let mut affected = 0;
        for op in &ops {
            affected += staged.apply(op.clone())?;
        }

        let record = encode_record(&ops);
        if let Err(e) = Self::write_record(&mut inner, &record) {
            Logger::error(
                Event::StoreFailure,
                &[("path", &self.path().display().to_string()), ("error", &e.to_string())],
            );
            return Err(FragmentStoreError::io("append log record", e));
        }

        inner.log_bytes += record.len() as u64;
        inner.table = staged;
        Ok(affected)
    }

    fn fragments_of(&self, server_id: Uuid, trx_id: TrxId) -> StoreResult<Vec<Fragment>> {
        Ok(self.inner.lock().table.of(server_id, trx_id))
    }

    fn scan_all(&self) -> StoreResult<FragmentScan> {
        Ok(FragmentScan::new(self.inner.lock().table.all()))
    }

    fn len(&self) -> usize {
        self.inner.lock().table.len()
    }
}

//! Apply error dump log
//!
//! One JSON object per line describing a write-set that failed to apply,
//! with the payload base64 encoded so it can be replayed by hand.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use base64::Engine as _;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use super::errors::ApplyError;
use crate::types::WriteSetMeta;

/// One dumped write-set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyErrorEntry {
    pub timestamp: String,
    pub gtid: String,
    pub source_node: String,
    pub trx_id: u64,
    pub conn_id: u64,
    pub depends_on: i64,
    pub flags: u32,
    pub error: String,
    pub payload: String,
}

impl ApplyErrorEntry {
    pub fn new(meta: &WriteSetMeta, data: &[u8], error: &ApplyError) -> Self {
        Self {
            timestamp: chrono::Utc::now().to_rfc3339(),
            gtid: meta.gtid.to_string(),
            source_node: meta.stid.node.to_string(),
            trx_id: meta.stid.trx_id,
            conn_id: meta.stid.conn_id,
            depends_on: meta.depends_on,
            flags: meta.flags.bits(),
            error: error.to_string(),
            payload: base64::engine::general_purpose::STANDARD.encode(data),
        }
    }

    /// Decoded payload bytes.
    pub fn payload_bytes(&self) -> Result<Vec<u8>, base64::DecodeError> {
        base64::engine::general_purpose::STANDARD.decode(&self.payload)
    }
}

/// Append-only apply error log file, opened on first use.
#[derive(Debug)]
pub struct ApplyErrorLog {
    path: PathBuf,
    file: Mutex<Option<File>>,
}

impl ApplyErrorLog {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            file: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one entry and sync it to disk.
    pub fn dump(&self, entry: &ApplyErrorEntry) -> io::Result<()> {
        let mut line = serde_json::to_vec(entry).map_err(io::Error::other)?;
        line.push(b'\n');

        let mut file = self.file.lock();
        if file.is_none() {
            if let Some(parent) = self.path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
            *file = Some(OpenOptions::new().create(true).append(true).open(&self.path)?);
        }
        match file.as_mut() {
            Some(f) => {
                f.write_all(&line)?;
                f.sync_data()
            }
            None => Ok(()),
        }
    }

    /// Read every entry back, for forensics and tests.
    pub fn read_all(&self) -> io::Result<Vec<ApplyErrorEntry>> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| serde_json::from_str(line).map_err(io::Error::other))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Gtid, Stid};
    use tempfile::TempDir;
    use uuid::Uuid;

    #[test]
    fn test_dump_and_read_back() {
        let dir = TempDir::new().unwrap();
        let log = ApplyErrorLog::new(dir.path().join("errors/apply.log"));
        assert!(log.read_all().unwrap().is_empty());

        let mut meta = WriteSetMeta::new(Stid::new(Uuid::new_v4(), 12, 3));
        meta.gtid = Gtid::new(Uuid::new_v4(), 40);
        let error = ApplyError::NoTransaction;
        log.dump(&ApplyErrorEntry::new(&meta, b"\x00\x01payload", &error)).unwrap();
        log.dump(&ApplyErrorEntry::new(&meta, b"second", &error)).unwrap();

        let entries = log.read_all().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].trx_id, 12);
        assert_eq!(entries[0].gtid, meta.gtid.to_string());
        assert_eq!(entries[0].payload_bytes().unwrap(), b"\x00\x01payload");
        assert_eq!(entries[1].error, error.to_string());
    }
}

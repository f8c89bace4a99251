//! Clean shutdown marker
//!
//! Written on graceful shutdown, removed once recovery completed. Its
//! absence at startup means the previous run crashed.

use std::fs;
use std::path::{Path, PathBuf};

use super::errors::{RecoveryError, RecoveryResult};

const CLEAN_SHUTDOWN_MARKER: &str = "wsrep_clean_shutdown";

#[derive(Debug, Clone)]
pub struct ShutdownMarker {
    path: PathBuf,
}

impl ShutdownMarker {
    pub fn new(data_dir: impl AsRef<Path>) -> Self {
        Self {
            path: data_dir.as_ref().join(CLEAN_SHUTDOWN_MARKER),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    pub fn write(&self) -> RecoveryResult<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|source| self.error(source))?;
        }
        fs::write(&self.path, b"").map_err(|source| self.error(source))
    }

    pub fn remove(&self) -> RecoveryResult<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(self.error(source)),
        }
    }

    fn error(&self, source: std::io::Error) -> RecoveryError {
        RecoveryError::Marker {
            path: self.path.clone(),
            source,
        }
    }
}

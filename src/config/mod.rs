//! Replication configuration
//!
//! Loaded once from a JSON file at startup, immutable afterwards.
//! Every field has a default so a partial file is accepted:
//! - write-set limits (`max_ws_size`, `max_ws_rows`)
//! - streaming defaults (`fragment_unit`, `fragment_size`)
//! - replay drain poll interval and autocommit retry count
//! - applier pool size and idle streaming reaper timeout

mod errors;

pub use errors::{ConfigError, ConfigResult};

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Default hard limit on one write-set: 1 GiB.
pub const DEFAULT_MAX_WS_SIZE: u64 = 1_073_741_824;

/// Default bounded re-check interval for replay drain waits.
pub const DEFAULT_REPLAY_POLL_INTERVAL_MS: u64 = 1;

/// Default number of autocommit retries after a deadlock.
pub const DEFAULT_RETRY_AUTOCOMMIT: u32 = 5;

/// Unit in which streaming fragment size is measured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FragmentUnit {
    Bytes,
    Rows,
    Statements,
}

impl FragmentUnit {
    pub fn as_str(self) -> &'static str {
        match self {
            FragmentUnit::Bytes => "bytes",
            FragmentUnit::Rows => "rows",
            FragmentUnit::Statements => "statements",
        }
    }
}

impl fmt::Display for FragmentUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FragmentUnit {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "bytes" => Ok(FragmentUnit::Bytes),
            "rows" => Ok(FragmentUnit::Rows),
            "statements" => Ok(FragmentUnit::Statements),
            other => Err(ConfigError::invalid(format!(
                "unknown fragment unit '{}'",
                other
            ))),
        }
    }
}

/// Replication layer configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplicationConfig {
    /// Master switch. When false every hook is a no-op.
    pub enabled: bool,

    /// Identity of this node. Generated on load when absent.
    pub node_id: Option<Uuid>,

    /// Human readable node name, used in logs only.
    pub node_name: String,

    /// Root directory for the fragment store and markers.
    pub data_dir: PathBuf,

    /// Hard maximum size of one write-set or fragment, in bytes.
    pub max_ws_size: u64,

    /// Maximum rows per write-set. 0 disables the limit.
    pub max_ws_rows: u64,

    /// Default streaming unit for new sessions.
    pub fragment_unit: FragmentUnit,

    /// Default streaming threshold. 0 disables streaming.
    pub fragment_size: u64,

    /// Bounded re-check interval for replay drain and background waits.
    pub replay_poll_interval_ms: u64,

    /// How many times an autocommit statement is retried after a deadlock.
    pub retry_autocommit: u32,

    /// Number of applier threads consuming remote write-sets.
    pub applier_threads: usize,

    /// Idle streaming transactions older than this are BF-aborted.
    /// 0 disables the reaper.
    pub sr_idle_timeout_ms: u64,

    /// File receiving a dump of every write-set that failed to apply.
    pub apply_error_log: Option<PathBuf>,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            node_id: None,
            node_name: "node".to_string(),
            data_dir: PathBuf::from("./data"),
            max_ws_size: DEFAULT_MAX_WS_SIZE,
            max_ws_rows: 0,
            fragment_unit: FragmentUnit::Bytes,
            fragment_size: 0,
            replay_poll_interval_ms: DEFAULT_REPLAY_POLL_INTERVAL_MS,
            retry_autocommit: DEFAULT_RETRY_AUTOCOMMIT,
            applier_threads: 1,
            sr_idle_timeout_ms: 0,
            apply_error_log: None,
        }
    }
}

impl ReplicationConfig {
    /// Load configuration from a JSON file and validate it.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&contents)
    }

    /// Parse configuration from a JSON document and validate it.
    pub fn from_json(json: &str) -> ConfigResult<Self> {
        let mut config: ReplicationConfig = serde_json::from_str(json)?;
        config.resolve_node_id();
        config.validate()?;
        Ok(config)
    }

    /// Configuration rooted at `data_dir` with everything else defaulted.
    pub fn with_data_dir(data_dir: impl AsRef<Path>) -> Self {
        let mut config = Self {
            data_dir: data_dir.as_ref().to_path_buf(),
            ..Self::default()
        };
        config.resolve_node_id();
        config
    }

    /// Assign a random node id when none was configured.
    pub fn resolve_node_id(&mut self) -> Uuid {
        *self.node_id.get_or_insert_with(Uuid::new_v4)
    }

    /// The node id, nil when it was never resolved.
    pub fn node_uuid(&self) -> Uuid {
        self.node_id.unwrap_or_else(Uuid::nil)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.max_ws_size == 0 {
            return Err(ConfigError::invalid("max_ws_size must be greater than 0"));
        }
        if self.applier_threads == 0 {
            return Err(ConfigError::invalid(
                "applier_threads must be at least 1",
            ));
        }
        if self.replay_poll_interval_ms == 0 {
            return Err(ConfigError::invalid(
                "replay_poll_interval_ms must be greater than 0",
            ));
        }
        if self.fragment_unit == FragmentUnit::Bytes
            && self.fragment_size > self.max_ws_size
        {
            return Err(ConfigError::invalid(format!(
                "fragment_size {} exceeds max_ws_size {}",
                self.fragment_size, self.max_ws_size
            )));
        }
        if self.node_id == Some(Uuid::nil()) {
            return Err(ConfigError::invalid("node_id must not be the nil uuid"));
        }
        Ok(())
    }

    pub fn replay_poll_interval(&self) -> Duration {
        Duration::from_millis(self.replay_poll_interval_ms)
    }

    pub fn sr_idle_timeout(&self) -> Option<Duration> {
        if self.sr_idle_timeout_ms == 0 {
            None
        } else {
            Some(Duration::from_millis(self.sr_idle_timeout_ms))
        }
    }

    /// Directory holding the fragment store.
    pub fn fragment_dir(&self) -> PathBuf {
        self.data_dir.join("sr")
    }
}

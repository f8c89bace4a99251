//! CLI command implementations
//!
//! Commands operate on a stopped node: they open the fragment store under
//! the configured data directory directly. No provider connection is made.

use std::io::{self, Write};
use std::path::Path;
use std::sync::Arc;

use serde_json::json;

use crate::config::ReplicationConfig;
use crate::context::ReplicationContext;
use crate::engine::MemoryEngine;
use crate::fragment::{FileFragmentStore, FragmentStore};
use crate::provider::LoopbackProvider;
use crate::recovery::FragmentRecovery;

use super::args::{Cli, Command, ConfigAction, FragmentsAction};
use super::errors::CliResult;
use super::io::{write_line, write_response};

/// Parse arguments and run the selected command
pub fn run() -> CliResult<()> {
    run_command(Cli::parse_args().command)
}

pub fn run_command(cmd: Command) -> CliResult<()> {
    match cmd {
        Command::Fragments {
            action: FragmentsAction::List { config },
        } => {
            let mut stdout = io::stdout().lock();
            let count = fragments_list(&config, &mut stdout)?;
            stdout.flush()?;
            drop(stdout);
            eprintln!("{} fragment(s)", count);
            Ok(())
        }
        Command::Fragments {
            action: FragmentsAction::PurgeOrphans { config },
        } => {
            let removed = purge_orphans(&config)?;
            write_response(json!({ "orphans_removed": removed }))
        }
        Command::Config {
            action: ConfigAction::Check { config },
        } => {
            let loaded = config_check(&config)?;
            write_response(serde_json::to_value(&loaded)?)
        }
    }
}

/// Write one JSON line per stored fragment. Returns the number written.
pub fn fragments_list<W: Write>(config_path: &Path, out: &mut W) -> CliResult<usize> {
    let config = ReplicationConfig::load(config_path)?;
    let store = FileFragmentStore::open(config.fragment_dir())?;

    let mut count = 0;
    for fragment in store.scan_all()? {
        write_line(out, &fragment.summary())?;
        count += 1;
    }
    Ok(count)
}

/// Delete every fragment without a certified seqno.
pub fn purge_orphans(config_path: &Path) -> CliResult<usize> {
    let config = ReplicationConfig::load(config_path)?;
    let store = Arc::new(FileFragmentStore::open(config.fragment_dir())?);
    let ctx = ReplicationContext::builder(config.clone())
        .provider(Arc::new(LoopbackProvider::new(config.node_uuid())))
        .engine(Arc::new(MemoryEngine::new()))
        .store(store)
        .build()?;

    Ok(FragmentRecovery::new(&ctx).purge_orphans()?)
}

/// Load and validate a configuration file, returning it with defaults filled in.
pub fn config_check(config_path: &Path) -> CliResult<ReplicationConfig> {
    Ok(ReplicationConfig::load(config_path)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::CliErrorCode;
    use crate::fragment::Fragment;
    use crate::types::WriteSetFlags;
    use bytes::Bytes;
    use std::fs;
    use std::path::PathBuf;
    use tempfile::TempDir;
    use uuid::Uuid;

    fn write_config(dir: &TempDir) -> PathBuf {
        let path = dir.path().join("wsrep.json");
        let config = json!({ "data_dir": dir.path().join("data") });
        fs::write(&path, config.to_string()).unwrap();
        path
    }

    fn seed(dir: &TempDir, node: Uuid) {
        let store = FileFragmentStore::open(dir.path().join("data").join("sr")).unwrap();
        store
            .append(Fragment::certified(node, 1, 10, WriteSetFlags::TRX_START, Bytes::from_static(b"abc")))
            .unwrap();
        store
            .append(Fragment::uncertified(node, 2, WriteSetFlags::TRX_START, Bytes::from_static(b"de")))
            .unwrap();
    }

    #[test]
    fn test_fragments_list_prints_summaries() {
        let dir = TempDir::new().unwrap();
        let config = write_config(&dir);
        let node = Uuid::new_v4();
        seed(&dir, node);

        let mut out = Vec::new();
        assert_eq!(fragments_list(&config, &mut out).unwrap(), 2);

        let text = String::from_utf8(out).unwrap();
        let lines: Vec<serde_json::Value> = text
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(lines[0]["node_uuid"], node.to_string());
        assert_eq!(lines[0]["trx_id"], 1);
        assert_eq!(lines[0]["seqno"], 10);
        assert_eq!(lines[0]["frag_len"], 3);
        assert_eq!(lines[1]["seqno"], -1);
    }

    #[test]
    fn test_purge_orphans_removes_uncertified() {
        let dir = TempDir::new().unwrap();
        let config = write_config(&dir);
        let node = Uuid::new_v4();
        seed(&dir, node);

        assert_eq!(purge_orphans(&config).unwrap(), 1);
        assert_eq!(purge_orphans(&config).unwrap(), 0);

        let store = FileFragmentStore::open(dir.path().join("data").join("sr")).unwrap();
        assert_eq!(store.len(), 1);
        assert!(store.fragments_of(node, 2).unwrap().is_empty());
    }

    #[test]
    fn test_config_check_rejects_invalid() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("wsrep.json");
        fs::write(&path, r#"{"applier_threads": 0}"#).unwrap();

        let err = config_check(&path).unwrap_err();
        assert_eq!(err.code(), CliErrorCode::ConfigError);

        let missing = config_check(&dir.path().join("absent.json")).unwrap_err();
        assert_eq!(missing.code(), CliErrorCode::ConfigError);
    }

    #[test]
    fn test_config_check_fills_defaults() {
        let dir = TempDir::new().unwrap();
        let config = config_check(&write_config(&dir)).unwrap();
        assert_eq!(config.applier_threads, 1);
        assert!(config.node_id.is_some());
    }
}

//! CLI argument definitions using clap
//!
//! Commands:
//! - wsrep-core fragments list --config <path>
//! - wsrep-core fragments purge-orphans --config <path>
//! - wsrep-core config check --config <path>

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Write-set replication core: operator tooling
#[derive(Parser, Debug)]
#[command(name = "wsrep-core")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Inspect or clean the streaming fragment store
    Fragments {
        #[command(subcommand)]
        action: FragmentsAction,
    },

    /// Configuration tools
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum FragmentsAction {
    /// Print every stored fragment as one JSON line
    List {
        /// Path to configuration file
        #[arg(long, default_value = "./wsrep.json")]
        config: PathBuf,
    },

    /// Delete fragments that were stored but never certified
    PurgeOrphans {
        /// Path to configuration file
        #[arg(long, default_value = "./wsrep.json")]
        config: PathBuf,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Load and validate a configuration file
    Check {
        /// Path to configuration file
        #[arg(long, default_value = "./wsrep.json")]
        config: PathBuf,
    },
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Cli::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_fragments_list() {
        let cli = Cli::try_parse_from(["wsrep-core", "fragments", "list", "--config", "/tmp/w.json"]).unwrap();
        match cli.command {
            Command::Fragments {
                action: FragmentsAction::List { config },
            } => assert_eq!(config, PathBuf::from("/tmp/w.json")),
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_default_config_path() {
        let cli = Cli::try_parse_from(["wsrep-core", "config", "check"]).unwrap();
        match cli.command {
            Command::Config {
                action: ConfigAction::Check { config },
            } => assert_eq!(config, PathBuf::from("./wsrep.json")),
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_purge_orphans_is_kebab_case() {
        assert!(Cli::try_parse_from(["wsrep-core", "fragments", "purge-orphans"]).is_ok());
        assert!(Cli::try_parse_from(["wsrep-core", "fragments", "purge_orphans"]).is_err());
    }
}

//! Operator CLI
//!
//! Offline inspection of a node's replication state:
//! - fragments list: dump the fragment table
//! - fragments purge-orphans: delete fragments that never certified
//! - config check: load and validate a configuration file

mod args;
mod commands;
mod errors;
mod io;

pub use args::{Cli, Command, ConfigAction, FragmentsAction};
pub use commands::{config_check, fragments_list, purge_orphans, run, run_command};
pub use errors::{CliError, CliErrorCode, CliResult};
pub use io::{write_error, write_json_line, write_response};

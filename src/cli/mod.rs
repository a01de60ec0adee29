//! Command-line interface for sql-forge.

mod commands;

pub use commands::{parse_cli, run, run_with_cli, Cli};

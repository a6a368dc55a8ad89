//! Command implementations.

mod analyze;
mod check;

use crate::cli::{Cli, Commands};

/// Dispatch CLI command to the appropriate handler.
pub fn run_command(cli: &Cli) -> i32 {
    match &cli.command {
        Commands::Analyze {
            input,
            entry,
            toc,
            calls,
        } => analyze::cmd_analyze(input, *entry, *toc, *calls),
        Commands::Check {
            input,
            manifest,
            entry,
            toc,
        } => check::cmd_check(input, manifest, *entry, *toc),
    }
}

//! CLI definitions and argument types.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Exit code for success.
pub const EXIT_SUCCESS: i32 = 0;
/// Exit code for failure.
pub const EXIT_FAILURE: i32 = 1;

#[derive(Parser)]
#[command(name = "ppumap")]
#[command(about = "PPU executable mapper - recovers functions, call graphs, and TOC linkage")]
#[command(version)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress output (only show errors)
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub silent: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Analyze an executable and print the recovered function table
    Analyze {
        /// Input ELF file
        #[arg(value_name = "ELF")]
        input: PathBuf,

        /// Entry descriptor address, overriding the ELF entry point
        #[arg(long, value_parser = parse_u32)]
        entry: Option<u32>,

        /// Fallback TOC base for images whose data yields none
        #[arg(long, value_parser = parse_u32)]
        toc: Option<u32>,

        /// Also print the call edges of every function
        #[arg(long)]
        calls: bool,
    },
    /// Analyze an executable and grade it against a reference manifest
    Check {
        /// Input ELF file
        #[arg(value_name = "ELF")]
        input: PathBuf,

        /// Reference manifest (YAML)
        #[arg(value_name = "MANIFEST")]
        manifest: PathBuf,

        /// Entry descriptor address, overriding the ELF entry point
        #[arg(long, value_parser = parse_u32)]
        entry: Option<u32>,

        /// Fallback TOC base for images whose data yields none
        #[arg(long, value_parser = parse_u32)]
        toc: Option<u32>,
    },
}

/// Parse a 32-bit value from decimal or 0x-prefixed hex.
fn parse_u32(text: &str) -> Result<u32, String> {
    let parsed = if let Some(digits) = text.strip_prefix("0x") {
        u32::from_str_radix(digits, 16)
    } else {
        text.parse()
    };
    parsed.map_err(|e| format!("invalid address {text:?}: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_u32_accepts_both_radices() {
        assert_eq!(parse_u32("64"), Ok(64));
        assert_eq!(parse_u32("0x40"), Ok(64));
        assert!(parse_u32("0x").is_err());
        assert!(parse_u32("fish").is_err());
    }
}

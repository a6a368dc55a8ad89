//! PPUMAP - PPU executable mapper
//!
//! Recovers function boundaries, call graphs, and TOC assignments from
//! unsymbolized big-endian PPU executables.
//!
//! # Example
//!
//! ```ignore
//! use ppumap::AnalyzeOpts;
//!
//! let result = ppumap::analyze_file("module.elf", AnalyzeOpts::default())?;
//! for func in &result.functions {
//!     println!("{:#010x} {:#x}", func.addr, func.size);
//! }
//! ```

// Re-export from sub-crates
pub use ppumap_cfg::{
    AnalysisResult, AnalysisStats, AnalyzeOpts, FnAttr, Function, TOC_CONFLICT, TOC_UNKNOWN,
    ValidationReport, analyze, validate,
};
pub use ppumap_elf::{ElfError, PpuImage, Section, Segment};

mod manifest;
pub use manifest::*;

use std::path::Path;

use thiserror::Error;

/// Analysis front-end errors.
#[derive(Error, Debug)]
pub enum Error {
    #[error("ELF error: {0}")]
    Elf(#[from] ppumap_elf::ElfError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Manifest error: {0}")]
    Manifest(#[from] serde_yaml::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Read, parse, and analyze an executable on disk.
///
/// # Errors
///
/// Fails when the file cannot be read or is not a PPU ELF image.
pub fn analyze_file(path: impl AsRef<Path>, opts: AnalyzeOpts) -> Result<AnalysisResult> {
    let data = std::fs::read(path)?;
    let image = PpuImage::parse(&data)?;
    Ok(analyze(&image, opts))
}

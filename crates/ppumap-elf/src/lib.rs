//! Big-endian ELF front-end for PPU executables.
//!
//! Parses just enough of an ELF64 image to hand the analyzer its inputs:
//! loadable segments (with resident bytes), allocated sections for
//! prospecting, and the entry-point hint. Effective addresses are 32-bit.

mod constants;
mod file;
mod image;

pub use constants::*;
pub use file::*;
pub use image::*;

use thiserror::Error;

/// ELF parsing errors.
#[derive(Error, Debug)]
pub enum ElfError {
    #[error("ELF data too small")]
    TooSmall,
    #[error("Invalid ELF magic number")]
    BadMagic,
    #[error("Only ELF64 images are supported")]
    NotElf64,
    #[error("PPU executables are big-endian")]
    NotBigEndian,
    #[error("Unexpected machine type {0:#x} (want PPC64)")]
    WrongMachine(u16),
    #[error("Program header out of bounds")]
    ProgramOutOfBounds,
    #[error("Section header out of bounds")]
    SectionOutOfBounds,
    #[error("Segment extends beyond file")]
    SegmentBeyondFile,
    #[error("Virtual address {0:#x} outside the 32-bit effective range")]
    AddressOverflow(u64),
    #[error("No loadable segments found")]
    NoLoadableSegments,
}

pub type Result<T> = std::result::Result<T, ElfError>;

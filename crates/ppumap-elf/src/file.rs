//! Raw ELF64 file parser (big-endian).

use crate::constants::*;
use crate::{ElfError, Result};

/// Read big-endian u16 from bytes.
#[inline]
fn read_be16(data: &[u8], offset: usize) -> u16 {
    u16::from_be_bytes([data[offset], data[offset + 1]])
}

/// Read big-endian u32 from bytes.
#[inline]
fn read_be32(data: &[u8], offset: usize) -> u32 {
    u32::from_be_bytes([
        data[offset],
        data[offset + 1],
        data[offset + 2],
        data[offset + 3],
    ])
}

/// Read big-endian u64 from bytes.
#[inline]
fn read_be64(data: &[u8], offset: usize) -> u64 {
    u64::from_be_bytes([
        data[offset],
        data[offset + 1],
        data[offset + 2],
        data[offset + 3],
        data[offset + 4],
        data[offset + 5],
        data[offset + 6],
        data[offset + 7],
    ])
}

/// A program header, fields as stored in the file.
#[derive(Clone, Debug)]
pub struct ProgramHeader {
    pub p_type: u32,
    pub flags: u32,
    pub offset: u64,
    pub vaddr: u64,
    pub filesz: u64,
    pub memsz: u64,
}

/// A section header, fields as stored in the file.
#[derive(Clone, Debug)]
pub struct SectionHeader {
    pub sh_type: u32,
    pub flags: u64,
    pub addr: u64,
    pub size: u64,
}

/// Parsed ELF file, before address-space validation.
#[derive(Clone, Debug)]
pub struct ElfFile {
    pub entry: u64,
    pub program_headers: Vec<ProgramHeader>,
    pub section_headers: Vec<SectionHeader>,
}

impl ElfFile {
    /// Parse an ELF64 big-endian file from raw bytes.
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < 64 {
            return Err(ElfError::TooSmall);
        }

        if data[0..4] != ELF_MAGIC {
            return Err(ElfError::BadMagic);
        }

        if data[4] != ELF_CLASS_64 {
            return Err(ElfError::NotElf64);
        }

        if data[5] != ELF_DATA_MSB {
            return Err(ElfError::NotBigEndian);
        }

        let machine = read_be16(data, 18);
        if machine != ELF_MACHINE_PPC64 {
            return Err(ElfError::WrongMachine(machine));
        }

        let entry = read_be64(data, 24);
        let phoff = read_be64(data, 32) as usize;
        let shoff = read_be64(data, 40) as usize;
        let phentsize = read_be16(data, 54) as usize;
        let phnum = read_be16(data, 56) as usize;
        let shentsize = read_be16(data, 58) as usize;
        let shnum = read_be16(data, 60) as usize;

        let program_headers = Self::parse_program_headers(data, phoff, phentsize, phnum)?;
        let section_headers = Self::parse_section_headers(data, shoff, shentsize, shnum)?;

        Ok(Self {
            entry,
            program_headers,
            section_headers,
        })
    }

    fn parse_program_headers(
        data: &[u8],
        phoff: usize,
        phentsize: usize,
        phnum: usize,
    ) -> Result<Vec<ProgramHeader>> {
        let mut headers = Vec::with_capacity(phnum);

        for i in 0..phnum {
            let off = phoff
                .checked_add(i * phentsize)
                .ok_or(ElfError::ProgramOutOfBounds)?;
            if phentsize < 56 || off.checked_add(56).is_none_or(|end| end > data.len()) {
                return Err(ElfError::ProgramOutOfBounds);
            }
            headers.push(ProgramHeader {
                p_type: read_be32(data, off),
                flags: read_be32(data, off + 4),
                offset: read_be64(data, off + 8),
                vaddr: read_be64(data, off + 16),
                filesz: read_be64(data, off + 32),
                memsz: read_be64(data, off + 40),
            });
        }

        Ok(headers)
    }

    fn parse_section_headers(
        data: &[u8],
        shoff: usize,
        shentsize: usize,
        shnum: usize,
    ) -> Result<Vec<SectionHeader>> {
        let mut headers = Vec::with_capacity(shnum);

        // Absent section tables (shoff == 0) are fine; prospecting just has
        // less to chew on.
        if shoff == 0 {
            return Ok(headers);
        }

        for i in 0..shnum {
            let off = shoff
                .checked_add(i * shentsize)
                .ok_or(ElfError::SectionOutOfBounds)?;
            if shentsize < 64 || off.checked_add(64).is_none_or(|end| end > data.len()) {
                return Err(ElfError::SectionOutOfBounds);
            }
            headers.push(SectionHeader {
                sh_type: read_be32(data, off + 4),
                flags: read_be64(data, off + 8),
                addr: read_be64(data, off + 16),
                size: read_be64(data, off + 32),
            });
        }

        Ok(headers)
    }
}

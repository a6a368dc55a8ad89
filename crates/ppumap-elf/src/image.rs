//! Memory-resident PPU image.

use crate::constants::*;
use crate::file::ElfFile;
use crate::{ElfError, Result};

/// A loaded segment with resident bytes.
///
/// `data` is zero-extended to the full memory size so the analyzer can read
/// BSS words without special cases.
#[derive(Clone, Debug)]
pub struct Segment {
    pub addr: u32,
    pub size: u32,
    pub filesz: u32,
    pub data: Vec<u8>,
    pub flags: u32,
}

impl Segment {
    /// End address (exclusive).
    pub fn end(&self) -> u32 {
        self.addr + self.size
    }

    /// Check if the segment contains `addr`.
    pub fn contains(&self, addr: u32) -> bool {
        addr >= self.addr && addr < self.end()
    }

    /// Check if the segment is executable.
    pub fn is_executable(&self) -> bool {
        self.flags & PF_X != 0
    }
}

/// An allocated section, used only for prospecting.
#[derive(Clone, Copy, Debug)]
pub struct Section {
    pub addr: u32,
    pub size: u32,
    pub sh_type: u32,
    pub flags: u64,
}

impl Section {
    /// End address (exclusive).
    pub fn end(&self) -> u32 {
        self.addr + self.size
    }

    /// Check if the section holds executable code.
    pub fn is_executable(&self) -> bool {
        self.flags & SHF_EXECINSTR != 0
    }
}

/// A PPU module image ready for analysis.
#[derive(Clone, Debug)]
pub struct PpuImage {
    /// Loadable segments, ascending by address.
    pub segments: Vec<Segment>,
    /// Allocated data-bearing sections, ascending by address.
    pub sections: Vec<Section>,
    /// Entry-point hint from the header: the address of the entry function's
    /// descriptor under the PPU ABI, not of its first instruction.
    pub entry: Option<u32>,
}

impl PpuImage {
    /// Parse a big-endian ELF64 PPU executable.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let elf = ElfFile::parse(data)?;

        let mut segments = Vec::new();
        for phdr in &elf.program_headers {
            if phdr.p_type != PT_LOAD || phdr.memsz == 0 {
                continue;
            }

            let offset = usize::try_from(phdr.offset).map_err(|_| ElfError::SegmentBeyondFile)?;
            let filesz = usize::try_from(phdr.filesz).map_err(|_| ElfError::SegmentBeyondFile)?;
            if offset.checked_add(filesz).is_none_or(|end| end > data.len()) {
                return Err(ElfError::SegmentBeyondFile);
            }

            let addr = to_effective(phdr.vaddr)?;
            let memsz =
                u32::try_from(phdr.memsz).map_err(|_| ElfError::AddressOverflow(phdr.memsz))?;
            if addr.checked_add(memsz).is_none() {
                return Err(ElfError::AddressOverflow(phdr.vaddr + phdr.memsz));
            }

            let mut bytes = data[offset..offset + filesz].to_vec();
            bytes.resize(memsz as usize, 0);

            segments.push(Segment {
                addr,
                size: memsz,
                filesz: filesz.min(memsz as usize) as u32,
                data: bytes,
                flags: phdr.flags,
            });
        }

        if segments.is_empty() {
            return Err(ElfError::NoLoadableSegments);
        }
        segments.sort_by_key(|seg| seg.addr);

        let mut sections = Vec::new();
        for shdr in &elf.section_headers {
            // Only allocated, byte-bearing sections are worth prospecting.
            if shdr.sh_type != SHT_PROGBITS || shdr.flags & SHF_ALLOC == 0 || shdr.size == 0 {
                continue;
            }
            let Ok(addr) = to_effective(shdr.addr) else {
                continue;
            };
            let Ok(size) = u32::try_from(shdr.size) else {
                continue;
            };
            // Sections that escape every loaded segment cannot be read.
            if !segments.iter().any(|seg| {
                seg.contains(addr) && addr.checked_add(size).is_some_and(|e| e <= seg.end())
            }) {
                continue;
            }
            sections.push(Section {
                addr,
                size,
                sh_type: shdr.sh_type,
                flags: shdr.flags,
            });
        }
        sections.sort_by_key(|sec| sec.addr);

        let entry = match elf.entry {
            0 => None,
            e => Some(to_effective(e)?),
        };

        Ok(Self {
            segments,
            sections,
            entry,
        })
    }

    /// Build an image from raw parts. Segments must be ascending by address.
    pub fn from_parts(segments: Vec<Segment>, sections: Vec<Section>, entry: Option<u32>) -> Self {
        Self {
            segments,
            sections,
            entry,
        }
    }

    /// Read a big-endian word at `addr`, if it is fully resident.
    pub fn read_u32(&self, addr: u32) -> Option<u32> {
        let seg = self.segments.iter().find(|seg| seg.contains(addr))?;
        let off = (addr - seg.addr) as usize;
        let bytes = seg.data.get(off..off + 4)?;
        Some(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Check if `addr` lies inside any loaded segment.
    pub fn contains(&self, addr: u32) -> bool {
        self.segments.iter().any(|seg| seg.contains(addr))
    }

    /// Check if `addr` lies inside an executable segment.
    pub fn is_code(&self, addr: u32) -> bool {
        self.segments
            .iter()
            .any(|seg| seg.is_executable() && seg.contains(addr))
    }

    /// Span of the executable segments: (lowest start, highest end).
    pub fn code_bounds(&self) -> (u32, u32) {
        let mut start = u32::MAX;
        let mut end = 0;
        for seg in &self.segments {
            if seg.is_executable() {
                start = start.min(seg.addr);
                end = end.max(seg.end());
            }
        }
        if start == u32::MAX { (0, 0) } else { (start, end) }
    }
}

/// Narrow a file-level virtual address to the 32-bit effective range.
fn to_effective(vaddr: u64) -> Result<u32> {
    u32::try_from(vaddr).map_err(|_| ElfError::AddressOverflow(vaddr))
}

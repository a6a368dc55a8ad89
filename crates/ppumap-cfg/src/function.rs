//! Recovered function records.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::ops::{BitOr, BitOrAssign};

/// TOC value meaning "not yet established".
pub const TOC_UNKNOWN: u32 = 0;
/// TOC value meaning "contradictory evidence". Never rolled back once set.
pub const TOC_CONFLICT: u32 = u32::MAX;

/// Confidence attributes attached to a recovered function.
#[derive(Clone, Copy, Default, PartialEq, Eq)]
pub struct FnAttr(u8);

impl FnAttr {
    /// Entry address is trusted (descriptor-backed or idiom-exact).
    pub const KNOWN_ADDR: Self = Self(1);
    /// Size was established by an exact idiom match, not block analysis.
    pub const KNOWN_SIZE: Self = Self(1 << 1);
    /// Control never returns to the caller.
    pub const NO_RETURN: Self = Self(1 << 2);
    /// Extent could not be established from control flow alone.
    pub const NO_SIZE: Self = Self(1 << 3);

    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    pub const fn intersection(self, other: Self) -> Self {
        Self(self.0 & other.0)
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for FnAttr {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for FnAttr {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for FnAttr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("-");
        }
        let mut first = true;
        for (bit, name) in [
            (Self::KNOWN_ADDR, "known_addr"),
            (Self::KNOWN_SIZE, "known_size"),
            (Self::NO_RETURN, "no_return"),
            (Self::NO_SIZE, "no_size"),
        ] {
            if self.contains(bit) {
                if !first {
                    f.write_str("|")?;
                }
                f.write_str(name)?;
                first = false;
            }
        }
        Ok(())
    }
}

/// A function recovered from the code image.
///
/// `blocks` maps block start addresses to lengths in bytes; a zero length
/// marks a block that is queued but not yet analyzed. `trampoline` is set for
/// functions that only forward control elsewhere and holds the signed TOC
/// adjustment applied on the way through (zero for plain branch stubs).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Function {
    pub addr: u32,
    pub size: u32,
    pub toc: u32,
    pub attr: FnAttr,
    pub trampoline: Option<i32>,
    pub name: String,
    pub callers: BTreeSet<u32>,
    pub calls: BTreeSet<u32>,
    pub blocks: BTreeMap<u32, u32>,
}

impl Function {
    pub(crate) fn new(addr: u32) -> Self {
        Self {
            addr,
            size: 0,
            toc: TOC_UNKNOWN,
            attr: FnAttr::empty(),
            trampoline: None,
            name: format!("fn_{addr:08x}"),
            callers: BTreeSet::new(),
            calls: BTreeSet::new(),
            blocks: BTreeMap::new(),
        }
    }

    /// One past the last byte of the function.
    pub fn end(&self) -> u32 {
        self.addr + self.size
    }

    /// Whether the TOC base settled to a single usable value.
    pub fn has_toc(&self) -> bool {
        self.toc != TOC_UNKNOWN && self.toc != TOC_CONFLICT
    }

    /// TOC adjustment applied when this function hands control to a callee.
    pub fn toc_delta(&self) -> i32 {
        self.trampoline.unwrap_or(0)
    }

    /// Number of blocks whose extent has been established.
    pub fn analyzed_blocks(&self) -> usize {
        self.blocks.values().filter(|len| **len != 0).count()
    }
}

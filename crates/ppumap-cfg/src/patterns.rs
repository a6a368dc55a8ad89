//! Masked instruction patterns for well-known function idioms.
//!
//! Matching tolerates light NOP padding: pattern words must appear in order,
//! with at most one NOP between consecutive words. A match reports the total
//! bytes consumed so callers can size functions from the real extent.

use ppumap_elf::PpuImage;
use ppumap_isa::{addi, addis, b, b_target, bcctr, is_nop, li, lwz, mflr, mtctr, oris, simm16,
    std, stdu, words};

#[derive(Clone, Copy)]
struct MaskedWord {
    value: u32,
    mask: u32,
}

const fn exact(value: u32) -> MaskedWord {
    MaskedWord {
        value,
        mask: u32::MAX,
    }
}

const fn masked(value: u32, mask: u32) -> MaskedWord {
    MaskedWord { value, mask }
}

/// Linker-generated import stub: materialize a descriptor address in r12,
/// spill the caller's TOC, then jump through the descriptor.
const IMPORT_STUB: [MaskedWord; 8] = [
    masked(li(12, 0), 0xffff_0000),
    masked(oris(12, 12, 0), 0xffff_0000),
    masked(lwz(12, 12, 0), 0xffff_0000),
    exact(std(2, 1, 0x28)),
    exact(lwz(0, 12, 0)),
    exact(lwz(2, 12, 4)),
    exact(mtctr(0)),
    exact(bcctr(20, 0)),
];

/// Process-abort idioms. Terminal: the trap word is never stepped over.
const ABORT_FRAMED: [MaskedWord; 7] = [
    exact(mflr(0)),
    exact(std(0, 1, 0x10)),
    exact(stdu(1, 1, -0x70)),
    exact(li(3, 1)),
    exact(li(11, 3)),
    exact(words::SC),
    exact(words::TRAP),
];

const ABORT_BARE: [MaskedWord; 4] = [
    exact(li(3, 1)),
    exact(li(11, 3)),
    exact(words::SC),
    exact(words::TRAP),
];

const ABORTS: [&[MaskedWord]; 2] = [&ABORT_FRAMED, &ABORT_BARE];

/// A matched TOC-adjusting tail trampoline.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct TocTrampoline {
    pub target: u32,
    pub delta: i32,
    pub len: u32,
}

/// Fetch the next pattern word at `pc`, stepping over at most one NOP.
fn next_word(image: &PpuImage, pc: &mut u32, limit: u32) -> Option<u32> {
    for _ in 0..2 {
        if *pc >= limit {
            return None;
        }
        let word = image.read_u32(*pc)?;
        if !is_nop(word) {
            return Some(word);
        }
        *pc += 4;
    }
    None
}

fn match_sequence(image: &PpuImage, addr: u32, limit: u32, pattern: &[MaskedWord]) -> Option<u32> {
    let mut pc = addr;
    for part in pattern {
        let word = next_word(image, &mut pc, limit)?;
        if word & part.mask != part.value {
            return None;
        }
        pc += 4;
    }
    Some(pc - addr)
}

/// Match an import stub at `addr`, returning the bytes consumed.
pub(crate) fn import_stub(image: &PpuImage, addr: u32, limit: u32) -> Option<u32> {
    match_sequence(image, addr, limit, &IMPORT_STUB)
}

/// Match an abort idiom at `addr`. First variant wins.
pub(crate) fn abort(image: &PpuImage, addr: u32, limit: u32) -> Option<u32> {
    ABORTS
        .iter()
        .find_map(|pattern| match_sequence(image, addr, limit, pattern))
}

/// Match a TOC-adjusting tail trampoline: spill the TOC, rebase r2 by a
/// 32-bit immediate, branch onward without linking.
pub(crate) fn toc_trampoline(image: &PpuImage, addr: u32, limit: u32) -> Option<TocTrampoline> {
    let mut pc = addr;

    let spill = next_word(image, &mut pc, limit)?;
    if spill != std(2, 1, 0x28) {
        return None;
    }
    pc += 4;

    let hi = next_word(image, &mut pc, limit)?;
    if hi & 0xffff_0000 != addis(2, 2, 0) {
        return None;
    }
    pc += 4;

    let lo = next_word(image, &mut pc, limit)?;
    if lo & 0xffff_0000 != addi(2, 2, 0) {
        return None;
    }
    pc += 4;

    let branch = next_word(image, &mut pc, limit)?;
    if branch & 0xfc00_0003 != b(0) {
        return None;
    }
    let target = b_target(pc, branch);
    pc += 4;

    let delta = (simm16(hi) << 16).wrapping_add(simm16(lo));
    Some(TocTrampoline {
        target,
        delta,
        len: pc - addr,
    })
}

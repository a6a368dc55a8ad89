//! Control-flow classification of instruction words.
//!
//! Function analysis only needs to know how an instruction can transfer
//! control; everything else is either `Other` (valid, falls through) or
//! `Unknown` (not a plausible PPU encoding, ends the enclosing block).

use crate::{aa, bd14, li24, opcode, primary, words, x_xo, xl_xo, xo};

/// Control-flow-relevant instruction category.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum ControlKind {
    /// No plausible PPU encoding. Conservatively ends a block.
    Unknown,
    /// Valid instruction with no control-flow significance.
    Other,
    /// Unconditional relative/absolute branch (b/ba/bl/bla).
    Branch,
    /// Conditional branch (bc and friends).
    CondBranch,
    /// Branch to link register (bclr; blr when unconditional).
    BranchLr,
    /// Branch to count register (bcctr; bctr when unconditional).
    BranchCtr,
    /// Trap (twi/tdi/tw/td).
    Trap,
    /// System call.
    Syscall,
    /// Store with update (stwu/stdu), the stack-frame prologue shape.
    StoreUpdate,
}

/// Classify a 32-bit instruction word.
pub const fn classify(word: u32) -> ControlKind {
    match primary(word) {
        opcode::TDI | opcode::TWI => ControlKind::Trap,
        opcode::BC => ControlKind::CondBranch,
        opcode::SC => ControlKind::Syscall,
        opcode::B => ControlKind::Branch,
        opcode::XL_FORM => match xo(word) {
            xl_xo::BCLR => ControlKind::BranchLr,
            xl_xo::BCCTR => ControlKind::BranchCtr,
            // mcrf and the cr ops, isync
            0 | 33 | 129 | 150 | 193 | 225 | 257 | 289 | 417 | 449 => ControlKind::Other,
            _ => ControlKind::Unknown,
        },
        opcode::X_FORM => match xo(word) {
            x_xo::TW | x_xo::TD => ControlKind::Trap,
            // The full X-form table is enormous; anything else decodes as an
            // ordinary computational instruction.
            _ => ControlKind::Other,
        },
        opcode::STWU => ControlKind::StoreUpdate,
        opcode::STD_FORM => match word & 0x3 {
            1 => ControlKind::StoreUpdate, // stdu
            0 | 2 => ControlKind::Other,   // std, stq
            _ => ControlKind::Unknown,
        },
        opcode::LD_FORM => match word & 0x3 {
            0..=2 => ControlKind::Other, // ld, ldu, lwa
            _ => ControlKind::Unknown,
        },
        // Remaining primary opcodes implemented by the PPU: vector, integer
        // arithmetic/logic/rotate, loads/stores, FP.
        4 | 7 | 8 | 10..=15 | 20 | 21 | 23..=30 | 32..=36 | 38..=56 | 59 | 63 => {
            ControlKind::Other
        }
        _ => ControlKind::Unknown,
    }
}

/// Absolute byte target of an I-form branch located at `pc`.
#[inline]
pub const fn b_target(pc: u32, word: u32) -> u32 {
    let base = if aa(word) { 0 } else { pc };
    base.wrapping_add_signed(li24(word))
}

/// Absolute byte target of a B-form conditional branch located at `pc`.
#[inline]
pub const fn bc_target(pc: u32, word: u32) -> u32 {
    let base = if aa(word) { 0 } else { pc };
    base.wrapping_add_signed(bd14(word))
}

/// Check for the canonical NOP (`ori r0, r0, 0`).
#[inline]
pub const fn is_nop(word: u32) -> bool {
    word == words::NOP
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encode;

    #[test]
    fn test_classify_canonical_words() {
        assert_eq!(classify(words::NOP), ControlKind::Other);
        assert_eq!(classify(words::BLR), ControlKind::BranchLr);
        assert_eq!(classify(words::BCTR), ControlKind::BranchCtr);
        assert_eq!(classify(words::SC), ControlKind::Syscall);
        assert_eq!(classify(words::TRAP), ControlKind::Trap);
        assert_eq!(classify(words::MFLR_R0), ControlKind::Other);
    }

    #[test]
    fn test_classify_branches() {
        assert_eq!(classify(encode::b(8)), ControlKind::Branch);
        assert_eq!(classify(encode::bl(-16)), ControlKind::Branch);
        assert_eq!(classify(encode::bc(12, 2, 8)), ControlKind::CondBranch);
    }

    #[test]
    fn test_classify_store_update() {
        assert_eq!(classify(encode::stwu(1, 1, -16)), ControlKind::StoreUpdate);
        assert_eq!(classify(encode::stdu(1, 1, -0x70)), ControlKind::StoreUpdate);
        // plain std is not a prologue shape
        assert_eq!(classify(encode::std(2, 1, 0x28)), ControlKind::Other);
    }

    #[test]
    fn test_classify_rejects_data() {
        assert_eq!(classify(0x0000_0000), ControlKind::Unknown);
        assert_eq!(classify(0x0600_0000), ControlKind::Unknown); // primary 1
        assert_eq!(classify(0x1600_0000), ControlKind::Unknown); // primary 5
    }

    #[test]
    fn test_branch_targets() {
        assert_eq!(b_target(0x1000, encode::b(0x40)), 0x1040);
        assert_eq!(b_target(0x1000, encode::b(-0x40)), 0xFC0);
        assert_eq!(bc_target(0x1000, encode::bc(4, 10, -8)), 0xFF8);
    }
}

//! Instruction field extraction.
//!
//! PPU instructions are fixed-width 32-bit big-endian words. Field layouts
//! follow the PowerPC UISA forms (I, B, D, DS, X, XL).

/// Primary opcodes (bits 0..6) relevant to control-flow analysis.
pub mod opcode {
    pub const TDI: u32 = 2;
    pub const TWI: u32 = 3;
    pub const BC: u32 = 16;
    pub const SC: u32 = 17;
    pub const B: u32 = 18;
    pub const XL_FORM: u32 = 19; // bclr, bcctr, CR ops
    pub const ADDI: u32 = 14;
    pub const ADDIS: u32 = 15;
    pub const ORI: u32 = 24;
    pub const ORIS: u32 = 25;
    pub const X_FORM: u32 = 31; // extended ops, incl. tw/td
    pub const LWZ: u32 = 32;
    pub const STWU: u32 = 37;
    pub const LD_FORM: u32 = 58; // ld, ldu, lwa
    pub const STD_FORM: u32 = 62; // std, stdu, stq
}

/// XL-form extended opcodes (bits 21..31).
pub mod xl_xo {
    pub const BCLR: u32 = 16;
    pub const BCCTR: u32 = 528;
}

/// X-form extended opcodes (bits 21..31), trap subset.
pub mod x_xo {
    pub const TW: u32 = 4;
    pub const TD: u32 = 68;
}

/// Canonical instruction words.
pub mod words {
    pub const NOP: u32 = 0x6000_0000; // ori r0, r0, 0
    pub const BLR: u32 = 0x4E80_0020;
    pub const BCTR: u32 = 0x4E80_0420;
    pub const SC: u32 = 0x4400_0002;
    pub const TRAP: u32 = 0x7FE0_0008; // tw 31, r0, r0
    pub const MFLR_R0: u32 = 0x7C08_02A6;
    pub const MTCTR_R0: u32 = 0x7C09_03A6;
}

/// Extract the primary opcode.
#[inline]
pub const fn primary(word: u32) -> u32 {
    word >> 26
}

/// Extract the 10-bit extended opcode (X/XL forms).
#[inline]
pub const fn xo(word: u32) -> u32 {
    (word >> 1) & 0x3FF
}

/// Extract the BO field (branch options).
#[inline]
pub const fn bo(word: u32) -> u32 {
    (word >> 21) & 0x1F
}

/// Extract the BI field (condition bit index).
#[inline]
pub const fn bi(word: u32) -> u32 {
    (word >> 16) & 0x1F
}

/// AA bit: branch target is absolute.
#[inline]
pub const fn aa(word: u32) -> bool {
    word & 0x2 != 0
}

/// LK bit: branch records the return address in the link register.
#[inline]
pub const fn lk(word: u32) -> bool {
    word & 0x1 != 0
}

/// I-form branch displacement (LI << 2), sign-extended byte offset.
#[inline]
pub const fn li24(word: u32) -> i32 {
    ((word & 0x03FF_FFFC) as i32) << 6 >> 6
}

/// B-form branch displacement (BD << 2), sign-extended byte offset.
#[inline]
pub const fn bd14(word: u32) -> i32 {
    (word & 0xFFFC) as u16 as i16 as i32
}

/// D-form signed immediate.
#[inline]
pub const fn simm16(word: u32) -> i32 {
    word as u16 as i16 as i32
}

/// Extract the RT/RS field.
#[inline]
pub const fn rt(word: u32) -> u32 {
    (word >> 21) & 0x1F
}

/// Extract the RA field.
#[inline]
pub const fn ra(word: u32) -> u32 {
    (word >> 16) & 0x1F
}

/// Branch-always condition for bc/bclr: BO = 1z1zz (ignore CTR and CR).
#[inline]
pub const fn bo_always(bo: u32) -> bool {
    bo & 0x14 == 0x14
}

/// Condition-ignoring BO for bcctr (CTR-decrement forms are invalid there).
#[inline]
pub const fn bo_ctr_always(bo: u32) -> bool {
    bo & 0x10 == 0x10
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_primary_opcode() {
        assert_eq!(primary(words::NOP), opcode::ORI);
        assert_eq!(primary(words::BLR), opcode::XL_FORM);
        assert_eq!(primary(words::SC), opcode::SC);
    }

    #[test]
    fn test_xl_xo() {
        assert_eq!(xo(words::BLR), xl_xo::BCLR);
        assert_eq!(xo(words::BCTR), xl_xo::BCCTR);
    }

    #[test]
    fn test_branch_displacements() {
        // b .+8 -> 0x48000008
        assert_eq!(li24(0x4800_0008), 8);
        // b .-4 -> 0x4BFFFFFC
        assert_eq!(li24(0x4BFF_FFFC), -4);
        // bc displacement is 16-bit signed
        assert_eq!(bd14(0x4082_FFF8), -8);
        assert_eq!(bd14(0x4182_0010), 16);
    }

    #[test]
    fn test_branch_bits() {
        assert!(lk(0x4800_0001)); // bl
        assert!(!lk(0x4800_0000)); // b
        assert!(aa(0x4800_0002)); // ba
        assert!(!aa(0x4800_0000));
    }

    #[test]
    fn test_bo_predicates() {
        assert!(bo_always(bo(words::BLR))); // blr is bclr 20, 0
        assert!(bo_ctr_always(bo(words::BCTR)));
        // bdnz (bo = 16) is conditional
        assert!(!bo_always(16));
    }
}

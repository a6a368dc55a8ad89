//! Instruction word builders.
//!
//! Used by pattern templates and by tests that assemble synthetic code
//! images. Offsets are byte offsets; no range validation is performed.

/// `b` — unconditional relative branch.
#[inline]
pub const fn b(off: i32) -> u32 {
    (18 << 26) | (off as u32 & 0x03FF_FFFC)
}

/// `bl` — relative branch with link.
#[inline]
pub const fn bl(off: i32) -> u32 {
    b(off) | 1
}

/// `bc` — conditional relative branch.
#[inline]
pub const fn bc(bo: u32, bi: u32, off: i32) -> u32 {
    (16 << 26) | (bo << 21) | (bi << 16) | (off as u32 & 0xFFFC)
}

/// `bcl` — conditional relative branch with link.
#[inline]
pub const fn bcl(bo: u32, bi: u32, off: i32) -> u32 {
    bc(bo, bi, off) | 1
}

/// `bclr` — conditional branch to link register.
#[inline]
pub const fn bclr(bo: u32, bi: u32) -> u32 {
    (19 << 26) | (bo << 21) | (bi << 16) | (16 << 1)
}

/// `bcctr` — conditional branch to count register.
#[inline]
pub const fn bcctr(bo: u32, bi: u32) -> u32 {
    (19 << 26) | (bo << 21) | (bi << 16) | (528 << 1)
}

/// `addi rt, ra, simm`.
#[inline]
pub const fn addi(rt: u32, ra: u32, simm: i32) -> u32 {
    (14 << 26) | (rt << 21) | (ra << 16) | (simm as u32 & 0xFFFF)
}

/// `addis rt, ra, simm`.
#[inline]
pub const fn addis(rt: u32, ra: u32, simm: i32) -> u32 {
    (15 << 26) | (rt << 21) | (ra << 16) | (simm as u32 & 0xFFFF)
}

/// `li rt, simm` (addi from r0).
#[inline]
pub const fn li(rt: u32, simm: i32) -> u32 {
    addi(rt, 0, simm)
}

/// `lis rt, simm` (addis from r0).
#[inline]
pub const fn lis(rt: u32, simm: i32) -> u32 {
    addis(rt, 0, simm)
}

/// `ori ra, rs, uimm`.
#[inline]
pub const fn ori(ra: u32, rs: u32, uimm: u32) -> u32 {
    (24 << 26) | (rs << 21) | (ra << 16) | (uimm & 0xFFFF)
}

/// `oris ra, rs, uimm`.
#[inline]
pub const fn oris(ra: u32, rs: u32, uimm: u32) -> u32 {
    (25 << 26) | (rs << 21) | (ra << 16) | (uimm & 0xFFFF)
}

/// `lwz rt, d(ra)`.
#[inline]
pub const fn lwz(rt: u32, ra: u32, d: i32) -> u32 {
    (32 << 26) | (rt << 21) | (ra << 16) | (d as u32 & 0xFFFF)
}

/// `stwu rs, d(ra)`.
#[inline]
pub const fn stwu(rs: u32, ra: u32, d: i32) -> u32 {
    (37 << 26) | (rs << 21) | (ra << 16) | (d as u32 & 0xFFFF)
}

/// `std rs, ds(ra)`.
#[inline]
pub const fn std(rs: u32, ra: u32, ds: i32) -> u32 {
    (62 << 26) | (rs << 21) | (ra << 16) | (ds as u32 & 0xFFFC)
}

/// `stdu rs, ds(ra)`.
#[inline]
pub const fn stdu(rs: u32, ra: u32, ds: i32) -> u32 {
    std(rs, ra, ds) | 1
}

/// `mflr rt`.
#[inline]
pub const fn mflr(rt: u32) -> u32 {
    (31 << 26) | (rt << 21) | (8 << 16) | (339 << 1)
}

/// `mtctr rs`.
#[inline]
pub const fn mtctr(rs: u32) -> u32 {
    (31 << 26) | (rs << 21) | (9 << 16) | (467 << 1)
}

/// `twi to, ra, simm`.
#[inline]
pub const fn twi(to: u32, ra: u32, simm: i32) -> u32 {
    (3 << 26) | (to << 21) | (ra << 16) | (simm as u32 & 0xFFFF)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::words;

    #[test]
    fn test_canonical_encodings() {
        assert_eq!(ori(0, 0, 0), words::NOP);
        assert_eq!(bclr(20, 0), words::BLR);
        assert_eq!(bcctr(20, 0), words::BCTR);
        assert_eq!(mflr(0), words::MFLR_R0);
        assert_eq!(mtctr(0), words::MTCTR_R0);
    }

    #[test]
    fn test_branch_encodings() {
        assert_eq!(b(8), 0x4800_0008);
        assert_eq!(b(-4), 0x4BFF_FFFC);
        assert_eq!(bl(0x100), 0x4800_0101);
        // beq cr0, .+16  (bo = 12, bi = 2)
        assert_eq!(bc(12, 2, 16), 0x4182_0010);
    }

    #[test]
    fn test_memory_encodings() {
        assert_eq!(std(2, 1, 0x28), 0xF841_0028);
        assert_eq!(stdu(1, 1, -0x70), 0xF821_FF91);
        assert_eq!(lwz(2, 12, 4), 0x804C_0004);
        assert_eq!(li(12, 0), 0x3980_0000);
        assert_eq!(oris(12, 12, 0), 0x658C_0000);
    }
}

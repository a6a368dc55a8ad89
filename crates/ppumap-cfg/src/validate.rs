//! Comparison of recovered functions against a reference list.
//!
//! Purely advisory: the caller decides what to do with the report. Missing
//! functions are the only hard signal, since over-recovery and padding
//! disagreements are routine on real images.

use std::cmp::Ordering;

use tracing::{error, warn};

use ppumap_elf::PpuImage;
use ppumap_isa::is_nop;

use crate::function::Function;

/// Tally of a reference comparison. The four buckets are disjoint.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ValidationReport {
    /// Recovered at the right address with an agreeing size.
    pub matched: usize,
    /// In the reference list but not recovered.
    pub missing: usize,
    /// Recovered but absent from the reference list.
    pub extra: usize,
    /// Recovered at the right address with a diverging size.
    pub size_mismatches: usize,
}

impl ValidationReport {
    /// Nothing the reference list promised was lost.
    pub fn is_clean(&self) -> bool {
        self.missing == 0
    }
}

/// Walk the recovered table and the `(addr, size)` reference list in lock
/// step, logging every divergence.
pub fn validate(image: &PpuImage, funcs: &[Function], expected: &[(u32, u32)]) -> ValidationReport {
    let mut want: Vec<(u32, u32)> = expected.to_vec();
    want.sort_unstable();

    let mut report = ValidationReport::default();
    let mut fi = 0;
    let mut wi = 0;
    while fi < funcs.len() && wi < want.len() {
        let func = &funcs[fi];
        let (addr, size) = want[wi];
        match func.addr.cmp(&addr) {
            Ordering::Less => {
                warn!(
                    addr = format!("{:#x}", func.addr),
                    "recovered function absent from the reference list"
                );
                report.extra += 1;
                fi += 1;
            }
            Ordering::Greater => {
                error!(addr = format!("{addr:#x}"), "reference function not recovered");
                report.missing += 1;
                wi += 1;
            }
            Ordering::Equal => {
                if sizes_agree(image, addr, func.size, size) {
                    report.matched += 1;
                } else {
                    warn!(
                        addr = format!("{addr:#x}"),
                        recovered = format!("{:#x}", func.size),
                        expected = format!("{size:#x}"),
                        "size mismatch"
                    );
                    report.size_mismatches += 1;
                }
                fi += 1;
                wi += 1;
            }
        }
    }
    for func in &funcs[fi..] {
        warn!(
            addr = format!("{:#x}", func.addr),
            "recovered function absent from the reference list"
        );
        report.extra += 1;
    }
    for &(addr, _) in &want[wi..] {
        error!(addr = format!("{addr:#x}"), "reference function not recovered");
        report.missing += 1;
    }
    report
}

/// Exact agreement, or off by a single trailing alignment NOP.
fn sizes_agree(image: &PpuImage, addr: u32, recovered: u32, expected: u32) -> bool {
    if recovered == expected {
        return true;
    }
    let (short, long) = if recovered < expected {
        (recovered, expected)
    } else {
        (expected, recovered)
    };
    long - short == 4 && image.read_u32(addr + short).is_some_and(is_nop)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ppumap_elf::{PF_R, PF_X, Segment};
    use ppumap_isa::words;

    fn image(code: &[u32]) -> PpuImage {
        let data: Vec<u8> = code.iter().flat_map(|w| w.to_be_bytes()).collect();
        let size = data.len() as u32;
        PpuImage::from_parts(
            vec![Segment {
                addr: 0x1_0000,
                size,
                filesz: size,
                data,
                flags: PF_R | PF_X,
            }],
            vec![],
            None,
        )
    }

    fn func(addr: u32, size: u32) -> Function {
        let mut f = Function::new(addr);
        f.size = size;
        f
    }

    #[test]
    fn test_exact_agreement() {
        let img = image(&[words::BLR; 4]);
        let funcs = [func(0x1_0000, 8), func(0x1_0008, 8)];
        let report = validate(&img, &funcs, &[(0x1_0000, 8), (0x1_0008, 8)]);

        assert_eq!(report.matched, 2);
        assert_eq!(report, ValidationReport { matched: 2, ..Default::default() });
        assert!(report.is_clean());
    }

    #[test]
    fn test_missing_function_dirties_report() {
        let img = image(&[words::BLR; 4]);
        let funcs = [func(0x1_0000, 8)];
        let report = validate(&img, &funcs, &[(0x1_0000, 8), (0x1_0008, 8)]);

        assert_eq!(report.matched, 1);
        assert_eq!(report.missing, 1);
        assert!(!report.is_clean());
    }

    #[test]
    fn test_extra_function_is_tolerated() {
        let img = image(&[words::BLR; 4]);
        let funcs = [func(0x1_0000, 8), func(0x1_0008, 8)];
        let report = validate(&img, &funcs, &[(0x1_0008, 8)]);

        assert_eq!(report.matched, 1);
        assert_eq!(report.extra, 1);
        assert!(report.is_clean());
    }

    #[test]
    fn test_trailing_nop_size_skew_matches() {
        let img = image(&[words::BLR, words::NOP, words::BLR, words::BLR]);
        let funcs = [func(0x1_0000, 8)];
        // reference stops before the padding word the analysis absorbed
        let report = validate(&img, &funcs, &[(0x1_0000, 4)]);
        assert_eq!(report.matched, 1);
        assert_eq!(report.size_mismatches, 0);

        // and the symmetric case, reference claims the padding
        let short = [func(0x1_0000, 4)];
        let report = validate(&img, &short, &[(0x1_0000, 8)]);
        assert_eq!(report.matched, 1);
    }

    #[test]
    fn test_real_size_skew_is_a_mismatch() {
        let img = image(&[words::BLR, words::BLR, words::BLR, words::BLR]);
        let funcs = [func(0x1_0000, 8)];
        // off by one word, but the word is a return, not padding
        let report = validate(&img, &funcs, &[(0x1_0000, 4)]);
        assert_eq!(report.size_mismatches, 1);
        assert_eq!(report.matched, 0);

        let wide = [func(0x1_0000, 0x10)];
        let report = validate(&img, &wide, &[(0x1_0000, 4)]);
        assert_eq!(report.size_mismatches, 1);
    }

    #[test]
    fn test_unsorted_reference_is_handled() {
        let img = image(&[words::BLR; 4]);
        let funcs = [func(0x1_0000, 8), func(0x1_0008, 8)];
        let report = validate(&img, &funcs, &[(0x1_0008, 8), (0x1_0000, 8)]);
        assert_eq!(report.matched, 2);
    }
}

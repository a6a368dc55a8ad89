//! Shared analysis state: the function arena, worklist, and TOC registry.

use std::collections::BTreeSet;

use rustc_hash::{FxHashMap, FxHashSet};
use tracing::{trace, warn};

use ppumap_elf::PpuImage;

use crate::function::{FnAttr, Function, TOC_CONFLICT, TOC_UNKNOWN};
use crate::{AnalysisResult, AnalysisStats};

/// Upper bound on plausible TOC base values.
pub(crate) const TOC_CEILING: u32 = 0x4000_0000;

/// Mutable state threaded through every analysis phase.
///
/// Functions live in an arena indexed by discovery order; `index` maps entry
/// addresses back to arena slots. The worklist holds arena ids and is
/// consumed front to back, so re-enqueueing an id revisits that function
/// after everything already queued.
pub(crate) struct AnalysisContext<'a> {
    pub image: &'a PpuImage,
    pub code_end: u32,
    pub funcs: Vec<Function>,
    pub index: FxHashMap<u32, usize>,
    pub queue: Vec<usize>,
    pub known_addrs: BTreeSet<u32>,
    pub tocs: BTreeSet<u32>,
    pub addr_heap: FxHashSet<u32>,
    pub stats: AnalysisStats,
}

impl<'a> AnalysisContext<'a> {
    pub(crate) fn new(image: &'a PpuImage) -> Self {
        let (_, code_end) = image.code_bounds();
        Self {
            image,
            code_end,
            funcs: Vec::new(),
            index: FxHashMap::default(),
            queue: Vec::new(),
            known_addrs: BTreeSet::new(),
            tocs: BTreeSet::new(),
            addr_heap: FxHashSet::default(),
            stats: AnalysisStats::default(),
        }
    }

    /// Look up or create the function at `addr`, merging TOC evidence and
    /// recording the caller edge. Newly created functions are queued.
    pub(crate) fn add_func(&mut self, addr: u32, toc: u32, caller: Option<u32>) -> usize {
        self.register_toc(toc);

        if let Some(&id) = self.index.get(&addr) {
            if let Some(from) = caller {
                self.funcs[id].callers.insert(from);
            }
            self.merge_toc(id, toc);
            return id;
        }

        let id = self.funcs.len();
        let mut func = Function::new(addr);
        func.toc = toc;
        if let Some(from) = caller {
            func.callers.insert(from);
        }
        trace!(
            addr = format!("{addr:#x}"),
            toc = format!("{toc:#x}"),
            "function discovered"
        );
        self.index.insert(addr, id);
        self.funcs.push(func);
        self.queue.push(id);
        id
    }

    /// Fold new TOC evidence into a function. First evidence wins; any later
    /// disagreement poisons the value for good.
    pub(crate) fn merge_toc(&mut self, id: usize, toc: u32) {
        let old = self.funcs[id].toc;
        if toc == TOC_UNKNOWN || old == toc {
            return;
        }
        if old == TOC_UNKNOWN {
            self.funcs[id].toc = toc;
            if toc != TOC_CONFLICT {
                self.register_toc(toc);
                // revisit so the fresh base propagates over call edges
                self.queue.push(id);
            }
        } else if toc == TOC_CONFLICT {
            self.funcs[id].toc = TOC_CONFLICT;
        } else if old != TOC_CONFLICT {
            warn!(
                addr = format!("{:#x}", self.funcs[id].addr),
                old = format!("{old:#x}"),
                new = format!("{toc:#x}"),
                "conflicting toc evidence"
            );
            self.funcs[id].toc = TOC_CONFLICT;
        }
    }

    /// Mark a function start as trusted for extent limiting.
    pub(crate) fn mark_known(&mut self, id: usize) {
        let addr = self.funcs[id].addr;
        self.funcs[id].attr |= FnAttr::KNOWN_ADDR;
        self.known_addrs.insert(addr);
    }

    /// First trusted function start strictly above `addr`, else end of code.
    pub(crate) fn limit_after(&self, addr: u32) -> u32 {
        self.known_addrs
            .range(addr.saturating_add(1)..)
            .next()
            .copied()
            .unwrap_or(self.code_end)
    }

    /// Current analysis bound for a function.
    pub(crate) fn func_end(&self, id: usize) -> u32 {
        let func = &self.funcs[id];
        let limit = self.limit_after(func.addr);
        if func.attr.contains(FnAttr::KNOWN_SIZE) {
            limit.min(func.addr + func.size)
        } else {
            limit
        }
    }

    /// Whether a value can serve as a TOC base: 4-aligned, nonzero, below the
    /// sanity ceiling, and not pointing into code.
    pub(crate) fn plausible_toc(&self, toc: u32) -> bool {
        toc != 0 && toc % 4 == 0 && toc < TOC_CEILING && !self.image.is_code(toc)
    }

    /// Register a TOC base and grope the segments for descriptor pairs built
    /// on it, seeding any functions they point at. Descriptor TOC values are
    /// only trusted when the pair's own location is independently referenced
    /// somewhere in the image.
    pub(crate) fn register_toc(&mut self, toc: u32) {
        if toc == TOC_UNKNOWN || toc == TOC_CONFLICT || !self.tocs.insert(toc) {
            return;
        }
        trace!(toc = format!("{toc:#x}"), "toc base registered");

        let image = self.image;
        for seg in &image.segments {
            let resident = seg.addr + seg.filesz.min(seg.size);
            let mut ptr = seg.addr;
            // the segment may end flush against the top of the address space
            while resident - ptr >= 8 {
                let (Some(first), Some(second)) = (image.read_u32(ptr), image.read_u32(ptr + 4))
                else {
                    break;
                };
                if second == toc && first % 4 == 0 && image.is_code(first) {
                    let trusted = self.addr_heap.contains(&ptr);
                    let id = self.add_func(first, if trusted { toc } else { TOC_UNKNOWN }, None);
                    if trusted {
                        self.mark_known(id);
                    }
                    ptr += 8;
                } else {
                    ptr += 4;
                }
            }
        }
    }

    pub(crate) fn into_result(mut self) -> AnalysisResult {
        self.funcs.sort_by_key(|func| func.addr);
        self.stats.functions = self.funcs.len();
        self.stats.blocks = self.funcs.iter().map(Function::analyzed_blocks).sum();
        self.stats.tocs = self.tocs.len();
        AnalysisResult {
            functions: self.funcs,
            tocs: self.tocs,
            stats: self.stats,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ppumap_elf::{PF_R, PF_X, Segment};

    fn image(base: u32, code: &[u32]) -> PpuImage {
        let data: Vec<u8> = code.iter().flat_map(|w| w.to_be_bytes()).collect();
        let size = data.len() as u32;
        PpuImage::from_parts(
            vec![Segment {
                addr: base,
                size,
                filesz: size,
                data,
                flags: PF_R | PF_X,
            }],
            vec![],
            None,
        )
    }

    #[test]
    fn test_add_func_dedupes_and_merges() {
        let img = image(0x1_0000, &[0; 8]);
        let mut ctx = AnalysisContext::new(&img);

        let a = ctx.add_func(0x1_0000, TOC_UNKNOWN, None);
        let b = ctx.add_func(0x1_0000, 0x2_0000, Some(0x1_0010));
        assert_eq!(a, b);
        assert_eq!(ctx.funcs.len(), 1);
        assert_eq!(ctx.funcs[a].toc, 0x2_0000);
        assert!(ctx.funcs[a].callers.contains(&0x1_0010));
        // first fact requeues the function for propagation
        assert_eq!(ctx.queue, vec![a, a]);
        assert!(ctx.tocs.contains(&0x2_0000));
    }

    #[test]
    fn test_merge_toc_conflict_is_final() {
        let img = image(0x1_0000, &[0; 8]);
        let mut ctx = AnalysisContext::new(&img);

        let id = ctx.add_func(0x1_0000, 0x2_0000, None);
        ctx.add_func(0x1_0000, 0x3_0000, None);
        assert_eq!(ctx.funcs[id].toc, TOC_CONFLICT);
        ctx.add_func(0x1_0000, 0x2_0000, None);
        assert_eq!(ctx.funcs[id].toc, TOC_CONFLICT);
    }

    #[test]
    fn test_limit_after_tracks_known_addrs() {
        let img = image(0x1_0000, &[0; 0x40]);
        let mut ctx = AnalysisContext::new(&img);
        assert_eq!(ctx.limit_after(0x1_0000), 0x1_0100);

        let id = ctx.add_func(0x1_0080, TOC_UNKNOWN, None);
        ctx.mark_known(id);
        assert_eq!(ctx.limit_after(0x1_0000), 0x1_0080);
        // a function is never bounded by its own start
        assert_eq!(ctx.limit_after(0x1_0080), 0x1_0100);
    }

    #[test]
    fn test_plausible_toc_shape() {
        let img = image(0x1_0000, &[0; 8]);
        let ctx = AnalysisContext::new(&img);
        assert!(ctx.plausible_toc(0x2_0000));
        assert!(!ctx.plausible_toc(0)); // zero is the unknown sentinel
        assert!(!ctx.plausible_toc(0x2_0002)); // misaligned
        assert!(!ctx.plausible_toc(0x5000_0000)); // above the ceiling
        assert!(!ctx.plausible_toc(0x1_0000)); // points into code
    }

    #[test]
    fn test_register_toc_gropes_descriptor_pairs() {
        // Data segment holding two descriptor-shaped pairs for toc 0x3_0000;
        // only the first pair's location is independently referenced.
        let code: Vec<u8> = [0u32; 8].iter().flat_map(|w| w.to_be_bytes()).collect();
        let pairs: Vec<u8> = [0x1_0000u32, 0x3_0000, 0x1_0010, 0x3_0000]
            .iter()
            .flat_map(|w| w.to_be_bytes())
            .collect();
        let img = PpuImage::from_parts(
            vec![
                Segment {
                    addr: 0x1_0000,
                    size: 0x20,
                    filesz: 0x20,
                    data: code,
                    flags: PF_R | PF_X,
                },
                Segment {
                    addr: 0x2_0000,
                    size: 0x10,
                    filesz: 0x10,
                    data: pairs,
                    flags: PF_R,
                },
            ],
            vec![],
            None,
        );
        let mut ctx = AnalysisContext::new(&img);
        ctx.addr_heap.insert(0x2_0000);

        ctx.register_toc(0x3_0000);
        let trusted = ctx.index[&0x1_0000];
        let groped = ctx.index[&0x1_0010];
        assert_eq!(ctx.funcs[trusted].toc, 0x3_0000);
        assert!(ctx.funcs[trusted].attr.contains(FnAttr::KNOWN_ADDR));
        // unreferenced pair is still seeded, but its toc is not trusted
        assert_eq!(ctx.funcs[groped].toc, TOC_UNKNOWN);
        assert!(!ctx.funcs[groped].attr.contains(FnAttr::KNOWN_ADDR));
    }

    #[test]
    fn test_register_toc_survives_top_of_address_space() {
        // the grope walk over a segment ending flush against the top of the
        // address space has to stop without stepping past it
        let data: Vec<u8> = [0u32; 7].iter().flat_map(|w| w.to_be_bytes()).collect();
        let img = PpuImage::from_parts(
            vec![Segment {
                addr: 0xFFFF_FFE0,
                size: 0x1C,
                filesz: 0x1C,
                data,
                flags: PF_R,
            }],
            vec![],
            None,
        );
        let mut ctx = AnalysisContext::new(&img);
        ctx.register_toc(0x3_0000);
        assert!(ctx.funcs.is_empty());
        assert!(ctx.tocs.contains(&0x3_0000));
    }
}

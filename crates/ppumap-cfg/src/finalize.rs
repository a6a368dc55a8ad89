//! Whole-table repair passes run after the worklist drains.

use tracing::{debug, warn};

use ppumap_elf::PpuImage;
use ppumap_isa::{is_nop, words};

use crate::context::AnalysisContext;
use crate::function::{FnAttr, TOC_UNKNOWN};

pub(crate) fn run(ctx: &mut AnalysisContext) {
    propagate_no_return(ctx);
    let order = sorted_ids(ctx);
    clip_overlaps(ctx, &order);
    scan_gaps(ctx, &order);
    backfill_toc(ctx);
}

fn sorted_ids(ctx: &AnalysisContext) -> Vec<usize> {
    let mut order: Vec<usize> = (0..ctx.funcs.len()).collect();
    order.sort_unstable_by_key(|&id| ctx.funcs[id].addr);
    order
}

/// A trampoline is exactly as terminal as its target, but targets learn
/// their own attribute at different times. Iterate to a fixed point.
fn propagate_no_return(ctx: &mut AnalysisContext) {
    loop {
        let mut changed = false;
        for id in 0..ctx.funcs.len() {
            if ctx.funcs[id].trampoline.is_none()
                || ctx.funcs[id].attr.contains(FnAttr::NO_RETURN)
            {
                continue;
            }
            let Some(&target) = ctx.funcs[id].calls.first() else {
                continue;
            };
            let terminal = ctx
                .index
                .get(&target)
                .is_some_and(|&gid| ctx.funcs[gid].attr.contains(FnAttr::NO_RETURN));
            if terminal {
                ctx.funcs[id].attr |= FnAttr::NO_RETURN;
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }
}

fn clip_overlaps(ctx: &mut AnalysisContext, order: &[usize]) {
    for pair in order.windows(2) {
        let next = ctx.funcs[pair[1]].addr;
        let func = &mut ctx.funcs[pair[0]];
        if func.end() <= next {
            continue;
        }
        warn!(
            addr = format!("{:#x}", func.addr),
            end = format!("{:#x}", func.end()),
            next = format!("{next:#x}"),
            "function overlaps its successor, clipping"
        );
        func.size = next - func.addr;
        let entry = func.addr;
        func.blocks.retain(|&start, len| {
            if start >= next && start != entry {
                return false;
            }
            if start + *len > next {
                *len = next - start;
            }
            true
        });
    }
}

enum GapKind {
    Nops,
    Padding,
    Other,
}

/// `None` when the gap is not fully readable, i.e. spans a segment hole.
fn classify_gap(image: &PpuImage, start: u32, end: u32) -> Option<GapKind> {
    let mut kind = GapKind::Nops;
    let mut at = start;
    while at < end {
        let word = image.read_u32(at)?;
        if word == words::BLR {
            kind = GapKind::Padding;
        } else if !is_nop(word) {
            return Some(GapKind::Other);
        }
        at += 4;
    }
    Some(kind)
}

/// Look between consecutive functions. Pure NOP runs are alignment padding
/// and belong to the preceding function; anything else is only reported.
fn scan_gaps(ctx: &mut AnalysisContext, order: &[usize]) {
    for pair in order.windows(2) {
        let start = ctx.funcs[pair[0]].end();
        let end = ctx.funcs[pair[1]].addr;
        if start >= end {
            continue;
        }
        match classify_gap(ctx.image, start, end) {
            Some(GapKind::Nops) => {
                debug!(
                    addr = format!("{:#x}", ctx.funcs[pair[0]].addr),
                    pad = end - start,
                    "absorbing alignment padding"
                );
                ctx.funcs[pair[0]].size += end - start;
            }
            Some(GapKind::Padding) => {
                debug!(
                    start = format!("{start:#x}"),
                    end = format!("{end:#x}"),
                    "gap holds only padding and bare returns"
                );
            }
            Some(GapKind::Other) => {
                debug!(
                    start = format!("{start:#x}"),
                    end = format!("{end:#x}"),
                    "unclaimed bytes between functions"
                );
            }
            None => {}
        }
    }
}

/// With exactly one TOC in the image there is nothing to disambiguate.
fn backfill_toc(ctx: &mut AnalysisContext) {
    if ctx.tocs.len() != 1 {
        return;
    }
    let Some(&toc) = ctx.tocs.first() else {
        return;
    };
    let mut filled = 0u32;
    for func in &mut ctx.funcs {
        if func.toc == TOC_UNKNOWN {
            func.toc = toc;
            filled += 1;
        }
    }
    if filled > 0 {
        debug!(toc = format!("{toc:#x}"), filled, "backfilled sole toc");
    }
}

//! Worklist-driven function and block discovery.
//!
//! Two nested fixed points: a function queue consumed by increasing index,
//! and a per-function block queue. When a function needs facts about a
//! callee that has not been looked at yet, it pushes itself back and lets
//! the callee run first. Every re-enqueue follows new information (a callee
//! gaining blocks, a TOC resolving), so both loops terminate.

use std::collections::btree_map::Entry;

use tracing::{debug, trace, trace_span};

use ppumap_elf::PpuImage;
use ppumap_isa::{
    ControlKind, b_target, bc_target, bo, bo_always, bo_ctr_always, classify, lk, ra, rt, words,
};

use crate::context::AnalysisContext;
use crate::function::{FnAttr, TOC_CONFLICT, TOC_UNKNOWN};
use crate::{AnalysisResult, finalize, patterns, prospect};

/// Caller-supplied hints for an analysis run.
#[derive(Clone, Copy, Debug, Default)]
pub struct AnalyzeOpts {
    /// Descriptor address to probe first, overriding the image entry hint.
    pub entry: Option<u32>,
    /// Linkage TOC to fall back on when prospecting finds none.
    pub toc: Option<u32>,
}

/// Recover functions, blocks, call edges, and TOC assignments from `image`.
pub fn analyze(image: &PpuImage, opts: AnalyzeOpts) -> AnalysisResult {
    let mut ctx = AnalysisContext::new(image);

    {
        let _span = trace_span!("prospect").entered();
        prospect::harvest_pointers(&mut ctx);
        if let Some(entry) = opts.entry.or(image.entry) {
            prospect::probe_entry(&mut ctx, entry);
        }
        prospect::scan_descriptors(&mut ctx);
        if let Some(toc) = opts.toc {
            prospect::seed_external_toc(&mut ctx, toc);
        }
        prospect::scan_exception_frames(&mut ctx);
    }

    {
        let _span = trace_span!("worklist").entered();
        let mut at = 0;
        while at < ctx.queue.len() {
            let id = ctx.queue[at];
            at += 1;
            process_function(&mut ctx, id);
        }
    }

    {
        let _span = trace_span!("finalize").entered();
        finalize::run(&mut ctx);
    }

    let result = ctx.into_result();
    debug!(
        functions = result.stats.functions,
        blocks = result.stats.blocks,
        tocs = result.stats.tocs,
        deferrals = result.stats.deferrals,
        "analysis complete"
    );
    result
}

const fn usable(toc: u32) -> bool {
    toc != TOC_UNKNOWN && toc != TOC_CONFLICT
}

/// TOC value this function hands to its callees.
fn forwarded_toc(ctx: &AnalysisContext, id: usize) -> u32 {
    let func = &ctx.funcs[id];
    if usable(func.toc) {
        func.toc.wrapping_add_signed(func.toc_delta())
    } else {
        TOC_UNKNOWN
    }
}

fn process_function(ctx: &mut AnalysisContext, id: usize) {
    reconcile_toc(ctx, id);
    if ctx.funcs[id].analyzed_blocks() == 0 && match_idioms(ctx, id) {
        return;
    }
    analyze_blocks(ctx, id);
}

/// Propagate TOC facts across this function's caller and callee edges,
/// applying trampoline adjustments in the direction of the edge.
fn reconcile_toc(ctx: &mut AnalysisContext, id: usize) {
    let callers: Vec<u32> = ctx.funcs[id].callers.iter().copied().collect();
    for caller in callers {
        let Some(&cid) = ctx.index.get(&caller) else {
            continue;
        };
        let ctoc = ctx.funcs[cid].toc;
        let cdelta = ctx.funcs[cid].toc_delta();
        if usable(ctoc) {
            ctx.merge_toc(id, ctoc.wrapping_add_signed(cdelta));
        } else if usable(ctx.funcs[id].toc) {
            let back = ctx.funcs[id].toc.wrapping_sub(cdelta as u32);
            ctx.merge_toc(cid, back);
        }
    }

    if usable(ctx.funcs[id].toc) {
        let forwarded = forwarded_toc(ctx, id);
        let callees: Vec<u32> = ctx.funcs[id].calls.iter().copied().collect();
        for callee in callees {
            if let Some(&gid) = ctx.index.get(&callee) {
                ctx.merge_toc(gid, forwarded);
            }
        }
    }
}

/// Try the pattern set against a function that has no decoded blocks yet.
/// A hit settles size, attributes, and the block map in one step.
fn match_idioms(ctx: &mut AnalysisContext, id: usize) -> bool {
    let addr = ctx.funcs[id].addr;
    let limit = ctx.func_end(id);

    if let Some(len) = patterns::import_stub(ctx.image, addr, limit) {
        commit_stub(ctx, id, len);
        // stubs are emitted in contiguous runs; fold the rest of the run in
        let mut next = addr + len;
        loop {
            let run_limit = ctx.limit_after(next);
            let Some(run_len) = patterns::import_stub(ctx.image, next, run_limit) else {
                break;
            };
            let sid = ctx.add_func(next, TOC_UNKNOWN, None);
            if ctx.funcs[sid].blocks.is_empty() {
                commit_stub(ctx, sid, run_len);
            }
            next += run_len;
        }
        return true;
    }

    if let Some(len) = patterns::abort(ctx.image, addr, limit) {
        trace!(addr = format!("{addr:#x}"), "abort idiom");
        ctx.stats.pattern_hits += 1;
        let func = &mut ctx.funcs[id];
        func.size = len;
        func.attr |= FnAttr::KNOWN_SIZE | FnAttr::NO_RETURN;
        func.blocks.insert(addr, len);
        return true;
    }

    // a matched shape whose branch leaves the code range is not a
    // trampoline; the body decodes generically instead
    if let Some(hit) = patterns::toc_trampoline(ctx.image, addr, limit)
        && ctx.image.is_code(hit.target)
    {
        commit_trampoline(ctx, id, hit.len, hit.target, hit.delta);
        return true;
    }

    // a lone unconditional branch is the plain trampoline shape
    if let Some(word) = ctx.image.read_u32(addr)
        && classify(word) == ControlKind::Branch
        && !lk(word)
    {
        let target = b_target(addr, word);
        if target != addr && ctx.image.is_code(target) {
            commit_trampoline(ctx, id, 4, target, 0);
            return true;
        }
    }

    false
}

fn commit_stub(ctx: &mut AnalysisContext, id: usize, len: u32) {
    let addr = ctx.funcs[id].addr;
    trace!(addr = format!("{addr:#x}"), "import stub");
    ctx.stats.pattern_hits += 1;
    ctx.mark_known(id);
    let func = &mut ctx.funcs[id];
    func.size = len;
    func.attr |= FnAttr::KNOWN_SIZE;
    func.blocks.insert(addr, len);
}

fn commit_trampoline(ctx: &mut AnalysisContext, id: usize, len: u32, target: u32, delta: i32) {
    let addr = ctx.funcs[id].addr;
    trace!(
        addr = format!("{addr:#x}"),
        target = format!("{target:#x}"),
        delta,
        "trampoline"
    );
    ctx.stats.pattern_hits += 1;
    {
        let func = &mut ctx.funcs[id];
        func.size = len;
        func.attr |= FnAttr::KNOWN_SIZE;
        func.trampoline = Some(delta);
        func.blocks.insert(addr, len);
        func.calls.insert(target);
    }
    let forwarded = forwarded_toc(ctx, id);
    let gid = ctx.add_func(target, forwarded, Some(addr));
    if ctx.funcs[gid].attr.contains(FnAttr::NO_RETURN) {
        ctx.funcs[id].attr |= FnAttr::NO_RETURN;
    } else if ctx.funcs[gid].blocks.is_empty() {
        // target not looked at yet; revisit to pick up its attributes
        ctx.stats.deferrals += 1;
        ctx.queue.push(id);
    }
}

/// Drain the function's pending blocks, then fix its extent. Bails out
/// without finalizing when a block defers to an unprocessed callee.
fn analyze_blocks(ctx: &mut AnalysisContext, id: usize) {
    let addr = ctx.funcs[id].addr;
    ctx.funcs[id].blocks.entry(addr).or_insert(0);

    let mut pending: Vec<u32> = ctx.funcs[id]
        .blocks
        .iter()
        .filter(|(_, len)| **len == 0)
        .map(|(start, _)| *start)
        .collect();

    let mut at = 0;
    while at < pending.len() {
        let start = pending[at];
        at += 1;
        match decode_block(ctx, id, start, &mut pending) {
            Some(len) => {
                ctx.funcs[id].blocks.insert(start, len);
            }
            None => {
                ctx.stats.deferrals += 1;
                ctx.queue.push(id);
                return;
            }
        }
    }
    finalize_function(ctx, id);
}

fn enqueue_block(ctx: &mut AnalysisContext, id: usize, pending: &mut Vec<u32>, start: u32) {
    if let Entry::Vacant(slot) = ctx.funcs[id].blocks.entry(start) {
        slot.insert(0);
        pending.push(start);
    }
}

/// Record a call edge and make sure the callee exists. `true` when the
/// callee has not been processed yet and the caller should defer.
fn register_call(ctx: &mut AnalysisContext, id: usize, target: u32) -> bool {
    let addr = ctx.funcs[id].addr;
    ctx.funcs[id].calls.insert(target);
    let forwarded = forwarded_toc(ctx, id);
    let gid = ctx.add_func(target, forwarded, Some(addr));
    ctx.funcs[gid].blocks.is_empty()
}

/// Decode one basic block. Returns its length in bytes, or `None` when the
/// whole function must defer to an unprocessed callee.
fn decode_block(
    ctx: &mut AnalysisContext,
    id: usize,
    start: u32,
    pending: &mut Vec<u32>,
) -> Option<u32> {
    let limit = ctx.func_end(id);
    let func_addr = ctx.funcs[id].addr;
    let mut pc = start;

    while pc < limit {
        let Some(word) = ctx.image.read_u32(pc) else {
            break;
        };
        let kind = classify(word);
        match kind {
            // data or an unrecognized encoding quietly ends the block
            ControlKind::Unknown => break,
            ControlKind::Other | ControlKind::Syscall => {}
            ControlKind::Trap => {
                if word == words::TRAP {
                    return Some(pc + 4 - start);
                }
                // conditional traps fall through
            }
            ControlKind::Branch | ControlKind::CondBranch => {
                let conditional = kind == ControlKind::CondBranch;
                let (target, always) = if conditional {
                    (bc_target(pc, word), bo_always(bo(word)))
                } else {
                    (b_target(pc, word), true)
                };
                let call = lk(word);
                let mut fall_through = !always;
                let mut block_target = None;

                if call && target == pc + 4 {
                    // pc-capture idiom, not a real call
                    fall_through = true;
                } else if call || target < func_addr || target >= limit {
                    if ctx.image.is_code(target) {
                        if register_call(ctx, id, target) {
                            return None;
                        }
                        if call {
                            let returns = !ctx.funcs[ctx.index[&target]]
                                .attr
                                .contains(FnAttr::NO_RETURN);
                            fall_through = !always || returns;
                        }
                    } else {
                        trace!(
                            pc = format!("{pc:#x}"),
                            target = format!("{target:#x}"),
                            "branch leaves the image"
                        );
                        if call {
                            fall_through = true;
                        }
                    }
                } else {
                    block_target = Some(target);
                }

                if fall_through && pc + 4 < limit {
                    enqueue_block(ctx, id, pending, pc + 4);
                }
                if let Some(target) = block_target {
                    enqueue_block(ctx, id, pending, target);
                }
                return Some(pc + 4 - start);
            }
            ControlKind::BranchLr => {
                if (!bo_always(bo(word)) || lk(word)) && pc + 4 < limit {
                    enqueue_block(ctx, id, pending, pc + 4);
                }
                return Some(pc + 4 - start);
            }
            ControlKind::BranchCtr => {
                if bo_ctr_always(bo(word)) && !lk(word) {
                    if !probe_jump_table(ctx, id, pending, pc + 4, limit) {
                        ctx.funcs[id].attr |= FnAttr::NO_SIZE;
                    }
                } else if pc + 4 < limit {
                    enqueue_block(ctx, id, pending, pc + 4);
                }
                return Some(pc + 4 - start);
            }
            ControlKind::StoreUpdate => {
                if ctx.funcs[id].attr.contains(FnAttr::NO_SIZE)
                    && rt(word) == 1
                    && ra(word) == 1
                    && is_prologue_successor(ctx.image, pc + 4)
                {
                    // ran into the next function's frame setup
                    return Some(pc - start);
                }
            }
        }
        pc += 4;
    }
    Some(pc - start)
}

/// Second stack store in a row, or a bare return: the shape that follows a
/// misattributed prologue.
fn is_prologue_successor(image: &PpuImage, at: u32) -> bool {
    image.read_u32(at).is_some_and(|next| {
        next == words::BLR
            || (classify(next) == ControlKind::StoreUpdate && rt(next) == 1 && ra(next) == 1)
    })
}

/// Probe for a jump table after an unconditional `bctr`: aligned words read
/// as displacements relative to the table start, each naming a block in the
/// function. Stops at the first invalid entry; `false` means none matched.
fn probe_jump_table(
    ctx: &mut AnalysisContext,
    id: usize,
    pending: &mut Vec<u32>,
    table: u32,
    limit: u32,
) -> bool {
    let func_addr = ctx.funcs[id].addr;
    let mut at = table;
    while at < limit {
        let Some(word) = ctx.image.read_u32(at) else {
            break;
        };
        let target = table.wrapping_add_signed(word.cast_signed());
        if target % 4 != 0 || target < func_addr || target >= limit || !ctx.image.is_code(target) {
            break;
        }
        enqueue_block(ctx, id, pending, target);
        at += 4;
    }
    let entries = (at - table) / 4;
    if entries > 0 {
        trace!(table = format!("{table:#x}"), entries, "jump table");
    }
    entries > 0
}

/// Fix the function's extent once its blocks have drained, clip blocks to
/// it, and turn branch targets beyond it into function references.
fn finalize_function(ctx: &mut AnalysisContext, id: usize) {
    let addr = ctx.funcs[id].addr;
    let limit = ctx.func_end(id);

    if !ctx.funcs[id].attr.contains(FnAttr::KNOWN_SIZE) {
        let extent = ctx.funcs[id]
            .blocks
            .iter()
            .filter(|(_, len)| **len > 0)
            .map(|(start, len)| start + len)
            .max()
            .unwrap_or(addr);
        ctx.funcs[id].size = extent.min(limit) - addr;
    }
    let end = addr + ctx.funcs[id].size;

    // blocks past the trimmed end were tail transfers out of the function
    let mut spill = Vec::new();
    ctx.funcs[id].blocks.retain(|&start, len| {
        if start >= end && start != addr {
            spill.push(start);
            return false;
        }
        if start + *len > end {
            *len = end - start;
        }
        true
    });
    for target in spill {
        if ctx.image.is_code(target) {
            ctx.funcs[id].calls.insert(target);
            let forwarded = forwarded_toc(ctx, id);
            ctx.add_func(target, forwarded, Some(addr));
        }
    }

    harvest_tails(ctx, id, end);
    trace!(
        addr = format!("{addr:#x}"),
        size = format!("{:#x}", ctx.funcs[id].size),
        "function finalized"
    );
}

/// Rescan block tails for unconditional branches leaving the function; the
/// targets are calls, not blocks.
fn harvest_tails(ctx: &mut AnalysisContext, id: usize, end: u32) {
    let addr = ctx.funcs[id].addr;
    let tails: Vec<u32> = ctx.funcs[id]
        .blocks
        .iter()
        .filter(|(_, len)| **len >= 4)
        .filter_map(|(start, len)| {
            let last = start + len - 4;
            let word = ctx.image.read_u32(last)?;
            (classify(word) == ControlKind::Branch && !lk(word)).then(|| b_target(last, word))
        })
        .filter(|&target| (target < addr || target >= end) && ctx.image.is_code(target))
        .collect();
    for target in tails {
        ctx.funcs[id].calls.insert(target);
        let forwarded = forwarded_toc(ctx, id);
        ctx.add_func(target, forwarded, Some(addr));
    }
}

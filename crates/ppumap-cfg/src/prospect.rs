//! Seeding passes that run before the worklist analyzer.
//!
//! The pointer harvest collects every word in the image that could be a
//! pointer; the descriptor scans then only trust an (address, toc) pair when
//! its own location shows up in that set, which filters out coincidental
//! byte patterns in ordinary data.

use rayon::prelude::*;
use rustc_hash::FxHashSet;
use tracing::{debug, warn};

use ppumap_elf::{PpuImage, SHF_EXECINSTR, SHT_NOBITS};

use crate::context::AnalysisContext;

/// Collect plausible pointer values: 4-aligned words whose value lands
/// inside some segment. Built per segment in parallel, then merged.
pub(crate) fn harvest_pointers(ctx: &mut AnalysisContext) {
    let image = ctx.image;
    ctx.addr_heap = image
        .segments
        .par_iter()
        .fold(FxHashSet::default, |mut partial: FxHashSet<u32>, seg| {
            let resident = (seg.filesz.min(seg.size) as usize).min(seg.data.len());
            let data = &seg.data[..resident];
            let mut offset = 0usize;
            while offset + 4 <= data.len() {
                let val = u32::from_be_bytes([
                    data[offset],
                    data[offset + 1],
                    data[offset + 2],
                    data[offset + 3],
                ]);
                if val % 4 == 0 && image.contains(val) {
                    partial.insert(val);
                }
                offset += 4;
            }
            partial
        })
        .reduce(FxHashSet::default, |mut a, b| {
            a.extend(b);
            a
        });
    debug!(pointers = ctx.addr_heap.len(), "pointer harvest");
}

/// Probe the entry-point hint as a function descriptor. Under the PPU ABI
/// the ELF entry names a descriptor, not code, so a well-formed image hands
/// us the first function and the first TOC in one step.
pub(crate) fn probe_entry(ctx: &mut AnalysisContext, entry: u32) {
    let pair = ctx
        .image
        .read_u32(entry)
        .zip(entry.checked_add(4).and_then(|at| ctx.image.read_u32(at)));
    let Some((addr, toc)) = pair else {
        warn!(entry = format!("{entry:#x}"), "entry descriptor unreadable");
        return;
    };
    if addr % 4 != 0 || !ctx.image.is_code(addr) || !ctx.plausible_toc(toc) {
        warn!(
            entry = format!("{entry:#x}"),
            addr = format!("{addr:#x}"),
            toc = format!("{toc:#x}"),
            "entry descriptor implausible"
        );
        return;
    }
    debug!(
        addr = format!("{addr:#x}"),
        toc = format!("{toc:#x}"),
        "entry descriptor"
    );
    // the descriptor location is a known pointer even if nothing else
    // references it, which lets the scans below trust it
    ctx.addr_heap.insert(entry);
    let id = ctx.add_func(addr, toc, None);
    ctx.mark_known(id);
    ctx.stats.descriptors += 1;
}

/// Scan data regions for function descriptors: (code_address, toc) pairs.
/// Only referenced locations are trusted; unreferenced pairs are left for
/// the TOC grope to pick up once their base is seen elsewhere.
pub(crate) fn scan_descriptors(ctx: &mut AnalysisContext) {
    for (start, size) in descriptor_regions(ctx.image) {
        let end = start.saturating_add(size);
        let mut at = start;
        // the region may end flush against the top of the address space
        while end - at >= 8 {
            let Some((addr, toc)) = ctx.image.read_u32(at).zip(ctx.image.read_u32(at + 4)) else {
                break;
            };
            if addr % 4 == 0
                && ctx.image.is_code(addr)
                && ctx.plausible_toc(toc)
                && ctx.addr_heap.contains(&at)
            {
                debug!(
                    at = format!("{at:#x}"),
                    addr = format!("{addr:#x}"),
                    toc = format!("{toc:#x}"),
                    "descriptor"
                );
                let id = ctx.add_func(addr, toc, None);
                ctx.mark_known(id);
                ctx.stats.descriptors += 1;
                at += 8;
            } else {
                at += 4;
            }
        }
    }
}

/// Candidate descriptor regions: allocated non-code sections when the image
/// carries section headers, otherwise non-executable segments.
fn descriptor_regions(image: &PpuImage) -> Vec<(u32, u32)> {
    let from_sections: Vec<(u32, u32)> = image
        .sections
        .iter()
        .filter(|sec| sec.flags & SHF_EXECINSTR == 0 && sec.sh_type != SHT_NOBITS)
        .map(|sec| (sec.addr, sec.size))
        .collect();
    if !from_sections.is_empty() {
        return from_sections;
    }
    image
        .segments
        .iter()
        .filter(|seg| !seg.is_executable())
        .map(|seg| (seg.addr, seg.filesz.min(seg.size)))
        .collect()
}

/// Mine CFI-like exception-frame records for (address, size) candidates.
///
/// Fail-closed: a length that runs past the section or a back-reference that
/// does not land on a previously seen header abandons the whole section. The
/// candidates are advisory, they are logged and counted but deliberately not
/// committed into the function table.
pub(crate) fn scan_exception_frames(ctx: &mut AnalysisContext) {
    for sec in &ctx.image.sections {
        if sec.flags & SHF_EXECINSTR != 0 || sec.sh_type == SHT_NOBITS {
            continue;
        }
        let Some(frames) = mine_frames(ctx.image, sec.addr, sec.size) else {
            continue;
        };
        for &(addr, size) in &frames {
            debug!(
                addr = format!("{addr:#x}"),
                size = format!("{size:#x}"),
                "exception frame candidate"
            );
        }
        ctx.stats.frame_records += frames.len();
    }
}

/// Parse one section as a frame stream. `None` means the section is not a
/// well-formed stream and nothing in it can be trusted.
fn mine_frames(image: &PpuImage, start: u32, size: u32) -> Option<Vec<(u32, u32)>> {
    let end = start.checked_add(size)?;
    let mut headers: FxHashSet<u32> = FxHashSet::default();
    let mut frames = Vec::new();
    let mut at = start;

    while at + 4 <= end {
        let len = image.read_u32(at)?;
        if len == 0 {
            break; // terminator
        }
        let rec_end = len.checked_add(4).and_then(|rec| at.checked_add(rec));
        let Some(rec_end) = rec_end else {
            return None;
        };
        if len % 4 != 0 || rec_end > end {
            return None;
        }
        let id = image.read_u32(at + 4)?;
        if id == 0 {
            headers.insert(at - start);
        } else {
            // self-relative back-reference from the id field to its header
            let id_off = at + 4 - start;
            let back = id_off.checked_sub(id)?;
            if !headers.contains(&back) {
                return None;
            }
            if len >= 12 {
                let addr = image.read_u32(at + 8)?;
                let range = image.read_u32(at + 12)?;
                if range != 0 && image.is_code(addr) {
                    frames.push((addr, range));
                }
            }
        }
        at = rec_end;
    }

    // a credible stream has at least one header and one frame
    if headers.is_empty() || frames.is_empty() {
        return None;
    }
    Some(frames)
}

/// Fall back to an externally supplied linkage TOC when prospecting found
/// nothing. A prospected base always wins over the hint.
pub(crate) fn seed_external_toc(ctx: &mut AnalysisContext, toc: u32) {
    if !ctx.tocs.is_empty() {
        return;
    }
    if ctx.plausible_toc(toc) {
        debug!(toc = format!("{toc:#x}"), "external toc");
        ctx.register_toc(toc);
    } else {
        warn!(toc = format!("{toc:#x}"), "external toc implausible");
    }
}

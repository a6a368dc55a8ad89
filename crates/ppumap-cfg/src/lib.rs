//! Function boundary, call graph, and TOC recovery for PPU code images.

mod analyzer;
mod context;
mod finalize;
mod function;
mod patterns;
mod prospect;
mod validate;

use std::collections::BTreeSet;

pub use analyzer::*;
pub use function::*;
pub use validate::*;

/// Counters accumulated over a single analysis run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AnalysisStats {
    /// Functions in the final table.
    pub functions: usize,
    /// Basic blocks with an established extent.
    pub blocks: usize,
    /// Distinct TOC bases registered.
    pub tocs: usize,
    /// Times a function was re-queued to wait for a callee.
    pub deferrals: usize,
    /// Functions settled by an instruction idiom.
    pub pattern_hits: usize,
    /// Trusted function descriptors found by prospecting.
    pub descriptors: usize,
    /// Candidate exception-frame records seen (advisory only).
    pub frame_records: usize,
}

/// Everything the analysis recovered from one image.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AnalysisResult {
    /// Recovered functions, ascending by entry address.
    pub functions: Vec<Function>,
    /// Every TOC base observed, conflicting or not.
    pub tocs: BTreeSet<u32>,
    /// Run counters.
    pub stats: AnalysisStats,
}

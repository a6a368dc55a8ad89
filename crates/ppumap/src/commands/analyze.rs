//! Analyze command.

use std::path::Path;

use ppumap::{AnalyzeOpts, Function, TOC_CONFLICT, TOC_UNKNOWN};
use tracing::{error, info};

use crate::cli::{EXIT_FAILURE, EXIT_SUCCESS};

/// Handle the `analyze` command.
pub fn cmd_analyze(input: &Path, entry: Option<u32>, toc: Option<u32>, calls: bool) -> i32 {
    info!(input = %input.display(), "analyzing");

    let opts = AnalyzeOpts { entry, toc };
    let result = match ppumap::analyze_file(input, opts) {
        Ok(result) => result,
        Err(e) => {
            error!(error = %e, "analysis failed");
            return EXIT_FAILURE;
        }
    };

    for func in &result.functions {
        print_function(func, calls);
    }
    info!(
        functions = result.stats.functions,
        blocks = result.stats.blocks,
        tocs = result.stats.tocs,
        "done"
    );
    EXIT_SUCCESS
}

fn print_function(func: &Function, calls: bool) {
    println!(
        "{:#010x} {:#8x} {:>10} [{:?}] {}",
        func.addr,
        func.size,
        toc_display(func.toc),
        func.attr,
        func.name
    );
    if calls {
        for target in &func.calls {
            println!("    -> {target:#010x}");
        }
    }
}

fn toc_display(toc: u32) -> String {
    match toc {
        TOC_UNKNOWN => "-".into(),
        TOC_CONFLICT => "conflict".into(),
        toc => format!("{toc:#x}"),
    }
}

//! Check command.

use std::path::Path;

use ppumap::{AnalyzeOpts, Manifest, PpuImage};
use tracing::{error, info};

use crate::cli::{EXIT_FAILURE, EXIT_SUCCESS};

/// Handle the `check` command.
pub fn cmd_check(input: &Path, manifest: &Path, entry: Option<u32>, toc: Option<u32>) -> i32 {
    info!(input = %input.display(), manifest = %manifest.display(), "checking");

    let reference = match Manifest::load(manifest) {
        Ok(reference) => reference,
        Err(e) => {
            error!(error = %e, "manifest rejected");
            return EXIT_FAILURE;
        }
    };

    let image = match std::fs::read(input)
        .map_err(ppumap::Error::from)
        .and_then(|data| PpuImage::parse(&data).map_err(ppumap::Error::from))
    {
        Ok(image) => image,
        Err(e) => {
            error!(error = %e, "cannot load image");
            return EXIT_FAILURE;
        }
    };

    let result = ppumap::analyze(&image, AnalyzeOpts { entry, toc });
    let report = ppumap::validate(&image, &result.functions, &reference.pairs());

    info!(
        matched = report.matched,
        missing = report.missing,
        extra = report.extra,
        size_mismatches = report.size_mismatches,
        "reference comparison"
    );
    if report.is_clean() {
        EXIT_SUCCESS
    } else {
        error!(missing = report.missing, "reference functions were lost");
        EXIT_FAILURE
    }
}

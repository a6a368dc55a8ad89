//! End-to-end analysis of synthetic executables.

use std::io::Write;

use ppumap::{AnalyzeOpts, Error, FnAttr, Manifest, PpuImage, analyze_file, validate};
use ppumap_isa::{bl, words};

const EHDR: usize = 64;
const PHDR: usize = 56;

/// Assemble a big-endian ELF64 executable from `(vaddr, flags, words)`
/// segments. No section table; the analyzer works from segments alone.
fn build_elf(entry: u32, segments: &[(u32, u32, Vec<u32>)]) -> Vec<u8> {
    let phoff = EHDR;
    let mut payload_off = EHDR + segments.len() * PHDR;
    let mut bytes = vec![0u8; payload_off];

    bytes[0..4].copy_from_slice(&[0x7f, b'E', b'L', b'F']);
    bytes[4] = 2; // ELFCLASS64
    bytes[5] = 2; // big-endian
    bytes[6] = 1; // EV_CURRENT
    bytes[16..18].copy_from_slice(&2u16.to_be_bytes()); // ET_EXEC
    bytes[18..20].copy_from_slice(&21u16.to_be_bytes()); // EM_PPC64
    bytes[20..24].copy_from_slice(&1u32.to_be_bytes());
    bytes[24..32].copy_from_slice(&u64::from(entry).to_be_bytes());
    bytes[32..40].copy_from_slice(&(phoff as u64).to_be_bytes());
    bytes[52..54].copy_from_slice(&(EHDR as u16).to_be_bytes());
    bytes[54..56].copy_from_slice(&(PHDR as u16).to_be_bytes());
    bytes[56..58].copy_from_slice(&(segments.len() as u16).to_be_bytes());

    for (i, (vaddr, flags, code)) in segments.iter().enumerate() {
        let off = phoff + i * PHDR;
        let filesz = (code.len() * 4) as u64;
        bytes[off..off + 4].copy_from_slice(&1u32.to_be_bytes()); // PT_LOAD
        bytes[off + 4..off + 8].copy_from_slice(&flags.to_be_bytes());
        bytes[off + 8..off + 16].copy_from_slice(&(payload_off as u64).to_be_bytes());
        bytes[off + 16..off + 24].copy_from_slice(&u64::from(*vaddr).to_be_bytes());
        bytes[off + 32..off + 40].copy_from_slice(&filesz.to_be_bytes());
        bytes[off + 40..off + 48].copy_from_slice(&filesz.to_be_bytes());
        payload_off += filesz as usize;
    }
    for (_, _, code) in segments {
        for word in code {
            bytes.extend_from_slice(&word.to_be_bytes());
        }
    }
    bytes
}

fn write_temp(bytes: &[u8]) -> tempfile::TempPath {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(bytes).unwrap();
    file.into_temp_path()
}

const PF_X: u32 = 0x1;
const PF_W: u32 = 0x2;
const PF_R: u32 = 0x4;

/// A caller at 0x10000 and its helper at 0x10010, with the entry
/// descriptor for the caller at the start of the data segment.
fn two_function_elf(entry: u32) -> Vec<u8> {
    build_elf(
        entry,
        &[
            (
                0x1_0000,
                PF_R | PF_X,
                vec![bl(0x10), words::BLR, 0, 0, words::NOP, words::BLR],
            ),
            (0x9_0000, PF_R | PF_W, vec![0x1_0000, 0x7_0000]),
        ],
    )
}

#[test]
fn test_analyze_file_end_to_end() {
    let path = write_temp(&two_function_elf(0x9_0000));
    let result = analyze_file(&path, AnalyzeOpts::default()).unwrap();

    assert_eq!(result.functions.len(), 2);
    let main = &result.functions[0];
    let helper = &result.functions[1];

    assert_eq!(main.addr, 0x1_0000);
    assert_eq!(main.size, 8);
    assert_eq!(main.toc, 0x7_0000);
    assert!(main.attr.contains(FnAttr::KNOWN_ADDR));
    assert!(main.calls.contains(&0x1_0010));

    assert_eq!(helper.addr, 0x1_0010);
    assert_eq!(helper.size, 8);
    assert_eq!(helper.toc, 0x7_0000);
    assert!(helper.callers.contains(&0x1_0000));

    assert_eq!(result.tocs.iter().copied().collect::<Vec<_>>(), vec![0x7_0000]);
}

#[test]
fn test_entry_option_replaces_header_entry() {
    // header entry of zero means no hint; the caller supplies one
    let path = write_temp(&two_function_elf(0));
    let with_hint = analyze_file(
        &path,
        AnalyzeOpts {
            entry: Some(0x9_0000),
            toc: None,
        },
    )
    .unwrap();
    assert_eq!(with_hint.functions.len(), 2);
    assert_eq!(with_hint.functions[0].addr, 0x1_0000);
}

#[test]
fn test_toc_option_recovers_unreferenced_descriptors() {
    // nothing points at the descriptor and the header has no entry, so
    // only sweeping for the supplied toc can find the function
    let elf = build_elf(
        0,
        &[
            (0x1_0000, PF_R | PF_X, vec![words::BLR]),
            (0x9_0000, PF_R | PF_W, vec![0x1_0000, 0x7_0000]),
        ],
    );
    let path = write_temp(&elf);

    let bare = analyze_file(&path, AnalyzeOpts::default()).unwrap();
    assert!(bare.functions.is_empty());

    let seeded = analyze_file(
        &path,
        AnalyzeOpts {
            entry: None,
            toc: Some(0x7_0000),
        },
    )
    .unwrap();
    assert_eq!(seeded.functions.len(), 1);
    let func = &seeded.functions[0];
    assert_eq!(func.addr, 0x1_0000);
    assert_eq!(func.size, 4);
    // unreferenced descriptors are not trusted for attributes, but the
    // sole toc still backfills
    assert!(!func.attr.contains(FnAttr::KNOWN_ADDR));
    assert_eq!(func.toc, 0x7_0000);
}

#[test]
fn test_analysis_is_reproducible() {
    let path = write_temp(&two_function_elf(0x9_0000));
    let first = analyze_file(&path, AnalyzeOpts::default()).unwrap();
    let second = analyze_file(&path, AnalyzeOpts::default()).unwrap();
    assert_eq!(first, second);
}

#[test]
fn test_manifest_grading_round_trip() {
    let path = write_temp(&two_function_elf(0x9_0000));
    let data = std::fs::read(&path).unwrap();
    let image = PpuImage::parse(&data).unwrap();
    let result = ppumap::analyze(&image, AnalyzeOpts::default());

    let mut manifest = tempfile::NamedTempFile::new().unwrap();
    write!(
        manifest,
        "functions:\n  - addr: \"0x10000\"\n    size: 8\n  - addr: \"0x10010\"\n    size: 8\n"
    )
    .unwrap();
    let reference = Manifest::load(manifest.path()).unwrap();

    let report = validate(&image, &result.functions, &reference.pairs());
    assert_eq!(report.matched, 2);
    assert!(report.is_clean());

    // a function the analysis cannot see dirties the report
    let augmented = [(0x1_0000, 8), (0x1_0010, 8), (0x2_0000, 4)];
    let report = validate(&image, &result.functions, &augmented);
    assert_eq!(report.missing, 1);
    assert!(!report.is_clean());
}

#[test]
fn test_rejects_foreign_files() {
    let path = write_temp(&[0u8; 128]);
    assert!(matches!(
        analyze_file(&path, AnalyzeOpts::default()),
        Err(Error::Elf(_))
    ));

    assert!(matches!(
        analyze_file("/nonexistent/image.elf", AnalyzeOpts::default()),
        Err(Error::Io(_))
    ));
}

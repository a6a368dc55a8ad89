//! PPU (PowerPC) instruction word helpers.
//!
//! Only covers what function-boundary analysis needs: primary/extended opcode
//! fields, control-flow classification, canonical words, and enough encoders
//! to assemble test images and pattern templates. This is not a disassembler.

mod decode;
mod encode;
mod fields;

pub use decode::*;
pub use encode::*;
pub use fields::*;

//! Assembler and disassembler for Ocho programs.
//!
//! This module provides:
//! - A simple two-pass assembler (text → binary program image)
//! - A disassembler (binary → readable text)
//! - The text program-image format used by the loader

pub mod assembler;
pub mod disasm;
pub mod image;

pub use assembler::{assemble, AssemblerError};
pub use disasm::disassemble;
pub use image::{ImageFile, ImageError, load_image, save_image};

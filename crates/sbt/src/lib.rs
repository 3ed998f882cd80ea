//! sbt — static binary translator: RISC-V32 ELF objects to LLVM bitcode.
//!
//! Orchestrates the four leaf crates (`sbt-isa`, `sbt-elf`, `sbt-cfg`,
//! `sbt-emit`) into the end-to-end translation described in the
//! system overview: parse the guest object, build its shadow image,
//! declare the register file, then translate every function's
//! instruction stream into an LLVM module ready for
//! [`inkwell::module::Module::write_bitcode_to_path`].

pub mod a2s;
pub mod config;
pub mod error;
pub mod translate;

pub use a2s::A2SMap;
pub use config::TranslatorConfig;
pub use error::{Error, Result};
pub use translate::{translate_object, translate_objects, RegisterMode};

use std::path::Path;

use inkwell::context::Context;
use inkwell::module::Module;

use sbt_elf::ElfFile;

/// Reads and parses one guest ELF object from disk.
pub fn load_object(path: &Path) -> Result<ElfFile> {
    let bytes = std::fs::read(path)?;
    ElfFile::parse(&bytes).map_err(Error::UnsupportedFormat)
}

/// Translates a single ELF input into a verified LLVM module, applying
/// `config`. `module_name` is typically derived from the input's file
/// stem (the driver uses it for the default `x86-<basename>.bc` output
/// name, spec.md §6).
pub fn translate_input<'ctx>(
    context: &'ctx Context,
    path: &Path,
    module_name: &str,
    config: &TranslatorConfig,
) -> Result<Module<'ctx>> {
    let elf = load_object(path)?;
    let module = translate_object(context, &elf, module_name, config.register_mode)?;
    module.verify().map_err(|e| Error::InvalidBitcode(e.to_string()))?;
    Ok(module)
}

/// Translates every input into one shared, verified LLVM module (the
/// driver links multiple `.o` files into one `x86-*.bc` output).
pub fn translate_inputs<'ctx>(
    context: &'ctx Context,
    paths: &[&Path],
    module_name: &str,
    config: &TranslatorConfig,
) -> Result<Module<'ctx>> {
    let elfs = paths.iter().map(|p| load_object(p)).collect::<Result<Vec<_>>>()?;
    let module = translate_objects(context, &elfs, module_name, config.register_mode)?;
    module.verify().map_err(|e| Error::InvalidBitcode(e.to_string()))?;
    Ok(module)
}

//! IR-level relocation resolution: drives the HI20/LO12 pairing state
//! machine over one section's relocations and materializes the
//! resolved value as an `i32`, symbolically tied to whichever LLVM
//! global actually backs the referenced symbol (spec.md §4.5).

use std::collections::HashMap;

use inkwell::builder::Builder;
use inkwell::context::Context;
use inkwell::module::Module;
use inkwell::types::IntType;
use inkwell::values::{GlobalValue, IntValue};
use inkwell::AddressSpace;

use sbt_elf::{HiLoResolver, Relocation};

use crate::{EmitError, Result};

/// What a relocation's symbol resolves to, precomputed by the driver
/// from the object model + shadow image before translation starts.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SymbolResolution {
    /// No defining section: the symbol is satisfied by a host-side
    /// `rv32_<name>` thunk declared (and imported) at link time.
    External(String),
    /// Defined in a text section: its guest address (used verbatim, not
    /// through a global — callers/jumps resolve this address via the
    /// icaller table, never by dereferencing it).
    InternalFunction(u32),
    /// Defined in a data/rodata/bss section: its byte offset within that
    /// section's shadow-image global.
    Data { section: String, offset: u32 },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RelocValue<'ctx> {
    /// No relocation at this address; the decoder should use the literal
    /// immediate instead.
    None,
    Resolved(IntValue<'ctx>),
}

/// Drives relocation resolution for one section's instruction stream.
pub struct RelocationResolver<'ctx> {
    relocations: Vec<Relocation>,
    cursor: usize,
    hilo: HiLoResolver,
    i32_ty: IntType<'ctx>,
    last_symbol: Option<u32>,
}

impl<'ctx> RelocationResolver<'ctx> {
    /// `relocations` must already be sorted by offset (as
    /// `sbt_elf::file::ElfFile::parse` leaves them).
    pub fn new(relocations: Vec<Relocation>, i32_ty: IntType<'ctx>) -> Self {
        RelocationResolver { relocations, cursor: 0, hilo: HiLoResolver::new(), i32_ty, last_symbol: None }
    }

    /// The symbol index most recently resolved, which AUIPC/LUI use to
    /// bypass their normal immediate arithmetic.
    pub fn last_symbol(&self) -> Option<u32> {
        self.last_symbol
    }

    /// Declare (or reuse) the external thunk for `name`, per spec.md §6's
    /// `rv32_<libc_name>` naming convention for guest-library thunks.
    fn import(context: &'ctx Context, module: &Module<'ctx>, name: &str) -> GlobalValue<'ctx> {
        let thunk_name = format!("rv32_{name}");
        if let Some(existing) = module.get_global(&thunk_name) {
            return existing;
        }
        let ptr_ty = context.ptr_type(AddressSpace::default());
        let g = module.add_global(ptr_ty, None, &thunk_name);
        g.set_linkage(inkwell::module::Linkage::External);
        g
    }

    #[allow(clippy::too_many_arguments)]
    pub fn resolve(
        &mut self,
        context: &'ctx Context,
        builder: &Builder<'ctx>,
        module: &Module<'ctx>,
        shadow: &HashMap<String, GlobalValue<'ctx>>,
        pc: u32,
        resolve_symbol: &dyn Fn(u32) -> Option<SymbolResolution>,
    ) -> Result<RelocValue<'ctx>> {
        while self.cursor < self.relocations.len() && self.relocations[self.cursor].offset < pc {
            self.cursor += 1;
        }
        if self.cursor >= self.relocations.len() || self.relocations[self.cursor].offset != pc {
            return Ok(RelocValue::None);
        }

        let reloc = self.relocations[self.cursor].clone();
        let symbol_idx = self.hilo.resolve_symbol(&reloc)?;
        let mask = reloc.kind.mask();

        let resolution = resolve_symbol(symbol_idx).ok_or_else(|| {
            EmitError::Internal(format!("relocation at 0x{pc:08x} references unknown symbol {symbol_idx}"))
        })?;
        let masked = self.materialize(context, builder, module, shadow, &resolution, mask)?;
        self.last_symbol = Some(symbol_idx);

        // Advance past every relocation sharing this offset (spec.md §4.5).
        while self.cursor < self.relocations.len() && self.relocations[self.cursor].offset == pc {
            self.cursor += 1;
        }

        Ok(RelocValue::Resolved(masked))
    }

    fn materialize(
        &self,
        context: &'ctx Context,
        builder: &Builder<'ctx>,
        module: &Module<'ctx>,
        shadow: &HashMap<String, GlobalValue<'ctx>>,
        resolution: &SymbolResolution,
        mask: u32,
    ) -> Result<IntValue<'ctx>> {
        let mask_const = self.i32_ty.const_int(u64::from(mask), false);
        match resolution {
            // Plain guest address: never dereferenced, only compared
            // against in the icaller switch, so no pointer is involved.
            SymbolResolution::InternalFunction(addr) => {
                Ok(self.i32_ty.const_int(u64::from(addr & mask), false))
            }
            SymbolResolution::External(name) => {
                let thunk = Self::import(context, module, name);
                let as_int =
                    builder.build_ptr_to_int(thunk.as_pointer_value(), self.i32_ty, "thunk.addr").unwrap();
                Ok(builder.build_and(as_int, mask_const, "thunk.masked").unwrap())
            }
            SymbolResolution::Data { section, offset } => {
                let global = shadow.get(section).ok_or_else(|| {
                    EmitError::Internal(format!("shadow image has no section named {section:?}"))
                })?;
                // Single-index GEP over an `i8` element type: under opaque
                // pointers this walks `*offset` bytes from the global's
                // base regardless of the global's own array type.
                let idx = context.i32_type().const_int(u64::from(*offset), false);
                let gep = unsafe {
                    builder
                        .build_gep(context.i8_type(), global.as_pointer_value(), &[idx], "data.gep")
                        .unwrap()
                };
                let as_int = builder.build_ptr_to_int(gep, self.i32_ty, "data.addr").unwrap();
                Ok(builder.build_and(as_int, mask_const, "data.masked").unwrap())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use inkwell::context::Context;
    use sbt_elf::RelocationKind;

    fn reloc(offset: u32, kind: RelocationKind, symbol: u32) -> Relocation {
        Relocation { section: 0, offset, kind, symbol, addend: 0 }
    }

    #[test]
    fn no_relocation_at_pc_returns_none() {
        let context = Context::create();
        let module = context.create_module("t");
        let builder = context.create_builder();
        let shadow = HashMap::new();
        let mut r = RelocationResolver::new(vec![reloc(8, RelocationKind::Hi20Abs, 1)], context.i32_type());
        let result = r
            .resolve(&context, &builder, &module, &shadow, 0, &|_| {
                Some(SymbolResolution::Data { section: "x".into(), offset: 0 })
            })
            .unwrap();
        assert_eq!(result, RelocValue::None);
    }

    #[test]
    fn internal_function_mask_is_a_plain_constant() {
        let context = Context::create();
        let module = context.create_module("t");
        let builder = context.create_builder();
        let shadow = HashMap::new();
        let mut r = RelocationResolver::new(vec![reloc(0, RelocationKind::Hi20Abs, 1)], context.i32_type());
        let result = r
            .resolve(&context, &builder, &module, &shadow, 0, &|_| {
                Some(SymbolResolution::InternalFunction(0x1234_5678))
            })
            .unwrap();
        match result {
            RelocValue::Resolved(v) => assert_eq!(v.get_zero_extended_constant(), Some(0x1234_5000)),
            RelocValue::None => panic!("expected resolved value"),
        }
    }

    #[test]
    fn data_symbol_gep_into_its_shadow_global() {
        let context = Context::create();
        let module = context.create_module("t");
        let builder = context.create_builder();
        let fn_val = module.add_function("f", context.void_type().fn_type(&[], false), None);
        let bb = context.append_basic_block(fn_val, "entry");
        builder.position_at_end(bb);

        let array_ty = context.i8_type().array_type(16);
        let global = module.add_global(array_ty, None, "shadow_data");
        let mut shadow = HashMap::new();
        shadow.insert(".data".to_string(), global);

        let mut r = RelocationResolver::new(vec![reloc(0, RelocationKind::Hi20Abs, 1)], context.i32_type());
        let result = r
            .resolve(&context, &builder, &module, &shadow, 0, &|_| {
                Some(SymbolResolution::Data { section: ".data".into(), offset: 4 })
            })
            .unwrap();
        assert!(matches!(result, RelocValue::Resolved(_)));
    }
}

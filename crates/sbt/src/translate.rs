//! Orchestration: ties C1-C9 together for one object file. Builds the
//! shadow image, declares the register file and every function, then
//! walks each function's instruction stream in address order.

use std::collections::HashMap;

use inkwell::context::Context;
use inkwell::module::Module;
use inkwell::values::{FunctionValue, GlobalValue};

use sbt_elf::{ElfFile, ShadowImage};
use sbt_emit::{
    build_icaller, build_rv_syscall, default_syscall_table, materialize_shadow_image,
    translate_instruction, RegisterFile, RelocationResolver, SymbolResolution, TranslationContext,
};
pub use sbt_emit::RegisterMode;
use sbt_isa::decode;

use crate::error::{Error, Result};

struct FunctionSpan {
    name: String,
    entry: u32,
    end: u32,
    section: usize,
}

/// Translates one parsed object into a fresh LLVM module named
/// `module_name`, ready for [`Module::write_bitcode_to_path`].
pub fn translate_object<'ctx>(
    context: &'ctx Context,
    elf: &ElfFile,
    module_name: &str,
    mode: RegisterMode,
) -> Result<Module<'ctx>> {
    translate_objects(context, std::slice::from_ref(elf), module_name, mode)
}

/// Translates every input object into a single shared LLVM module,
/// the way the driver links multiple RISC-V `.o` files into one
/// `x86-*.bc` output (spec.md §6's `sbt [-o OUTPUT] INPUT…`). Guest
/// addresses are only unique within one relocatable object, so
/// call/icaller targets are keyed by `(object index, address)` rather
/// than address alone.
pub fn translate_objects<'ctx>(
    context: &'ctx Context,
    elfs: &[ElfFile],
    module_name: &str,
    mode: RegisterMode,
) -> Result<Module<'ctx>> {
    let module = context.create_module(module_name);
    let mut registers = RegisterFile::new(context, &module, mode);
    let i32_ty = context.i32_type();
    let void_fn_ty = context.void_type().fn_type(&[], false);

    struct Unit<'e, 'ctx> {
        elf: &'e ElfFile,
        shadow_globals: HashMap<String, GlobalValue<'ctx>>,
        spans: Vec<FunctionSpan>,
        functions: HashMap<u32, FunctionValue<'ctx>>,
    }

    let mut units = Vec::with_capacity(elfs.len());
    for elf in elfs {
        let image = ShadowImage::build(&elf.sections, |symbol_index| {
            let sym = elf.symbols.get(symbol_index as usize)?;
            let section_index = sym.section?;
            let section = elf.sections.iter().find(|s| s.index == section_index)?;
            Some((section.name.clone(), sym.value.saturating_sub(section.base)))
        })
        .map_err(|e| Error::Internal(e.to_string()))?;
        let shadow_globals = materialize_shadow_image(context, &module, &image);
        let spans = function_spans(elf);

        let mut functions = HashMap::new();
        for span in &spans {
            let f = module.add_function(&unique_name(&module, &span.name), void_fn_ty, None);
            context.append_basic_block(f, "entry_placeholder");
            functions.insert(span.entry, f);
        }
        units.push(Unit { elf, shadow_globals, spans, functions });
    }

    let rv_syscall = build_rv_syscall(context, &module, &registers, &default_syscall_table());
    let targets: Vec<_> =
        units.iter().flat_map(|u| u.functions.iter().map(|(&addr, &f)| (addr, f))).collect();
    let rv_icaller = build_icaller(context, &module, &registers, &targets);

    for unit in &units {
        for span in &unit.spans {
            let function = unit.functions[&span.entry];
            // Discard the placeholder; FunctionBuilder inserts its own
            // entry block at the function's real start address.
            function.get_first_basic_block().unwrap().remove_from_function().ok();

            translate_function(
                context,
                &module,
                &mut registers,
                unit.elf,
                span,
                function,
                &unit.functions,
                &unit.shadow_globals,
                rv_syscall,
                rv_icaller,
                i32_ty,
            )?;
        }
    }

    Ok(module)
}

/// Appends a numeric suffix if `name` already names a function in
/// `module` (distinct objects linked into the same module may define
/// symbols with the same name).
fn unique_name(module: &Module, name: &str) -> String {
    let base = sanitize(name);
    if module.get_function(&base).is_none() {
        return base;
    }
    let mut n = 1;
    loop {
        let candidate = format!("{base}.{n}");
        if module.get_function(&candidate).is_none() {
            return candidate;
        }
        n += 1;
    }
}

#[allow(clippy::too_many_arguments)]
fn translate_function<'ctx>(
    context: &'ctx Context,
    module: &Module<'ctx>,
    registers: &mut RegisterFile<'ctx>,
    elf: &ElfFile,
    span: &FunctionSpan,
    function: FunctionValue<'ctx>,
    functions: &HashMap<u32, FunctionValue<'ctx>>,
    shadow_globals: &HashMap<String, GlobalValue<'ctx>>,
    rv_syscall: FunctionValue<'ctx>,
    rv_icaller: FunctionValue<'ctx>,
    i32_ty: inkwell::types::IntType<'ctx>,
) -> Result<()> {
    let section = &elf.sections[span.section];
    let builder = context.create_builder();

    let mut fb = sbt_emit::FunctionBuilder::new(context, &builder, function, span.entry);
    registers.enter_function(&builder, function);

    let mut instructions = Vec::new();
    let mut pc = span.entry;
    while pc < span.end {
        let word_offset = (pc - section.base) as usize;
        if word_offset + 4 > section.data.len() {
            break;
        }
        let word = u32::from_le_bytes(section.data[word_offset..word_offset + 4].try_into().unwrap());
        let instr = decode(pc, word).map_err(|e| Error::Emit(sbt_emit::EmitError::Decode(e)))?;
        instructions.push((pc, instr));
        pc += 4;
    }

    let leaders = sbt_cfg::find_leaders(span.entry, &instructions);
    tracing::debug!(function = %span.name, candidate_bbs = leaders.leaders.len(), "leader analysis complete");
    fb.seed(&leaders, span.end);

    let mut relocation = RelocationResolver::new(section.relocations.clone(), i32_ty);
    let resolve_symbol = |symbol_index: u32| -> Option<SymbolResolution> {
        let sym = elf.symbols.get(symbol_index as usize)?;
        match sym.section {
            None => Some(SymbolResolution::External(sym.name.clone())),
            Some(section_index) => {
                let target_section = elf.sections.iter().find(|s| s.index == section_index)?;
                if sym.is_function() {
                    Some(SymbolResolution::InternalFunction(sym.value))
                } else {
                    Some(SymbolResolution::Data {
                        section: target_section.name.clone(),
                        offset: sym.value.saturating_sub(target_section.base),
                    })
                }
            }
        }
    };
    let call_target = |addr: u32| -> Option<FunctionValue<'ctx>> { functions.get(&addr).copied() };

    let mut ctx = TranslationContext {
        context,
        builder: &builder,
        module,
        registers,
        function: &mut fb,
        relocation: &mut relocation,
        shadow: shadow_globals,
        resolve_symbol: &resolve_symbol,
        call_target: &call_target,
        rv_syscall,
        rv_icaller,
    };

    for (pc, instr) in &instructions {
        translate_instruction(&mut ctx, *pc, instr)?;
    }

    let last_block = builder.get_insert_block().expect("function must have an open block at the end");
    if last_block.get_terminator().is_none() {
        registers.sync_out(&builder);
        builder.build_return(None).unwrap();
    }

    Ok(())
}

fn function_spans(elf: &ElfFile) -> Vec<FunctionSpan> {
    let mut spans = Vec::new();
    for (section_idx, section) in elf.sections.iter().enumerate() {
        if !matches!(section.kind, sbt_elf::SectionKind::Text) {
            continue;
        }
        let mut funcs: Vec<_> = elf
            .symbols
            .iter()
            .filter(|s| s.is_function() && s.section == Some(section.index))
            .collect();
        funcs.sort_by_key(|s| (s.value, s.name.clone()));

        for (i, sym) in funcs.iter().enumerate() {
            let end = funcs.get(i + 1).map_or(section.base + section.size, |next| next.value);
            if end <= sym.value {
                continue;
            }
            spans.push(FunctionSpan { name: sym.name.clone(), entry: sym.value, end, section: section_idx });
        }
    }
    spans.sort_by_key(|s| s.entry);
    spans
}

fn sanitize(name: &str) -> String {
    if name.is_empty() {
        return "anon".to_string();
    }
    name.chars().map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '.' { c } else { '_' }).collect()
}

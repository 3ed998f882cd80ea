//! Per-opcode IR emission: the actual instruction translator.
//!
//! Each call translates exactly one decoded instruction at a known
//! address into the LLVM IR it's equivalent to, consulting the
//! function's `BBMap`-backed block structure for anything that
//! changes control flow.

use std::collections::HashMap;

use inkwell::builder::Builder;
use inkwell::context::Context;
use inkwell::module::Module;
use inkwell::values::{FunctionValue, GlobalValue, InstructionValue, IntValue};
use inkwell::IntPredicate;

use sbt_isa::{Instruction, OpClass, Operands, Reg};

use crate::caller::{CallLowering, Ffi, FloatAbi};
use crate::function::FunctionBuilder;
use crate::registers::RegisterFile;
use crate::relocation::{RelocValue, RelocationResolver, SymbolResolution};
use crate::{EmitError, Result};

/// Everything one call to [`translate_instruction`] needs, bundled so
/// the dispatch signature stays readable.
pub struct TranslationContext<'a, 'ctx> {
    pub context: &'ctx Context,
    pub builder: &'a Builder<'ctx>,
    pub module: &'a Module<'ctx>,
    pub registers: &'a mut RegisterFile<'ctx>,
    pub function: &'a mut FunctionBuilder<'ctx>,
    pub relocation: &'a mut RelocationResolver<'ctx>,
    pub shadow: &'a HashMap<String, GlobalValue<'ctx>>,
    /// Resolves a symbol index to where it ends up materialized, for
    /// relocation-bearing AUIPC/LUI pairs.
    pub resolve_symbol: &'a dyn Fn(u32) -> Option<SymbolResolution>,
    /// Resolves a direct-call target address to its translated
    /// function, for JAL-as-call.
    pub call_target: &'a dyn Fn(u32) -> Option<FunctionValue<'ctx>>,
    pub rv_syscall: FunctionValue<'ctx>,
    pub rv_icaller: FunctionValue<'ctx>,
}

fn record_metadata<'ctx>(ctx: &TranslationContext<'_, 'ctx>, instr: InstructionValue<'ctx>, disasm: &str) {
    let kind_id = ctx.context.get_kind_id("sbt.disasm");
    let node = ctx.context.metadata_string(&sbt_isa::sanitize_for_metadata(disasm));
    let md = ctx.context.metadata_node(&[node.into()]);
    instr.set_metadata(md, kind_id).ok();
}

/// Translate one decoded instruction at `pc`, emitting IR into
/// whatever block `ctx.function`'s builder cursor currently points at
/// (after closing/opening blocks per `before_emit`).
pub fn translate_instruction(ctx: &mut TranslationContext<'_, '_>, pc: u32, instr: &Instruction) -> Result<()> {
    ctx.function.before_emit(ctx.builder, pc);

    let disasm = sbt_isa::disassemble(instr);

    let first_instr = match instr.opcode.class() {
        OpClass::Alu => translate_alu(ctx, pc, instr)?,
        OpClass::UpperImm => translate_upper_imm(ctx, pc, instr)?,
        OpClass::Branch => translate_branch(ctx, pc, instr)?,
        OpClass::Jump => translate_jump(ctx, pc, instr)?,
        OpClass::Load => translate_load(ctx, pc, instr)?,
        OpClass::Store => translate_store(ctx, pc, instr)?,
        OpClass::System => translate_system(ctx, instr)?,
        OpClass::Fence => Some(
            ctx.builder.build_fence(inkwell::AtomicOrdering::AcquireRelease, false, "fence").unwrap(),
        ),
        OpClass::Csr => translate_csr(ctx, instr)?,
    };

    if let Some(first) = first_instr {
        record_metadata(ctx, first, &disasm);
        ctx.function.record_first_instruction(pc, first);
    }

    Ok(())
}

/// Resolves the immediate an I/S-type instruction carries at `pc`: if a
/// `LO12_*` relocation sits at this address (the second half of an
/// `AUIPC`/`LUI` HI20/LO12 pair), its resolved, masked value replaces
/// the literal field the decoder produced (spec.md §4.5).
fn resolve_immediate<'ctx>(ctx: &mut TranslationContext<'_, 'ctx>, pc: u32, literal: i32) -> Result<IntValue<'ctx>> {
    resolve_immediate_with_symbol(ctx, pc, literal).map(|(v, _)| v)
}

/// Like [`resolve_immediate`], but also reports which symbol the
/// relocation at `pc` (if any) resolved to, so JALR's LO12 half can
/// tell a statically known call target from a genuinely dynamic one
/// (spec.md §4.8).
fn resolve_immediate_with_symbol<'ctx>(
    ctx: &mut TranslationContext<'_, 'ctx>,
    pc: u32,
    literal: i32,
) -> Result<(IntValue<'ctx>, Option<SymbolResolution>)> {
    let reloc =
        ctx.relocation.resolve(ctx.context, ctx.builder, ctx.module, ctx.shadow, pc, ctx.resolve_symbol)?;
    match reloc {
        RelocValue::Resolved(v) => {
            let symbol = ctx.relocation.last_symbol().and_then(ctx.resolve_symbol);
            Ok((v, symbol))
        }
        RelocValue::None => Ok((ctx.context.i32_type().const_int(literal as u32 as u64, false), None)),
    }
}

/// When a JALR's LO12 half resolves to a known function, emit a direct
/// call instead of routing through the generic icaller switch: icaller
/// only matches in-module guest addresses known when it was built, so
/// a statically resolved internal or external target would otherwise
/// silently fall into its default case (spec.md §4.8's caller/ABI
/// lowering bridges exactly this gap for external callees).
fn translate_resolved_call<'ctx>(
    ctx: &mut TranslationContext<'_, 'ctx>,
    pc: u32,
    rd: Reg,
    symbol: Option<SymbolResolution>,
) -> Result<Option<Option<InstructionValue<'ctx>>>> {
    let first = match symbol {
        Some(SymbolResolution::InternalFunction(addr)) => {
            let Some(callee) = (ctx.call_target)(addr) else { return Ok(None) };
            ctx.registers.sync_out(ctx.builder);
            let call = ctx.builder.build_call(callee, &[], "call").unwrap();
            ctx.registers.sync_in(ctx.builder);
            call.try_as_basic_value().right()
        }
        Some(SymbolResolution::External(name)) => {
            let sig = Ffi::well_known(&name).unwrap_or_else(|| Ffi::fallback(&name));
            let extra_variadic_args = if sig.variadic { 4 } else { 0 };
            let lowering = CallLowering::new(FloatAbi::Soft);
            ctx.registers.sync_out(ctx.builder);
            let first =
                lowering.lower_call(ctx.context, ctx.builder, ctx.module, ctx.registers, &sig, extra_variadic_args)?;
            ctx.registers.sync_in(ctx.builder);
            first
        }
        _ => return Ok(None),
    };

    let link = ctx.context.i32_type().const_int(u64::from(pc.wrapping_add(4)), false);
    ctx.registers.store(ctx.builder, rd, link);
    Ok(Some(first))
}

fn translate_alu<'ctx>(ctx: &mut TranslationContext<'_, 'ctx>, pc: u32, instr: &Instruction) -> Result<Option<InstructionValue<'ctx>>> {
    use sbt_isa::Opcode::*;

    let (rd, lhs, rhs): (Reg, IntValue, IntValue) = match instr.operands {
        Operands::R { rd, rs1, rs2 } => {
            (rd, ctx.registers.load(ctx.builder, rs1), ctx.registers.load(ctx.builder, rs2))
        }
        Operands::I { rd, rs1, imm } => {
            let lhs = ctx.registers.load(ctx.builder, rs1);
            let rhs = resolve_immediate(ctx, pc, imm)?;
            (rd, lhs, rhs)
        }
        _ => return Err(EmitError::Internal("ALU instruction with unexpected operand shape".into())),
    };
    let i32_ty = ctx.context.i32_type();

    let (value, first) = match instr.opcode {
        Add | Addi => ctx.builder.build_int_add(lhs, rhs, "add").map(|v| (v, v.as_instruction_value())).unwrap(),
        Sub => ctx.builder.build_int_sub(lhs, rhs, "sub").map(|v| (v, v.as_instruction_value())).unwrap(),
        Mul => ctx.builder.build_int_mul(lhs, rhs, "mul").map(|v| (v, v.as_instruction_value())).unwrap(),
        And | Andi => ctx.builder.build_and(lhs, rhs, "and").map(|v| (v, v.as_instruction_value())).unwrap(),
        Or | Ori => ctx.builder.build_or(lhs, rhs, "or").map(|v| (v, v.as_instruction_value())).unwrap(),
        Xor | Xori => ctx.builder.build_xor(lhs, rhs, "xor").map(|v| (v, v.as_instruction_value())).unwrap(),
        Sll | Slli => {
            ctx.builder.build_left_shift(lhs, rhs, "sll").map(|v| (v, v.as_instruction_value())).unwrap()
        }
        Srl | Srli => ctx
            .builder
            .build_right_shift(lhs, rhs, false, "srl")
            .map(|v| (v, v.as_instruction_value()))
            .unwrap(),
        Sra | Srai => {
            ctx.builder.build_right_shift(lhs, rhs, true, "sra").map(|v| (v, v.as_instruction_value())).unwrap()
        }
        Slt | Slti => {
            let cmp = ctx.builder.build_int_compare(IntPredicate::SLT, lhs, rhs, "slt").unwrap();
            let ext = ctx.builder.build_int_z_extend(cmp, i32_ty, "slt.ext").unwrap();
            (ext, cmp.as_instruction_value())
        }
        Sltu | Sltiu => {
            let cmp = ctx.builder.build_int_compare(IntPredicate::ULT, lhs, rhs, "sltu").unwrap();
            let ext = ctx.builder.build_int_z_extend(cmp, i32_ty, "sltu.ext").unwrap();
            (ext, cmp.as_instruction_value())
        }
        _ => return Err(EmitError::Internal(format!("{:?} is not an ALU opcode", instr.opcode))),
    };

    ctx.registers.store(ctx.builder, rd, value);
    Ok(first)
}

fn translate_upper_imm<'ctx>(
    ctx: &mut TranslationContext<'_, 'ctx>,
    pc: u32,
    instr: &Instruction,
) -> Result<Option<InstructionValue<'ctx>>> {
    use sbt_isa::Opcode::*;
    let Operands::U { rd, imm } = instr.operands else {
        return Err(EmitError::Internal("upper-immediate instruction with unexpected operands".into()));
    };

    let i32_ty = ctx.context.i32_type();
    let reloc =
        ctx.relocation.resolve(ctx.context, ctx.builder, ctx.module, ctx.shadow, pc, ctx.resolve_symbol)?;
    let base = match reloc {
        RelocValue::Resolved(v) => v,
        RelocValue::None => i32_ty.const_int(imm as u32 as u64, false),
    };

    let value = match instr.opcode {
        Lui => base,
        Auipc if matches!(reloc, RelocValue::Resolved(_)) => base,
        Auipc => {
            let pc_const = i32_ty.const_int(u64::from(pc), false);
            ctx.builder.build_int_add(pc_const, base, "auipc").unwrap()
        }
        _ => return Err(EmitError::Internal(format!("{:?} is not an upper-immediate opcode", instr.opcode))),
    };

    ctx.registers.store(ctx.builder, rd, value);
    Ok(value.as_instruction_value())
}

fn translate_branch<'ctx>(
    ctx: &mut TranslationContext<'_, 'ctx>,
    pc: u32,
    instr: &Instruction,
) -> Result<Option<InstructionValue<'ctx>>> {
    use sbt_isa::Opcode::*;
    let Operands::B { rs1, rs2, imm } = instr.operands else {
        return Err(EmitError::Internal("branch instruction with unexpected operands".into()));
    };

    let lhs = ctx.registers.load(ctx.builder, rs1);
    let rhs = ctx.registers.load(ctx.builder, rs2);
    let predicate = match instr.opcode {
        Beq => IntPredicate::EQ,
        Bne => IntPredicate::NE,
        Blt => IntPredicate::SLT,
        Bge => IntPredicate::SGE,
        Bltu => IntPredicate::ULT,
        Bgeu => IntPredicate::UGE,
        _ => return Err(EmitError::Internal(format!("{:?} is not a branch opcode", instr.opcode))),
    };
    let cmp = ctx.builder.build_int_compare(predicate, lhs, rhs, "branch.cond").unwrap();

    let target = pc.wrapping_add(imm as u32);
    let fallthrough = pc.wrapping_add(4);

    let target_bb = if target <= pc {
        ctx.function.split_at(ctx.builder, target)?
    } else {
        ctx.function.forward_leader(ctx.context, pc, target)
    };
    let fallthrough_bb = ctx.function.forward_leader(ctx.context, pc, fallthrough);

    let branch = ctx.builder.build_conditional_branch(cmp, target_bb, fallthrough_bb).unwrap();
    ctx.builder.position_at_end(fallthrough_bb);
    ctx.function.recompute_next_bb(fallthrough);

    Ok(Some(branch))
}

/// Opens (or reuses) the block for the instruction right after `pc` and
/// positions the builder there. Needed after any unconditional
/// terminator (a tail `JAL` or a `ret`): the code immediately following
/// it in address order is only reachable by falling through into it
/// (possibly not at all), but it still needs a block to land in rather
/// than being appended after the terminator that was just emitted.
fn open_fallthrough_block<'ctx>(ctx: &mut TranslationContext<'_, 'ctx>, pc: u32) {
    let fallthrough = pc.wrapping_add(4);
    let fallthrough_bb = ctx.function.forward_leader(ctx.context, pc, fallthrough);
    ctx.builder.position_at_end(fallthrough_bb);
    ctx.function.recompute_next_bb(fallthrough);
}

fn translate_jump<'ctx>(
    ctx: &mut TranslationContext<'_, 'ctx>,
    pc: u32,
    instr: &Instruction,
) -> Result<Option<InstructionValue<'ctx>>> {
    use sbt_isa::Opcode::*;
    match (instr.opcode, instr.operands) {
        (Jal, Operands::J { rd, imm }) => {
            let target = pc.wrapping_add(imm as u32);
            let link = ctx.context.i32_type().const_int(u64::from(pc.wrapping_add(4)), false);

            if rd == Reg::RA {
                let callee = (ctx.call_target)(target)
                    .ok_or_else(|| EmitError::FunctionNotFound(format!("0x{target:08x}")))?;
                ctx.registers.sync_out(ctx.builder);
                let call = ctx.builder.build_call(callee, &[], "call").unwrap();
                ctx.registers.sync_in(ctx.builder);
                ctx.registers.store(ctx.builder, rd, link);
                return Ok(call.try_as_basic_value().right());
            }

            if rd != Reg::ZERO {
                ctx.registers.store(ctx.builder, rd, link);
            }
            let target_bb = if target <= pc {
                ctx.function.split_at(ctx.builder, target)?
            } else {
                ctx.function.forward_leader(ctx.context, pc, target)
            };
            let br = ctx.builder.build_unconditional_branch(target_bb).unwrap();
            // The jump terminates this block; whatever follows in address
            // order (reached only by falling through, if at all) needs a
            // block of its own so a subsequent translate_instruction never
            // appends past this terminator.
            open_fallthrough_block(ctx, pc);
            Ok(Some(br))
        }
        (Jalr, Operands::I { rd, rs1, imm }) => {
            if rd == Reg::ZERO && rs1 == Reg::RA && imm == 0 {
                ctx.registers.sync_out(ctx.builder);
                let ret = ctx.builder.build_return(None).unwrap();
                open_fallthrough_block(ctx, pc);
                return Ok(Some(ret));
            }

            let base = ctx.registers.load(ctx.builder, rs1);
            let (imm_val, symbol) = resolve_immediate_with_symbol(ctx, pc, imm)?;

            if rd != Reg::ZERO {
                if let Some(first) = translate_resolved_call(ctx, pc, rd, symbol)? {
                    return Ok(first);
                }
            }

            let target_addr = ctx.builder.build_int_add(base, imm_val, "jalr.target").unwrap();
            let t1 = ctx.registers.x_global(Reg::T1).expect("t1 global must exist");
            ctx.builder.build_store(t1.as_pointer_value(), target_addr).unwrap();

            let link = ctx.context.i32_type().const_int(u64::from(pc.wrapping_add(4)), false);
            ctx.registers.sync_out(ctx.builder);
            let call = ctx.builder.build_call(ctx.rv_icaller, &[], "icaller").unwrap();
            ctx.registers.sync_in(ctx.builder);
            if rd != Reg::ZERO {
                ctx.registers.store(ctx.builder, rd, link);
            }
            Ok(call.try_as_basic_value().right())
        }
        _ => Err(EmitError::Internal("jump instruction with unexpected operands".into())),
    }
}

/// `rs1 + imm` is interpreted directly as a host pointer: the shadow
/// image's globals live at addresses the runtime maps 1:1 with the
/// guest's, so no bounds-checked memory shim is needed here (spec.md
/// §4.7's "interpreted as host pointer" contract).
fn guest_pointer<'ctx>(ctx: &TranslationContext<'_, 'ctx>, addr: IntValue<'ctx>) -> inkwell::values::PointerValue<'ctx> {
    ctx.builder
        .build_int_to_ptr(addr, ctx.context.ptr_type(inkwell::AddressSpace::default()), "guest.ptr")
        .unwrap()
}

fn translate_load<'ctx>(ctx: &mut TranslationContext<'_, 'ctx>, pc: u32, instr: &Instruction) -> Result<Option<InstructionValue<'ctx>>> {
    use sbt_isa::Opcode::*;
    let Operands::I { rd, rs1, imm } = instr.operands else {
        return Err(EmitError::Internal("load instruction with unexpected operands".into()));
    };

    let base = ctx.registers.load(ctx.builder, rs1);
    let imm_val = resolve_immediate(ctx, pc, imm)?;
    let addr = ctx.builder.build_int_add(base, imm_val, "load.addr").unwrap();

    let (width, signed) = match instr.opcode {
        Lb => (ctx.context.i8_type(), true),
        Lbu => (ctx.context.i8_type(), false),
        Lh => (ctx.context.i16_type(), true),
        Lhu => (ctx.context.i16_type(), false),
        Lw => (ctx.context.i32_type(), false),
        _ => return Err(EmitError::Internal(format!("{:?} is not a load opcode", instr.opcode))),
    };
    let ptr = guest_pointer(ctx, addr);
    let raw = ctx.builder.build_load(width, ptr, "load").unwrap().into_int_value();

    let i32_ty = ctx.context.i32_type();
    let value = if width == i32_ty {
        raw
    } else if signed {
        ctx.builder.build_int_s_extend(raw, i32_ty, "load.sext").unwrap()
    } else {
        ctx.builder.build_int_z_extend(raw, i32_ty, "load.zext").unwrap()
    };
    ctx.registers.store(ctx.builder, rd, value);
    Ok(addr.as_instruction_value())
}

fn translate_store<'ctx>(ctx: &mut TranslationContext<'_, 'ctx>, pc: u32, instr: &Instruction) -> Result<Option<InstructionValue<'ctx>>> {
    use sbt_isa::Opcode::*;
    let Operands::S { rs1, rs2, imm } = instr.operands else {
        return Err(EmitError::Internal("store instruction with unexpected operands".into()));
    };

    let base = ctx.registers.load(ctx.builder, rs1);
    let imm_val = resolve_immediate(ctx, pc, imm)?;
    let addr = ctx.builder.build_int_add(base, imm_val, "store.addr").unwrap();
    let value = ctx.registers.load(ctx.builder, rs2);

    let width = match instr.opcode {
        Sb => ctx.context.i8_type(),
        Sh => ctx.context.i16_type(),
        Sw => ctx.context.i32_type(),
        _ => return Err(EmitError::Internal(format!("{:?} is not a store opcode", instr.opcode))),
    };
    let narrowed = if width == ctx.context.i32_type() {
        value
    } else {
        ctx.builder.build_int_truncate(value, width, "store.trunc").unwrap()
    };
    let ptr = guest_pointer(ctx, addr);
    let store = ctx.builder.build_store(ptr, narrowed).unwrap();
    Ok(Some(store))
}

fn translate_system<'ctx>(ctx: &mut TranslationContext<'_, 'ctx>, instr: &Instruction) -> Result<Option<InstructionValue<'ctx>>> {
    use sbt_isa::Opcode::*;
    match instr.opcode {
        Ecall => {
            ctx.registers.sync_out(ctx.builder);
            let call = ctx.builder.build_call(ctx.rv_syscall, &[], "").unwrap();
            // rv_syscall writes its result into the shared `a0` global
            // (spec.md §4.7); sync it back into this function's locals
            // so the following instructions see the guest's x10/a0.
            ctx.registers.sync_in(ctx.builder);
            Ok(call.try_as_basic_value().right())
        }
        Ebreak => {
            let name = "sbt_ebreak";
            let callee = ctx.module.get_function(name).unwrap_or_else(|| {
                ctx.module.add_function(name, ctx.context.void_type().fn_type(&[], false), None)
            });
            let call = ctx.builder.build_call(callee, &[], "").unwrap();
            Ok(call.try_as_basic_value().right())
        }
        _ => Err(EmitError::Internal(format!("{:?} is not a system opcode", instr.opcode))),
    }
}

/// Only the read-only counters compilers emit as `rdcycle`/`rdtime`/
/// `rdinstret` pseudo-instructions are modeled (`CSRRS rd, csr, x0`);
/// any attempt to write a CSR is a base-ISA violation this translator
/// rejects outright rather than silently drop (spec.md §4.7).
fn translate_csr<'ctx>(ctx: &mut TranslationContext<'_, 'ctx>, instr: &Instruction) -> Result<Option<InstructionValue<'ctx>>> {
    use sbt_isa::Opcode::*;

    let (Csrrs, Operands::Csr { rd, rs1, csr }) = (instr.opcode, instr.operands) else {
        return Err(EmitError::Internal(format!(
            "{:?} writes a CSR, which the base RV32I translator does not support",
            instr.opcode
        )));
    };
    if !rs1.is_zero() {
        return Err(EmitError::Internal("CSRRS with a nonzero rs1 writes the CSR, which is unsupported".into()));
    }

    let hook_name = match csr {
        0xC00 | 0xC80 => "get_cycles",
        0xC01 | 0xC81 => "get_time",
        0xC02 | 0xC82 => "get_instret",
        _ => return Err(EmitError::Internal(format!("unsupported read-only CSR 0x{csr:x}"))),
    };

    let i32_ty = ctx.context.i32_type();
    let hook = ctx
        .module
        .get_function(hook_name)
        .unwrap_or_else(|| ctx.module.add_function(hook_name, i32_ty.fn_type(&[], false), None));
    let call = ctx.builder.build_call(hook, &[], "csr.read").unwrap();
    let value = call.try_as_basic_value().left().unwrap().into_int_value();
    ctx.registers.store(ctx.builder, rd, value);

    Ok(value.as_instruction_value())
}

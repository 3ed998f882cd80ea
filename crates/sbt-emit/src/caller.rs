//! ABI lowering for calls that cross into genuinely external functions
//! (libc, or anything else the object file only references, never
//! defines).
//!
//! Calls between translated guest functions need none of this: both
//! sides read and write the same global register file, so a direct
//! `call void @target()` already carries every argument and the return
//! value. This module exists only for the boundary where a real,
//! typed LLVM signature has to be assembled from the guest's `a0..a7`
//! / `fa0..fa7` registers.

use inkwell::builder::Builder;
use inkwell::context::Context;
use inkwell::module::Module;
use inkwell::types::BasicTypeEnum;
use inkwell::values::{BasicMetadataValueEnum, BasicValueEnum, FunctionValue, InstructionValue};
use inkwell::AddressSpace;

use sbt_isa::Reg;

use crate::registers::RegisterFile;
use crate::Result;

/// The widest a guest call's fixed argument list may run before the
/// rest spill to stack-relative loads the translator does not model;
/// calls past this arity are rejected rather than silently truncated.
pub const MAX_ARGS: usize = 8;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArgClass {
    Int,
    Float,
    /// Soft-float ABI only: passed as a pair of `i32` registers merged
    /// into an `f64` bit pattern at the call site.
    DoubleSoft,
    Double,
    /// Passed by pointer to a stack temporary; the callee dereferences.
    Fp128ByRef,
}

/// An external function's calling-convention shape, as the translator
/// needs to know it to marshal guest registers into a real LLVM call.
#[derive(Clone, Debug)]
pub struct Ffi {
    pub name: String,
    pub args: Vec<ArgClass>,
    pub variadic: bool,
    pub returns: Option<ArgClass>,
}

impl Ffi {
    /// Signatures the translator knows without reading a header: just
    /// enough libc surface for the common-case external call.
    pub fn well_known(name: &str) -> Option<Ffi> {
        let (args, variadic, returns) = match name {
            "printf" => (vec![ArgClass::Int], true, Some(ArgClass::Int)),
            "malloc" => (vec![ArgClass::Int], false, Some(ArgClass::Int)),
            "free" => (vec![ArgClass::Int], false, None),
            "memcpy" | "memmove" => {
                (vec![ArgClass::Int, ArgClass::Int, ArgClass::Int], false, Some(ArgClass::Int))
            }
            "memset" => (vec![ArgClass::Int, ArgClass::Int, ArgClass::Int], false, Some(ArgClass::Int)),
            "exit" | "abort" => (vec![ArgClass::Int], false, None),
            "puts" => (vec![ArgClass::Int], false, Some(ArgClass::Int)),
            _ => return None,
        };
        Some(Ffi { name: name.to_string(), args, variadic, returns })
    }

    /// Generic shape for an external symbol this translator has no
    /// header knowledge of: one integer in, one integer out. Covers the
    /// common single-pointer-or-scalar libc entry point well enough to
    /// keep the call from silently dropping its argument.
    pub fn fallback(name: &str) -> Ffi {
        Ffi { name: name.to_string(), args: vec![ArgClass::Int], variadic: false, returns: Some(ArgClass::Int) }
    }
}

/// Hard-float vs. soft-float double representation, fixed for the
/// whole translation unit by how the object file's ABI flags read.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FloatAbi {
    Hard,
    Soft,
}

pub struct CallLowering {
    abi: FloatAbi,
}

impl CallLowering {
    pub fn new(abi: FloatAbi) -> Self {
        CallLowering { abi }
    }

    fn declare<'ctx>(&self, context: &'ctx Context, module: &Module<'ctx>, sig: &Ffi) -> FunctionValue<'ctx> {
        if let Some(existing) = module.get_function(&sig.name) {
            return existing;
        }
        let i32_ty = context.i32_type();
        let f32_ty = context.f32_type();
        let f64_ty = context.f64_type();
        let ptr_ty = context.ptr_type(AddressSpace::default());

        let param_ty = |class: &ArgClass| -> BasicTypeEnum<'ctx> {
            match class {
                ArgClass::Int => i32_ty.into(),
                ArgClass::Float => f32_ty.into(),
                ArgClass::Double | ArgClass::DoubleSoft => f64_ty.into(),
                ArgClass::Fp128ByRef => ptr_ty.into(),
            }
        };
        let mut params: Vec<_> = sig.args.iter().map(|c| param_ty(c).into()).collect();
        // FP128 is never returned in registers: the caller allocates the
        // slot and passes it as a hidden leading pointer argument.
        let fn_ty = match &sig.returns {
            Some(ArgClass::Fp128ByRef) => {
                params.insert(0, ptr_ty.into());
                context.void_type().fn_type(&params, sig.variadic)
            }
            Some(class) => param_ty(class).fn_type(&params, sig.variadic),
            None => context.void_type().fn_type(&params, sig.variadic),
        };
        module.add_function(&sig.name, fn_ty, None)
    }

    /// Marshal `a0..a(args.len()-1)` (or `fa0..` for float/double
    /// classes) into a real call to `sig`, writing any return value
    /// back into `a0`/`fa0`.
    ///
    /// `extra_variadic_args` is clamped to 4 spill slots, and the total
    /// slot count (fixed params + variadic spill) is clamped to
    /// `MAX_ARGS`, per spec.md §4.8; calls that need to drop arguments
    /// to fit are logged rather than rejected.
    pub fn lower_call<'ctx>(
        &self,
        context: &'ctx Context,
        builder: &Builder<'ctx>,
        module: &Module<'ctx>,
        registers: &mut RegisterFile<'ctx>,
        sig: &Ffi,
        extra_variadic_args: usize,
    ) -> Result<Option<InstructionValue<'ctx>>> {
        const MAX_VARIADIC_SPILL: usize = 4;
        let variadic_args = extra_variadic_args.min(MAX_VARIADIC_SPILL);
        let total_slots = (sig.args.len() + variadic_args).min(MAX_ARGS);
        if sig.args.len() + variadic_args > MAX_ARGS {
            tracing::warn!(
                callee = %sig.name,
                wanted = sig.args.len() + variadic_args,
                limit = MAX_ARGS,
                "call exceeds the argument lowering limit; trailing arguments dropped"
            );
        }
        let fixed_slots = total_slots.min(sig.args.len());

        let target = self.declare(context, module, sig);

        let mut args: Vec<BasicMetadataValueEnum<'ctx>> = Vec::new();
        let mut int_reg = Reg::A0;
        // fa0..fa7 share x10..x17's numbering with a0..a7 in the RISC-V
        // ABI, so Reg::A0 is already the right starting index into the
        // float register file.
        let mut float_reg = Reg::A0;
        let mut return_slot = None;

        if matches!(sig.returns, Some(ArgClass::Fp128ByRef)) {
            let fp128_ty = context.f64_type().array_type(2);
            let slot = builder.build_alloca(fp128_ty, "fp128_ret_slot").unwrap();
            args.push(slot.into());
            return_slot = Some(slot);
            int_reg = int_reg.offset(1);
        }

        for class in sig.args.iter().take(fixed_slots) {
            let value: BasicValueEnum = match class {
                ArgClass::Int => registers.load(builder, int_reg).into(),
                ArgClass::Float => registers.fload(builder, float_reg).into(),
                ArgClass::Double if self.abi == FloatAbi::Hard => {
                    // The float register file holds `f32` slots (spec.md
                    // §4.3); widen to `f64` for a hard-float double argument.
                    let narrow = registers.fload(builder, float_reg);
                    builder.build_float_ext(narrow, context.f64_type(), "fa.widen").unwrap().into()
                }
                ArgClass::DoubleSoft | ArgClass::Double => {
                    // Soft-float: the pair (reg, reg+1) holds the bit
                    // pattern; reassemble it as f64 via an i64 bitcast.
                    let lo = registers.load(builder, int_reg);
                    let hi = registers.load(builder, int_reg.offset(1));
                    let i64_ty = context.i64_type();
                    let lo64 = builder.build_int_z_extend(lo, i64_ty, "lo64").unwrap();
                    let hi64 = builder.build_int_z_extend(hi, i64_ty, "hi64").unwrap();
                    let shifted = builder.build_left_shift(hi64, i64_ty.const_int(32, false), "hi_shl").unwrap();
                    let merged = builder.build_or(lo64, shifted, "merged").unwrap();
                    builder.build_bit_cast(merged, context.f64_type(), "as_f64").unwrap()
                }
                ArgClass::Fp128ByRef => {
                    let fp128_ty = context.f64_type().array_type(2);
                    let slot = builder.build_alloca(fp128_ty, "fp128_arg_slot").unwrap();
                    slot.into()
                }
            };
            args.push(value.into());
            int_reg = int_reg.offset(1);
            float_reg = float_reg.offset(1);
        }
        for _ in 0..total_slots.saturating_sub(fixed_slots) {
            args.push(registers.load(builder, int_reg).into());
            int_reg = int_reg.offset(1);
        }

        let call = builder.build_call(target, &args, "call").unwrap();
        let call_instr = call
            .try_as_basic_value()
            .left()
            .and_then(|v| v.as_instruction_value())
            .or_else(|| call.try_as_basic_value().right());
        if let Some(slot) = return_slot {
            let fp128_ty = context.f64_type().array_type(2);
            let lo = builder
                .build_extract_value(
                    builder.build_load(fp128_ty, slot, "fp128_ret").unwrap().into_array_value(),
                    0,
                    "lo",
                )
                .unwrap();
            let narrowed =
                builder.build_float_trunc(lo.into_float_value(), context.f32_type(), "fp128.lo.narrow").unwrap();
            registers.fstore(builder, Reg::A0, narrowed);
        } else if let (Some(class), Some(ret)) = (&sig.returns, call.try_as_basic_value().left()) {
            match class {
                ArgClass::Int => registers.store(builder, Reg::A0, ret.into_int_value()),
                ArgClass::Float => registers.fstore(builder, Reg::A0, ret.into_float_value()),
                ArgClass::Double | ArgClass::DoubleSoft => {
                    // Register file slots are `f32`; narrow the `f64`
                    // return value before storing it back (spec.md §4.3).
                    let narrowed =
                        builder.build_float_trunc(ret.into_float_value(), context.f32_type(), "ret.narrow").unwrap();
                    registers.fstore(builder, Reg::A0, narrowed);
                }
                ArgClass::Fp128ByRef => {}
            }
        }
        Ok(call_instr)
    }
}

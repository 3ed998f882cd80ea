//! `rv_icaller`: the indirect-call dispatcher every `jalr` with an
//! unresolved target lowers to. The guest target address is expected
//! in `t1`; the dispatcher switches over every function address known
//! at link time and falls through to a crash-on-jump default.

use inkwell::context::Context;
use inkwell::module::Module;
use inkwell::values::FunctionValue;

use sbt_isa::Reg;

use crate::registers::RegisterFile;

/// Builds (or returns the existing) `rv_icaller` function. `targets`
/// is every function's `(guest address, translated function)` pair
/// reachable through an indirect call in this module.
pub fn build_icaller<'ctx>(
    context: &'ctx Context,
    module: &Module<'ctx>,
    registers: &RegisterFile<'ctx>,
    targets: &[(u32, FunctionValue<'ctx>)],
) -> FunctionValue<'ctx> {
    if let Some(existing) = module.get_function("rv_icaller") {
        return existing;
    }

    let i32_ty = context.i32_type();
    let void_ty = context.void_type();
    let function = module.add_function("rv_icaller", void_ty.fn_type(&[], false), None);

    let builder = context.create_builder();
    let entry = context.append_basic_block(function, "entry");
    builder.position_at_end(entry);

    let t1 = registers.x_global(Reg::T1).expect("t1 must be a live global");
    let target_addr = builder.build_load(i32_ty, t1.as_pointer_value(), "t1").unwrap().into_int_value();

    let exit_bb = context.append_basic_block(function, "icaller_exit");
    let default_bb = context.append_basic_block(function, "icaller_unresolved");

    let mut cases = Vec::new();
    for (addr, target) in targets {
        let case_bb = context.append_basic_block(function, &format!("icaller_{addr:x}"));
        builder.position_at_end(case_bb);
        builder.build_call(*target, &[], "").unwrap();
        builder.build_unconditional_branch(exit_bb).unwrap();
        cases.push((i32_ty.const_int(u64::from(*addr), false), case_bb));
    }

    // No known function owns this address: zero t1 so the guest's own
    // fault-handling path (if any) observes a null call target instead
    // of silently jumping somewhere unrelated.
    builder.position_at_end(default_bb);
    builder.build_store(t1.as_pointer_value(), i32_ty.const_zero()).unwrap();
    builder.build_unconditional_branch(exit_bb).unwrap();

    builder.position_at_end(entry);
    builder.build_switch(target_addr, default_bb, &cases).unwrap();

    builder.position_at_end(exit_bb);
    builder.build_return(None).unwrap();

    function
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registers::RegisterMode;

    #[test]
    fn dispatches_over_every_known_target_and_verifies() {
        let context = Context::create();
        let module = context.create_module("test");
        let registers = RegisterFile::new(&context, &module, RegisterMode::Globals);

        let void_ty = context.void_type();
        let setup_builder = context.create_builder();
        let f1 = module.add_function("f1", void_ty.fn_type(&[], false), None);
        let f1_entry = context.append_basic_block(f1, "entry");
        setup_builder.position_at_end(f1_entry);
        setup_builder.build_return(None).unwrap();
        let f2 = module.add_function("f2", void_ty.fn_type(&[], false), None);
        let f2_entry = context.append_basic_block(f2, "entry");
        setup_builder.position_at_end(f2_entry);
        setup_builder.build_return(None).unwrap();

        let icaller = build_icaller(&context, &module, &registers, &[(0x1000, f1), (0x2000, f2)]);
        assert_eq!(icaller.get_name().to_str().unwrap(), "rv_icaller");
        module.verify().expect("icaller module must verify");
    }

    #[test]
    fn reuses_the_existing_function_on_a_second_call() {
        let context = Context::create();
        let module = context.create_module("test");
        let registers = RegisterFile::new(&context, &module, RegisterMode::Globals);

        let first = build_icaller(&context, &module, &registers, &[]);
        let second = build_icaller(&context, &module, &registers, &[]);
        assert_eq!(first, second);
    }
}

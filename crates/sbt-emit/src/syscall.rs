//! `rv_syscall`: the two-level switch every `ecall` is translated
//! into. The outer switch maps the guest Linux syscall number (in
//! `a7`) to a host syscall number and argument count; the inner call
//! is a single variadic `syscall(2)` into the host libc.

use inkwell::context::Context;
use inkwell::module::Module;
use inkwell::values::FunctionValue;

use sbt_isa::Reg;

use crate::registers::RegisterFile;

/// One row of the guest-to-host syscall translation table.
#[derive(Clone, Copy, Debug)]
pub struct SyscallEntry {
    pub guest_no: u32,
    pub host_no: u32,
    pub n_args: u8,
}

/// The baseline table: enough for an `exit`/`write`-only guest
/// program, plus `brk`, `close`, and a `fstat` stub wide enough that
/// libc's startup code doesn't immediately fault.
pub fn default_table() -> Vec<SyscallEntry> {
    vec![
        SyscallEntry { guest_no: 93, host_no: 1, n_args: 1 },   // exit
        SyscallEntry { guest_no: 64, host_no: 4, n_args: 3 },   // write
        SyscallEntry { guest_no: 214, host_no: 45, n_args: 1 }, // brk
        SyscallEntry { guest_no: 80, host_no: 108, n_args: 2 }, // fstat (stub)
        SyscallEntry { guest_no: 57, host_no: 6, n_args: 1 },   // close
    ]
}

/// Builds (or returns the existing) `rv_syscall` function: reads the
/// guest syscall number from `a7`, dispatches through `table`, and
/// writes the host call's result back into `a0`.
pub fn build_rv_syscall<'ctx>(
    context: &'ctx Context,
    module: &Module<'ctx>,
    registers: &RegisterFile<'ctx>,
    table: &[SyscallEntry],
) -> FunctionValue<'ctx> {
    if let Some(existing) = module.get_function("rv_syscall") {
        return existing;
    }

    let i32_ty = context.i32_type();
    let void_ty = context.void_type();
    let fn_ty = void_ty.fn_type(&[], false);
    let function = module.add_function("rv_syscall", fn_ty, None);

    let host_syscall = module.get_function("syscall").unwrap_or_else(|| {
        module.add_function("syscall", i32_ty.fn_type(&[i32_ty.into()], true), None)
    });
    let host_exit = module
        .get_function("exit")
        .unwrap_or_else(|| module.add_function("exit", void_ty.fn_type(&[i32_ty.into()], false), None));

    let builder = context.create_builder();
    let entry = context.append_basic_block(function, "entry");
    builder.position_at_end(entry);

    let a7 = registers.x_global(Reg::A7).expect("a7 must be a live global");
    let syscall_no = builder.build_load(i32_ty, a7.as_pointer_value(), "a7").unwrap().into_int_value();

    let exit_bb = context.append_basic_block(function, "syscall_exit");
    let default_bb = context.append_basic_block(function, "syscall_unknown");

    let mut cases = Vec::new();
    for entry_row in table {
        let case_bb = context.append_basic_block(function, &format!("syscall_{}", entry_row.guest_no));
        builder.position_at_end(case_bb);

        let mut args = vec![i32_ty.const_int(u64::from(entry_row.host_no), false).into()];
        let mut reg = Reg::A0;
        for _ in 0..entry_row.n_args {
            let g = registers.x_global(reg).expect("argument register must be a live global");
            let v = builder.build_load(i32_ty, g.as_pointer_value(), "arg").unwrap();
            args.push(v.into());
            reg = reg.offset(1);
        }
        let call = builder.build_call(host_syscall, &args, "host_ret").unwrap();
        let ret = call.try_as_basic_value().left().unwrap().into_int_value();
        let a0 = registers.x_global(Reg::A0).expect("a0 must be a live global");
        builder.build_store(a0.as_pointer_value(), ret).unwrap();
        builder.build_unconditional_branch(exit_bb).unwrap();

        cases.push((i32_ty.const_int(u64::from(entry_row.guest_no), false), case_bb));
    }

    // An unrecognized guest syscall number has no sensible host
    // translation; terminate the process instead of returning garbage
    // to the guest (status 99, matching the reference translator).
    builder.position_at_end(default_bb);
    builder.build_call(host_exit, &[i32_ty.const_int(99, false).into()], "").unwrap();
    builder.build_unreachable().unwrap();

    builder.position_at_end(entry);
    builder.build_switch(syscall_no, default_bb, &cases).unwrap();

    builder.position_at_end(exit_bb);
    builder.build_return(None).unwrap();

    function
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registers::RegisterMode;

    #[test]
    fn default_table_carries_exit_and_write() {
        let table = default_table();
        assert!(table.iter().any(|e| e.guest_no == 93 && e.host_no == 1));
        assert!(table.iter().any(|e| e.guest_no == 64 && e.n_args == 3));
    }

    #[test]
    fn builds_and_verifies_the_dispatcher() {
        let context = Context::create();
        let module = context.create_module("test");
        let registers = RegisterFile::new(&context, &module, RegisterMode::Globals);

        let function = build_rv_syscall(&context, &module, &registers, &default_table());
        assert_eq!(function.get_name().to_str().unwrap(), "rv_syscall");
        module.verify().expect("syscall module must verify");
    }

    #[test]
    fn reuses_the_existing_function_on_a_second_call() {
        let context = Context::create();
        let module = context.create_module("test");
        let registers = RegisterFile::new(&context, &module, RegisterMode::Globals);

        let first = build_rv_syscall(&context, &module, &registers, &default_table());
        let second = build_rv_syscall(&context, &module, &registers, &default_table());
        assert_eq!(first, second);
    }
}

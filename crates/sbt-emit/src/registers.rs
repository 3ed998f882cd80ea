//! The guest register file, materialized as either module globals or
//! per-function local slots.
//!
//! `x0`/`f0` is never stored anywhere: loads of `x0` are the constant
//! zero and stores to it are dropped before any IR is emitted, matching
//! the "register x0" testable property.

use inkwell::builder::Builder;
use inkwell::context::Context;
use inkwell::module::Module;
use inkwell::types::{FloatType, IntType};
use inkwell::values::{FloatValue, FunctionValue, GlobalValue, IntValue, PointerValue};
use inkwell::AddressSpace;

use sbt_isa::Reg;

const NUM_X: usize = 32;
const NUM_F: usize = 32;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RegisterMode {
    /// Every register is a module global; reads/writes go straight to it.
    Globals,
    /// Each function allocates its own slots and syncs with the module
    /// globals at call boundaries, enabling LLVM mem2reg within a function
    /// while still presenting a stable guest ABI across calls.
    Locals,
}

enum Slot<'ctx> {
    Global(GlobalValue<'ctx>),
    Local(PointerValue<'ctx>),
}

impl<'ctx> Slot<'ctx> {
    fn ptr(&self) -> PointerValue<'ctx> {
        match self {
            Slot::Global(g) => g.as_pointer_value(),
            Slot::Local(p) => *p,
        }
    }
}

/// Guest integer + float register file for one translation unit.
///
/// Float slots are `f32` (spec.md §4.3): no F/D decode exists yet, so
/// they are only materialized through [`RegisterFile::fload`]/`fstore`
/// at the hard/soft-float ABI boundary in `caller.rs`.
pub struct RegisterFile<'ctx> {
    mode: RegisterMode,
    i32_ty: IntType<'ctx>,
    f32_ty: FloatType<'ctx>,
    x_globals: Vec<Option<GlobalValue<'ctx>>>,
    f_globals: Vec<Option<GlobalValue<'ctx>>>,
    x_locals: Vec<Option<PointerValue<'ctx>>>,
    f_locals: Vec<Option<PointerValue<'ctx>>>,
    read: Vec<bool>,
    written: Vec<bool>,
}

impl<'ctx> RegisterFile<'ctx> {
    /// Declare the module-level globals backing every non-zero register.
    /// In `Locals` mode these remain the cross-call synchronization
    /// points; in `Globals` mode they are the only storage.
    pub fn new(context: &'ctx Context, module: &Module<'ctx>, mode: RegisterMode) -> Self {
        let i32_ty = context.i32_type();
        let f32_ty = context.f32_type();

        let x_globals = (0..NUM_X)
            .map(|i| {
                if i == 0 {
                    None
                } else {
                    let g = module.add_global(i32_ty, None, &format!("x{i}"));
                    g.set_initializer(&i32_ty.const_zero());
                    Some(g)
                }
            })
            .collect();
        let f_globals = (0..NUM_F)
            .map(|i| {
                let g = module.add_global(f32_ty, None, &format!("f{i}"));
                g.set_initializer(&f32_ty.const_zero());
                Some(g)
            })
            .collect();

        RegisterFile {
            mode,
            i32_ty,
            f32_ty,
            x_globals,
            f_globals,
            x_locals: vec![None; NUM_X],
            f_locals: vec![None; NUM_F],
            read: vec![false; NUM_X],
            written: vec![false; NUM_X],
        }
    }

    pub fn mode(&self) -> RegisterMode {
        self.mode
    }

    /// In `Locals` mode, allocate this function's local slots and copy
    /// every global's current value in (the call-boundary "sync in").
    /// A no-op in `Globals` mode.
    pub fn enter_function(&mut self, builder: &Builder<'ctx>, function: FunctionValue<'ctx>) {
        if self.mode != RegisterMode::Locals {
            return;
        }
        let entry = function.get_first_basic_block().expect("function must have an entry block");
        builder.position_at_end(entry);

        for i in 1..NUM_X {
            let alloca = builder.build_alloca(self.i32_ty, &format!("x{i}.local")).unwrap();
            self.x_locals[i] = Some(alloca);
        }
        for i in 0..NUM_F {
            let alloca = builder.build_alloca(self.f32_ty, &format!("f{i}.local")).unwrap();
            self.f_locals[i] = Some(alloca);
        }
        self.sync_in(builder);
    }

    /// Copy every module global's current value into this function's
    /// local slots (globals→locals). Run once at function entry and
    /// again after every call site, since a callee may have left fresh
    /// values (e.g. its return, or anything it wrote through `ecall`) in
    /// the globals that the caller's locals must observe (spec.md §4.3:
    /// sync "on entry and the reverse on return"). A no-op in `Globals`
    /// mode.
    pub fn sync_in(&self, builder: &Builder<'ctx>) {
        if self.mode != RegisterMode::Locals {
            return;
        }
        for i in 1..NUM_X {
            if let (Some(local), Some(global)) = (self.x_locals[i], self.x_globals[i]) {
                let v = builder.build_load(self.i32_ty, global.as_pointer_value(), "sync_in").unwrap();
                builder.build_store(local, v).unwrap();
            }
        }
        for i in 0..NUM_F {
            if let (Some(local), Some(global)) = (self.f_locals[i], self.f_globals[i]) {
                let v = builder.build_load(self.f32_ty, global.as_pointer_value(), "fsync_in").unwrap();
                builder.build_store(local, v).unwrap();
            }
        }
    }

    /// Copy every local slot back to its module global (the call-boundary
    /// "sync out"). Run before any call site (direct or external) and at
    /// function exit, so the callee/host sees this function's latest
    /// register values. A no-op in `Globals` mode.
    pub fn sync_out(&self, builder: &Builder<'ctx>) {
        if self.mode != RegisterMode::Locals {
            return;
        }
        for i in 1..NUM_X {
            if let (Some(local), Some(global)) = (self.x_locals[i], self.x_globals[i]) {
                let v = builder.build_load(self.i32_ty, local, "sync_out").unwrap();
                builder.build_store(global.as_pointer_value(), v).unwrap();
            }
        }
        for i in 0..NUM_F {
            if let (Some(local), Some(global)) = (self.f_locals[i], self.f_globals[i]) {
                let v = builder.build_load(self.f32_ty, local, "fsync_out").unwrap();
                builder.build_store(global.as_pointer_value(), v).unwrap();
            }
        }
    }

    fn x_slot(&self, reg: Reg) -> Option<Slot<'ctx>> {
        let i = reg.index();
        match self.mode {
            RegisterMode::Globals => self.x_globals[i].map(Slot::Global),
            RegisterMode::Locals => self.x_locals[i].map(Slot::Local),
        }
    }

    fn f_slot(&self, reg: Reg) -> Option<Slot<'ctx>> {
        let i = reg.index();
        match self.mode {
            RegisterMode::Globals => self.f_globals[i].map(Slot::Global),
            RegisterMode::Locals => self.f_locals[i].map(Slot::Local),
        }
    }

    pub fn load(&mut self, builder: &Builder<'ctx>, reg: Reg) -> IntValue<'ctx> {
        if reg.is_zero() {
            return self.i32_ty.const_zero();
        }
        self.read[reg.index()] = true;
        let ptr = self.x_slot(reg).expect("register slot must exist").ptr();
        builder
            .build_load(self.i32_ty, ptr, &format!("{reg}.val"))
            .unwrap()
            .into_int_value()
    }

    /// Stores to `x0` are dropped: no IR is emitted.
    pub fn store(&mut self, builder: &Builder<'ctx>, reg: Reg, value: IntValue<'ctx>) {
        if reg.is_zero() {
            return;
        }
        self.written[reg.index()] = true;
        let ptr = self.x_slot(reg).expect("register slot must exist").ptr();
        builder.build_store(ptr, value).unwrap();
    }

    pub fn fload(&mut self, builder: &Builder<'ctx>, reg: Reg) -> FloatValue<'ctx> {
        let ptr = self.f_slot(reg).expect("float register slot must exist").ptr();
        builder
            .build_load(self.f32_ty, ptr, &format!("{reg}.fval"))
            .unwrap()
            .into_float_value()
    }

    pub fn fstore(&mut self, builder: &Builder<'ctx>, reg: Reg, value: FloatValue<'ctx>) {
        let ptr = self.f_slot(reg).expect("float register slot must exist").ptr();
        builder.build_store(ptr, value).unwrap();
    }

    pub fn was_read(&self, reg: Reg) -> bool {
        !reg.is_zero() && self.read[reg.index()]
    }

    pub fn was_written(&self, reg: Reg) -> bool {
        !reg.is_zero() && self.written[reg.index()]
    }

    pub fn address_space(&self) -> AddressSpace {
        AddressSpace::default()
    }

    /// Direct access to a register's module global, bypassing the
    /// per-function locals/globals abstraction. Used by the syscall
    /// dispatcher and the indirect-call trampoline, which are
    /// standalone functions that always read and write the shared ABI
    /// registers rather than a translated function's own slots.
    pub fn x_global(&self, reg: Reg) -> Option<GlobalValue<'ctx>> {
        self.x_globals[reg.index()]
    }
}

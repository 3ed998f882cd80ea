//! LLVM IR emission for the static binary translator: register file,
//! shadow-image materialization, relocation resolution, the
//! function/BB builder, the instruction translator, ABI lowering, and
//! the syscall/icaller generators.

mod caller;
mod function;
mod icaller;
mod instr;
mod registers;
mod relocation;
mod shadow;
mod syscall;

pub use caller::{ArgClass, CallLowering, Ffi, FloatAbi, MAX_ARGS};
pub use function::{FunctionBuilder, InstrMap};
pub use icaller::build_icaller;
pub use instr::{translate_instruction, TranslationContext};
pub use registers::{RegisterFile, RegisterMode};
pub use relocation::{RelocValue, RelocationResolver, SymbolResolution};
pub use shadow::materialize_shadow_image;
pub use syscall::{build_rv_syscall, default_table as default_syscall_table, SyscallEntry};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EmitError {
    #[error("decode error: {0}")]
    Decode(#[from] sbt_isa::DecodeError),
    #[error("basic-block split error: {0}")]
    Split(#[from] sbt_cfg::SplitError),
    #[error("relocation pairing error: {0}")]
    Pairing(#[from] sbt_elf::PairingError),
    #[error("shadow image error: {0}")]
    Shadow(#[from] sbt_elf::ShadowImageError),
    #[error("call target {0:?} has neither an in-module definition nor an external thunk")]
    FunctionNotFound(String),
    #[error("internal invariant violated: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, EmitError>;

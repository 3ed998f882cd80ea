//! CLI argument definitions (spec.md §6: `sbt [-o OUTPUT] INPUT…`).

use std::path::PathBuf;

use clap::Parser;

/// Exit code for success.
pub const EXIT_SUCCESS: i32 = 0;
/// Exit code for failure.
pub const EXIT_FAILURE: i32 = 1;

#[derive(Parser)]
#[command(name = "sbt")]
#[command(about = "Static binary translator: RISC-V32 ELF objects to LLVM bitcode")]
#[command(version)]
pub struct Cli {
    /// Output bitcode path. Defaults to `x86-<first-input-basename>.bc`.
    #[arg(short, long, value_name = "OUTPUT")]
    pub output: Option<PathBuf>,

    /// Realize the register file as per-function local slots instead
    /// of module globals (spec.md §4.3 LOCALS mode).
    #[arg(long)]
    pub locals: bool,

    /// Optional address-to-source sidecar (spec.md §6 "Optional A2S file").
    #[arg(long, value_name = "FILE")]
    pub a2s: Option<PathBuf>,

    /// Enable verbose output (debug-level tracing).
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress all but error-level output.
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub silent: bool,

    /// RISC-V ELF32 object files to translate, linked into one module.
    #[arg(value_name = "INPUT", required = true)]
    pub inputs: Vec<PathBuf>,
}

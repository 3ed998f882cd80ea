//! sbt CLI driver.

mod cli;

use std::path::{Path, PathBuf};

use clap::Parser;
use inkwell::context::Context;
use tracing_subscriber::EnvFilter;

use cli::{Cli, EXIT_FAILURE, EXIT_SUCCESS};
use sbt::TranslatorConfig;

const TOOL_NAME: &str = "sbt";

fn main() {
    let cli = Cli::parse();

    let default_level = if cli.silent { "sbt=error" } else if cli.verbose { "sbt=debug" } else { "sbt=info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(default_level.parse().unwrap()))
        .with_target(false)
        .init();

    std::process::exit(run(&cli));
}

fn run(cli: &Cli) -> i32 {
    let Some(first) = cli.inputs.first() else {
        diagnostic("", "at least one input ELF is required");
        return EXIT_FAILURE;
    };

    if let Some(a2s_path) = &cli.a2s {
        if let Err(e) = load_a2s(a2s_path) {
            diagnostic(&a2s_path.display().to_string(), &e.to_string());
            return EXIT_FAILURE;
        }
    }

    let output = cli.output.clone().unwrap_or_else(|| default_output(first));
    let module_name = first.file_stem().and_then(|s| s.to_str()).unwrap_or("module");
    let config = TranslatorConfig::new(output.clone(), cli.locals, cli.verbose);

    let context = Context::create();
    let inputs: Vec<&Path> = cli.inputs.iter().map(PathBuf::as_path).collect();

    tracing::info!(inputs = inputs.len(), output = %output.display(), "translating");

    let module = match sbt::translate_inputs(&context, &inputs, module_name, &config) {
        Ok(m) => m,
        Err(e) => {
            diagnostic(&first.display().to_string(), &e.to_string());
            return EXIT_FAILURE;
        }
    };

    if !module.write_bitcode_to_path(&output) {
        diagnostic(&output.display().to_string(), "failed to write bitcode");
        return EXIT_FAILURE;
    }

    tracing::info!(output = %output.display(), "wrote bitcode");
    EXIT_SUCCESS
}

fn load_a2s(path: &Path) -> sbt::Result<sbt::A2SMap> {
    let text = std::fs::read_to_string(path)?;
    sbt::a2s::parse(&text)
}

/// `x86-<first-input-basename>.bc` (spec.md §6 CLI default).
fn default_output(first_input: &Path) -> std::path::PathBuf {
    let stem = first_input.file_stem().and_then(|s| s.to_str()).unwrap_or("out");
    std::path::PathBuf::from(format!("x86-{stem}.bc"))
}

fn diagnostic(input: &str, message: &str) {
    if input.is_empty() {
        eprintln!("{TOOL_NAME}: {message}");
    } else {
        eprintln!("{TOOL_NAME}: {input}: {message}");
    }
}

//! Translator configuration assembled from CLI flags.

use std::path::PathBuf;

use sbt_emit::RegisterMode;

/// Options that shape how `translate_object(s)` lowers a module,
/// mirroring the teacher's `HeaderConfig` shape but scoped to what
/// this translator needs (register realization strategy, output
/// location, optional debug trace).
#[derive(Clone, Debug)]
pub struct TranslatorConfig {
    pub register_mode: RegisterMode,
    pub output: PathBuf,
    pub debug_trace: bool,
}

impl TranslatorConfig {
    pub fn new(output: PathBuf, locals: bool, debug_trace: bool) -> Self {
        Self {
            register_mode: if locals { RegisterMode::Locals } else { RegisterMode::Globals },
            output,
            debug_trace,
        }
    }
}

//! Turns a laid-out [`sbt_elf::ShadowImage`] into one immutable LLVM
//! global array per section, so relocation edges stay symbolic instead
//! of collapsing into a single blob.

use std::collections::HashMap;

use inkwell::context::Context;
use inkwell::module::Module;
use inkwell::values::GlobalValue;

use sbt_elf::ShadowImage;

/// Maps a section name to the global array backing it in the emitted
/// module, for `section_base(name)`-style lookups during relocation and
/// load/store address computation.
pub fn materialize_shadow_image<'ctx>(
    context: &'ctx Context,
    module: &Module<'ctx>,
    image: &ShadowImage,
) -> HashMap<String, GlobalValue<'ctx>> {
    let i8_ty = context.i8_type();
    let mut globals = HashMap::new();

    for section in image.sections() {
        let array_ty = i8_ty.array_type(section.size);
        let global = module.add_global(array_ty, None, &format!("shadow{}", sanitize(&section.name)));
        let bytes: Vec<_> = section.bytes.iter().map(|&b| i8_ty.const_int(b as u64, false)).collect();
        global.set_initializer(&i8_ty.const_array(&bytes));
        global.set_constant(!section.is_bss);
        globals.insert(section.name.clone(), global);
    }

    globals
}

fn sanitize(name: &str) -> String {
    name.chars().map(|c| if c.is_ascii_alphanumeric() { c } else { '_' }).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use sbt_elf::section::{Section, SectionKind};

    fn section(name: &str, size: u32, kind: SectionKind, data: Vec<u8>) -> Section {
        Section { index: 0, name: name.to_string(), base: 0, size, kind, data, relocations: Vec::new(), align: 4, shadow_offset: None }
    }

    #[test]
    fn materializes_one_global_per_section_with_sanitized_name() {
        let context = Context::create();
        let module = context.create_module("test");
        let sections = vec![
            section(".data", 4, SectionKind::Data, vec![1, 2, 3, 4]),
            section(".bss", 8, SectionKind::Bss, Vec::new()),
        ];
        let image = ShadowImage::build(&sections, |_| None).unwrap();

        let globals = materialize_shadow_image(&context, &module, &image);

        let data = globals.get(".data").expect("missing .data global");
        assert_eq!(data.get_name().to_str().unwrap(), "shadow_data");
        assert!(data.is_constant());

        let bss = globals.get(".bss").expect("missing .bss global");
        assert!(!bss.is_constant(), ".bss must stay mutable for runtime writes");
    }
}

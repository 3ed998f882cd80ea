//! End-to-end tests driving the translator over hand-assembled RISC-V32
//! ELF objects (no `riscv32-*-gcc` toolchain is assumed to be on the
//! test machine, so the fixtures are built byte-for-byte instead of
//! compiled).

use std::io::Write;

use inkwell::context::Context;
use predicates::prelude::*;

use sbt::{translate_object, RegisterMode};
use sbt_elf::constants::{
    ELF_CLASS_32, ELF_DATA_LSB, ELF_MACHINE_RISCV, ELF_MAGIC, ELF_TYPE_REL, SHF_ALLOC,
    SHF_EXECINSTR, SHT_PROGBITS, SHT_STRTAB, SHT_SYMTAB, STB_GLOBAL, STT_FUNC,
};
use sbt_elf::ElfFile;

fn le32(v: u32) -> [u8; 4] {
    v.to_le_bytes()
}
fn le16(v: u16) -> [u8; 2] {
    v.to_le_bytes()
}

/// Builds a minimal ET_REL object with one `.text` section defining a
/// single global function `name`, containing `code` (already a
/// multiple of 4 bytes). No relocations, no data sections.
fn one_function_object(name: &str, code: &[u8]) -> Vec<u8> {
    const TEXT_BASE: u32 = 0x1000;

    let mut file = vec![0u8; 52]; // ELF header, patched at the end.

    let text_off = file.len() as u32;
    file.extend_from_slice(code);

    let strtab_off = file.len() as u32;
    let mut strtab = vec![0u8]; // index 0: empty name
    let name_off = strtab.len() as u32;
    strtab.extend_from_slice(name.as_bytes());
    strtab.push(0);
    file.extend_from_slice(&strtab);

    let shstrtab_off = file.len() as u32;
    let mut shstrtab = vec![0u8];
    let shname_text = shstrtab.len() as u32;
    shstrtab.extend_from_slice(b".text\0");
    let shname_symtab = shstrtab.len() as u32;
    shstrtab.extend_from_slice(b".symtab\0");
    let shname_strtab = shstrtab.len() as u32;
    shstrtab.extend_from_slice(b".strtab\0");
    let shname_shstrtab = shstrtab.len() as u32;
    shstrtab.extend_from_slice(b".shstrtab\0");
    file.extend_from_slice(&shstrtab);

    let symtab_off = file.len() as u32;
    let mut symtab = vec![0u8; 16]; // null symbol
    let mut sym = Vec::with_capacity(16);
    sym.extend_from_slice(&le32(name_off));
    sym.extend_from_slice(&le32(TEXT_BASE));
    sym.extend_from_slice(&le32(code.len() as u32));
    sym.push((STB_GLOBAL << 4) | STT_FUNC);
    sym.push(0);
    sym.extend_from_slice(&le16(1)); // shndx: .text is section 1
    symtab.extend_from_slice(&sym);
    file.extend_from_slice(&symtab);

    let shoff = file.len() as u32;

    let mut shdr = Vec::new();
    // Section 0: NULL
    shdr.extend_from_slice(&[0u8; 40]);
    // Section 1: .text
    shdr.extend_from_slice(&le32(shname_text));
    shdr.extend_from_slice(&le32(SHT_PROGBITS));
    shdr.extend_from_slice(&le32(SHF_ALLOC | SHF_EXECINSTR));
    shdr.extend_from_slice(&le32(TEXT_BASE));
    shdr.extend_from_slice(&le32(text_off));
    shdr.extend_from_slice(&le32(code.len() as u32));
    shdr.extend_from_slice(&le32(0));
    shdr.extend_from_slice(&le32(0));
    shdr.extend_from_slice(&le32(4));
    shdr.extend_from_slice(&le32(0));
    // Section 2: .symtab
    shdr.extend_from_slice(&le32(shname_symtab));
    shdr.extend_from_slice(&le32(SHT_SYMTAB));
    shdr.extend_from_slice(&le32(0));
    shdr.extend_from_slice(&le32(0));
    shdr.extend_from_slice(&le32(symtab_off));
    shdr.extend_from_slice(&le32(symtab.len() as u32));
    shdr.extend_from_slice(&le32(3)); // sh_link: strtab is section 3
    shdr.extend_from_slice(&le32(1));
    shdr.extend_from_slice(&le32(4));
    shdr.extend_from_slice(&le32(16));
    // Section 3: .strtab
    shdr.extend_from_slice(&le32(shname_strtab));
    shdr.extend_from_slice(&le32(SHT_STRTAB));
    shdr.extend_from_slice(&le32(0));
    shdr.extend_from_slice(&le32(0));
    shdr.extend_from_slice(&le32(strtab_off));
    shdr.extend_from_slice(&le32(strtab.len() as u32));
    shdr.extend_from_slice(&le32(0));
    shdr.extend_from_slice(&le32(0));
    shdr.extend_from_slice(&le32(1));
    shdr.extend_from_slice(&le32(0));
    // Section 4: .shstrtab
    shdr.extend_from_slice(&le32(shname_shstrtab));
    shdr.extend_from_slice(&le32(SHT_STRTAB));
    shdr.extend_from_slice(&le32(0));
    shdr.extend_from_slice(&le32(0));
    shdr.extend_from_slice(&le32(shstrtab_off));
    shdr.extend_from_slice(&le32(shstrtab.len() as u32));
    shdr.extend_from_slice(&le32(0));
    shdr.extend_from_slice(&le32(0));
    shdr.extend_from_slice(&le32(1));
    shdr.extend_from_slice(&le32(0));

    file.extend_from_slice(&shdr);

    // Patch the ELF header now that every offset is known.
    file[0..4].copy_from_slice(&ELF_MAGIC.to_le_bytes());
    file[4] = ELF_CLASS_32;
    file[5] = ELF_DATA_LSB;
    file[6] = 1; // EI_VERSION
    file[16..18].copy_from_slice(&le16(ELF_TYPE_REL));
    file[18..20].copy_from_slice(&le16(ELF_MACHINE_RISCV));
    file[20..24].copy_from_slice(&le32(1)); // e_version
    file[24..28].copy_from_slice(&le32(0)); // e_entry: unused for ET_REL
    file[28..32].copy_from_slice(&le32(0)); // e_phoff
    file[32..36].copy_from_slice(&shoff.to_le_bytes());
    file[36..40].copy_from_slice(&le32(0)); // e_flags
    file[40..42].copy_from_slice(&le16(52)); // e_ehsize
    file[44..46].copy_from_slice(&le16(0)); // e_phnum
    file[46..48].copy_from_slice(&le16(40)); // e_shentsize
    file[48..50].copy_from_slice(&le16(5)); // e_shnum
    file[50..52].copy_from_slice(&le16(4)); // e_shstrndx

    file
}

/// `addi a0, a0, 1` followed by `jalr x0, 0(x1)` (the `ret` pseudo-op).
const ADD_ONE: [u8; 8] = [0x13, 0x05, 0x15, 0x00, 0x67, 0x80, 0x00, 0x00];

#[test]
fn parses_a_hand_assembled_object() {
    let bytes = one_function_object("add_one", &ADD_ONE);
    let elf = ElfFile::parse(&bytes).expect("fixture must parse");
    assert_eq!(elf.header.e_machine, ELF_MACHINE_RISCV);
    let text = elf.section_by_name(".text").expect("no .text section");
    assert_eq!(text.base, 0x1000);
    assert_eq!(text.data, ADD_ONE);
    let sym = elf.symbol_by_name("add_one").expect("no add_one symbol");
    assert!(sym.is_function());
    assert_eq!(sym.value, 0x1000);
}

#[test]
fn translates_and_verifies_a_single_function() {
    let bytes = one_function_object("add_one", &ADD_ONE);
    let elf = ElfFile::parse(&bytes).unwrap();

    let context = Context::create();
    let module = translate_object(&context, &elf, "add_one_module", RegisterMode::Globals)
        .expect("translation must succeed");

    module.verify().expect("emitted module must verify");
    assert!(module.get_function("add_one").is_some(), "translated function missing from module");
}

#[test]
fn translates_in_locals_mode_too() {
    let bytes = one_function_object("add_one", &ADD_ONE);
    let elf = ElfFile::parse(&bytes).unwrap();

    let context = Context::create();
    let module = translate_object(&context, &elf, "add_one_locals", RegisterMode::Locals)
        .expect("translation must succeed");

    module.verify().expect("emitted module must verify");
}

#[test]
fn rejects_a_non_risc_v_object() {
    let mut bytes = one_function_object("add_one", &ADD_ONE);
    bytes[18..20].copy_from_slice(&le16(0x3e)); // EM_X86_64
    assert!(ElfFile::parse(&bytes).is_err());
}

#[test]
fn cli_requires_at_least_one_input() {
    let mut cmd = assert_cmd::Command::cargo_bin("sbt").unwrap();
    cmd.assert().failure();
}

#[test]
fn cli_reports_a_missing_input_file() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("does-not-exist.o");

    let mut cmd = assert_cmd::Command::cargo_bin("sbt").unwrap();
    cmd.arg(&missing);
    cmd.assert().failure().stderr(predicate::str::contains("sbt:"));
}

#[test]
fn cli_translates_a_fixture_object_to_bitcode() {
    let dir = tempfile::tempdir().unwrap();
    let input_path = dir.path().join("add_one.o");
    std::fs::File::create(&input_path).unwrap().write_all(&one_function_object("add_one", &ADD_ONE)).unwrap();
    let output_path = dir.path().join("out.bc");

    let mut cmd = assert_cmd::Command::cargo_bin("sbt").unwrap();
    cmd.arg("-o").arg(&output_path).arg(&input_path);
    cmd.assert().success();
    assert!(output_path.exists(), "bitcode output was not written");
}

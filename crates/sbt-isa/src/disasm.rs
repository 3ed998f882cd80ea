//! Disassembly printer.
//!
//! Used only as a debug side channel: the translator attaches the
//! sanitized output of [`disassemble`] as IR metadata on every emitted
//! instruction, and prints it when the debug trace is enabled.

use crate::opcode::Opcode;
use crate::{Instruction, Operands};

/// Render a decoded instruction the way a disassembler would, e.g.
/// `"addi a0, zero, 5"`.
pub fn disassemble(instr: &Instruction) -> String {
    let mnemonic = instr.opcode.mnemonic();
    match instr.operands {
        Operands::R { rd, rs1, rs2 } => format!("{mnemonic} {rd}, {rs1}, {rs2}"),
        Operands::I { rd, rs1, imm } => format!("{mnemonic} {rd}, {rs1}, {imm}"),
        Operands::S { rs1, rs2, imm } => format!("{mnemonic} {rs2}, {imm}({rs1})"),
        Operands::B { rs1, rs2, imm } => format!("{mnemonic} {rs1}, {rs2}, {imm}"),
        Operands::U { rd, imm } => format!("{mnemonic} {rd}, 0x{:x}", (imm as u32) >> 12),
        Operands::J { rd, imm } => format!("{mnemonic} {rd}, {imm}"),
        Operands::Csr { rd, rs1, csr } => format!("{mnemonic} {rd}, 0x{csr:x}, {rs1}"),
        Operands::CsrI { rd, imm, csr } => format!("{mnemonic} {rd}, 0x{csr:x}, {imm}"),
        Operands::None => mnemonic.to_string(),
    }
}

/// Sanitize a disassembly string into a valid LLVM metadata-node name:
/// everything outside `[A-Za-z0-9_.]` becomes `_`.
pub fn sanitize_for_metadata(s: &str) -> String {
    s.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '_' { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::register::Reg;

    #[test]
    fn disassembles_addi() {
        let instr = Instruction {
            opcode: Opcode::Addi,
            operands: Operands::I { rd: Reg::A0, rs1: Reg::ZERO, imm: 5 },
            size: 4,
            raw: 0,
        };
        assert_eq!(disassemble(&instr), "addi a0, zero, 5");
    }

    #[test]
    fn sanitizes_illegal_metadata_characters() {
        assert_eq!(sanitize_for_metadata("sw a1, 4(sp)"), "sw_a1__4_sp_");
    }
}

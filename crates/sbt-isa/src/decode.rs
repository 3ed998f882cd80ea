//! RV32I word decoder.

use thiserror::Error;

use crate::opcode::Opcode;
use crate::register::Reg;
use crate::{Instruction, Operands};

#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
#[error("invalid instruction encoding at 0x{addr:08x}: 0x{word:08x}")]
pub struct DecodeError {
    pub addr: u32,
    pub word: u32,
}

fn opcode_field(w: u32) -> u32 {
    w & 0x7f
}
fn funct3(w: u32) -> u32 {
    (w >> 12) & 0x7
}
fn funct7(w: u32) -> u32 {
    (w >> 25) & 0x7f
}
fn rd(w: u32) -> Reg {
    Reg::from_bits(w >> 7)
}
fn rs1(w: u32) -> Reg {
    Reg::from_bits(w >> 15)
}
fn rs2(w: u32) -> Reg {
    Reg::from_bits(w >> 20)
}

fn sext(value: u32, bits: u32) -> i32 {
    let shift = 32 - bits;
    ((value << shift) as i32) >> shift
}

fn i_imm(w: u32) -> i32 {
    sext(w >> 20, 12)
}

fn s_imm(w: u32) -> i32 {
    let imm = ((w >> 25) << 5) | ((w >> 7) & 0x1f);
    sext(imm, 12)
}

fn b_imm(w: u32) -> i32 {
    let imm = (((w >> 31) & 0x1) << 12)
        | (((w >> 7) & 0x1) << 11)
        | (((w >> 25) & 0x3f) << 5)
        | (((w >> 8) & 0xf) << 1);
    sext(imm, 13)
}

fn u_imm(w: u32) -> i32 {
    (w & 0xFFFFF000) as i32
}

fn j_imm(w: u32) -> i32 {
    let imm = (((w >> 31) & 0x1) << 20)
        | (((w >> 12) & 0xff) << 12)
        | (((w >> 20) & 0x1) << 11)
        | (((w >> 21) & 0x3ff) << 1);
    sext(imm, 21)
}

fn csr_field(w: u32) -> u16 {
    (w >> 20) as u16
}

/// Decode one 32-bit RISC-V word at `addr` into an [`Instruction`].
///
/// Only RV32I + Zicsr + Zifencei encodings are recognized; anything else
/// (compressed, M/A/F/D extension, privileged, reserved) is rejected with
/// [`DecodeError`], matching the translator's out-of-scope instruction set.
pub fn decode(addr: u32, word: u32) -> Result<Instruction, DecodeError> {
    let err = || DecodeError { addr, word };
    let op = opcode_field(word);
    let f3 = funct3(word);
    let f7 = funct7(word);

    let (opcode, operands) = match op {
        0x37 => (Opcode::Lui, Operands::U { rd: rd(word), imm: u_imm(word) }),
        0x17 => (Opcode::Auipc, Operands::U { rd: rd(word), imm: u_imm(word) }),
        0x6F => (Opcode::Jal, Operands::J { rd: rd(word), imm: j_imm(word) }),
        0x67 if f3 == 0 => (
            Opcode::Jalr,
            Operands::I { rd: rd(word), rs1: rs1(word), imm: i_imm(word) },
        ),
        0x63 => {
            let opcode = match f3 {
                0 => Opcode::Beq,
                1 => Opcode::Bne,
                4 => Opcode::Blt,
                5 => Opcode::Bge,
                6 => Opcode::Bltu,
                7 => Opcode::Bgeu,
                _ => return Err(err()),
            };
            (opcode, Operands::B { rs1: rs1(word), rs2: rs2(word), imm: b_imm(word) })
        }
        0x03 => {
            let opcode = match f3 {
                0 => Opcode::Lb,
                1 => Opcode::Lh,
                2 => Opcode::Lw,
                4 => Opcode::Lbu,
                5 => Opcode::Lhu,
                _ => return Err(err()),
            };
            (opcode, Operands::I { rd: rd(word), rs1: rs1(word), imm: i_imm(word) })
        }
        0x23 => {
            let opcode = match f3 {
                0 => Opcode::Sb,
                1 => Opcode::Sh,
                2 => Opcode::Sw,
                _ => return Err(err()),
            };
            (opcode, Operands::S { rs1: rs1(word), rs2: rs2(word), imm: s_imm(word) })
        }
        0x13 => {
            let shamt = ((word >> 20) & 0x1f) as i32;
            let opcode = match f3 {
                0 => Opcode::Addi,
                1 if (f7 & 0xFE) == 0 => Opcode::Slli,
                2 => Opcode::Slti,
                3 => Opcode::Sltiu,
                4 => Opcode::Xori,
                5 if f7 == 0x00 => Opcode::Srli,
                5 if f7 == 0x20 => Opcode::Srai,
                6 => Opcode::Ori,
                7 => Opcode::Andi,
                _ => return Err(err()),
            };
            let imm = if matches!(opcode, Opcode::Slli | Opcode::Srli | Opcode::Srai) {
                shamt
            } else {
                i_imm(word)
            };
            (opcode, Operands::I { rd: rd(word), rs1: rs1(word), imm })
        }
        0x33 => {
            let opcode = match (f7, f3) {
                (0x00, 0) => Opcode::Add,
                (0x20, 0) => Opcode::Sub,
                (0x01, 0) => Opcode::Mul,
                (0x00, 1) => Opcode::Sll,
                (0x00, 2) => Opcode::Slt,
                (0x00, 3) => Opcode::Sltu,
                (0x00, 4) => Opcode::Xor,
                (0x00, 5) => Opcode::Srl,
                (0x20, 5) => Opcode::Sra,
                (0x00, 6) => Opcode::Or,
                (0x00, 7) => Opcode::And,
                _ => return Err(err()),
            };
            (opcode, Operands::R { rd: rd(word), rs1: rs1(word), rs2: rs2(word) })
        }
        0x0F if f3 == 0 => (Opcode::Fence, Operands::None),
        0x0F if f3 == 1 => (Opcode::FenceI, Operands::None),
        0x73 => match f3 {
            0 if word == 0x0000_0073 => (Opcode::Ecall, Operands::None),
            0 if word == 0x0010_0073 => (Opcode::Ebreak, Operands::None),
            1 => (
                Opcode::Csrrw,
                Operands::Csr { rd: rd(word), rs1: rs1(word), csr: csr_field(word) },
            ),
            2 => (
                Opcode::Csrrs,
                Operands::Csr { rd: rd(word), rs1: rs1(word), csr: csr_field(word) },
            ),
            3 => (
                Opcode::Csrrc,
                Operands::Csr { rd: rd(word), rs1: rs1(word), csr: csr_field(word) },
            ),
            5 => (
                Opcode::Csrrwi,
                Operands::CsrI { rd: rd(word), imm: rs1(word).0, csr: csr_field(word) },
            ),
            6 => (
                Opcode::Csrrsi,
                Operands::CsrI { rd: rd(word), imm: rs1(word).0, csr: csr_field(word) },
            ),
            7 => (
                Opcode::Csrrci,
                Operands::CsrI { rd: rd(word), imm: rs1(word).0, csr: csr_field(word) },
            ),
            _ => return Err(err()),
        },
        _ => return Err(err()),
    };

    Ok(Instruction { opcode, operands, size: 4, raw: word })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_addi_x1_x0_5() {
        // addi x1, x0, 5
        let w = 0x0050_0093;
        let i = decode(0x1000, w).unwrap();
        assert_eq!(i.opcode, Opcode::Addi);
        assert_eq!(i.operands, Operands::I { rd: Reg(1), rs1: Reg(0), imm: 5 });
    }

    #[test]
    fn decodes_lui() {
        // lui x5, 0x12345
        let w = 0x1234_52b7;
        let i = decode(0, w).unwrap();
        assert_eq!(i.opcode, Opcode::Lui);
        assert_eq!(i.operands, Operands::U { rd: Reg(5), imm: 0x1234_5000u32 as i32 });
    }

    #[test]
    fn decodes_jal_negative_offset() {
        // jal x0, -4  (infinite loop: jump to self)
        let w = 0xFFDF_F06F;
        let i = decode(0x2000, w).unwrap();
        assert_eq!(i.opcode, Opcode::Jal);
        assert_eq!(i.operands, Operands::J { rd: Reg(0), imm: -4 });
    }

    #[test]
    fn decodes_beq() {
        // beq x1, x2, 8
        let w = 0x0020_8463;
        let i = decode(0, w).unwrap();
        assert_eq!(i.opcode, Opcode::Beq);
        assert_eq!(i.operands, Operands::B { rs1: Reg(1), rs2: Reg(2), imm: 8 });
    }

    #[test]
    fn rejects_unknown_opcode() {
        assert!(decode(0, 0x0000_0000).is_err());
    }

    #[test]
    fn rejects_amo_extension() {
        // AMOADD.W, opcode 0x2F - not modeled (A extension out of scope)
        assert!(decode(0, 0x0000_202F).is_err());
    }

    #[test]
    fn shift_immediates_use_low_bits_only() {
        // slli x1, x1, 31
        let w = 0x01f0_9093;
        let i = decode(0, w).unwrap();
        assert_eq!(i.opcode, Opcode::Slli);
        assert_eq!(i.operands, Operands::I { rd: Reg(1), rs1: Reg(1), imm: 31 });
    }
}

//! ELF32/RISC-V specification constants.

pub const ELF_MAGIC: u32 = 0x464C_457F; // 0x7F 'E' 'L' 'F'
pub const ELF_CLASS_32: u8 = 1;
pub const ELF_CLASS_64: u8 = 2;
pub const ELF_DATA_LSB: u8 = 1;
pub const ELF_TYPE_EXEC: u16 = 2;
pub const ELF_TYPE_REL: u16 = 1;
pub const ELF_MACHINE_RISCV: u16 = 243;

pub const PT_LOAD: u32 = 1;

pub const SHT_NULL: u32 = 0;
pub const SHT_PROGBITS: u32 = 1;
pub const SHT_SYMTAB: u32 = 2;
pub const SHT_STRTAB: u32 = 3;
pub const SHT_RELA: u32 = 4;
pub const SHT_NOBITS: u32 = 8;
pub const SHT_REL: u32 = 9;

pub const SHF_WRITE: u32 = 0x1;
pub const SHF_ALLOC: u32 = 0x2;
pub const SHF_EXECINSTR: u32 = 0x4;

pub const STB_LOCAL: u8 = 0;
pub const STB_GLOBAL: u8 = 1;
pub const STB_WEAK: u8 = 2;

pub const STT_NOTYPE: u8 = 0;
pub const STT_OBJECT: u8 = 1;
pub const STT_FUNC: u8 = 2;
pub const STT_SECTION: u8 = 3;
pub const STT_FILE: u8 = 4;

pub const SHN_UNDEF: u16 = 0;
pub const SHN_COMMON: u16 = 0xfff2;

pub const EF_RISCV_RVC: u32 = 0x1;
pub const EF_RISCV_FLOAT_ABI_SOFT: u32 = 0x0;
pub const EF_RISCV_FLOAT_ABI_SINGLE: u32 = 0x2;
pub const EF_RISCV_FLOAT_ABI_DOUBLE: u32 = 0x4;
pub const EF_RISCV_RVE: u32 = 0x8;

/// RISC-V relocation types this translator understands (spec.md §6).
pub const R_RISCV_32: u32 = 1;
pub const R_RISCV_PCREL_HI20: u32 = 23;
pub const R_RISCV_PCREL_LO12_I: u32 = 24;
pub const R_RISCV_HI20: u32 = 26;
pub const R_RISCV_LO12_I: u32 = 27;

//! ELF32-LE/RISC-V object model: header/section/symbol parsing,
//! relocation records, and the shadow-image builder.

pub mod constants;
pub mod file;
pub mod header;
pub mod image;
pub mod relocation;
pub mod section;
pub mod symbol;

pub use file::ElfFile;
pub use header::{ElfHeader, LoadedSection, ProgramHeader, SectionHeader};
pub use image::{ShadowImage, ShadowImageError, ShadowSection};
pub use relocation::{HiLoResolver, HiLoState, PairingError, Relocation, RelocationKind};
pub use section::{Section, SectionKind};
pub use symbol::{Symbol, SymbolKind};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ElfError {
    #[error("file too small to contain an ELF header")]
    TooSmall,
    #[error("bad ELF magic number")]
    InvalidMagic,
    #[error("unsupported ELF class {0} (only ELFCLASS32 is supported)")]
    UnsupportedClass(u8),
    #[error("ELF is not little-endian")]
    NotLittleEndian,
    #[error("unsupported machine type {0} (expected EM_RISCV)")]
    UnsupportedMachine(u16),
    #[error("program header table out of file bounds")]
    ProgramHeaderOutOfBounds,
    #[error("section header table out of file bounds")]
    SectionHeaderOutOfBounds,
    #[error("{0} table has a zero entry size")]
    ZeroEntrySize(&'static str),
    #[error("unsupported relocation type {0}")]
    UnknownRelocation(u32),
}

pub type Result<T> = std::result::Result<T, ElfError>;

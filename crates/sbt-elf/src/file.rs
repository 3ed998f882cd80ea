//! ELF32-LE/RISC-V file parser.

use crate::constants::*;
use crate::header::{ElfHeader, LoadedSection, ProgramHeader, SectionHeader};
use crate::relocation::{Relocation, RelocationKind};
use crate::section::{Section, SectionKind};
use crate::symbol::Symbol;
use crate::{ElfError, Result};

#[inline]
fn read_le16(data: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([data[offset], data[offset + 1]])
}

#[inline]
fn read_le32(data: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([data[offset], data[offset + 1], data[offset + 2], data[offset + 3]])
}

#[inline]
fn read_le_i32(data: &[u8], offset: usize) -> i32 {
    read_le32(data, offset) as i32
}

/// A fully parsed object file: header, loadable sections (with their
/// relocations attached), and the symbol table.
#[derive(Clone, Debug)]
pub struct ElfFile {
    pub header: ElfHeader,
    pub program_headers: Vec<ProgramHeader>,
    pub sections: Vec<Section>,
    pub symbols: Vec<Symbol>,
}

impl ElfFile {
    pub fn parse(data: &[u8]) -> Result<Self> {
        let header = Self::parse_header(data)?;
        let program_headers = Self::parse_program_headers(data, &header)?;
        let raw_sections = Self::parse_all_section_headers(data, &header)?;
        let strtab = raw_sections.get(header.e_shstrndx as usize);

        let named: Vec<(u16, String, SectionHeader, Vec<u8>)> = raw_sections
            .iter()
            .enumerate()
            .map(|(i, sh)| {
                let name = strtab
                    .map(|st| Self::extract_string(data, st.sh_offset as usize, sh.sh_name as usize))
                    .unwrap_or_default();
                let bytes = Self::load_section_data(data, sh);
                (i as u16, name, *sh, bytes)
            })
            .collect();

        let loaded: Vec<LoadedSection> = named
            .iter()
            .map(|(index, name, header, data)| LoadedSection {
                index: *index,
                name: name.clone(),
                header: *header,
                data: data.clone(),
            })
            .collect();

        let symbols = Self::parse_symbols(data, &raw_sections, strtab)?;
        let mut sections = Self::build_sections(&loaded);
        Self::attach_relocations(data, &raw_sections, &mut sections)?;

        Ok(ElfFile { header, program_headers, sections, symbols })
    }

    pub fn section_by_name(&self, name: &str) -> Option<&Section> {
        self.sections.iter().find(|s| s.name == name)
    }

    pub fn section_containing(&self, addr: u32) -> Option<&Section> {
        self.sections.iter().find(|s| s.contains(addr))
    }

    pub fn symbol_by_name(&self, name: &str) -> Option<&Symbol> {
        self.symbols.iter().find(|s| s.name == name)
    }

    fn parse_header(data: &[u8]) -> Result<ElfHeader> {
        if data.len() < 52 {
            return Err(ElfError::TooSmall);
        }
        if read_le32(data, 0) != ELF_MAGIC {
            return Err(ElfError::InvalidMagic);
        }
        if data[4] != ELF_CLASS_32 {
            return Err(ElfError::UnsupportedClass(data[4]));
        }
        if data[5] != ELF_DATA_LSB {
            return Err(ElfError::NotLittleEndian);
        }
        let e_machine = read_le16(data, 18);
        if e_machine != ELF_MACHINE_RISCV {
            return Err(ElfError::UnsupportedMachine(e_machine));
        }

        Ok(ElfHeader {
            e_type: read_le16(data, 16),
            e_machine,
            e_flags: read_le32(data, 36),
            e_entry: read_le32(data, 24),
            e_phoff: read_le32(data, 28),
            e_shoff: read_le32(data, 32),
            e_phnum: read_le16(data, 44),
            e_shnum: read_le16(data, 48),
            e_shstrndx: read_le16(data, 50),
        })
    }

    fn parse_program_headers(data: &[u8], header: &ElfHeader) -> Result<Vec<ProgramHeader>> {
        let mut out = Vec::with_capacity(header.e_phnum as usize);
        for i in 0..header.e_phnum {
            let off = header.e_phoff as usize + i as usize * 32;
            if off + 32 > data.len() {
                return Err(ElfError::ProgramHeaderOutOfBounds);
            }
            out.push(ProgramHeader {
                p_type: read_le32(data, off),
                p_offset: read_le32(data, off + 4),
                p_vaddr: read_le32(data, off + 8),
                p_filesz: read_le32(data, off + 16),
                p_memsz: read_le32(data, off + 20),
                p_flags: read_le32(data, off + 24),
                p_align: read_le32(data, off + 28),
            });
        }
        Ok(out)
    }

    fn parse_all_section_headers(data: &[u8], header: &ElfHeader) -> Result<Vec<SectionHeader>> {
        let mut out = Vec::with_capacity(header.e_shnum as usize);
        for i in 0..header.e_shnum {
            let off = header.e_shoff as usize + i as usize * 40;
            if off + 40 > data.len() {
                return Err(ElfError::SectionHeaderOutOfBounds);
            }
            out.push(SectionHeader {
                sh_name: read_le32(data, off),
                sh_type: read_le32(data, off + 4),
                sh_flags: read_le32(data, off + 8),
                sh_addr: read_le32(data, off + 12),
                sh_offset: read_le32(data, off + 16),
                sh_size: read_le32(data, off + 20),
                sh_link: read_le32(data, off + 24),
                sh_info: read_le32(data, off + 28),
                sh_addralign: read_le32(data, off + 32),
                sh_entsize: read_le32(data, off + 36),
            });
        }
        Ok(out)
    }

    fn load_section_data(data: &[u8], sh: &SectionHeader) -> Vec<u8> {
        if sh.sh_type == SHT_NOBITS {
            return Vec::new();
        }
        let start = sh.sh_offset as usize;
        let end = start + sh.sh_size as usize;
        if start >= data.len() || end > data.len() {
            return Vec::new();
        }
        data[start..end].to_vec()
    }

    fn extract_string(data: &[u8], strtab_offset: usize, string_offset: usize) -> String {
        let start = strtab_offset + string_offset;
        if start >= data.len() {
            return String::new();
        }
        data[start..]
            .iter()
            .take_while(|&&b| b != 0)
            .map(|&b| b as char)
            .collect()
    }

    fn parse_symbols(
        data: &[u8],
        sections: &[SectionHeader],
        strtab_for_shnames: Option<&SectionHeader>,
    ) -> Result<Vec<Symbol>> {
        let Some(symtab) = sections.iter().find(|s| s.sh_type == SHT_SYMTAB) else {
            return Ok(Vec::new());
        };
        let strtab_idx = symtab.sh_link as usize;
        let strtab = sections.get(strtab_idx).or(strtab_for_shnames);
        let Some(strtab) = strtab else {
            return Ok(Vec::new());
        };

        if symtab.sh_entsize == 0 {
            return Err(ElfError::ZeroEntrySize("symtab"));
        }
        let count = symtab.sh_size as usize / symtab.sh_entsize as usize;
        let mut out = Vec::with_capacity(count);
        for i in 0..count {
            let off = symtab.sh_offset as usize + i * symtab.sh_entsize as usize;
            if off + 16 > data.len() {
                break;
            }
            let name_idx = read_le32(data, off) as usize;
            let value = read_le32(data, off + 4);
            let size = read_le32(data, off + 8);
            let info = data[off + 12];
            let shndx = read_le16(data, off + 14);
            let name = Self::extract_string(data, strtab.sh_offset as usize, name_idx);
            out.push(Symbol::from_raw(name, value, size, info, shndx));
        }
        Ok(out)
    }

    fn build_sections(loaded: &[LoadedSection]) -> Vec<Section> {
        loaded
            .iter()
            .filter(|s| s.is_alloc())
            .map(|s| {
                let kind =
                    SectionKind::classify(&s.name, s.is_exec(), s.is_nobits(), s.is_writable());
                Section {
                    index: s.index,
                    name: s.name.clone(),
                    base: s.header.sh_addr,
                    size: s.header.sh_size,
                    kind,
                    data: s.data.clone(),
                    relocations: Vec::new(),
                    align: s.header.sh_addralign.max(1),
                    shadow_offset: None,
                }
            })
            .collect()
    }

    /// Parse every `SHT_REL`/`SHT_RELA` section and attach its entries to
    /// the `Section` named by `sh_info` (the relocated section's index).
    fn attach_relocations(
        data: &[u8],
        raw_sections: &[SectionHeader],
        sections: &mut [Section],
    ) -> Result<()> {
        for rel_sh in raw_sections.iter().filter(|s| s.sh_type == SHT_REL || s.sh_type == SHT_RELA) {
            let target_index = rel_sh.sh_info as u16;
            let Some(target) = sections.iter_mut().find(|s| s.index == target_index) else {
                continue;
            };
            let is_rela = rel_sh.sh_type == SHT_RELA;
            let entsize = if is_rela { 12 } else { 8 };
            if rel_sh.sh_entsize != 0 && rel_sh.sh_entsize != entsize {
                return Err(ElfError::ZeroEntrySize("relocation"));
            }
            let count = rel_sh.sh_size as usize / entsize as usize;
            for i in 0..count {
                let off = rel_sh.sh_offset as usize + i * entsize as usize;
                if off + entsize as usize > data.len() {
                    break;
                }
                let r_offset = read_le32(data, off);
                let r_info = read_le32(data, off + 4);
                let r_type = r_info & 0xff;
                let r_sym = r_info >> 8;
                let addend = if is_rela { read_le_i32(data, off + 8) } else { 0 };
                let kind = RelocationKind::from_raw(r_type)
                    .map_err(|e| ElfError::UnknownRelocation(e.0))?;
                target.relocations.push(Relocation {
                    section: target_index,
                    offset: r_offset,
                    kind,
                    symbol: r_sym,
                    addend,
                });
            }
        }
        for section in sections.iter_mut() {
            section.relocations.sort_by_key(|r| r.offset);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn le32(v: u32) -> [u8; 4] {
        v.to_le_bytes()
    }
    fn le16(v: u16) -> [u8; 2] {
        v.to_le_bytes()
    }

    fn minimal_elf_header(e_shoff: u32, e_shnum: u16, e_shstrndx: u16) -> Vec<u8> {
        let mut h = vec![0u8; 52];
        h[0..4].copy_from_slice(&ELF_MAGIC.to_le_bytes());
        h[4] = ELF_CLASS_32;
        h[5] = ELF_DATA_LSB;
        h[16..18].copy_from_slice(&le16(ELF_TYPE_EXEC));
        h[18..20].copy_from_slice(&le16(ELF_MACHINE_RISCV));
        h[24..28].copy_from_slice(&le32(0x1000));
        h[28..32].copy_from_slice(&le32(0)); // e_phoff
        h[32..36].copy_from_slice(&le32(e_shoff));
        h[36..40].copy_from_slice(&le32(0)); // e_flags
        h[44..46].copy_from_slice(&le16(0)); // e_phnum
        h[48..50].copy_from_slice(&le16(e_shnum));
        h[50..52].copy_from_slice(&le16(e_shstrndx));
        h
    }

    #[test]
    fn rejects_bad_magic() {
        let mut data = minimal_elf_header(52, 1, 0);
        data[0] = 0;
        assert!(matches!(ElfFile::parse(&data), Err(ElfError::InvalidMagic)));
    }

    #[test]
    fn rejects_wrong_machine() {
        let mut data = minimal_elf_header(52, 1, 0);
        data[18..20].copy_from_slice(&le16(0x3e)); // EM_X86_64
        assert!(matches!(ElfFile::parse(&data), Err(ElfError::UnsupportedMachine(_))));
    }

    #[test]
    fn parses_header_only_object() {
        let data = minimal_elf_header(52, 0, 0);
        let elf = ElfFile::parse(&data).unwrap();
        assert_eq!(elf.header.e_entry, 0x1000);
        assert!(elf.sections.is_empty());
    }
}

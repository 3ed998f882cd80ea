//! Shadow image: a host-side byte layout mirroring the guest's
//! statically allocated sections, one array per section so relocation
//! edges stay symbolic until the emitter turns them into LLVM globals.

use std::collections::HashMap;

use thiserror::Error;

use crate::relocation::RelocationKind;
use crate::section::Section;

/// One section's home in the shadow image.
#[derive(Clone, Debug)]
pub struct ShadowSection {
    pub name: String,
    pub shadow_offset: u32,
    pub size: u32,
    pub bytes: Vec<u8>,
    pub is_bss: bool,
}

#[derive(Debug, Error)]
pub enum ShadowImageError {
    #[error("data relocation at section {section} offset 0x{offset:08x} targets unknown symbol {symbol}")]
    UnresolvedSymbol { section: String, offset: u32, symbol: u32 },
    #[error("data relocation at section {section} offset 0x{offset:08x} is out of bounds")]
    OutOfBounds { section: String, offset: u32 },
}

/// A data-to-data relocation whose target section had not yet been laid
/// out when it was first seen; pending_relocs mirrors that directly.
struct Pending {
    section_index: usize,
    patch_offset: u32,
    target_symbol: u32,
}

/// The laid-out shadow image, plus `section_base` lookups for the
/// relocation resolver's `%hi`/`%lo` lowering.
#[derive(Clone, Debug, Default)]
pub struct ShadowImage {
    sections: Vec<ShadowSection>,
    offsets_by_name: HashMap<String, u32>,
}

impl ShadowImage {
    /// Build the image from a file's allocatable sections, in file order.
    ///
    /// `symbol_location` resolves a symbol index to `(section_name,
    /// offset_within_section)` for symbols defined in one of `sections`;
    /// it returns `None` for externals, which data-relocations may not
    /// target.
    pub fn build(
        sections: &[Section],
        symbol_location: impl Fn(u32) -> Option<(String, u32)>,
    ) -> Result<Self, ShadowImageError> {
        let mut cursor: u32 = 0;
        let mut laid_out = Vec::with_capacity(sections.len());
        let mut offsets_by_name = HashMap::new();
        let mut pending: Vec<Pending> = Vec::new();

        for section in sections {
            if section.size == 0 {
                continue;
            }
            cursor = align_up(cursor, 4);
            let shadow_offset = cursor;
            offsets_by_name.insert(section.name.clone(), shadow_offset);

            let bytes = if section.is_bss() {
                vec![0u8; section.size as usize]
            } else {
                let mut b = section.data.clone();
                b.resize(section.size as usize, 0);
                b
            };

            laid_out.push(ShadowSection {
                name: section.name.clone(),
                shadow_offset,
                size: section.size,
                bytes,
                is_bss: section.is_bss(),
            });
            cursor += section.size;
        }

        let mut image = ShadowImage { sections: laid_out, offsets_by_name };

        for section in sections {
            for reloc in &section.relocations {
                if reloc.kind != RelocationKind::DataAbs32 {
                    continue;
                }
                match symbol_location(reloc.symbol) {
                    Some((target_name, target_offset)) => {
                        if let Some(&target_base) = image.offsets_by_name.get(&target_name) {
                            image.patch(&section.name, reloc.offset, target_base + target_offset)?;
                        } else {
                            let index = image
                                .sections
                                .iter()
                                .position(|s| s.name == section.name)
                                .ok_or_else(|| ShadowImageError::OutOfBounds {
                                    section: section.name.clone(),
                                    offset: reloc.offset,
                                })?;
                            pending.push(Pending {
                                section_index: index,
                                patch_offset: reloc.offset,
                                target_symbol: reloc.symbol,
                            });
                        }
                    }
                    None => {
                        return Err(ShadowImageError::UnresolvedSymbol {
                            section: section.name.clone(),
                            offset: reloc.offset,
                            symbol: reloc.symbol,
                        });
                    }
                }
            }
        }

        for p in pending {
            let (target_name, target_offset) = symbol_location(p.target_symbol).ok_or_else(|| {
                ShadowImageError::UnresolvedSymbol {
                    section: image.sections[p.section_index].name.clone(),
                    offset: p.patch_offset,
                    symbol: p.target_symbol,
                }
            })?;
            let target_base = *image.offsets_by_name.get(&target_name).ok_or_else(|| {
                ShadowImageError::UnresolvedSymbol {
                    section: image.sections[p.section_index].name.clone(),
                    offset: p.patch_offset,
                    symbol: p.target_symbol,
                }
            })?;
            let section_name = image.sections[p.section_index].name.clone();
            image.patch(&section_name, p.patch_offset, target_base + target_offset)?;
        }

        Ok(image)
    }

    pub fn section_base(&self, name: &str) -> Option<u32> {
        self.offsets_by_name.get(name).copied()
    }

    pub fn sections(&self) -> &[ShadowSection] {
        &self.sections
    }

    fn patch(&mut self, section: &str, offset: u32, value: u32) -> Result<(), ShadowImageError> {
        let s = self
            .sections
            .iter_mut()
            .find(|s| s.name == section)
            .ok_or_else(|| ShadowImageError::OutOfBounds { section: section.to_string(), offset })?;
        let start = offset as usize;
        let end = start + 4;
        if end > s.bytes.len() {
            return Err(ShadowImageError::OutOfBounds { section: section.to_string(), offset });
        }
        s.bytes[start..end].copy_from_slice(&value.to_le_bytes());
        Ok(())
    }
}

fn align_up(value: u32, align: u32) -> u32 {
    (value + align - 1) & !(align - 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::section::SectionKind;

    fn section(name: &str, size: u32, kind: SectionKind, data: Vec<u8>) -> Section {
        Section {
            index: 0,
            name: name.to_string(),
            base: 0,
            size,
            kind,
            data,
            relocations: Vec::new(),
            align: 4,
            shadow_offset: None,
        }
    }

    #[test]
    fn lays_out_sections_four_byte_aligned() {
        let sections = vec![
            section(".text", 6, SectionKind::Text, vec![1; 6]),
            section(".data", 4, SectionKind::Data, vec![2; 4]),
        ];
        let image = ShadowImage::build(&sections, |_| None).unwrap();
        assert_eq!(image.section_base(".text"), Some(0));
        assert_eq!(image.section_base(".data"), Some(8)); // 6 rounds up to 8
    }

    #[test]
    fn bss_is_zero_filled() {
        let sections = vec![section(".bss", 4, SectionKind::Bss, Vec::new())];
        let image = ShadowImage::build(&sections, |_| None).unwrap();
        assert_eq!(image.sections()[0].bytes, vec![0u8; 4]);
    }

    #[test]
    fn empty_sections_are_skipped() {
        let sections = vec![section(".text", 0, SectionKind::Text, Vec::new())];
        let image = ShadowImage::build(&sections, |_| None).unwrap();
        assert!(image.section_base(".text").is_none());
    }
}

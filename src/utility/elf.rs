// Copyright (c) The btfhub authors
// SPDX-License-Identifier: MIT

use std::{fs::File, path::Path};

use anyhow::{Context, Result};
use elf::{endian::AnyEndian, ElfStream};

/// Report whether the given ELF file carries a `.BTF` section. Kernels built
/// with CONFIG_DEBUG_INFO_BTF embed one, making synthesis unnecessary.
pub fn has_btf_section(path: &Path) -> Result<bool> {
    let file = File::open(path).with_context(|| format!("elf open {}", path.display()))?;
    let mut elf = ElfStream::<AnyEndian, _>::open_stream(file)
        .with_context(|| format!("elf open {}", path.display()))?;
    Ok(elf.section_header_by_name(".BTF")?.is_some())
}

#[cfg(test)]
pub(crate) mod testutil {
    // Minimal 64-bit little-endian relocatable ELF: file header, three
    // section headers (null, one named section, .shstrtab) and the string
    // table. Enough for section lookups to work.
    pub fn minimal_elf(section_name: &str) -> Vec<u8> {
        let mut strtab = vec![0u8];
        let name_off = strtab.len() as u32;
        strtab.extend_from_slice(section_name.as_bytes());
        strtab.push(0);
        let shstrtab_off = strtab.len() as u32;
        strtab.extend_from_slice(b".shstrtab");
        strtab.push(0);

        let shoff = 64u64;
        let strtab_file_off = shoff + 3 * 64;

        let mut out = Vec::new();
        // e_ident
        out.extend_from_slice(&[0x7f, b'E', b'L', b'F', 2, 1, 1, 0]);
        out.extend_from_slice(&[0u8; 8]);
        out.extend_from_slice(&1u16.to_le_bytes()); // e_type = ET_REL
        out.extend_from_slice(&62u16.to_le_bytes()); // e_machine = EM_X86_64
        out.extend_from_slice(&1u32.to_le_bytes()); // e_version
        out.extend_from_slice(&0u64.to_le_bytes()); // e_entry
        out.extend_from_slice(&0u64.to_le_bytes()); // e_phoff
        out.extend_from_slice(&shoff.to_le_bytes()); // e_shoff
        out.extend_from_slice(&0u32.to_le_bytes()); // e_flags
        out.extend_from_slice(&64u16.to_le_bytes()); // e_ehsize
        out.extend_from_slice(&0u16.to_le_bytes()); // e_phentsize
        out.extend_from_slice(&0u16.to_le_bytes()); // e_phnum
        out.extend_from_slice(&64u16.to_le_bytes()); // e_shentsize
        out.extend_from_slice(&3u16.to_le_bytes()); // e_shnum
        out.extend_from_slice(&2u16.to_le_bytes()); // e_shstrndx

        // section 0: SHN_UNDEF
        out.extend_from_slice(&[0u8; 64]);
        // section 1: the named section, zero-sized SHT_PROGBITS
        push_shdr(&mut out, name_off, 1, strtab_file_off + strtab.len() as u64, 0);
        // section 2: .shstrtab
        push_shdr(&mut out, shstrtab_off, 3, strtab_file_off, strtab.len() as u64);

        out.extend_from_slice(&strtab);
        out
    }

    fn push_shdr(out: &mut Vec<u8>, name: u32, typ: u32, offset: u64, size: u64) {
        out.extend_from_slice(&name.to_le_bytes()); // sh_name
        out.extend_from_slice(&typ.to_le_bytes()); // sh_type
        out.extend_from_slice(&0u64.to_le_bytes()); // sh_flags
        out.extend_from_slice(&0u64.to_le_bytes()); // sh_addr
        out.extend_from_slice(&offset.to_le_bytes()); // sh_offset
        out.extend_from_slice(&size.to_le_bytes()); // sh_size
        out.extend_from_slice(&0u32.to_le_bytes()); // sh_link
        out.extend_from_slice(&0u32.to_le_bytes()); // sh_info
        out.extend_from_slice(&1u64.to_le_bytes()); // sh_addralign
        out.extend_from_slice(&0u64.to_le_bytes()); // sh_entsize
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_elf(bytes: &[u8]) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(bytes).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn detects_a_zero_sized_btf_section() {
        let file = write_elf(&testutil::minimal_elf(".BTF"));
        assert!(has_btf_section(file.path()).unwrap());
    }

    #[test]
    fn reports_false_without_a_btf_section() {
        let file = write_elf(&testutil::minimal_elf(".text"));
        assert!(!has_btf_section(file.path()).unwrap());
    }

    #[test]
    fn surfaces_open_errors() {
        assert!(has_btf_section(std::path::Path::new("/nonexistent/vmlinux")).is_err());
    }

    #[test]
    fn rejects_a_file_that_is_not_elf() {
        let file = write_elf(b"this is not an elf file");
        assert!(has_btf_section(file.path()).is_err());
    }
}

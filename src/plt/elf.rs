//! ELF64 structures and dynamic-section constants consumed from the live
//! process image. Only what the rewriter needs; layouts match `<elf.h>`.

use libc::{c_char, c_void};

pub const DT_NULL: i64 = 0;
pub const DT_PLTRELSZ: i64 = 2;
pub const DT_STRTAB: i64 = 5;
pub const DT_SYMTAB: i64 = 6;
pub const DT_STRSZ: i64 = 10;
pub const DT_JMPREL: i64 = 23;

/// x86_64 jump-slot relocation type.
pub const R_X86_64_JUMP_SLOT: u32 = 7;

/// `dlinfo` request returning the object's `link_map` entry.
pub const RTLD_DI_LINKMAP: libc::c_int = 2;

#[repr(C)]
#[derive(Clone, Copy)]
pub struct Elf64Dyn {
    pub d_tag: i64,
    /// d_un union: d_val for sizes, d_ptr for addresses. glibc relocates
    /// the pointer-valued entries before we ever see them.
    pub d_val: u64,
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct Elf64Sym {
    pub st_name: u32,
    pub st_info: u8,
    pub st_other: u8,
    pub st_shndx: u16,
    pub st_value: u64,
    pub st_size: u64,
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct Elf64Rela {
    pub r_offset: u64,
    pub r_info: u64,
    pub r_addend: i64,
}

impl Elf64Rela {
    pub fn r_type(&self) -> u32 {
        (self.r_info & 0xffff_ffff) as u32
    }

    pub fn r_sym(&self) -> usize {
        (self.r_info >> 32) as usize
    }
}

/// The glibc `struct link_map` prefix. Only the public head of the struct
/// is declared; the private tail is never touched.
#[repr(C)]
pub struct LinkMap {
    pub l_addr: usize,
    pub l_name: *const c_char,
    pub l_ld: *const Elf64Dyn,
    pub l_next: *mut LinkMap,
    pub l_prev: *mut LinkMap,
}

/// Walk a dynamic array for the entry with the given tag.
///
/// # Safety
/// `dyn_ptr` must point at a DT_NULL-terminated dynamic array.
pub unsafe fn find_dynamic_entry(dyn_ptr: *const Elf64Dyn, tag: i64) -> Option<Elf64Dyn> {
    let mut cur = dyn_ptr;
    while (*cur).d_tag != DT_NULL {
        if (*cur).d_tag == tag {
            return Some(*cur);
        }
        cur = cur.add(1);
    }
    None
}

extern "C" {
    pub fn dlinfo(handle: *mut c_void, request: libc::c_int, info: *mut c_void) -> libc::c_int;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rela_field_extraction() {
        // Symbol index 5, type JUMP_SLOT.
        let rela = Elf64Rela { r_offset: 0x4018, r_info: (5u64 << 32) | 7, r_addend: 0 };
        assert_eq!(rela.r_type(), R_X86_64_JUMP_SLOT);
        assert_eq!(rela.r_sym(), 5);
    }

    #[test]
    fn test_find_dynamic_entry() {
        let entries = [
            Elf64Dyn { d_tag: DT_STRTAB, d_val: 0x1000 },
            Elf64Dyn { d_tag: DT_SYMTAB, d_val: 0x2000 },
            Elf64Dyn { d_tag: DT_NULL, d_val: 0 },
        ];
        let found = unsafe { find_dynamic_entry(entries.as_ptr(), DT_SYMTAB) };
        assert_eq!(found.map(|d| d.d_val), Some(0x2000));
        let missing = unsafe { find_dynamic_entry(entries.as_ptr(), DT_JMPREL) };
        assert!(missing.is_none());
    }

    #[test]
    fn test_elf64_sym_layout() {
        assert_eq!(std::mem::size_of::<Elf64Sym>(), 24);
        assert_eq!(std::mem::size_of::<Elf64Rela>(), 24);
        assert_eq!(std::mem::size_of::<Elf64Dyn>(), 16);
    }
}

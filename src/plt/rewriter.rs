//! GOT slot replacement for a loaded ELF64 object
//!
//! `PltHook::open` resolves the object's link-map entry through the dynamic
//! linker without loading anything new, then keeps raw views of the dynamic
//! symbol table, string table, and PLT relocation table. `replace` finds the
//! JUMP_SLOT entry for a symbol name and swaps the GOT slot with a single
//! aligned pointer store, returning the previously resolved target so the
//! replacement can still delegate to it.

use crate::domain::HookError;
use crate::plt::elf::{
    dlinfo, find_dynamic_entry, Elf64Rela, Elf64Sym, LinkMap, DT_JMPREL, DT_PLTRELSZ, DT_STRSZ,
    DT_STRTAB, DT_SYMTAB, RTLD_DI_LINKMAP, R_X86_64_JUMP_SLOT,
};
use crate::plt::memory_maps::MapsSnapshot;
use lazy_static::lazy_static;
use libc::c_void;
use log::debug;
use std::ffi::{CStr, CString};
use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};
use std::sync::Mutex;

lazy_static! {
    /// Process-wide last failure message, mirroring the error-code returns.
    static ref LAST_ERROR: Mutex<String> = Mutex::new(String::new());
}

/// Most recent failure message from any `PltHook` operation.
pub fn last_error() -> String {
    LAST_ERROR.lock().unwrap_or_else(|e| e.into_inner()).clone()
}

fn set_last_error(msg: String) -> String {
    debug!("plt: {msg}");
    *LAST_ERROR.lock().unwrap_or_else(|e| e.into_inner()) = msg.clone();
    msg
}

fn dlerror_string() -> String {
    let err = unsafe { libc::dlerror() };
    if err.is_null() {
        "unknown dl error".to_string()
    } else {
        unsafe { CStr::from_ptr(err) }.to_string_lossy().into_owned()
    }
}

/// One JUMP_SLOT relocation projected to `(symbol name, GOT slot)`.
pub struct PltEntry<'a> {
    pub name: &'a CStr,
    pub slot: *mut *mut c_void,
}

/// Handle over one instrumented ELF image.
#[derive(Debug)]
pub struct PltHook {
    base: usize,
    symtab: *const Elf64Sym,
    strtab: *const u8,
    strtab_size: usize,
    jmprel: *const Elf64Rela,
    jmprel_count: usize,
    maps: MapsSnapshot,
    page_size: usize,
}

// The raw pointers are read-only views into tables the dynamic linker keeps
// mapped for the process lifetime; slot writes go through an atomic store.
unsafe impl Send for PltHook {}
unsafe impl Sync for PltHook {}

impl PltHook {
    /// Open an already-loaded shared object by path, or the main executable
    /// when `path` is `None`.
    ///
    /// # Errors
    /// `FileNotFound` if the object is not mapped, `Internal` if its dynamic
    /// section is missing a required table or the maps snapshot fails.
    pub fn open(path: Option<&str>) -> Result<Self, HookError> {
        let lmap = match path {
            Some(p) => unsafe { link_map_for_library(p)? },
            None => unsafe { link_map_for_main()? },
        };
        unsafe { Self::from_link_map(lmap) }
    }

    unsafe fn from_link_map(lmap: *const LinkMap) -> Result<Self, HookError> {
        let base = (*lmap).l_addr;
        let dyn_ptr = (*lmap).l_ld;

        let require = |tag: i64, what: &str| {
            unsafe { find_dynamic_entry(dyn_ptr, tag) }.ok_or_else(|| {
                HookError::Internal(set_last_error(format!("failed to find {what}")))
            })
        };

        let symtab = require(DT_SYMTAB, "DT_SYMTAB")?.d_val as *const Elf64Sym;
        let strtab = require(DT_STRTAB, "DT_STRTAB")?.d_val as *const u8;
        let strtab_size = require(DT_STRSZ, "DT_STRSZ")?.d_val as usize;
        let jmprel = require(DT_JMPREL, "DT_JMPREL")?.d_val as *const Elf64Rela;
        let pltrelsz = require(DT_PLTRELSZ, "DT_PLTRELSZ")?.d_val as usize;
        let jmprel_count = pltrelsz / std::mem::size_of::<Elf64Rela>();

        let maps = MapsSnapshot::load().map_err(|e| {
            HookError::Internal(set_last_error(format!("failed to read /proc/self/maps: {e}")))
        })?;

        let page_size = libc::sysconf(libc::_SC_PAGESIZE) as usize;

        Ok(PltHook { base, symtab, strtab, strtab_size, jmprel, jmprel_count, maps, page_size })
    }

    /// Advance `pos` to the next JUMP_SLOT relocation and project it.
    ///
    /// # Errors
    /// `EofReached` once the relocation table is exhausted.
    pub fn enumerate(&self, pos: &mut usize) -> Result<PltEntry<'_>, HookError> {
        while *pos < self.jmprel_count {
            let rela = unsafe { &*self.jmprel.add(*pos) };
            *pos += 1;
            if rela.r_type() != R_X86_64_JUMP_SLOT {
                continue;
            }
            let name = unsafe { self.symbol_name(rela.r_sym()) }?;
            let slot = (self.base.wrapping_add(rela.r_offset as usize)) as *mut *mut c_void;
            return Ok(PltEntry { name, slot });
        }
        Err(HookError::EofReached)
    }

    /// Iterator form of [`enumerate`](Self::enumerate).
    pub fn entries(&self) -> Entries<'_> {
        Entries { hook: self, pos: 0 }
    }

    /// Current address of `name` under the default dynamic-linker lookup.
    ///
    /// Forces lazy PLT resolution so the slot is live, and yields the
    /// pointer handed back as "original" by [`replace`](Self::replace).
    ///
    /// # Errors
    /// `FunctionNotFound` if the linker cannot resolve the symbol.
    pub fn resolve_original(&self, name: &str) -> Result<*mut c_void, HookError> {
        let c_name = CString::new(name).map_err(|_| {
            HookError::InvalidArgument(set_last_error(format!("embedded NUL in {name:?}")))
        })?;
        let addr = unsafe { libc::dlsym(libc::RTLD_DEFAULT, c_name.as_ptr()) };
        if addr.is_null() {
            set_last_error(format!("no such function: {name}"));
            return Err(HookError::FunctionNotFound(name.to_string()));
        }
        Ok(addr)
    }

    /// Redirect `name`'s GOT slot to `new_fn`, returning the original target.
    ///
    /// A bare query matches both `name` and `name@VERSION` entries; ties go
    /// to the first hit in relocation order.
    ///
    /// # Errors
    /// `FunctionNotFound` if the symbol resolves nowhere or has no PLT slot
    /// in this object; `Internal` for protection failures.
    pub fn replace(&self, name: &str, new_fn: *mut c_void) -> Result<*mut c_void, HookError> {
        if name.is_empty() {
            return Err(HookError::InvalidArgument(set_last_error(
                "empty symbol name".to_string(),
            )));
        }
        let original = self.resolve_original(name)?;

        let mut pos = 0;
        loop {
            let entry = match self.enumerate(&mut pos) {
                Ok(entry) => entry,
                Err(HookError::EofReached) => break,
                Err(e) => return Err(e),
            };
            if !symbol_matches(entry.name.to_bytes(), name.as_bytes()) {
                continue;
            }
            self.patch_slot(entry.slot, new_fn)?;
            debug!("plt: redirected {name} (slot {:p})", entry.slot);
            return Ok(original);
        }

        set_last_error(format!("no such function: {name}"));
        Err(HookError::FunctionNotFound(name.to_string()))
    }

    fn patch_slot(&self, slot: *mut *mut c_void, new_fn: *mut c_void) -> Result<(), HookError> {
        let addr = slot as usize;
        let page = addr & !(self.page_size - 1);

        let Some(prot) = self.maps.protection_at(addr) else {
            return Err(HookError::Internal(set_last_error(format!(
                "could not get memory protection at 0x{page:x}"
            ))));
        };

        let already_writable = prot & libc::PROT_WRITE != 0;
        if !already_writable {
            let rc = unsafe {
                libc::mprotect(page as *mut c_void, self.page_size, prot | libc::PROT_WRITE)
            };
            if rc != 0 {
                let err = std::io::Error::last_os_error();
                return Err(HookError::Internal(set_last_error(format!(
                    "could not change memory protection at 0x{page:x}: {err}"
                ))));
            }
        }

        // Single aligned pointer store: concurrent calls through the PLT see
        // either the old or the new target, never a torn value.
        unsafe { (*(slot as *const AtomicPtr<c_void>)).store(new_fn, Ordering::SeqCst) };

        if !already_writable {
            let rc = unsafe { libc::mprotect(page as *mut c_void, self.page_size, prot) };
            if rc != 0 {
                let err = std::io::Error::last_os_error();
                return Err(HookError::Internal(set_last_error(format!(
                    "could not restore memory protection at 0x{page:x}: {err}"
                ))));
            }
        }
        Ok(())
    }

    unsafe fn symbol_name(&self, sym_index: usize) -> Result<&CStr, HookError> {
        let st_name = (*self.symtab.add(sym_index)).st_name as usize;
        if st_name >= self.strtab_size {
            return Err(HookError::Internal(set_last_error(format!(
                "symbol name offset {st_name} past end of string table"
            ))));
        }
        Ok(CStr::from_ptr(self.strtab.add(st_name).cast()))
    }
}

/// Iterator over a hook's JUMP_SLOT entries.
pub struct Entries<'a> {
    hook: &'a PltHook,
    pos: usize,
}

impl<'a> Iterator for Entries<'a> {
    type Item = PltEntry<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        self.hook.enumerate(&mut self.pos).ok()
    }
}

fn symbol_matches(candidate: &[u8], wanted: &[u8]) -> bool {
    if !candidate.starts_with(wanted) {
        return false;
    }
    // Exact, or the bare name followed by a version suffix.
    matches!(candidate.get(wanted.len()), None | Some(b'@'))
}

unsafe fn link_map_for_library(path: &str) -> Result<*const LinkMap, HookError> {
    let c_path = CString::new(path).map_err(|_| {
        HookError::InvalidArgument(set_last_error(format!("embedded NUL in {path:?}")))
    })?;

    // RTLD_NOLOAD: hand back the existing mapping or fail; never load.
    let handle = libc::dlopen(c_path.as_ptr(), libc::RTLD_LAZY | libc::RTLD_NOLOAD);
    if handle.is_null() {
        set_last_error(format!("dlopen {path}: {}", dlerror_string()));
        return Err(HookError::FileNotFound(path.to_string()));
    }
    let lmap = link_map_for_handle(handle);
    libc::dlclose(handle);
    lmap
}

unsafe fn link_map_for_main() -> Result<*const LinkMap, HookError> {
    let handle = libc::dlopen(ptr::null(), libc::RTLD_LAZY);
    if handle.is_null() {
        set_last_error(format!("dlopen main: {}", dlerror_string()));
        return Err(HookError::Internal(last_error()));
    }
    let lmap = link_map_for_handle(handle);
    libc::dlclose(handle);
    let mut lmap = lmap?;

    // The main executable heads the link-map list.
    while !(*lmap).l_prev.is_null() {
        lmap = (*lmap).l_prev;
    }
    Ok(lmap)
}

unsafe fn link_map_for_handle(handle: *mut c_void) -> Result<*const LinkMap, HookError> {
    let mut lmap: *mut LinkMap = ptr::null_mut();
    let rc = dlinfo(handle, RTLD_DI_LINKMAP, (&mut lmap as *mut *mut LinkMap).cast());
    if rc != 0 || lmap.is_null() {
        return Err(HookError::Internal(set_last_error("dlinfo failed".to_string())));
    }
    Ok(lmap)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_symbol_matches_exact() {
        assert!(symbol_matches(b"malloc", b"malloc"));
        assert!(!symbol_matches(b"mallocx", b"malloc"));
        assert!(!symbol_matches(b"mallo", b"malloc"));
    }

    #[test]
    fn test_symbol_matches_versioned() {
        assert!(symbol_matches(b"malloc@GLIBC_2.2.5", b"malloc"));
        assert!(symbol_matches(b"pthread_mutex_lock@@GLIBC_2.2.5", b"pthread_mutex_lock"));
        assert!(!symbol_matches(b"malloc_usable_size@GLIBC_2.2.5", b"malloc"));
    }

    #[test]
    fn test_open_main_executable() {
        let hook = PltHook::open(None).expect("main executable is always loaded");
        // A dynamically linked test binary has at least one JUMP_SLOT entry.
        assert!(hook.jmprel_count > 0);
    }

    #[test]
    fn test_open_missing_library() {
        let err = PltHook::open(Some("libnv_no_such_library.so")).unwrap_err();
        assert!(matches!(err, HookError::FileNotFound(_)));
        assert!(last_error().contains("libnv_no_such_library.so"));
    }
}

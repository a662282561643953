//! Allocation shims
//!
//! `extern "C"` replacements for the allocator family. Each forwards to the
//! original function (stashed in a process-wide atomic before the GOT slot
//! is patched) and notifies the registry on the way through. The Itanium
//! `operator new`/`delete` entry points are implemented over the original
//! `malloc`/`free`, which keeps allocator pairing consistent between the
//! two families.

use crate::memory::registry::MEMORY_REGISTRY;
use crate::output;
use crate::plt::{self, PltHook};
use crate::reentry::ReentryGuard;
use crate::symbolize::capture_stack;
use console::Style;
use libc::{c_void, size_t};
use std::mem;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::MutexGuard;

static ORIG_MALLOC: AtomicUsize = AtomicUsize::new(0);
static ORIG_FREE: AtomicUsize = AtomicUsize::new(0);
static ORIG_CALLOC: AtomicUsize = AtomicUsize::new(0);
static ORIG_REALLOC: AtomicUsize = AtomicUsize::new(0);

type MallocFn = unsafe extern "C" fn(size_t) -> *mut c_void;
type FreeFn = unsafe extern "C" fn(*mut c_void);
type CallocFn = unsafe extern "C" fn(size_t, size_t) -> *mut c_void;
type ReallocFn = unsafe extern "C" fn(*mut c_void, size_t) -> *mut c_void;

fn registry() -> MutexGuard<'static, crate::memory::MemoryRegistry> {
    MEMORY_REGISTRY.lock().unwrap_or_else(|e| e.into_inner())
}

unsafe extern "C" fn hooked_malloc(size: size_t) -> *mut c_void {
    let original: MallocFn = mem::transmute(ORIG_MALLOC.load(Ordering::Relaxed));
    let ptr = original(size);
    if !ptr.is_null() {
        if let Some(_guard) = ReentryGuard::enter() {
            let stack = capture_stack();
            registry().record_allocation(ptr as usize, size, stack);
        }
    }
    ptr
}

unsafe extern "C" fn hooked_free(ptr: *mut c_void) {
    if !ptr.is_null() {
        if let Some(_guard) = ReentryGuard::enter() {
            registry().record_deallocation(ptr as usize);
        }
    }
    let original: FreeFn = mem::transmute(ORIG_FREE.load(Ordering::Relaxed));
    original(ptr);
}

unsafe extern "C" fn hooked_calloc(nmemb: size_t, size: size_t) -> *mut c_void {
    let original: CallocFn = mem::transmute(ORIG_CALLOC.load(Ordering::Relaxed));
    let ptr = original(nmemb, size);
    if !ptr.is_null() {
        if let Some(_guard) = ReentryGuard::enter() {
            let stack = capture_stack();
            registry().record_allocation(ptr as usize, nmemb.saturating_mul(size), stack);
        }
    }
    ptr
}

unsafe extern "C" fn hooked_realloc(old_ptr: *mut c_void, new_size: size_t) -> *mut c_void {
    // Only the numeric value of the old pointer survives the call; the
    // original realloc may have freed the block it pointed at.
    let old_addr = old_ptr as usize;
    let original: ReallocFn = mem::transmute(ORIG_REALLOC.load(Ordering::Relaxed));
    let new_ptr = original(old_ptr, new_size);

    if let Some(_guard) = ReentryGuard::enter() {
        if new_ptr.is_null() {
            // glibc frees the block and returns null for realloc(p, 0).
            if new_size == 0 {
                registry().record_deallocation(old_addr);
            }
        } else if new_ptr as usize == old_addr {
            let stack = capture_stack();
            registry().update_allocation(old_addr, new_size, stack);
        } else {
            let stack = capture_stack();
            let mut registry = registry();
            registry.record_deallocation(old_addr);
            registry.record_allocation(new_ptr as usize, new_size, stack);
        }
    }
    new_ptr
}

// _Znwm / _Znam: operator new and operator new[].
unsafe extern "C" fn hooked_operator_new(size: size_t) -> *mut c_void {
    hooked_malloc(size)
}

unsafe extern "C" fn hooked_operator_new_array(size: size_t) -> *mut c_void {
    hooked_malloc(size)
}

// _ZdlPv / _ZdaPv: operator delete and operator delete[]. Null deletes are
// legal and fall through to the original free, which ignores them.
unsafe extern "C" fn hooked_operator_delete(ptr: *mut c_void) {
    hooked_free(ptr);
}

unsafe extern "C" fn hooked_operator_delete_array(ptr: *mut c_void) {
    hooked_free(ptr);
}

/// Redirect one object's allocator slots to the shims above.
///
/// `malloc` and `free` are required; installation failures for them are
/// reported as errors. The rest of the family is optional, since static
/// linkage or inlining routinely removes individual PLT slots, and absent
/// symbols are listed as skipped.
pub fn install(hook: &PltHook) {
    // Stash originals before any slot is patched so a shim can never see a
    // null original, even if another thread races through the PLT mid-way.
    for (name, cell) in [
        ("malloc", &ORIG_MALLOC),
        ("free", &ORIG_FREE),
        ("calloc", &ORIG_CALLOC),
        ("realloc", &ORIG_REALLOC),
    ] {
        match hook.resolve_original(name) {
            Ok(addr) => cell.store(addr as usize, Ordering::SeqCst),
            Err(e) => output::error(&format!("failed to resolve {name}: {e}")),
        }
    }

    let mut hooked: Vec<&str> = Vec::new();
    let mut skipped: Vec<&str> = Vec::new();
    {
        let mut try_hook = |symbol: &str, shim: usize, display: &'static str, required: bool| {
            match hook.replace(symbol, shim as *mut c_void) {
                Ok(_) => hooked.push(display),
                Err(_) if required => {
                    output::error(&format!("failed to hook {display}: {}", plt::last_error()));
                }
                Err(_) => skipped.push(display),
            }
        };

        try_hook("malloc", hooked_malloc as usize, "malloc", true);
        try_hook("free", hooked_free as usize, "free", true);
        try_hook("calloc", hooked_calloc as usize, "calloc", false);
        try_hook("realloc", hooked_realloc as usize, "realloc", false);
        try_hook("_Znwm", hooked_operator_new as usize, "operator new", false);
        try_hook("_ZdlPv", hooked_operator_delete as usize, "operator delete", false);
        try_hook("_Znam", hooked_operator_new_array as usize, "operator new[]", false);
        try_hook("_ZdaPv", hooked_operator_delete_array as usize, "operator delete[]", false);
    }

    if !hooked.is_empty() {
        let names = hooked.join(", ");
        output::print_parts(&[
            (Some(&Style::new().green()), "Successfully hooked functions: "),
            (None, names.as_str()),
        ]);
    }
    if !skipped.is_empty() {
        let names = skipped.join(", ");
        output::print_parts(&[
            (Some(&Style::new().yellow()), "Skipped functions (not in PLT): "),
            (None, names.as_str()),
        ]);
    }
}

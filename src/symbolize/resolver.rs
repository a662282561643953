//! Frame attribution and report-time resolution
//!
//! Maps absolute frame addresses to their owning module via `dladdr`,
//! suppresses the detector's own frames, and resolves the survivors through
//! cached [`ModuleSymbols`] contexts.

use crate::symbolize::ModuleSymbols;
use libc::{c_void, Dl_info};
use log::debug;
use rustc_demangle::demangle;
use std::collections::HashMap;
use std::ffi::CStr;

/// Substring of the detector's own shared-object name, kept as a fallback
/// when `dladdr` cannot attribute a base address for comparison.
const SELF_IMAGE_MARKER: &str = "libnv_detector";

/// Anchor whose address identifies the module this crate is linked into.
static OWN_IMAGE_ANCHOR: u8 = 0;

/// What `dladdr` knows about one address.
#[derive(Debug, Clone)]
pub struct AddressInfo {
    pub module_path: String,
    pub module_base: usize,
    /// Nearest exported symbol, when the linker knows one.
    pub symbol: Option<String>,
}

/// Module attribution for an absolute address.
#[must_use]
pub fn address_info(addr: usize) -> Option<AddressInfo> {
    let mut info = Dl_info {
        dli_fname: std::ptr::null(),
        dli_fbase: std::ptr::null_mut(),
        dli_sname: std::ptr::null(),
        dli_saddr: std::ptr::null_mut(),
    };
    if unsafe { libc::dladdr(addr as *const c_void, &mut info) } == 0 || info.dli_fname.is_null() {
        return None;
    }
    let module_path =
        unsafe { CStr::from_ptr(info.dli_fname) }.to_string_lossy().into_owned();
    let symbol = if info.dli_sname.is_null() {
        None
    } else {
        Some(unsafe { CStr::from_ptr(info.dli_sname) }.to_string_lossy().into_owned())
    };
    Some(AddressInfo { module_path, module_base: info.dli_fbase as usize, symbol })
}

/// One fully attributed frame of a captured stack.
#[derive(Debug, Clone)]
pub struct ResolvedFrame {
    pub absolute: usize,
    /// Offset from the owning module's load base.
    pub relative: usize,
    pub module: Option<String>,
    pub function: Option<String>,
    /// `file:line` when DWARF had it.
    pub location: Option<String>,
}

impl ResolvedFrame {
    /// Render the frame the way reports print it.
    #[must_use]
    pub fn format(&self, index: usize) -> String {
        let mut out = format!("[{index}] absolute: 0x{:x}, relative: 0x{:x}", self.absolute, self.relative);
        if let Some(ref module) = self.module {
            out.push_str(&format!("\n      module: {module}"));
        }
        match (&self.function, &self.location) {
            (Some(function), Some(location)) => {
                out.push_str(&format!("\n      source: {function} at {location}"));
            }
            (Some(function), None) => out.push_str(&format!("\n      source: {function}")),
            (None, Some(location)) => out.push_str(&format!("\n      source: {location}")),
            (None, None) => {}
        }
        out
    }
}

/// Report-time resolver with a per-module DWARF cache.
pub struct FrameResolver {
    own_base: Option<usize>,
    modules: HashMap<String, Option<ModuleSymbols>>,
}

impl FrameResolver {
    #[must_use]
    pub fn new() -> Self {
        // Frames from the detector's own image are noise in user reports,
        // but only when that image is a separate shared object. Linked
        // statically into the target, the anchor lands in the main
        // executable and suppressing its base would hide the very frames
        // the report exists for.
        let own_base = address_info(&OWN_IMAGE_ANCHOR as *const u8 as usize).and_then(|info| {
            // dladdr may report the main executable under a relative path;
            // canonicalize both sides before comparing.
            let own = std::fs::canonicalize(&info.module_path).ok()?;
            let exe = std::fs::canonicalize("/proc/self/exe").ok()?;
            if own == exe {
                None
            } else {
                Some(info.module_base)
            }
        });
        FrameResolver { own_base, modules: HashMap::new() }
    }

    /// Resolve a captured stack, dropping the detector's own frames.
    pub fn resolve_stack(&mut self, stack: &[usize]) -> Vec<ResolvedFrame> {
        stack.iter().filter_map(|&addr| self.resolve_frame(addr)).collect()
    }

    /// Resolve one frame; `None` means the frame belongs to the detector
    /// itself and is suppressed from user-facing reports.
    fn resolve_frame(&mut self, addr: usize) -> Option<ResolvedFrame> {
        let Some(info) = address_info(addr) else {
            // Unattributable address: keep it raw rather than dropping it.
            return Some(ResolvedFrame {
                absolute: addr,
                relative: addr,
                module: None,
                function: None,
                location: None,
            });
        };

        if Some(info.module_base) == self.own_base
            || info.module_path.contains(SELF_IMAGE_MARKER)
        {
            return None;
        }

        let relative = addr.wrapping_sub(info.module_base);

        let symbols = self
            .modules
            .entry(info.module_path.clone())
            .or_insert_with(|| match ModuleSymbols::load(&info.module_path) {
                Ok(symbols) => Some(symbols),
                Err(e) => {
                    debug!("no debug info for {}: {e:#}", info.module_path);
                    None
                }
            });

        let (mut function, location) = match symbols {
            Some(symbols) => symbols.resolve(relative as u64),
            None => (None, None),
        };
        if function.is_none() {
            function = info.symbol.as_deref().map(|name| format!("{:#}", demangle(name)));
        }

        Some(ResolvedFrame {
            absolute: addr,
            relative,
            module: Some(info.module_path),
            function,
            location,
        })
    }
}

impl Default for FrameResolver {
    fn default() -> Self {
        Self::new()
    }
}

//! Call-stack capture and resolution
//!
//! Shims capture raw instruction pointers (bounded depth, no symbol work on
//! the hot path); reports resolve them later to `function at file:line`
//! through per-module DWARF contexts.

mod dwarf;
mod resolver;

pub use dwarf::ModuleSymbols;
pub use resolver::{address_info, AddressInfo, FrameResolver, ResolvedFrame};

use lazy_static::lazy_static;
use std::sync::Mutex;

lazy_static! {
    /// Shared resolver so module debug info is loaded once per process, not
    /// once per report.
    static ref GLOBAL_RESOLVER: Mutex<FrameResolver> = Mutex::new(FrameResolver::new());
}

/// Run `f` with the process-wide frame resolver. Callers already holding a
/// registry lock must do all resolution inside one closure; the resolver
/// lock is always acquired after registry locks, never before.
pub fn with_resolver<R>(f: impl FnOnce(&mut FrameResolver) -> R) -> R {
    let mut resolver = GLOBAL_RESOLVER.lock().unwrap_or_else(|e| e.into_inner());
    f(&mut resolver)
}

/// Frames captured per allocation or lock acquisition.
pub const MAX_STACK_DEPTH: usize = 16;

/// Capture up to [`MAX_STACK_DEPTH`] raw return addresses for the calling
/// thread. Resolution is deferred to report time.
pub fn capture_stack() -> Vec<usize> {
    let mut frames = Vec::with_capacity(MAX_STACK_DEPTH);
    backtrace::trace(|frame| {
        frames.push(frame.ip() as usize);
        frames.len() < MAX_STACK_DEPTH
    });
    frames
}

//! Heap allocation tracking
//!
//! The registry is a process-global map of live allocations keyed by
//! pointer value; the shims are the `extern "C"` functions installed over
//! the allocator family's PLT slots.

mod registry;
mod shims;

pub use registry::{AllocationRecord, MemoryRegistry, MEMORY_REGISTRY};
pub use shims::install;

use crate::reentry::ReentryGuard;
use crate::symbolize::with_resolver;

/// Render the leak report through the output sink.
///
/// Pure with respect to registry state: calling it repeatedly yields the
/// same report for the same set of live allocations.
pub fn report() {
    // Reporting allocates while the registry lock is held. When the caller
    // itself runs through a patched PLT, those allocations re-enter the
    // malloc shim; the guard makes the nested notification a pass-through
    // instead of a self-deadlock on the registry lock.
    let _guard = ReentryGuard::enter();
    let registry = MEMORY_REGISTRY.lock().unwrap_or_else(|e| e.into_inner());
    with_resolver(|resolver| registry.report(resolver));
}

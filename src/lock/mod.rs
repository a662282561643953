//! Mutex acquisition tracking and deadlock detection
//!
//! The registry maintains a wait-for graph over `pthread_mutex_t`
//! addresses; the shims are the `extern "C"` functions installed over the
//! pthread PLT slots. Cycle detection runs on the acquire-attempt path, so
//! a potential deadlock is reported by the thread about to complete it.

mod registry;
mod shims;

pub use registry::{LockRecord, LockRegistry, ThreadState, LOCK_REGISTRY};
pub use shims::install;

use crate::reentry::ReentryGuard;
use crate::symbolize::with_resolver;

/// Render the lock status snapshot through the output sink.
///
/// Pure with respect to registry state; safe to call repeatedly.
pub fn report() {
    // Keeps allocations made while rendering from re-entering the memory
    // shim and its registry lock when this binary is itself instrumented.
    let _guard = ReentryGuard::enter();
    let registry = LOCK_REGISTRY.lock().unwrap_or_else(|e| e.into_inner());
    with_resolver(|resolver| registry.report(resolver));
}

//! Per-thread re-entrancy guard shared by every shim
//!
//! Registry bookkeeping allocates, and when the instrumented object is the
//! one running this code those allocations come straight back through the
//! patched malloc slot. The guard short-circuits the nested notification so
//! only the outermost call is recorded.

use std::cell::Cell;

thread_local! {
    static IN_SHIM: Cell<bool> = const { Cell::new(false) };
}

/// RAII token for "this thread is inside a shim notification".
pub(crate) struct ReentryGuard;

impl ReentryGuard {
    /// Claim the guard, or `None` when the thread is already inside a shim.
    pub(crate) fn enter() -> Option<Self> {
        IN_SHIM.with(|flag| {
            if flag.get() {
                None
            } else {
                flag.set(true);
                Some(ReentryGuard)
            }
        })
    }
}

impl Drop for ReentryGuard {
    fn drop(&mut self) {
        IN_SHIM.with(|flag| flag.set(false));
    }
}

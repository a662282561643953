//! pthread mutex shims
//!
//! `pthread_mutex_lock` notifies the registry before blocking (that is
//! where deadlock detection runs) and again after a successful return;
//! `trylock` only on success, since a failed trylock never waits; `unlock`
//! before delegating. The registry lock is released before the original
//! function is entered, so bookkeeping never extends a real wait.

use crate::domain::ThreadId;
use crate::lock::registry::LOCK_REGISTRY;
use crate::output;
use crate::plt::{self, PltHook};
use crate::reentry::ReentryGuard;
use crate::symbolize::{capture_stack, with_resolver};
use console::Style;
use libc::{c_int, c_void, pthread_mutex_t};
use std::mem;
use std::sync::atomic::{AtomicUsize, Ordering};

static ORIG_MUTEX_LOCK: AtomicUsize = AtomicUsize::new(0);
static ORIG_MUTEX_UNLOCK: AtomicUsize = AtomicUsize::new(0);
static ORIG_MUTEX_TRYLOCK: AtomicUsize = AtomicUsize::new(0);

type MutexFn = unsafe extern "C" fn(*mut pthread_mutex_t) -> c_int;

fn notify_acquire_attempt(mutex: *mut pthread_mutex_t) {
    let Some(_guard) = ReentryGuard::enter() else {
        return;
    };
    let stack = capture_stack();
    let mut registry = LOCK_REGISTRY.lock().unwrap_or_else(|e| e.into_inner());
    if let Some(chain) =
        registry.record_acquire_attempt(mutex as usize, ThreadId::current(), stack)
    {
        with_resolver(|resolver| registry.report_deadlock(&chain, resolver));
    }
}

fn notify_acquired(mutex: *mut pthread_mutex_t) {
    let Some(_guard) = ReentryGuard::enter() else {
        return;
    };
    let stack = capture_stack();
    let mut registry = LOCK_REGISTRY.lock().unwrap_or_else(|e| e.into_inner());
    registry.record_acquired(mutex as usize, ThreadId::current(), stack);
}

fn notify_release(mutex: *mut pthread_mutex_t) {
    let Some(_guard) = ReentryGuard::enter() else {
        return;
    };
    let mut registry = LOCK_REGISTRY.lock().unwrap_or_else(|e| e.into_inner());
    registry.record_release(mutex as usize, ThreadId::current());
}

unsafe extern "C" fn hooked_pthread_mutex_lock(mutex: *mut pthread_mutex_t) -> c_int {
    if !mutex.is_null() {
        notify_acquire_attempt(mutex);
    }
    let original: MutexFn = mem::transmute(ORIG_MUTEX_LOCK.load(Ordering::Relaxed));
    let rc = original(mutex);
    if rc == 0 && !mutex.is_null() {
        notify_acquired(mutex);
    }
    rc
}

unsafe extern "C" fn hooked_pthread_mutex_trylock(mutex: *mut pthread_mutex_t) -> c_int {
    let original: MutexFn = mem::transmute(ORIG_MUTEX_TRYLOCK.load(Ordering::Relaxed));
    let rc = original(mutex);
    if rc == 0 && !mutex.is_null() {
        notify_acquired(mutex);
    }
    rc
}

unsafe extern "C" fn hooked_pthread_mutex_unlock(mutex: *mut pthread_mutex_t) -> c_int {
    if !mutex.is_null() {
        notify_release(mutex);
    }
    let original: MutexFn = mem::transmute(ORIG_MUTEX_UNLOCK.load(Ordering::Relaxed));
    original(mutex)
}

/// Redirect one object's pthread mutex slots to the shims above.
///
/// `lock` and `unlock` are required; `trylock` is optional and reported as
/// skipped when the object's PLT has no slot for it.
pub fn install(hook: &PltHook) {
    for (name, cell) in [
        ("pthread_mutex_lock", &ORIG_MUTEX_LOCK),
        ("pthread_mutex_unlock", &ORIG_MUTEX_UNLOCK),
        ("pthread_mutex_trylock", &ORIG_MUTEX_TRYLOCK),
    ] {
        match hook.resolve_original(name) {
            Ok(addr) => cell.store(addr as usize, Ordering::SeqCst),
            Err(e) => output::error(&format!("failed to resolve {name}: {e}")),
        }
    }

    let mut hooked: Vec<&str> = Vec::new();
    let mut skipped: Vec<&str> = Vec::new();
    {
        let mut try_hook = |symbol: &'static str, shim: usize, required: bool| {
            match hook.replace(symbol, shim as *mut c_void) {
                Ok(_) => hooked.push(symbol),
                Err(_) if required => {
                    output::error(&format!("failed to hook {symbol}: {}", plt::last_error()));
                }
                Err(_) => skipped.push(symbol),
            }
        };

        try_hook("pthread_mutex_lock", hooked_pthread_mutex_lock as usize, true);
        try_hook("pthread_mutex_unlock", hooked_pthread_mutex_unlock as usize, true);
        try_hook("pthread_mutex_trylock", hooked_pthread_mutex_trylock as usize, false);
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

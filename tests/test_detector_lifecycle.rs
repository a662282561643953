//! End-to-end lifecycle against this test binary's own PLT.
//!
//! Everything lives in one test function: arming rewrites process-global
//! state, so ordering between separate tests would be meaningless.

use nv_detector::memory::MEMORY_REGISTRY;
use nv_detector::plt::PltHook;
use nv_detector::{detector, DetectMode, OutputMode};
use std::ptr::addr_of_mut;

static mut MUTEX_A: libc::pthread_mutex_t = libc::PTHREAD_MUTEX_INITIALIZER;
static mut MUTEX_B: libc::pthread_mutex_t = libc::PTHREAD_MUTEX_INITIALIZER;

fn tracked_size(ptr: usize) -> Option<usize> {
    MEMORY_REGISTRY.lock().unwrap_or_else(|e| e.into_inner()).allocation_size(ptr)
}

#[test]
fn test_full_lifecycle_on_own_process() {
    let dir = tempfile::tempdir().expect("tempdir");
    let work_dir = dir.path().to_str().expect("utf-8 tempdir").to_string();

    // Whether the allocator family sits in this binary's PLT depends on
    // the toolchain; probe first and keep the assertions honest.
    let probe = PltHook::open(None).expect("open main");
    let in_plt = |symbol: &[u8]| {
        probe.entries().any(|entry| {
            let name = entry.name.to_bytes();
            name == symbol || (name.starts_with(symbol) && name.get(symbol.len()) == Some(&b'@'))
        })
    };
    let malloc_hooked = in_plt(b"malloc") && in_plt(b"free");
    let realloc_hooked = malloc_hooked && in_plt(b"realloc");
    let mutex_hooked = in_plt(b"pthread_mutex_lock") && in_plt(b"pthread_mutex_unlock");

    detector::init(Some(work_dir.as_str()), DetectMode::BOTH, OutputMode::BOTH);
    let (mode, output, configured_dir) = detector::config();
    assert_eq!(mode, DetectMode::BOTH);
    assert_eq!(output, OutputMode::BOTH);
    assert_eq!(configured_dir.as_deref(), Some(dir.path()));

    detector::register_main();
    detector::start();

    // Balanced malloc/free leaves no record behind.
    let ptr = unsafe { libc::malloc(12345) };
    assert!(!ptr.is_null());
    if malloc_hooked {
        assert_eq!(tracked_size(ptr as usize), Some(12345));
    }
    unsafe { libc::free(ptr) };
    assert_eq!(tracked_size(ptr as usize), None);

    // Moved realloc re-keys the record to the new address.
    if realloc_hooked {
        let small = unsafe { libc::malloc(64) };
        assert!(!small.is_null());
        let big = unsafe { libc::realloc(small, 1 << 20) };
        assert!(!big.is_null());
        assert_eq!(tracked_size(big as usize), Some(1 << 20));
        if big as usize != small as usize {
            assert_eq!(tracked_size(small as usize), None);
        }
        unsafe { libc::free(big) };
        assert_eq!(tracked_size(big as usize), None);
    }

    // free(NULL) must stay a no-op end to end.
    unsafe { libc::free(std::ptr::null_mut()) };

    // Same-order acquisition across two mutexes: contention is possible,
    // a cycle is not, and balanced pairs drain the registry.
    if mutex_hooked {
        let worker = std::thread::spawn(|| unsafe {
            libc::pthread_mutex_lock(addr_of_mut!(MUTEX_A));
            libc::pthread_mutex_lock(addr_of_mut!(MUTEX_B));
            libc::pthread_mutex_unlock(addr_of_mut!(MUTEX_B));
            libc::pthread_mutex_unlock(addr_of_mut!(MUTEX_A));
        });
        unsafe {
            libc::pthread_mutex_lock(addr_of_mut!(MUTEX_A));
            libc::pthread_mutex_lock(addr_of_mut!(MUTEX_B));
            libc::pthread_mutex_unlock(addr_of_mut!(MUTEX_B));
            libc::pthread_mutex_unlock(addr_of_mut!(MUTEX_A));
        }
        worker.join().expect("worker thread");

        let registry = nv_detector::lock::LOCK_REGISTRY.lock().unwrap_or_else(|e| e.into_inner());
        assert_eq!(
            registry.active_locks(),
            0,
            "balanced lock/unlock pairs must drain the registry"
        );
    }

    // Reporting is repeatable and leaves a log file behind.
    detector::detect();
    detector::detect();

    let log = nv_detector::output::log_path().expect("log file configured");
    let contents = std::fs::read_to_string(&log).expect("log file readable");
    assert!(contents.contains("=== Memory Tracker Status ==="));
    assert!(contents.contains("=== Lock Detector Status ==="));
    assert!(contents.contains("Total allocated:"));
}

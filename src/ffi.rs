//! C-ABI facade
//!
//! Stable entry points for C and C++ targets. Option values mirror the C
//! header enums; panics never cross the boundary.

#![allow(non_snake_case)]

use crate::detector;
use crate::domain::{DetectMode, OutputMode};
use crate::output;
use libc::{c_char, c_int};
use std::ffi::CStr;
use std::panic::{catch_unwind, AssertUnwindSafe};

/// Configure the detector. `mode`: 1 = memory, 2 = lock, 3 = both.
/// `output`: 1 = console, 2 = file, 3 = both. Out-of-range values fall back
/// to both-detectors / console with a warning; a null `work_dir` degrades
/// to console-only logging.
#[no_mangle]
pub extern "C" fn DetectorInit(work_dir: *const c_char, mode: c_int, output: c_int) {
    let work_dir = if work_dir.is_null() {
        None
    } else {
        Some(unsafe { CStr::from_ptr(work_dir) }.to_string_lossy().into_owned())
    };

    let _ = catch_unwind(AssertUnwindSafe(|| {
        let mode = DetectMode::from_bits(mode as u32).unwrap_or_else(|| {
            output::warn(&format!("invalid detector option {mode}; using memory+lock"));
            DetectMode::BOTH
        });
        let output_mode = OutputMode::from_bits(output as u32).unwrap_or_else(|| {
            output::warn(&format!("invalid output option {output}; using console"));
            OutputMode::CONSOLE
        });
        if work_dir.is_none() {
            output::warn("DetectorInit called with null work_dir");
        }
        detector::init(work_dir.as_deref(), mode, output_mode);
    }));
}

/// Arm instrumentation for every registered object.
#[no_mangle]
pub extern "C" fn DetectorStart() {
    let _ = catch_unwind(detector::start);
}

/// Render the reports of every active detector.
#[no_mangle]
pub extern "C" fn DetectorDetect() {
    let _ = catch_unwind(detector::detect);
}

/// Register a shared object by name or path. Null is a no-op.
#[no_mangle]
pub extern "C" fn DetectorRegister(lib_name: *const c_char) {
    if lib_name.is_null() {
        return;
    }
    let lib_name = unsafe { CStr::from_ptr(lib_name) }.to_string_lossy().into_owned();
    let _ = catch_unwind(AssertUnwindSafe(|| detector::register(&lib_name)));
}

/// Register the main executable.
#[no_mangle]
pub extern "C" fn DetectorRegisterMain() {
    let _ = catch_unwind(detector::register_main);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_register_is_noop() {
        DetectorRegister(std::ptr::null());
    }
}

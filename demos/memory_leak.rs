//! Leak detection demo.
//!
//! Arms allocation tracking on this executable, leaks one allocation,
//! balances another, and prints the report. The leak entry should point at
//! the `libc::malloc(100)` line below.

use nv_detector::{detector, DetectMode, OutputMode};

fn main() {
    env_logger::init();

    println!("========================================");
    println!("Memory Leak Detection Demo");
    println!("========================================");

    detector::init(Some("./logs"), DetectMode::MEMORY, OutputMode::BOTH);
    detector::register_main();
    detector::start();

    // One allocation that never gets freed.
    let leaked = unsafe { libc::malloc(100) };
    println!("leaked {leaked:p} (100 bytes)");

    // And one balanced pair, which must not appear in the report.
    let paired = unsafe { libc::malloc(512) };
    unsafe { libc::free(paired) };

    // Growth through realloc: only the final block may be reported.
    let grown = unsafe { libc::malloc(64) };
    let grown = unsafe { libc::realloc(grown, 1 << 20) };
    println!("grew a block to 1 MiB at {grown:p}");

    detector::detect();
}

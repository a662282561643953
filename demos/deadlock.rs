//! Deadlock detection demo.
//!
//! Two threads take the same pair of mutexes in opposite order. After a
//! two-second settle the report shows the wait cycle; the detection itself
//! fires from whichever thread closes the cycle. The threads stay blocked,
//! so the process exits without joining them.

use nv_detector::{detector, DetectMode, OutputMode};
use std::ptr::addr_of_mut;
use std::thread;
use std::time::Duration;

static mut MUTEX_A: libc::pthread_mutex_t = libc::PTHREAD_MUTEX_INITIALIZER;
static mut MUTEX_B: libc::pthread_mutex_t = libc::PTHREAD_MUTEX_INITIALIZER;

fn thread_one() {
    unsafe {
        println!("[thread 1] locking A...");
        libc::pthread_mutex_lock(addr_of_mut!(MUTEX_A));
        println!("[thread 1] locked A");
        thread::sleep(Duration::from_millis(100));
        println!("[thread 1] locking B...");
        libc::pthread_mutex_lock(addr_of_mut!(MUTEX_B));
        println!("[thread 1] locked B");
        libc::pthread_mutex_unlock(addr_of_mut!(MUTEX_B));
        libc::pthread_mutex_unlock(addr_of_mut!(MUTEX_A));
        println!("[thread 1] released both");
    }
}

fn thread_two() {
    unsafe {
        println!("[thread 2] locking B...");
        libc::pthread_mutex_lock(addr_of_mut!(MUTEX_B));
        println!("[thread 2] locked B");
        thread::sleep(Duration::from_millis(100));
        println!("[thread 2] locking A...");
        libc::pthread_mutex_lock(addr_of_mut!(MUTEX_A));
        println!("[thread 2] locked A");
        libc::pthread_mutex_unlock(addr_of_mut!(MUTEX_A));
        libc::pthread_mutex_unlock(addr_of_mut!(MUTEX_B));
        println!("[thread 2] released both");
    }
}

fn main() {
    env_logger::init();

    println!("========================================");
    println!("Deadlock Detection Demo");
    println!("========================================");

    detector::init(Some("./logs"), DetectMode::LOCK, OutputMode::BOTH);
    detector::register_main();
    detector::start();

    println!("\nspawning two threads with opposite lock order...\n");
    thread::spawn(thread_one);
    thread::spawn(thread_two);

    thread::sleep(Duration::from_secs(2));

    println!("\n>>> detecting...");
    detector::detect();

    println!("\ndemo finished (the threads may still be deadlocked)");
    std::process::exit(0);
}

//! PLT inspection demo.
//!
//! Enumerates the JUMP_SLOT entries of this executable and prints each
//! symbol with the GOT slot it resolves through.

use nv_detector::PltHook;

fn main() {
    env_logger::init();

    let hook = PltHook::open(None).expect("open main executable");

    let mut count = 0;
    for (index, entry) in hook.entries().enumerate() {
        println!("[{index:3}] {:<40} slot {:p}", entry.name.to_string_lossy(), entry.slot);
        count += 1;
    }
    println!("\n{count} JUMP_SLOT entries");

    match hook.resolve_original("malloc") {
        Ok(addr) => println!("malloc currently resolves to {addr:p}"),
        Err(e) => println!("malloc does not resolve: {e}"),
    }
}

//! Symbolization tests against the running process and its libc.

use nv_detector::symbolize::{
    address_info, capture_stack, FrameResolver, ModuleSymbols, MAX_STACK_DEPTH,
};

#[test]
fn test_capture_stack_is_bounded_and_nonempty() {
    let stack = capture_stack();
    assert!(!stack.is_empty());
    assert!(stack.len() <= MAX_STACK_DEPTH);
    assert!(stack.iter().all(|&addr| addr != 0));
}

#[test]
fn test_address_info_attributes_libc() {
    let info = address_info(libc::malloc as usize).expect("malloc is attributable");
    assert!(info.module_path.contains("libc") || info.module_path.contains("ld-"));
    assert_ne!(info.module_base, 0);
}

#[test]
fn test_resolver_handles_libc_frame() {
    let mut resolver = FrameResolver::new();
    let frames = resolver.resolve_stack(&[libc::malloc as usize]);
    assert_eq!(frames.len(), 1);
    let frame = frames[0].clone();
    assert!(frame.module.is_some());
    assert!(frame.relative <= frame.absolute);
    // Rendering must always carry the address pair, resolved or not.
    let text = frame.format(0);
    assert!(text.contains("absolute: 0x"));
    assert!(text.contains("relative: 0x"));
}

#[test]
fn test_resolver_keeps_unattributable_addresses_raw() {
    let mut resolver = FrameResolver::new();
    let frames = resolver.resolve_stack(&[0x10]);
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].absolute, 0x10);
    assert!(frames[0].module.is_none());
    assert!(frames[0].function.is_none());
}

#[test]
fn test_module_symbols_for_current_exe() {
    let exe = std::env::current_exe().expect("current exe");
    let symbols = ModuleSymbols::load(exe.to_str().expect("utf-8 path"))
        .expect("test binary carries parseable debug sections");
    // Out-of-range addresses must resolve cleanly to nothing.
    assert_eq!(symbols.resolve(u64::MAX), (None, None));
}

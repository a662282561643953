//! # nv-detector - PLT-based leak and deadlock detection
//!
//! nv-detector is a Linux-only, in-process instrumentation library. It
//! rewrites the Procedure Linkage Table of registered ELF64 objects so that
//! calls to the libc allocator family and to `pthread_mutex_{lock,trylock,
//! unlock}` route through bookkeeping shims, then reports leaked heap
//! allocations and potential lock-order deadlocks on demand.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                    Target Program                        │
//! │        malloc / free / pthread_mutex_lock / ...          │
//! └──────────────────────┬───────────────────────────────────┘
//!                        │ calls through patched GOT slots
//!                        ▼
//! ┌──────────────────────────────────────────────────────────┐
//! │                 nv-detector (this crate)                 │
//! │                                                          │
//! │  ┌──────────┐    ┌────────────────┐   ┌──────────────┐  │
//! │  │   plt    │───▶│  memory / lock  │──▶│    output    │  │
//! │  │ rewriter │    │   registries    │   │     sink     │  │
//! │  └──────────┘    └────────────────┘   └──────────────┘  │
//! │                          │                               │
//! │                          ▼                               │
//! │                  ┌──────────────┐                        │
//! │                  │  symbolize   │                        │
//! │                  │   (DWARF)    │                        │
//! │                  └──────────────┘                        │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Structure
//!
//! - [`plt`]: the PLT rewriter. Resolves a loaded object's link-map entry,
//!   parses its dynamic section, enumerates JUMP_SLOT relocations, and
//!   atomically redirects a named symbol's GOT slot while handing back the
//!   original target.
//! - [`memory`]: allocation registry plus the `malloc`/`free`/`calloc`/
//!   `realloc` and `operator new`/`delete` shims feeding it.
//! - [`lock`]: wait-for graph over `pthread_mutex_t` addresses plus the
//!   pthread shims feeding it; DFS cycle detection reports potential
//!   deadlocks as they form.
//! - [`symbolize`]: bounded backtrace capture and in-process DWARF
//!   symbolization of captured frames (function, file:line).
//! - [`output`]: console/file report sink with ANSI color on the console
//!   stream only.
//! - [`detector`]: the orchestrator binding everything into the configure /
//!   register / arm / report lifecycle.
//! - [`ffi`]: the stable C-ABI facade (`DetectorInit`, `DetectorStart`, ...).
//! - [`domain`]: newtype ids, configuration enums, and the error taxonomy.
//!
//! ## Typical Usage (from C)
//!
//! ```c
//! DetectorInit("./logs", kDetectorOptionMemoryLock, kOutputOptionConsoleFile);
//! DetectorRegisterMain();
//! DetectorStart();
//! /* ... run the workload ... */
//! DetectorDetect();
//! ```
//!
//! Instrumentation is armed only for objects registered before
//! `DetectorStart`; allocations made before arming are invisible, and PLT
//! slots stay redirected for the process lifetime.

pub mod detector;
pub mod domain;
pub mod ffi;
pub mod lock;
pub mod memory;
pub mod output;
pub mod plt;
mod reentry;
pub mod symbolize;

pub use domain::{DetectMode, HookError, OutputMode};
pub use plt::PltHook;

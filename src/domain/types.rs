//! Domain types providing compile-time safety and self-documentation
//!
//! Newtype wrappers keep mutex addresses and thread ids from being mixed up
//! with plain integers, and the configuration enums mirror the values the C
//! facade accepts.

use std::fmt;

/// Thread id as reported by `pthread_self`.
///
/// A value of 0 means "no owner yet" in lock records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ThreadId(pub u64);

impl ThreadId {
    /// Id of the calling thread.
    pub fn current() -> Self {
        ThreadId(unsafe { libc::pthread_self() } as u64)
    }
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Address of a `pthread_mutex_t` used as a lock-registry key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MutexAddr(pub usize);

impl fmt::Display for MutexAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:x}", self.0)
    }
}

/// Which detectors are active. Bit-combinable: memory = 1, lock = 2.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DetectMode(u32);

impl DetectMode {
    pub const MEMORY: DetectMode = DetectMode(1);
    pub const LOCK: DetectMode = DetectMode(2);
    pub const BOTH: DetectMode = DetectMode(3);

    /// Validate a raw C-ABI value.
    pub fn from_bits(bits: u32) -> Option<Self> {
        match bits {
            1..=3 => Some(DetectMode(bits)),
            _ => None,
        }
    }

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn memory(self) -> bool {
        self.0 & Self::MEMORY.0 != 0
    }

    pub fn lock(self) -> bool {
        self.0 & Self::LOCK.0 != 0
    }
}

impl fmt::Display for DetectMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.memory(), self.lock()) {
            (true, true) => write!(f, "memory+lock"),
            (true, false) => write!(f, "memory"),
            (false, true) => write!(f, "lock"),
            (false, false) => write!(f, "none"),
        }
    }
}

/// Where reports go. Bit-combinable: console = 1, file = 2.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputMode(u32);

impl OutputMode {
    pub const CONSOLE: OutputMode = OutputMode(1);
    pub const FILE: OutputMode = OutputMode(2);
    pub const BOTH: OutputMode = OutputMode(3);

    pub fn from_bits(bits: u32) -> Option<Self> {
        match bits {
            1..=3 => Some(OutputMode(bits)),
            _ => None,
        }
    }

    pub fn console(self) -> bool {
        self.0 & Self::CONSOLE.0 != 0
    }

    pub fn file(self) -> bool {
        self.0 & Self::FILE.0 != 0
    }
}

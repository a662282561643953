//! Structured error types for nv-detector
//!
//! Using thiserror for automatic Display implementation and error chaining.

use thiserror::Error;

/// Failures surfaced by the PLT rewriter and the orchestration around it.
#[derive(Error, Debug)]
pub enum HookError {
    /// The named object is not mapped into the process.
    #[error("object not loaded: {0}")]
    FileNotFound(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The symbol is absent from the PLT or cannot be resolved at all.
    #[error("no such function: {0}")]
    FunctionNotFound(String),

    /// Malformed dynamic section, refused mprotect, unreadable maps.
    #[error("{0}")]
    Internal(String),

    /// Enumeration cursor ran past the last JUMP_SLOT entry.
    #[error("no more PLT entries")]
    EofReached,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = HookError::FileNotFound("libfoo.so".to_string());
        assert_eq!(err.to_string(), "object not loaded: libfoo.so");

        let err = HookError::FunctionNotFound("calloc".to_string());
        assert_eq!(err.to_string(), "no such function: calloc");
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "maps gone");
        let err: HookError = io.into();
        assert!(err.to_string().contains("maps gone"));
    }
}

use std::path::PathBuf;
use std::time::Duration;

/// Every way a debug session can fail. All variants abort the session;
/// the kernel file is restored regardless.
#[derive(Debug, thiserror::Error)]
pub enum DebugError {
    #[error("breakpoint line {0} is not inside any function body")]
    OutOfScope(u32),

    #[error("breakpoint is inside '{0}', which is not a __kernel entry point")]
    NotKernelEntry(String),

    #[error("'{name}' has {dims} array dimensions; at most 3 are supported")]
    TooManyDimensions { name: String, dims: usize },

    #[error("undefined struct name '{0}'")]
    UndefinedStruct(String),

    #[error("decode mismatch: expected '{expected}', found '{found}'")]
    DecodeMismatch { expected: String, found: String },

    #[error("vector lane count mismatch: expected {expected}, found {found}")]
    VectorArityMismatch { expected: usize, found: usize },

    #[error("array token count mismatch: expected {expected} tokens, found {found}")]
    ArrayArityMismatch { expected: usize, found: usize },

    #[error("invalid value literal '{literal}' for type '{ty}'")]
    BadLiteral { literal: String, ty: String },

    #[error("no debug data: output stream ended before the sync marker")]
    NoDebugData,

    #[error("target binary not found: {}", .0.display())]
    BinaryNotFound(PathBuf),

    #[error("build command failed: {0}")]
    BuildFailed(String),

    #[error("timed out after {0:?} waiting for kernel output")]
    Timeout(Duration),

    #[error("malformed kernel source: {0}")]
    Scan(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

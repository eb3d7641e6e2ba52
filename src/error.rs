//! Error handling for the gzip stream layer

use num_derive::{FromPrimitive, ToPrimitive};
use thiserror::Error;

/// zlib-compatible status codes, for callers bridging to a numeric surface
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive, ToPrimitive)]
pub enum CodecStatus {
    Ok = 0,
    StreamEnd = 1,
    StreamError = -2,
    DataError = -3,
    MemError = -4,
    BufError = -5,
    ErrNo = -1,
}

/// Error enum for every stream, codec and fault-chain operation
#[derive(Debug, Error)]
pub enum GzError {
    /// Bad handle, descriptor or mode string
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Buffer reservation failed
    #[error("Out of memory: {0}")]
    OutOfMemory(String),

    /// Encoder/decoder rejected the input, state or container format
    #[error("Codec error: {0}")]
    CodecError(String),

    /// Underlying descriptor read/write failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// No handler in the fault chain claimed an accelerator fault
    #[error("Unresolved accelerator fault at {addr:#x}")]
    UnresolvedFault { addr: usize },

    /// The session recorded an earlier failure and can no longer be used
    #[error("Session unusable after earlier failure: {0}")]
    SessionPoisoned(String),
}

impl GzError {
    /// Numeric status matching the zlib convention
    pub fn status(&self) -> CodecStatus {
        match self {
            GzError::InvalidArgument(_) => CodecStatus::StreamError,
            GzError::OutOfMemory(_) => CodecStatus::MemError,
            GzError::CodecError(_) => CodecStatus::DataError,
            GzError::Io(_) => CodecStatus::ErrNo,
            GzError::UnresolvedFault { .. } => CodecStatus::ErrNo,
            GzError::SessionPoisoned(_) => CodecStatus::StreamError,
        }
    }
}

impl From<std::collections::TryReserveError> for GzError {
    fn from(e: std::collections::TryReserveError) -> Self {
        GzError::OutOfMemory(e.to_string())
    }
}

impl From<flate2::DecompressError> for GzError {
    fn from(e: flate2::DecompressError) -> Self {
        GzError::CodecError(format!("inflate: {}", e))
    }
}

/// Error extension trait for additional error handling capabilities
pub trait ErrorExt {
    /// Determines if retrying the same call could succeed
    fn is_recoverable(&self) -> bool;

    /// Provides a detailed error context
    fn context(&self) -> Option<&str>;
}

impl ErrorExt for GzError {
    fn is_recoverable(&self) -> bool {
        match self {
            GzError::OutOfMemory(_) => true,
            GzError::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::Interrupted | std::io::ErrorKind::WouldBlock
            ),
            GzError::InvalidArgument(_) => false,
            GzError::CodecError(_) => false,
            GzError::UnresolvedFault { .. } => false,
            GzError::SessionPoisoned(_) => false,
        }
    }

    fn context(&self) -> Option<&str> {
        match self {
            GzError::InvalidArgument(ctx) => Some(ctx),
            GzError::OutOfMemory(ctx) => Some(ctx),
            GzError::CodecError(ctx) => Some(ctx),
            GzError::SessionPoisoned(ctx) => Some(ctx),
            _ => None,
        }
    }
}

/// Convenience result type using GzError
pub type GzResult<T> = Result<T, GzError>;

#[cfg(test)]
mod tests {
    use super::*;
    use num_traits::{FromPrimitive, ToPrimitive};

    #[test]
    fn test_status_codes_match_zlib() {
        assert_eq!(CodecStatus::Ok.to_i32(), Some(0));
        assert_eq!(CodecStatus::StreamEnd.to_i32(), Some(1));
        assert_eq!(CodecStatus::DataError.to_i32(), Some(-3));
        assert_eq!(CodecStatus::from_i32(-5), Some(CodecStatus::BufError));
        assert_eq!(CodecStatus::from_i32(7), None);
    }

    #[test]
    fn test_error_status_and_context() {
        let err = GzError::CodecError("bad header".to_string());
        assert_eq!(err.status(), CodecStatus::DataError);
        assert_eq!(err.context(), Some("bad header"));
        assert!(!err.is_recoverable());

        let err = GzError::UnresolvedFault { addr: 0x1000 };
        assert_eq!(err.context(), None);
        assert_eq!(err.to_string(), "Unresolved accelerator fault at 0x1000");
    }
}

//! Utility functions and helpers

use std::time::{Duration, Instant};

use crate::error::GzResult;

/// Utility for timing operations
pub struct Stopwatch {
    start: Instant,
}

impl Stopwatch {
    /// Create and start a new stopwatch
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Elapsed time since start
    pub fn stop(&self) -> Duration {
        self.start.elapsed()
    }
}

/// Worst-case deflate output for `len` input bytes, including block overhead.
///
/// Same bound zlib's `deflateBound` uses for its default parameters.
pub fn deflate_bound(len: usize) -> usize {
    len + (len >> 12) + (len >> 14) + (len >> 25) + 13
}

/// Zero-filled buffer reserved fallibly
pub fn try_alloc(len: usize) -> GzResult<Vec<u8>> {
    let mut buf = Vec::new();
    buf.try_reserve_exact(len)?;
    buf.resize(len, 0);
    Ok(buf)
}

/// Logging helpers for results that are deliberately not propagated
pub trait LogExt {
    /// Log a warning
    fn log_warning(&self, message: &str);
}

impl<T, E: std::fmt::Display> LogExt for Result<T, E> {
    fn log_warning(&self, message: &str) {
        if let Err(e) = self {
            tracing::warn!(error = %e, "{}", message);
        }
    }
}

//! Codec path selection for stream operations

use std::time::Duration;

use tracing::trace;

use crate::config::CodecMode;

/// Direction of a stream session, fixed at open
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Compress,
    Decompress,
}

/// Engine that executes a codec step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecPath {
    /// Accelerator engine, completion mediated by the fault chain
    Hardware,

    /// In-process deflate
    Software,
}

/// Pick the engine for one call.
///
/// Under Automatic, payloads up to and including `threshold` stay in
/// software: accelerator setup and fault-mediated completion dominate for
/// small requests.
pub fn select(mode: CodecMode, threshold: usize, payload_size: usize) -> CodecPath {
    let path = match mode {
        CodecMode::SoftwareOnly => CodecPath::Software,
        CodecMode::HardwareOnly => CodecPath::Hardware,
        CodecMode::Automatic if payload_size <= threshold => CodecPath::Software,
        CodecMode::Automatic => CodecPath::Hardware,
    };
    trace!(?mode, threshold, payload_size, ?path, "selected codec path");
    path
}

/// Descriptor read sizing for the decompress loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadChunking {
    /// Chunk used when the caller asks for at most `short_request` bytes
    pub small_chunk: usize,

    /// Chunk used otherwise
    pub large_chunk: usize,

    pub short_request: usize,
}

impl Default for ReadChunking {
    fn default() -> Self {
        Self {
            small_chunk: 64,
            large_chunk: 16 * 1024,
            short_request: 256,
        }
    }
}

impl ReadChunking {
    /// Chunk size for a request of `requested` output bytes
    pub fn chunk_for(&self, requested: usize) -> usize {
        let chunk = if requested <= self.short_request {
            self.small_chunk
        } else {
            self.large_chunk
        };
        chunk.max(1)
    }
}

/// Per-path call statistics of one session
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PathMetrics {
    pub calls: u64,

    /// Caller-side bytes handed in (write) or asked for (read)
    pub requested_bytes: u64,

    pub busy_time: Duration,
}

/// Statistics collector for both paths
#[derive(Debug, Clone, Default)]
pub struct PathStatistics {
    hardware: PathMetrics,
    software: PathMetrics,
}

impl PathStatistics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one call
    pub fn record(&mut self, path: CodecPath, requested: usize, duration: Duration) {
        let metrics = match path {
            CodecPath::Hardware => &mut self.hardware,
            CodecPath::Software => &mut self.software,
        };
        metrics.calls += 1;
        metrics.requested_bytes += requested as u64;
        metrics.busy_time += duration;
    }

    pub fn get(&self, path: CodecPath) -> &PathMetrics {
        match path {
            CodecPath::Hardware => &self.hardware,
            CodecPath::Software => &self.software,
        }
    }
}

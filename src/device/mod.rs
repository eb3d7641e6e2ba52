//! Deflate engines behind the two codec paths

mod accelerator;
mod metrics;

pub use accelerator::{AcceleratorEngine, PageResolver, PageTable, PAGE_SIZE};
pub use metrics::{EngineMetrics, ResidencyMetrics};

use flate2::{Decompress, FlushDecompress, Status};

use crate::codec::{Flush, RawDeflate};
use crate::dispatch::CodecPath;
use crate::error::GzResult;

/// One raw-deflate step executor.
///
/// The gzip framing layer owns the raw stream state; an engine only
/// decides where and how the step runs. Bytes consumed/produced are read
/// back from the stream's `total_in`/`total_out` counters.
pub trait DeflateEngine {
    /// Path this engine implements
    fn path(&self) -> CodecPath;

    /// Compress step
    ///
    /// # Errors
    /// Returns `GzError` if the encoder or the engine fails
    fn deflate(
        &mut self,
        stream: &mut RawDeflate,
        input: &[u8],
        output: &mut [u8],
        flush: Flush,
    ) -> GzResult<Status>;

    /// Decompress step
    ///
    /// # Errors
    /// Returns `GzError` if the decoder or the engine fails
    fn inflate(
        &mut self,
        stream: &mut Decompress,
        input: &[u8],
        output: &mut [u8],
        flush: FlushDecompress,
    ) -> GzResult<Status>;

    /// Snapshot of the engine counters
    fn metrics(&self) -> EngineMetrics;
}

/// In-process deflate
#[derive(Debug, Default)]
pub struct SoftwareEngine {
    metrics: EngineMetrics,
}

impl SoftwareEngine {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DeflateEngine for SoftwareEngine {
    fn path(&self) -> CodecPath {
        CodecPath::Software
    }

    fn deflate(
        &mut self,
        stream: &mut RawDeflate,
        input: &[u8],
        output: &mut [u8],
        flush: Flush,
    ) -> GzResult<Status> {
        let (in0, out0) = (stream.total_in(), stream.total_out());
        let status = stream.compress(input, output, flush)?;
        self.metrics
            .record_step(stream.total_in() - in0, stream.total_out() - out0);
        Ok(status)
    }

    fn inflate(
        &mut self,
        stream: &mut Decompress,
        input: &[u8],
        output: &mut [u8],
        flush: FlushDecompress,
    ) -> GzResult<Status> {
        let (in0, out0) = (stream.total_in(), stream.total_out());
        let status = stream.decompress(input, output, flush)?;
        self.metrics
            .record_step(stream.total_in() - in0, stream.total_out() - out0);
        Ok(status)
    }

    fn metrics(&self) -> EngineMetrics {
        let mut metrics = self.metrics.clone();
        metrics.calculate_ratio();
        metrics
    }
}

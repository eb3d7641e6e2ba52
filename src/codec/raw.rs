//! Raw deflate compressor honouring the deflate strategy

use flate2::{Compression, Status};
use miniz_oxide::deflate::core::{create_comp_flags_from_zip_params, CompressorOxide};
use miniz_oxide::deflate::stream::deflate;
use miniz_oxide::{MZError, MZFlush, MZStatus};

use super::{Flush, Strategy};
use crate::error::{GzError, GzResult};

/// Negative window bits select a raw stream with a 32 KiB window
const RAW_WINDOW_BITS: i32 = -15;

/// Raw deflate stream state.
///
/// `flate2::Compress` fixes the strategy to the default one, so the body of a
/// gzip member is produced by the `miniz_oxide` compressor directly.
pub struct RawDeflate {
    inner: Box<CompressorOxide>,
    total_in: u64,
    total_out: u64,
}

impl RawDeflate {
    pub fn new(level: Compression, strategy: Strategy) -> Self {
        // Strategy discriminants follow zlib's Z_FILTERED/Z_HUFFMAN_ONLY/Z_RLE.
        let flags = create_comp_flags_from_zip_params(
            level.level() as i32,
            RAW_WINDOW_BITS,
            strategy as i32,
        );
        Self {
            inner: Box::new(CompressorOxide::new(flags)),
            total_in: 0,
            total_out: 0,
        }
    }

    /// Total bytes consumed
    pub fn total_in(&self) -> u64 {
        self.total_in
    }

    /// Total bytes produced
    pub fn total_out(&self) -> u64 {
        self.total_out
    }

    /// Compress from `input` into `output`.
    ///
    /// Returns `Status::BufError` when nothing could be done with the
    /// buffers given.
    ///
    /// # Errors
    /// Returns `GzError::CodecError` if the compressor rejects its state
    pub fn compress(&mut self, input: &[u8], output: &mut [u8], flush: Flush) -> GzResult<Status> {
        let flush = match flush {
            Flush::None => MZFlush::None,
            Flush::Finish => MZFlush::Finish,
        };
        let res = deflate(&mut self.inner, input, output, flush);
        self.total_in += res.bytes_consumed as u64;
        self.total_out += res.bytes_written as u64;

        match res.status {
            Ok(MZStatus::Ok) => Ok(Status::Ok),
            Ok(MZStatus::StreamEnd) => Ok(Status::StreamEnd),
            Err(MZError::Buf) => Ok(Status::BufError),
            other => Err(GzError::CodecError(format!("deflate failed: {:?}", other))),
        }
    }
}

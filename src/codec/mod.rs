//! gzip container framing around a raw-deflate engine step

pub mod header;
mod decoder;
mod encoder;
mod raw;

pub use decoder::GzipInflater;
pub use encoder::GzipDeflater;
pub use raw::RawDeflate;

use flate2::Compression;
use num_derive::{FromPrimitive, ToPrimitive};

/// Deflate strategy requested through the mode string.
///
/// Discriminants are the zlib strategy codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, FromPrimitive, ToPrimitive)]
pub enum Strategy {
    #[default]
    Default = 0,
    Filtered = 1,
    HuffmanOnly = 2,
    Rle = 3,
}

/// Flush mode of one framing step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flush {
    /// Incremental; the codec may hold back output
    None,

    /// No more input will follow
    Finish,
}

/// Outcome of one framing step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepStatus {
    /// Bytes moved; call again
    Progress,

    /// Nothing could be done with the buffers given
    NeedInput,

    /// The gzip stream is complete
    StreamEnd,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Step {
    pub consumed: usize,
    pub produced: usize,
    pub status: StepStatus,
}

impl Step {
    fn new(consumed: usize, produced: usize, status: StepStatus) -> Self {
        Self {
            consumed,
            produced,
            status,
        }
    }
}

/// Per-session codec bookkeeping
#[derive(Debug, Clone)]
pub struct CodecState {
    /// Bytes consumed by the codec over the session lifetime
    pub total_in: u64,

    /// Bytes produced by the codec over the session lifetime
    pub total_out: u64,

    /// Input read from the descriptor but not yet consumed by the decoder
    pub pending: Vec<u8>,

    pub level: Compression,
    pub strategy: Strategy,
}

impl CodecState {
    pub fn new(level: Compression, strategy: Strategy) -> Self {
        Self {
            total_in: 0,
            total_out: 0,
            pending: Vec::new(),
            level,
            strategy,
        }
    }

    /// Account a step
    pub fn record(&mut self, step: &Step) {
        self.total_in += step.consumed as u64;
        self.total_out += step.produced as u64;
    }
}

/// XFL header byte for the given parameters
pub(crate) fn extra_flags(level: Compression, strategy: Strategy) -> u8 {
    match (level.level(), strategy) {
        (9, _) => 2,
        (_, Strategy::HuffmanOnly | Strategy::Rle) => 4,
        (l, _) if l < 2 => 4,
        _ => 0,
    }
}

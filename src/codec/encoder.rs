//! gzip member encoder

use flate2::{Compression, Status};
use tracing::trace;

use super::header::{self, HEADER_LEN, TRAILER_LEN};
use super::{extra_flags, Flush, RawDeflate, Step, StepStatus, Strategy};
use crate::device::DeflateEngine;
use crate::error::GzResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Header,
    Body,
    Trailer,
    Done,
}

/// Incremental encoder for one gzip member
pub struct GzipDeflater {
    raw: RawDeflate,
    crc: crc32fast::Hasher,
    isize: u32,
    header: [u8; HEADER_LEN],
    trailer: [u8; TRAILER_LEN],
    // Bytes of the current header/trailer already emitted
    emitted: usize,
    phase: Phase,
}

impl GzipDeflater {
    pub fn new(level: Compression, strategy: Strategy) -> Self {
        Self {
            raw: RawDeflate::new(level, strategy),
            crc: crc32fast::Hasher::new(),
            isize: 0,
            header: header::build(extra_flags(level, strategy)),
            trailer: [0; TRAILER_LEN],
            emitted: 0,
            phase: Phase::Header,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.phase == Phase::Done
    }

    /// Encode `input` into `output` through `engine`.
    ///
    /// # Errors
    /// Returns `GzError` if the engine or the encoder fails
    pub fn step(
        &mut self,
        engine: &mut dyn DeflateEngine,
        input: &[u8],
        output: &mut [u8],
        flush: Flush,
    ) -> GzResult<Step> {
        let (mut consumed, mut produced) = (0, 0);

        if self.phase == Phase::Header {
            produced += self.emit_header(output);
            if self.emitted == HEADER_LEN {
                self.phase = Phase::Body;
                self.emitted = 0;
            }
        }

        if self.phase == Phase::Body && produced < output.len() {
            let (in0, out0) = (self.raw.total_in(), self.raw.total_out());
            let status = engine.deflate(&mut self.raw, input, &mut output[produced..], flush)?;
            let c = (self.raw.total_in() - in0) as usize;
            let p = (self.raw.total_out() - out0) as usize;

            self.crc.update(&input[..c]);
            self.isize = self.isize.wrapping_add(c as u32);
            consumed += c;
            produced += p;
            trace!(consumed = c, produced = p, ?status, path = ?engine.path(), "deflate step");

            if status == Status::StreamEnd {
                self.trailer = header::trailer(self.crc.clone().finalize(), self.isize);
                self.phase = Phase::Trailer;
            }
        }

        if self.phase == Phase::Trailer {
            let n = (TRAILER_LEN - self.emitted).min(output.len() - produced);
            output[produced..produced + n]
                .copy_from_slice(&self.trailer[self.emitted..self.emitted + n]);
            self.emitted += n;
            produced += n;
            if self.emitted == TRAILER_LEN {
                self.phase = Phase::Done;
            }
        }

        let status = if self.phase == Phase::Done {
            StepStatus::StreamEnd
        } else if consumed == 0 && produced == 0 {
            StepStatus::NeedInput
        } else {
            StepStatus::Progress
        };
        Ok(Step::new(consumed, produced, status))
    }

    fn emit_header(&mut self, output: &mut [u8]) -> usize {
        let n = (HEADER_LEN - self.emitted).min(output.len());
        output[..n].copy_from_slice(&self.header[self.emitted..self.emitted + n]);
        self.emitted += n;
        n
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::SoftwareEngine;
    use flate2::read::MultiGzDecoder;
    use std::io::Read;

    fn finish(enc: &mut GzipDeflater, engine: &mut SoftwareEngine, out: &mut Vec<u8>, chunk: usize) {
        let mut buf = vec![0u8; chunk];
        loop {
            let step = enc.step(engine, &[], &mut buf, Flush::Finish).unwrap();
            out.extend_from_slice(&buf[..step.produced]);
            if step.status == StepStatus::StreamEnd {
                break;
            }
        }
    }

    #[test]
    fn test_member_readable_by_gzip_consumer() {
        let mut engine = SoftwareEngine::new();
        let mut enc = GzipDeflater::new(Compression::new(6), Strategy::Filtered);
        let data = b"gzip framing around raw deflate\n".repeat(100);

        let mut out = Vec::new();
        let mut buf = vec![0u8; 8192];
        let step = enc.step(&mut engine, &data, &mut buf, Flush::None).unwrap();
        assert_eq!(step.consumed, data.len());
        out.extend_from_slice(&buf[..step.produced]);
        finish(&mut enc, &mut engine, &mut out, 8192);
        assert!(enc.is_finished());

        let mut plain = Vec::new();
        MultiGzDecoder::new(&out[..]).read_to_end(&mut plain).unwrap();
        assert_eq!(plain, data);
    }

    #[test]
    fn test_tiny_output_buffers_split_header_and_trailer() {
        let mut engine = SoftwareEngine::new();
        let mut enc = GzipDeflater::new(Compression::default(), Strategy::Default);

        let mut out = Vec::new();
        let mut buf = [0u8; 3];
        let step = enc.step(&mut engine, b"abc", &mut buf, Flush::None).unwrap();
        out.extend_from_slice(&buf[..step.produced]);
        let mut rest = b"abc"[step.consumed..].to_vec();
        while !rest.is_empty() {
            let step = enc.step(&mut engine, &rest, &mut buf, Flush::None).unwrap();
            out.extend_from_slice(&buf[..step.produced]);
            rest.drain(..step.consumed);
        }
        finish(&mut enc, &mut engine, &mut out, 3);

        let mut plain = Vec::new();
        MultiGzDecoder::new(&out[..]).read_to_end(&mut plain).unwrap();
        assert_eq!(plain, b"abc");
    }
}

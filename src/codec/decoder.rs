//! gzip stream decoder, concatenated members included

use flate2::{Decompress, FlushDecompress, Status};
use tracing::{debug, trace};

use super::header::{self, TRAILER_LEN};
use super::{Flush, Step, StepStatus};
use crate::device::DeflateEngine;
use crate::error::{GzError, GzResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Header,
    Body,
    Trailer,
    /// A member ended; more input starts the next one
    Done,
    /// Input after the last member that is not gzip; dropped
    Garbage,
}

/// Incremental gzip decoder
pub struct GzipInflater {
    raw: Decompress,
    crc: crc32fast::Hasher,
    isize: u32,
    header: Vec<u8>,
    trailer: [u8; TRAILER_LEN],
    trailer_len: usize,
    phase: Phase,
    members: u64,
}

impl GzipInflater {
    pub fn new() -> Self {
        Self {
            raw: Decompress::new(false),
            crc: crc32fast::Hasher::new(),
            isize: 0,
            header: Vec::with_capacity(header::HEADER_LEN),
            trailer: [0; TRAILER_LEN],
            trailer_len: 0,
            phase: Phase::Header,
            members: 0,
        }
    }

    /// Members fully decoded and verified so far
    pub fn members(&self) -> u64 {
        self.members
    }

    /// Decode `input` into `output` through `engine`.
    ///
    /// With `Flush::Finish` the caller promises no more input; a step that
    /// can make no progress then either ends the stream or reports it
    /// truncated.
    ///
    /// # Errors
    /// Returns `GzError::CodecError` for malformed or truncated data and
    /// whatever the engine reports.
    pub fn step(
        &mut self,
        engine: &mut dyn DeflateEngine,
        input: &[u8],
        output: &mut [u8],
        flush: Flush,
    ) -> GzResult<Step> {
        let (mut consumed, mut produced) = (0, 0);

        loop {
            match self.phase {
                Phase::Header => {
                    if !self.take_header(input, &mut consumed)? {
                        break;
                    }
                }
                Phase::Body => {
                    if produced == output.len() {
                        break;
                    }
                    let out = &mut output[produced..];
                    let (in0, out0) = (self.raw.total_in(), self.raw.total_out());
                    // Finish is never passed down: a first raw call with
                    // Finish that cannot complete poisons the raw stream.
                    let status =
                        engine.inflate(&mut self.raw, &input[consumed..], out, FlushDecompress::None)?;
                    let c = (self.raw.total_in() - in0) as usize;
                    let p = (self.raw.total_out() - out0) as usize;

                    self.crc.update(&out[..p]);
                    self.isize = self.isize.wrapping_add(p as u32);
                    consumed += c;
                    produced += p;
                    trace!(consumed = c, produced = p, ?status, path = ?engine.path(), "inflate step");

                    if status == Status::StreamEnd {
                        self.phase = Phase::Trailer;
                        self.trailer_len = 0;
                    } else if c == 0 && p == 0 {
                        break;
                    }
                }
                Phase::Trailer => {
                    let n = (TRAILER_LEN - self.trailer_len).min(input.len() - consumed);
                    self.trailer[self.trailer_len..self.trailer_len + n]
                        .copy_from_slice(&input[consumed..consumed + n]);
                    self.trailer_len += n;
                    consumed += n;
                    if self.trailer_len < TRAILER_LEN {
                        break;
                    }
                    self.verify_trailer()?;
                }
                Phase::Done => {
                    if consumed == input.len() {
                        break;
                    }
                    self.raw.reset(false);
                    self.crc = crc32fast::Hasher::new();
                    self.isize = 0;
                    self.phase = Phase::Header;
                }
                Phase::Garbage => {
                    consumed = input.len();
                    break;
                }
            }
        }

        let phase = self.phase;
        let status = match phase {
            Phase::Done | Phase::Garbage => StepStatus::StreamEnd,
            _ if consumed > 0 || produced > 0 => StepStatus::Progress,
            _ if flush == Flush::Finish => self.end_of_input()?,
            _ => StepStatus::NeedInput,
        };
        Ok(Step::new(consumed, produced, status))
    }

    /// Collect header bytes; returns `true` once the header is complete.
    fn take_header(&mut self, input: &[u8], consumed: &mut usize) -> GzResult<bool> {
        while *consumed < input.len() {
            self.header.push(input[*consumed]);
            *consumed += 1;
            match header::parse(&self.header) {
                Ok(Some(_)) => {
                    self.header.clear();
                    self.phase = Phase::Body;
                    return Ok(true);
                }
                Ok(None) => {}
                Err(e) if self.members > 0 => {
                    debug!(error = %e, "ignoring trailing garbage after gzip member");
                    self.header.clear();
                    self.phase = Phase::Garbage;
                    return Ok(true);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(false)
    }

    fn verify_trailer(&mut self) -> GzResult<()> {
        let stored_crc = u32::from_le_bytes([self.trailer[0], self.trailer[1], self.trailer[2], self.trailer[3]]);
        let stored_len = u32::from_le_bytes([self.trailer[4], self.trailer[5], self.trailer[6], self.trailer[7]]);
        let crc = self.crc.clone().finalize();

        if stored_crc != crc {
            return Err(GzError::CodecError(format!(
                "crc mismatch: stored {:#010x}, computed {:#010x}",
                stored_crc, crc
            )));
        }
        if stored_len != self.isize {
            return Err(GzError::CodecError(format!(
                "length mismatch: stored {}, decoded {}",
                stored_len, self.isize
            )));
        }

        self.members += 1;
        self.phase = Phase::Done;
        Ok(())
    }

    /// Input is exhausted and nothing moved
    fn end_of_input(&mut self) -> GzResult<StepStatus> {
        match self.phase {
            Phase::Header if self.header.is_empty() => Ok(StepStatus::StreamEnd),
            Phase::Header if self.members > 0 => {
                debug!(bytes = self.header.len(), "ignoring partial member header at end of input");
                self.header.clear();
                self.phase = Phase::Garbage;
                Ok(StepStatus::StreamEnd)
            }
            _ => Err(GzError::CodecError("unexpected end of gzip stream".to_string())),
        }
    }
}

impl Default for GzipInflater {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::SoftwareEngine;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    fn gzip(data: &[u8]) -> Vec<u8> {
        let mut enc = GzEncoder::new(Vec::new(), Compression::default());
        enc.write_all(data).unwrap();
        enc.finish().unwrap()
    }

    fn decode_all(dec: &mut GzipInflater, input: &[u8], out_chunk: usize) -> GzResult<Vec<u8>> {
        let mut engine = SoftwareEngine::new();
        let mut plain = Vec::new();
        let mut buf = vec![0u8; out_chunk];
        let mut at = 0;
        loop {
            let flush = if at == input.len() { Flush::Finish } else { Flush::None };
            let step = dec.step(&mut engine, &input[at..], &mut buf, flush)?;
            at += step.consumed;
            plain.extend_from_slice(&buf[..step.produced]);
            if flush == Flush::Finish && step.status == StepStatus::StreamEnd {
                return Ok(plain);
            }
        }
    }

    #[test]
    fn test_decodes_foreign_gzip_with_small_output() {
        let data: Vec<u8> = (0..20_000u32).map(|i| (i * 7 % 13) as u8).collect();
        let packed = gzip(&data);

        let mut dec = GzipInflater::new();
        assert_eq!(decode_all(&mut dec, &packed, 7).unwrap(), data);
        assert_eq!(dec.members(), 1);
    }

    #[test]
    fn test_concatenated_members_and_trailing_garbage() {
        let mut packed = gzip(b"first ");
        packed.extend(gzip(b"second"));
        packed.extend_from_slice(&[0, 0, 0, 0]);

        let mut dec = GzipInflater::new();
        assert_eq!(decode_all(&mut dec, &packed, 64).unwrap(), b"first second");
        assert_eq!(dec.members(), 2);
    }

    #[test]
    fn test_corrupted_trailer_rejected() {
        let mut packed = gzip(b"checksummed payload");
        let n = packed.len();
        packed[n - 8] ^= 0x01;

        let err = decode_all(&mut GzipInflater::new(), &packed, 64).unwrap_err();
        assert!(err.to_string().contains("crc mismatch"), "{}", err);
    }

    #[test]
    fn test_truncated_member_rejected() {
        let packed = gzip(&[42u8; 4096]);
        let err = decode_all(&mut GzipInflater::new(), &packed[..packed.len() - 3], 64).unwrap_err();
        assert!(matches!(err, GzError::CodecError(_)));
    }

    #[test]
    fn test_empty_input_is_empty_stream() {
        assert!(decode_all(&mut GzipInflater::new(), &[], 16).unwrap().is_empty());
    }

    #[test]
    fn test_not_gzip_rejected() {
        let err = decode_all(&mut GzipInflater::new(), b"plain text", 16).unwrap_err();
        assert!(err.to_string().contains("not in gzip format"));
    }
}

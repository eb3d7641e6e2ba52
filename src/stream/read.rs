//! Decompress-direction read loop

use std::io::{ErrorKind, Read};

use tracing::trace;

use super::{Codec, StreamSession};
use crate::codec::{Flush, StepStatus};
use crate::dispatch::{self, Direction};
use crate::error::{GzError, GzResult};
use crate::utils::Stopwatch;

impl StreamSession {
    /// Decompress into `buf`, returning the number of bytes produced.
    ///
    /// Returns fewer than `buf.len()` bytes only at the end of the gzip
    /// stream. Compressed input read from the descriptor but not consumed
    /// because `buf` filled up is kept and fed first on the next call.
    ///
    /// # Errors
    /// Returns `GzError` on malformed or truncated data, descriptor
    /// failures, or if an earlier call already failed. Any such failure
    /// makes the session unusable.
    pub fn read(&mut self, buf: &mut [u8]) -> GzResult<usize> {
        self.check_usable(Direction::Decompress)?;
        if buf.is_empty() {
            return Ok(0);
        }

        let path = dispatch::select(
            self.config.decompress_mode,
            self.config.decompress_threshold,
            buf.len(),
        );
        let sw = Stopwatch::start();
        let result = self.read_loop(path, buf);
        self.stats.record(path, buf.len(), sw.stop());

        result.map_err(|e| self.poison(e))
    }

    fn read_loop(&mut self, path: dispatch::CodecPath, buf: &mut [u8]) -> GzResult<usize> {
        let chunk = self.config.read_chunking.chunk_for(buf.len());
        let start = self.state.total_out;
        let mut produced = 0;
        let mut eof = false;
        let mut starved = false;

        while produced < buf.len() {
            if (self.state.pending.is_empty() || starved) && !eof {
                eof = self.fill_pending(chunk)? == 0;
            }

            let Codec::Inflate(decoder) = &mut self.codec else {
                return Err(GzError::InvalidArgument("session is not decompressing".to_string()));
            };
            let engine = self.engines.get(path)?;
            let flush = if eof { Flush::Finish } else { Flush::None };
            let step = decoder.step(engine, &self.state.pending, &mut buf[produced..], flush)?;

            self.state.pending.drain(..step.consumed);
            self.state.record(&step);
            produced += step.produced;
            starved = step.status == StepStatus::NeedInput;

            if eof && (step.status == StepStatus::StreamEnd || (step.consumed == 0 && step.produced == 0)) {
                break;
            }
        }

        trace!(requested = buf.len(), produced, pending = self.state.pending.len(), ?path, "read");
        Ok((self.state.total_out - start) as usize)
    }

    /// Append up to `chunk` descriptor bytes to the pending input
    fn fill_pending(&mut self, chunk: usize) -> GzResult<usize> {
        let pending = &mut self.state.pending;
        let old = pending.len();
        pending.try_reserve(chunk)?;
        pending.resize(old + chunk, 0);

        let n = loop {
            match self.file.read(&mut pending[old..]) {
                Ok(n) => break n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    pending.truncate(old);
                    return Err(e.into());
                }
            }
        };
        pending.truncate(old + n);
        Ok(n)
    }
}

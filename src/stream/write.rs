//! Compress-direction write loop

use std::io::Write;

use tracing::trace;

use super::{Codec, StreamSession};
use crate::codec::header::{HEADER_LEN, TRAILER_LEN};
use crate::codec::Flush;
use crate::dispatch::{self, CodecPath, Direction};
use crate::error::{GzError, GzResult};
use crate::utils::{deflate_bound, try_alloc, Stopwatch};

impl StreamSession {
    /// Compress all of `buf`, returning the number of bytes consumed.
    ///
    /// Compressed output is written to the descriptor as soon as the encoder
    /// produces it; whatever the encoder holds back is written by
    /// [`close`](StreamSession::close).
    ///
    /// # Errors
    /// Returns `GzError` if the encoder or the descriptor fails, or if an
    /// earlier call already failed. Any such failure makes the session
    /// unusable.
    pub fn write(&mut self, buf: &[u8]) -> GzResult<usize> {
        self.check_usable(Direction::Compress)?;
        if buf.is_empty() {
            return Ok(0);
        }

        let path = dispatch::select(
            self.config.compress_mode,
            self.config.compress_threshold,
            buf.len(),
        );
        let sw = Stopwatch::start();
        let result = self.write_loop(path, buf);
        self.stats.record(path, buf.len(), sw.stop());

        result.map_err(|e| self.poison(e))
    }

    fn write_loop(&mut self, path: CodecPath, buf: &[u8]) -> GzResult<usize> {
        let start = self.state.total_in;
        let mut out = try_alloc(deflate_bound(buf.len()) + HEADER_LEN + TRAILER_LEN)?;
        let mut offset = 0;

        let Codec::Deflate(encoder) = &mut self.codec else {
            return Err(GzError::InvalidArgument("session is not compressing".to_string()));
        };
        let engine = self.engines.get(path)?;
        loop {
            let step = encoder.step(engine, &buf[offset..], &mut out, Flush::None)?;
            offset += step.consumed;
            self.state.record(&step);
            self.file.write_all(&out[..step.produced])?;

            // A full output buffer may mean the encoder still holds bytes.
            let drained = step.produced < out.len();
            if (offset == buf.len() && drained) || (step.consumed == 0 && step.produced == 0) {
                break;
            }
        }

        trace!(len = buf.len(), consumed = offset, ?path, "write");
        Ok((self.state.total_in - start) as usize)
    }
}

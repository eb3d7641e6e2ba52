//! Open-mode string parsing

use std::fs::OpenOptions;
use std::str::FromStr;

use flate2::Compression;

use crate::codec::Strategy;
use crate::dispatch::Direction;
use crate::error::GzError;

/// How a path target is opened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Read,
    Truncate,
    Append,
    CreateNew,
}

impl Access {
    pub(crate) fn options(&self) -> OpenOptions {
        let mut options = OpenOptions::new();
        match self {
            Access::Read => options.read(true),
            Access::Truncate => options.write(true).create(true).truncate(true),
            Access::Append => options.append(true).create(true),
            Access::CreateNew => options.write(true).create_new(true),
        };
        options
    }
}

/// Parsed mode string.
///
/// `w` or `a` selects compression, anything else decompression. For
/// compression the first digit is the level and `h`, `f` or `R` pick the
/// Huffman-only, filtered or run-length strategy, checked in that order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenMode {
    pub direction: Direction,
    pub access: Access,
    pub level: Compression,
    pub strategy: Strategy,
}

impl FromStr for OpenMode {
    type Err = GzError;

    fn from_str(mode: &str) -> Result<Self, Self::Err> {
        if mode.contains('+') {
            return Err(GzError::InvalidArgument(format!(
                "read/write mode '{}' is not supported on gzip streams",
                mode
            )));
        }

        let append = mode.contains('a');
        if !mode.contains('w') && !append {
            return Ok(Self {
                direction: Direction::Decompress,
                access: Access::Read,
                level: Compression::default(),
                strategy: Strategy::Default,
            });
        }

        let access = if append {
            Access::Append
        } else if mode.contains('x') {
            Access::CreateNew
        } else {
            Access::Truncate
        };

        let strategy = if mode.contains('h') {
            Strategy::HuffmanOnly
        } else if mode.contains('f') {
            Strategy::Filtered
        } else if mode.contains('R') {
            Strategy::Rle
        } else {
            Strategy::Default
        };

        let level = mode
            .chars()
            .find_map(|c| c.to_digit(10))
            .map_or_else(Compression::default, Compression::new);

        Ok(Self {
            direction: Direction::Compress,
            access,
            level,
            strategy,
        })
    }
}

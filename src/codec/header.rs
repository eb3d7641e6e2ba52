//! gzip member header (RFC 1952)

use crate::error::{GzError, GzResult};

pub const MAGIC: [u8; 2] = [0x1f, 0x8b];
pub const CM_DEFLATE: u8 = 8;
pub const HEADER_LEN: usize = 10;
pub const TRAILER_LEN: usize = 8;

const FHCRC: u8 = 0x02;
const FEXTRA: u8 = 0x04;
const FNAME: u8 = 0x08;
const FCOMMENT: u8 = 0x10;
const FRESERVED: u8 = 0xe0;

#[cfg(unix)]
const OS_CODE: u8 = 3;
#[cfg(not(unix))]
const OS_CODE: u8 = 255;

/// Fixed header written at the start of every member we produce
pub fn build(xfl: u8) -> [u8; HEADER_LEN] {
    [
        MAGIC[0], MAGIC[1], CM_DEFLATE, 0, // no optional fields
        0, 0, 0, 0, // no mtime
        xfl, OS_CODE,
    ]
}

/// Try to parse a header from the start of `buf`.
///
/// Returns `Ok(None)` while more bytes are needed and the header length
/// once it is complete.
///
/// # Errors
/// Returns `GzError::CodecError` as soon as the bytes seen cannot start a
/// gzip member.
pub fn parse(buf: &[u8]) -> GzResult<Option<usize>> {
    for (i, (&have, &want)) in buf.iter().zip(MAGIC.iter()).enumerate() {
        if have != want {
            return Err(GzError::CodecError(format!(
                "not in gzip format (byte {} is {:#04x})",
                i, have
            )));
        }
    }
    if buf.len() < HEADER_LEN {
        return Ok(None);
    }
    if buf[2] != CM_DEFLATE {
        return Err(GzError::CodecError(format!(
            "unknown compression method {}",
            buf[2]
        )));
    }

    let flags = buf[3];
    if flags & FRESERVED != 0 {
        return Err(GzError::CodecError(format!(
            "reserved header flags set ({:#04x})",
            flags
        )));
    }

    let mut pos = HEADER_LEN;
    if flags & FEXTRA != 0 {
        if buf.len() < pos + 2 {
            return Ok(None);
        }
        let xlen = u16::from_le_bytes([buf[pos], buf[pos + 1]]) as usize;
        pos += 2 + xlen;
        if buf.len() < pos {
            return Ok(None);
        }
    }
    for flag in [FNAME, FCOMMENT] {
        if flags & flag != 0 {
            match buf[pos..].iter().position(|&b| b == 0) {
                Some(nul) => pos += nul + 1,
                None => return Ok(None),
            }
        }
    }
    if flags & FHCRC != 0 {
        if buf.len() < pos + 2 {
            return Ok(None);
        }
        let stored = u16::from_le_bytes([buf[pos], buf[pos + 1]]);
        let actual = (crc32fast::hash(&buf[..pos]) & 0xffff) as u16;
        if stored != actual {
            return Err(GzError::CodecError("header crc mismatch".to_string()));
        }
        pos += 2;
    }

    Ok(Some(pos))
}

/// CRC-32 and ISIZE trailer
pub fn trailer(crc: u32, isize: u32) -> [u8; TRAILER_LEN] {
    let mut out = [0u8; TRAILER_LEN];
    out[..4].copy_from_slice(&crc.to_le_bytes());
    out[4..].copy_from_slice(&isize.to_le_bytes());
    out
}

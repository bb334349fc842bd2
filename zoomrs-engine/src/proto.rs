//! # Wire Framing
//!
//! Purpose: Encode requests and incrementally decode responses for the
//! session protocol, keeping allocations under control.
//!
//! ## Design Principles
//! 1. **Length-Prefixed Frames**: A frame is an array of binary bulks
//!    (`*n\r\n` then `$len\r\n...\r\n` per bulk); no escaping, binary-safe.
//! 2. **Incremental Parsing**: The parser consumes bytes only once a whole
//!    frame is buffered, so partial reads never corrupt state.
//! 3. **Fail Fast**: Malformed framing surfaces a decode error immediately;
//!    the connection treats it as fatal.
//!
//! The first bulk of every frame is the verb. Requests: `INIT`, `SEARCH`,
//! `PRESENT`, `SORT`, `SCAN`, `ES`, `CLOSE`. Responses: `INITED`, `HITS`,
//! `RECS`, `TERMS`, `ESOK`, `DIAG`.

use bytes::{Buf, BytesMut};
use zoomrs_common::{diag, ZoomError, ZoomResult};

/// One decoded frame: the verb followed by its fields.
pub type Frame = Vec<Vec<u8>>;

/// Encodes a frame into `out`.
pub fn encode_frame(parts: &[&[u8]], out: &mut BytesMut) {
    out.extend_from_slice(b"*");
    push_usize(out, parts.len());
    out.extend_from_slice(b"\r\n");
    for part in parts {
        out.extend_from_slice(b"$");
        push_usize(out, part.len());
        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(part);
        out.extend_from_slice(b"\r\n");
    }
}

fn push_usize(out: &mut BytesMut, mut value: usize) {
    // Write digits into a small stack buffer to avoid heap allocations.
    let mut buf = [0u8; 20];
    let mut len = 0;
    if value == 0 {
        buf[0] = b'0';
        len = 1;
    } else {
        while value > 0 {
            buf[len] = b'0' + (value % 10) as u8;
            value /= 10;
            len += 1;
        }
    }
    for idx in (0..len).rev() {
        out.extend_from_slice(&[buf[idx]]);
    }
}

fn decode_error(detail: &str) -> ZoomError {
    ZoomError::Network {
        code: diag::ERROR_DECODE,
        message: format!("malformed frame: {detail}"),
    }
}

/// Incremental frame parser over a growable receive buffer.
#[derive(Debug, Default)]
pub struct FrameParser;

impl FrameParser {
    pub fn new() -> Self {
        FrameParser
    }

    /// Tries to decode one frame from the front of `buf`.
    ///
    /// Returns `Ok(None)` when the buffer does not yet hold a complete
    /// frame; consumed bytes are removed only on a full decode.
    pub fn parse(&mut self, buf: &mut BytesMut) -> ZoomResult<Option<Frame>> {
        let mut pos = 0;
        let Some(count) = read_sized_line(buf, &mut pos, b'*')? else {
            return Ok(None);
        };
        let mut parts = Vec::with_capacity(count);
        for _ in 0..count {
            let Some(len) = read_sized_line(buf, &mut pos, b'$')? else {
                return Ok(None);
            };
            if buf.len() < pos + len + 2 {
                return Ok(None);
            }
            let part = buf[pos..pos + len].to_vec();
            if &buf[pos + len..pos + len + 2] != b"\r\n" {
                return Err(decode_error("bulk not terminated by CRLF"));
            }
            pos += len + 2;
            parts.push(part);
        }
        buf.advance(pos);
        Ok(Some(parts))
    }
}

/// Reads a `<marker><digits>\r\n` header at `*pos`, advancing past it.
fn read_sized_line(buf: &BytesMut, pos: &mut usize, marker: u8) -> ZoomResult<Option<usize>> {
    let data = &buf[*pos..];
    let Some(end) = data.windows(2).position(|w| w == b"\r\n") else {
        // Cap the unterminated header length so garbage cannot grow the
        // buffer without bound.
        if data.len() > 32 {
            return Err(decode_error("oversized frame header"));
        }
        return Ok(None);
    };
    let line = &data[..end];
    if line.is_empty() || line[0] != marker {
        return Err(decode_error("unexpected frame header marker"));
    }
    let digits = &line[1..];
    if digits.is_empty() || !digits.iter().all(u8::is_ascii_digit) {
        return Err(decode_error("non-numeric frame length"));
    }
    let mut value: usize = 0;
    for b in digits {
        value = value
            .checked_mul(10)
            .and_then(|v| v.checked_add((b - b'0') as usize))
            .ok_or_else(|| decode_error("frame length overflow"))?;
    }
    *pos += end + 2;
    Ok(Some(value))
}

/// Field accessor: UTF-8 text at index `idx`.
pub fn field_str(frame: &Frame, idx: usize) -> ZoomResult<String> {
    let part = frame
        .get(idx)
        .ok_or_else(|| decode_error("missing frame field"))?;
    String::from_utf8(part.clone()).map_err(|_| decode_error("field is not UTF-8"))
}

/// Field accessor: unsigned decimal at index `idx`.
pub fn field_u64(frame: &Frame, idx: usize) -> ZoomResult<u64> {
    let text = field_str(frame, idx)?;
    text.parse()
        .map_err(|_| decode_error("field is not a number"))
}

/// Field accessor: signed decimal at index `idx`.
pub fn field_i32(frame: &Frame, idx: usize) -> ZoomResult<i32> {
    let text = field_str(frame, idx)?;
    text.parse()
        .map_err(|_| decode_error("field is not a number"))
}

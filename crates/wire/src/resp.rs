// SPDX-License-Identifier: MIT

//! RESP2 (Redis Serialization Protocol) encoder/decoder.
//!
//! The view-based parser is zero-copy: [`parse_views`]
//! returns byte-slice views borrowing from the caller's buffer rather than
//! allocating per argument. The encode helpers keep small-value fast paths
//! (single digit array/bulk lengths skip integer formatting entirely) since
//! those are exactly the common case for cache traffic.

use memchr::memchr;

/// Max elements in a RESP array request, guarding against unbounded memory
/// from a malformed or hostile length field.
pub const MAX_ARRAY_SIZE: usize = 1024;
/// Max bytes in a single RESP bulk string.
pub const MAX_BULK_LEN: usize = 512 * 1024;

pub const OK: &[u8] = b"+OK\r\n";
pub const NULL: &[u8] = b"$-1\r\n";
pub const PONG: &[u8] = b"+PONG\r\n";

/// Outcome of attempting to parse one RESP message from a buffer that may
/// contain a partial message (the common case reading from a socket).
#[derive(Debug, PartialEq, Eq)]
pub enum ParseOutcome<'a> {
    /// A complete message was parsed; `args` borrow from the input buffer,
    /// `consumed` is how many leading bytes of the buffer it occupied.
    Complete { args: Vec<&'a [u8]>, consumed: usize },
    /// The buffer holds a valid but incomplete prefix; wait for more bytes.
    Incomplete,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RespError {
    #[error("expected '*' array header")]
    NotAnArray,
    #[error("expected '$' bulk string header")]
    NotABulkString,
    #[error("array length out of range")]
    BadArrayLen,
    #[error("bulk string length out of range")]
    BadBulkLen,
    #[error("malformed integer field")]
    MalformedInteger,
}

fn find_crlf(buf: &[u8]) -> Option<usize> {
    let mut start = 0;
    loop {
        let p = memchr(b'\r', &buf[start..])?;
        let idx = start + p;
        if idx + 1 >= buf.len() {
            return None;
        }
        if buf[idx + 1] == b'\n' {
            return Some(idx);
        }
        start = idx + 1;
    }
}

fn parse_int(field: &[u8]) -> Result<i64, RespError> {
    std::str::from_utf8(field)
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or(RespError::MalformedInteger)
}

/// Zero-copy RESP parse: returns views into `buf`, never allocating for the
/// argument bytes themselves.
pub fn parse_views(buf: &[u8]) -> Result<ParseOutcome<'_>, RespError> {
    if buf.is_empty() {
        return Ok(ParseOutcome::Incomplete);
    }
    if buf[0] != b'*' {
        return Err(RespError::NotAnArray);
    }

    let (count, mut offset) = if buf.len() >= 4
        && buf[1].is_ascii_digit()
        && buf[2] == b'\r'
        && buf[3] == b'\n'
    {
        ((buf[1] - b'0') as i64, 4)
    } else {
        let Some(crlf) = find_crlf(&buf[1..]) else {
            return Ok(ParseOutcome::Incomplete);
        };
        let crlf = crlf + 1;
        let count = parse_int(&buf[1..crlf])?;
        (count, crlf + 2)
    };

    if !(0..=MAX_ARRAY_SIZE as i64).contains(&count) {
        return Err(RespError::BadArrayLen);
    }
    let count = count as usize;

    let mut args = Vec::with_capacity(count);
    for _ in 0..count {
        if offset >= buf.len() {
            return Ok(ParseOutcome::Incomplete);
        }
        if buf[offset] != b'$' {
            return Err(RespError::NotABulkString);
        }

        let (len, header_end) = if offset + 4 <= buf.len()
            && buf[offset + 1].is_ascii_digit()
            && buf[offset + 2] == b'\r'
            && buf[offset + 3] == b'\n'
        {
            ((buf[offset + 1] - b'0') as i64, offset + 4)
        } else {
            let Some(crlf) = find_crlf(&buf[offset + 1..]) else {
                return Ok(ParseOutcome::Incomplete);
            };
            let crlf = offset + 1 + crlf;
            let len = parse_int(&buf[offset + 1..crlf])?;
            (len, crlf + 2)
        };

        if !(0..=MAX_BULK_LEN as i64).contains(&len) {
            return Err(RespError::BadBulkLen);
        }
        let len = len as usize;

        if header_end + len + 2 > buf.len() {
            return Ok(ParseOutcome::Incomplete);
        }
        args.push(&buf[header_end..header_end + len]);
        offset = header_end + len + 2;
    }

    Ok(ParseOutcome::Complete { args, consumed: offset })
}

pub fn encode_ok(out: &mut Vec<u8>) {
    out.extend_from_slice(OK);
}

pub fn encode_null(out: &mut Vec<u8>) {
    out.extend_from_slice(NULL);
}

pub fn encode_error(out: &mut Vec<u8>, msg: &str) {
    out.extend_from_slice(b"-ERR ");
    out.extend_from_slice(msg.as_bytes());
    out.extend_from_slice(b"\r\n");
}

pub fn encode_simple(out: &mut Vec<u8>, msg: &str) {
    out.push(b'+');
    out.extend_from_slice(msg.as_bytes());
    out.extend_from_slice(b"\r\n");
}

pub fn encode_integer(out: &mut Vec<u8>, n: i64) {
    out.push(b':');
    out.extend_from_slice(n.to_string().as_bytes());
    out.extend_from_slice(b"\r\n");
}

/// `$<len>\r\n<bytes>\r\n`, with a fast path for lengths 0-9 that skips
/// formatting the length as a decimal string.
pub fn encode_bulk(out: &mut Vec<u8>, bytes: &[u8]) {
    out.push(b'$');
    if bytes.len() <= 9 {
        out.push(b'0' + bytes.len() as u8);
    } else {
        out.extend_from_slice(bytes.len().to_string().as_bytes());
    }
    out.extend_from_slice(b"\r\n");
    out.extend_from_slice(bytes);
    out.extend_from_slice(b"\r\n");
}

pub fn encode_array_header(out: &mut Vec<u8>, n: usize) {
    out.push(b'*');
    if n <= 9 {
        out.push(b'0' + n as u8);
    } else {
        out.extend_from_slice(n.to_string().as_bytes());
    }
    out.extend_from_slice(b"\r\n");
}

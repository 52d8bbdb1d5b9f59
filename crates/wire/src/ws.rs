// SPDX-License-Identifier: MIT

//! WebSocket (RFC 6455) handshake and frame codec.
//!
//! Masking, length encoding (7/16/64-bit), and a 16 MiB payload cap on
//! incoming frames. The handshake's SHA1+base64 accept-key computation uses
//! the `sha1`/`base64` crates.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use sha1::{Digest, Sha1};

const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";
/// Guards against unbounded memory from a malformed or hostile frame header.
pub const MAX_PAYLOAD: u64 = 16 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    Continuation,
    Text,
    Binary,
    Close,
    Ping,
    Pong,
}

impl Opcode {
    fn from_raw(b: u8) -> Option<Self> {
        Some(match b {
            0x0 => Opcode::Continuation,
            0x1 => Opcode::Text,
            0x2 => Opcode::Binary,
            0x8 => Opcode::Close,
            0x9 => Opcode::Ping,
            0xA => Opcode::Pong,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WsError {
    #[error("unknown opcode {0:#x}")]
    UnknownOpcode(u8),
    #[error("frame payload {0} exceeds the {MAX_PAYLOAD} byte cap")]
    PayloadTooLarge(u64),
}

/// A fully-parsed frame, with payload already unmasked if the frame carried
/// a mask key (as every client->server frame must, per RFC 6455 §5.1).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub opcode: Opcode,
    pub payload: Vec<u8>,
    pub consumed: usize,
}

/// Compute `Sec-WebSocket-Accept` from the client's `Sec-WebSocket-Key`.
pub fn accept_key(client_key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(client_key.as_bytes());
    hasher.update(WS_GUID.as_bytes());
    let digest = hasher.finalize();
    BASE64.encode(digest)
}

/// Build the `101 Switching Protocols` upgrade response.
pub fn handshake_response(client_key: &str) -> String {
    format!(
        "HTTP/1.1 101 Switching Protocols\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Accept: {}\r\n\r\n",
        accept_key(client_key)
    )
}

fn frame_header(opcode_byte: u8, len: usize, out: &mut Vec<u8>) {
    out.push(opcode_byte);
    if len <= 125 {
        out.push(len as u8);
    } else if len <= 0xFFFF {
        out.push(126);
        out.extend_from_slice(&(len as u16).to_be_bytes());
    } else {
        out.push(127);
        out.extend_from_slice(&(len as u64).to_be_bytes());
    }
}

/// Build an unmasked server->client text frame.
pub fn frame_text(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(10 + payload.len());
    frame_header(0x80 | 0x1, payload.len(), &mut out);
    out.extend_from_slice(payload);
    out
}

pub fn frame_binary(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(10 + payload.len());
    frame_header(0x80 | 0x2, payload.len(), &mut out);
    out.extend_from_slice(payload);
    out
}

pub fn frame_pong(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(2 + payload.len());
    frame_header(0x80 | 0xA, payload.len(), &mut out);
    out.extend_from_slice(payload);
    out
}

pub fn frame_ping(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(2 + payload.len());
    frame_header(0x80 | 0x9, payload.len(), &mut out);
    out.extend_from_slice(payload);
    out
}

pub fn frame_close() -> Vec<u8> {
    vec![0x80 | 0x8, 0]
}

/// Parse one frame from `data`. Returns `Ok(None)` if the buffer holds an
/// incomplete prefix. Unmasks the payload in place when the frame is masked
/// (mandatory for frames arriving from a client).
pub fn parse_frame(data: &[u8]) -> Result<Option<Frame>, WsError> {
    if data.len() < 2 {
        return Ok(None);
    }

    let b0 = data[0];
    let b1 = data[1];
    let opcode = Opcode::from_raw(b0 & 0x0F).ok_or(WsError::UnknownOpcode(b0 & 0x0F))?;
    let masked = (b1 & 0x80) != 0;
    let mut payload_len = (b1 & 0x7F) as u64;
    let mut header_size = 2usize;

    if payload_len == 126 {
        if data.len() < 4 {
            return Ok(None);
        }
        payload_len = u16::from_be_bytes([data[2], data[3]]) as u64;
        header_size = 4;
    } else if payload_len == 127 {
        if data.len() < 10 {
            return Ok(None);
        }
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&data[2..10]);
        payload_len = u64::from_be_bytes(bytes);
        header_size = 10;
    }

    if payload_len > MAX_PAYLOAD {
        return Err(WsError::PayloadTooLarge(payload_len));
    }

    let mask_size = if masked { 4 } else { 0 };
    let total = header_size + mask_size + payload_len as usize;
    if data.len() < total {
        return Ok(None);
    }

    let payload_start = header_size + mask_size;
    let mut payload = data[payload_start..total].to_vec();
    if masked {
        let mask_key = &data[header_size..header_size + 4];
        for (i, byte) in payload.iter_mut().enumerate() {
            *byte ^= mask_key[i & 3];
        }
    }

    Ok(Some(Frame { opcode, payload, consumed: total }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn masked_frame_round_trips_through_parse(
            payload in proptest::collection::vec(any::<u8>(), 0..4096),
            key in any::<[u8; 4]>(),
        ) {
            let masked: Vec<u8> = payload.iter().enumerate().map(|(i, b)| b ^ key[i & 3]).collect();
            let mut buf = vec![0x81u8];
            if payload.len() < 126 {
                buf.push(0x80 | payload.len() as u8);
            } else {
                buf.push(0x80 | 126);
                buf.extend_from_slice(&(payload.len() as u16).to_be_bytes());
            }
            buf.extend_from_slice(&key);
            buf.extend_from_slice(&masked);

            let frame = parse_frame(&buf).unwrap().unwrap();
            prop_assert_eq!(frame.opcode, Opcode::Text);
            prop_assert_eq!(frame.payload, payload);
            prop_assert_eq!(frame.consumed, buf.len());
        }
    }

    #[test]
    fn accept_key_matches_rfc6455_example() {
        // RFC 6455 §1.3 worked example.
        assert_eq!(accept_key("dGhlIHNhbXBsZSBub25jZQ=="), "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
    }

    #[test]
    fn handshake_response_contains_computed_accept() {
        let resp = handshake_response("dGhlIHNhbXBsZSBub25jZQ==");
        assert!(resp.contains("101 Switching Protocols"));
        assert!(resp.contains("s3pPLMBiTxaQ9kYGzzhZRbK+xOo="));
    }

    fn mask(payload: &[u8], key: [u8; 4]) -> Vec<u8> {
        payload.iter().enumerate().map(|(i, b)| b ^ key[i & 3]).collect()
    }

    #[test]
    fn parses_small_masked_frame() {
        let key = [0x11, 0x22, 0x33, 0x44];
        let payload = b"hello";
        let masked = mask(payload, key);

        let mut buf = vec![0x81, 0x80 | payload.len() as u8];
        buf.extend_from_slice(&key);
        buf.extend_from_slice(&masked);

        let frame = parse_frame(&buf).unwrap().unwrap();
        assert_eq!(frame.opcode, Opcode::Text);
        assert_eq!(frame.payload, payload);
        assert_eq!(frame.consumed, buf.len());
    }

    #[test]
    fn incomplete_frame_returns_none() {
        let buf = [0x81, 0x85, b'h', b'e'];
        assert_eq!(parse_frame(&buf).unwrap(), None);
    }

    #[test]
    fn rejects_payload_over_16mib() {
        let mut buf = vec![0x81, 127];
        buf.extend_from_slice(&(MAX_PAYLOAD + 1).to_be_bytes());
        assert_eq!(parse_frame(&buf).unwrap_err(), WsError::PayloadTooLarge(MAX_PAYLOAD + 1));
    }

    #[test]
    fn unmasked_text_frame_round_trips_through_parse() {
        let frame = frame_text(b"hi there");
        // Server frames aren't masked, but the parser must still accept them
        // (e.g. a test harness acting as the client reading its own output).
        let parsed = parse_frame(&frame).unwrap().unwrap();
        assert_eq!(parsed.opcode, Opcode::Text);
        assert_eq!(parsed.payload, b"hi there");
    }

    #[test]
    fn close_frame_is_two_bytes() {
        assert_eq!(frame_close(), vec![0x88, 0x00]);
    }
}

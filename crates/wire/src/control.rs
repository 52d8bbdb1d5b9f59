// SPDX-License-Identifier: MIT

//! Control-plane wire framing: one newline-delimited command per request,
//! one `<status byte><body><NUL>` per response.

use std::fmt;

/// The response's leading status byte, mirroring a process exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok,
    BadInput,
    Fatal,
}

impl Status {
    pub fn as_byte(self) -> u8 {
        match self {
            Status::Ok => 0,
            Status::BadInput => 1,
            Status::Fatal => 2,
        }
    }

    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(Status::Ok),
            1 => Some(Status::BadInput),
            2 => Some(Status::Fatal),
            _ => None,
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Status::Ok => "ok",
            Status::BadInput => "bad_input",
            Status::Fatal => "fatal",
        })
    }
}

/// A decoded response: status byte plus body text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlResponse {
    pub status: Status,
    pub body: String,
}

impl ControlResponse {
    pub fn ok(body: impl Into<String>) -> Self {
        Self { status: Status::Ok, body: body.into() }
    }

    pub fn bad_input(body: impl Into<String>) -> Self {
        Self { status: Status::BadInput, body: body.into() }
    }

    pub fn fatal(body: impl Into<String>) -> Self {
        Self { status: Status::Fatal, body: body.into() }
    }

    /// Encode as `<status byte><body><NUL>`.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.body.len() + 2);
        out.push(self.status.as_byte());
        out.extend_from_slice(self.body.as_bytes());
        out.push(0);
        out
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ControlDecodeError {
    #[error("response missing leading status byte")]
    Empty,
    #[error("unknown status byte {0}")]
    UnknownStatus(u8),
    #[error("response body is not valid UTF-8")]
    InvalidUtf8,
    #[error("response missing trailing NUL terminator")]
    MissingTerminator,
}

/// Decode a `<status byte><body><NUL>` response that has already been read
/// up to and including its terminating NUL.
pub fn decode_response(buf: &[u8]) -> Result<ControlResponse, ControlDecodeError> {
    let (&status_byte, rest) = buf.split_first().ok_or(ControlDecodeError::Empty)?;
    let status = Status::from_byte(status_byte).ok_or(ControlDecodeError::UnknownStatus(status_byte))?;
    let (&terminator, body_bytes) =
        rest.split_last().ok_or(ControlDecodeError::MissingTerminator)?;
    if terminator != 0 {
        return Err(ControlDecodeError::MissingTerminator);
    }
    let body = std::str::from_utf8(body_bytes)
        .map_err(|_| ControlDecodeError::InvalidUtf8)?
        .to_string();
    Ok(ControlResponse { status, body })
}

/// Split a raw command line (already newline-stripped) into shell-like
/// whitespace-separated tokens, respecting single and double quotes so a
/// quoted argument can contain spaces (e.g. `send app "hello world"`).
pub fn tokenize(line: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_token = false;
    let mut quote: Option<char> = None;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match quote {
            Some(q) if c == q => {
                quote = None;
            }
            Some(_) => current.push(c),
            None => {
                if c == '\'' || c == '"' {
                    quote = Some(c);
                    in_token = true;
                } else if c.is_whitespace() {
                    if in_token {
                        tokens.push(std::mem::take(&mut current));
                        in_token = false;
                    }
                } else {
                    current.push(c);
                    in_token = true;
                }
            }
        }
    }
    if in_token {
        tokens.push(current);
    }
    tokens
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_then_decode_round_trips() {
        let resp = ControlResponse::ok("runtime started: web");
        let bytes = resp.encode();
        assert_eq!(bytes.last(), Some(&0));
        let decoded = decode_response(&bytes).unwrap();
        assert_eq!(decoded, resp);
    }

    #[test]
    fn bad_input_status_byte_is_one() {
        let resp = ControlResponse::bad_input("runtime not found: web");
        assert_eq!(resp.encode()[0], 1);
    }

    #[test]
    fn decode_rejects_missing_terminator() {
        let bytes = vec![0, b'o', b'k'];
        assert_eq!(decode_response(&bytes), Err(ControlDecodeError::MissingTerminator));
    }

    #[test]
    fn decode_rejects_unknown_status() {
        let bytes = vec![9, 0];
        assert_eq!(decode_response(&bytes), Err(ControlDecodeError::UnknownStatus(9)));
    }

    #[test]
    fn tokenize_splits_on_whitespace() {
        assert_eq!(tokenize("create server web -p 8080"), vec!["create", "server", "web", "-p", "8080"]);
    }

    #[test]
    fn tokenize_respects_double_quotes() {
        assert_eq!(tokenize(r#"send app "hello world""#), vec!["send", "app", "hello world"]);
    }

    #[test]
    fn tokenize_empty_line_yields_no_tokens() {
        assert_eq!(tokenize("   "), Vec::<String>::new());
    }
}

// SPDX-License-Identifier: MIT

//! Protocol auto-detection: the first bytes of a freshly accepted TCP
//! connection decide how the server runtime parses the rest of the stream.
//! Sticky for the connection's lifetime (reset to `Unknown` after a
//! keep-alive HTTP response so pipelined requests re-detect).

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Detected {
    Unknown,
    Tcp,
    Http,
    WsUpgrading,
    Ws,
    Resp2,
}

const HTTP_METHODS: &[&str] = &["GET", "POST", "PUT", "HEAD", "DELETE", "PATCH", "OPTIONS"];

/// Sniff the first bytes of a connection to decide its protocol. Returns
/// `None` if not enough bytes have arrived yet to decide.
pub fn detect(buf: &[u8]) -> Option<Detected> {
    if buf.is_empty() {
        return None;
    }

    match buf[0] {
        b'*' | b'$' => return Some(Detected::Resp2),
        b'+' if buf[0].is_ascii_alphabetic() => return Some(Detected::Resp2),
        _ => {}
    }
    if buf[0].is_ascii_uppercase() {
        // Need enough bytes to distinguish GET from e.g. GETX, but since all
        // candidate methods are followed by a space we can match on a
        // prefix as soon as we see one or determine none apply.
        for method in HTTP_METHODS {
            if buf.len() >= method.len() {
                if buf.starts_with(method.as_bytes()) {
                    return Some(if *method == "GET" { Detected::WsUpgrading } else { Detected::Http });
                }
            } else if method.as_bytes().starts_with(buf) {
                // Could still become this method; wait for more bytes.
                return None;
            }
        }
        return Some(Detected::Tcp);
    }

    Some(Detected::Tcp)
}

// SPDX-License-Identifier: MIT

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! `socketley-ctl`: a thin control-socket client with no argument parsing
//! or UX of its own. It does exactly one thing — join its argv into a
//! command line, send it down the control socket, print the response body,
//! and exit with the response's status byte as its process exit code.

use std::env;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use sl_wire::control::{decode_response, Status};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;

const DEFAULT_SOCKET_PATH: &str = "/tmp/socketley.sock";

fn socket_path() -> PathBuf {
    env::var("SOCKETLEY_SOCKET").map(PathBuf::from).unwrap_or_else(|_| PathBuf::from(DEFAULT_SOCKET_PATH))
}

/// Join argv into one command line, quoting any argument that contains
/// whitespace so the daemon's `tokenize` sees it as a single token.
fn join_command(args: &[String]) -> String {
    args.iter()
        .map(|arg| {
            if arg.chars().any(char::is_whitespace) {
                format!("\"{arg}\"")
            } else {
                arg.clone()
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = env::args().skip(1).collect();
    if args.is_empty() {
        eprintln!("usage: socketley-ctl <command> [args...]");
        std::process::exit(1);
    }
    let line = join_command(&args);

    let path = socket_path();
    let mut stream = UnixStream::connect(&path)
        .await
        .with_context(|| format!("connect to control socket {}", path.display()))?;

    stream.write_all(line.as_bytes()).await?;
    stream.write_all(b"\n").await?;

    let mut buf = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        let n = stream.read(&mut byte).await?;
        if n == 0 {
            bail!("control socket closed before sending a terminator");
        }
        if byte[0] == 0 {
            break;
        }
        buf.push(byte[0]);
    }

    // `decode_response` expects the trailing NUL included; re-append it.
    buf.push(0);
    let response = decode_response(&buf).context("malformed control-plane response")?;

    if response.status == Status::Ok {
        println!("{}", response.body);
    } else {
        eprintln!("{}", response.body);
    }
    std::process::exit(response.status.as_byte() as i32);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn joins_plain_args_with_spaces() {
        assert_eq!(join_command(&["create".into(), "server".into(), "web".into()]), "create server web");
    }

    #[test]
    fn quotes_args_containing_whitespace() {
        assert_eq!(join_command(&["send".into(), "web".into(), "hello world".into()]), "send web \"hello world\"");
    }
}

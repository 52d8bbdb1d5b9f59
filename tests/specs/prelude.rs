//! Shared black-box test harness: spawns a real `socketleyd` against an
//! isolated state directory and talks to it over its Unix control socket,
//! the same `<status byte><body><NUL>` framing `socketley-ctl` uses.

#![allow(dead_code)]

use std::io::{Read, Write};
use std::net::TcpStream;
use std::os::unix::net::UnixStream;
use std::path::PathBuf;
use std::process::{Child, Command};
use std::sync::atomic::{AtomicU16, Ordering};
use std::time::{Duration, Instant};

use assert_cmd::cargo::cargo_bin;
use tempfile::TempDir;

/// Ports above the ephemeral range, handed out one at a time so concurrent
/// test binaries' runtimes never collide.
static NEXT_PORT: AtomicU16 = AtomicU16::new(39_200);

pub fn next_port() -> u16 {
    NEXT_PORT.fetch_add(1, Ordering::Relaxed)
}

/// A running daemon instance rooted at a throwaway state directory. Killed
/// and the directory removed on drop.
pub struct Daemon {
    child: Child,
    socket_path: PathBuf,
    _state_dir: TempDir,
}

impl Daemon {
    /// Spawn `socketleyd` with `SOCKETLEY_STATE_DIR`/`SOCKETLEY_SOCKET`
    /// pointed at a fresh temp directory and wait for its control socket
    /// to appear.
    pub fn start() -> Self {
        let state_dir = tempfile::tempdir().expect("create temp state dir");
        let socket_path = state_dir.path().join("control.sock");

        let child = Command::new(cargo_bin("socketleyd"))
            .env("SOCKETLEY_STATE_DIR", state_dir.path())
            .env("SOCKETLEY_SOCKET", &socket_path)
            .spawn()
            .expect("spawn socketleyd");

        let deadline = Instant::now() + Duration::from_secs(5);
        while !socket_path.exists() {
            assert!(Instant::now() < deadline, "socketleyd never created its control socket");
            std::thread::sleep(Duration::from_millis(20));
        }

        let daemon = Self { child, socket_path, _state_dir: state_dir };
        // The socket file can exist slightly before `listen` backlog is
        // actually being accepted; retry the first connect.
        let deadline = Instant::now() + Duration::from_secs(2);
        loop {
            match UnixStream::connect(&daemon.socket_path) {
                Ok(_) => break,
                Err(_) if Instant::now() < deadline => std::thread::sleep(Duration::from_millis(10)),
                Err(err) => panic!("control socket never accepted a connection: {err}"),
            }
        }
        daemon
    }

    /// Send one control-plane command line and return its decoded
    /// `(status byte, body)`.
    pub fn send(&self, command: &str) -> (u8, String) {
        let mut stream = UnixStream::connect(&self.socket_path).expect("connect control socket");
        stream.write_all(command.as_bytes()).expect("write command");
        stream.write_all(b"\n").expect("write newline");
        stream.flush().expect("flush command");

        let mut status = [0u8; 1];
        stream.read_exact(&mut status).expect("read status byte");

        let mut body = Vec::new();
        let mut byte = [0u8; 1];
        loop {
            let n = stream.read(&mut byte).expect("read response body");
            assert!(n != 0, "control socket closed before sending a terminator");
            if byte[0] == 0 {
                break;
            }
            body.push(byte[0]);
        }
        (status[0], String::from_utf8_lossy(&body).into_owned())
    }

    /// Create and start a runtime via the control plane, panicking on a
    /// non-ok response so a setup failure points straight at the cause.
    pub fn create(&self, command: &str) {
        let (status, body) = self.send(command);
        assert_eq!(status, 0, "control command failed: {command} -> {body}");
    }

    /// Open a raw connection to the control socket for a caller that needs
    /// to hold it open across multiple reads/writes (interactive sessions).
    pub fn connect_raw(&self) -> UnixStream {
        UnixStream::connect(&self.socket_path).expect("connect control socket")
    }
}

/// Read one `<status byte><body><NUL>` control response off an already-open
/// stream, for callers driving an interactive session by hand.
pub fn read_control_response(stream: &mut UnixStream) -> (u8, String) {
    let mut status = [0u8; 1];
    stream.read_exact(&mut status).expect("read status byte");
    let mut body = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        let n = stream.read(&mut byte).expect("read response body");
        assert!(n != 0, "control socket closed before sending a terminator");
        if byte[0] == 0 {
            break;
        }
        body.push(byte[0]);
    }
    (status[0], String::from_utf8_lossy(&body).into_owned())
}

impl Drop for Daemon {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

/// Connect a plain TCP client to a just-started runtime, retrying briefly
/// since `setup` binds its listener asynchronously after `create` returns.
pub fn connect_tcp(port: u16) -> TcpStream {
    let deadline = Instant::now() + Duration::from_secs(2);
    loop {
        match TcpStream::connect(("127.0.0.1", port)) {
            Ok(stream) => return stream,
            Err(_) if Instant::now() < deadline => std::thread::sleep(Duration::from_millis(20)),
            Err(err) => panic!("connect 127.0.0.1:{port}: {err}"),
        }
    }
}

/// Read until `needle` has appeared in the stream or `timeout` elapses,
/// returning everything read so far.
pub fn read_until_contains(stream: &mut TcpStream, needle: &str, timeout: Duration) -> String {
    stream.set_read_timeout(Some(Duration::from_millis(100))).expect("set read timeout");
    let deadline = Instant::now() + timeout;
    let mut collected = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        match stream.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => {
                collected.extend_from_slice(&chunk[..n]);
                if String::from_utf8_lossy(&collected).contains(needle) {
                    break;
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock || err.kind() == std::io::ErrorKind::TimedOut => {}
            Err(err) => panic!("read from {stream:?}: {err}"),
        }
        assert!(Instant::now() < deadline, "timed out waiting for {needle:?}, got {:?}", String::from_utf8_lossy(&collected));
    }
    String::from_utf8_lossy(&collected).into_owned()
}

use std::io::{Read, Write};
use std::time::Duration;

use serial_test::serial;

use crate::prelude::*;

/// Build a masked client->server text frame the way a real browser would,
/// mirroring `sl_wire::ws::frame_text` but with the mandatory client mask.
fn masked_text_frame(payload: &[u8]) -> Vec<u8> {
    let key = [0x12u8, 0x34, 0x56, 0x78];
    let mut out = vec![0x81u8];
    if payload.len() <= 125 {
        out.push(0x80 | payload.len() as u8);
    } else {
        out.push(0x80 | 126);
        out.extend_from_slice(&(payload.len() as u16).to_be_bytes());
    }
    out.extend_from_slice(&key);
    let masked: Vec<u8> = payload.iter().enumerate().map(|(i, b)| b ^ key[i & 3]).collect();
    out.extend_from_slice(&masked);
    out
}

#[test]
#[serial]
fn websocket_upgrade_and_broadcast_echo() {
    let daemon = Daemon::start();
    let port = next_port();
    daemon.create(&format!("create server web -p {port} -s"));

    let mut upgrading = connect_tcp(port);
    let request = "GET / HTTP/1.1\r\n\
         Host: localhost\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
         Sec-WebSocket-Version: 13\r\n\r\n";
    upgrading.write_all(request.as_bytes()).unwrap();

    let response = read_until_contains(&mut upgrading, "\r\n\r\n", Duration::from_secs(2));
    assert!(response.contains("101"), "expected a 101 upgrade response, got {response:?}");
    assert!(
        response.contains("s3pPLMBiTxaQ9kYGzzhZRbK+xOo="),
        "accept key didn't match the RFC 6455 worked example: {response:?}"
    );

    // A second, plain TCP client joins so we can observe the broadcast on
    // a connection that never upgraded.
    let mut plain = connect_tcp(port);

    upgrading.write_all(&masked_text_frame(b"hi")).unwrap();

    let received = read_until_contains(&mut plain, "hi", Duration::from_secs(2));
    assert_eq!(received, "hi");
}

#[test]
#[serial]
fn websocket_ping_is_answered_with_pong() {
    let daemon = Daemon::start();
    let port = next_port();
    daemon.create(&format!("create server web -p {port} -s"));

    let mut conn = connect_tcp(port);
    let request = "GET / HTTP/1.1\r\n\
         Host: localhost\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
         Sec-WebSocket-Version: 13\r\n\r\n";
    conn.write_all(request.as_bytes()).unwrap();
    let _ = read_until_contains(&mut conn, "\r\n\r\n", Duration::from_secs(2));

    // Masked ping frame, empty payload.
    conn.write_all(&[0x89, 0x80, 0x00, 0x00, 0x00, 0x00]).unwrap();

    conn.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
    let mut buf = [0u8; 2];
    let deadline = std::time::Instant::now() + Duration::from_secs(2);
    loop {
        match conn.read(&mut buf) {
            Ok(2) => break,
            Ok(_) => panic!("short read waiting for pong header"),
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock || err.kind() == std::io::ErrorKind::TimedOut => {}
            Err(err) => panic!("read pong: {err}"),
        }
        assert!(std::time::Instant::now() < deadline, "timed out waiting for pong");
    }
    assert_eq!(buf[0] & 0x0F, 0xA, "expected a pong opcode, got frame byte {:#x}", buf[0]);
}

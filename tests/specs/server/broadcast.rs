use std::io::Write;
use std::time::Duration;

use serial_test::serial;

use crate::prelude::*;

#[test]
#[serial]
fn inout_mode_broadcasts_to_other_clients_but_not_the_sender() {
    let daemon = Daemon::start();
    let port = next_port();
    daemon.create(&format!("create server web -p {port} -s"));

    let mut a = connect_tcp(port);
    let mut b = connect_tcp(port);

    a.write_all(b"hello\n").unwrap();

    let received = read_until_contains(&mut b, "hello", Duration::from_secs(2));
    assert_eq!(received, "hello");

    // The sender itself gets nothing back; a short read attempt should
    // time out rather than observe its own line echoed.
    a.set_read_timeout(Some(Duration::from_millis(200))).unwrap();
    let mut buf = [0u8; 16];
    use std::io::Read;
    let result = a.read(&mut buf);
    match result {
        Ok(0) => {}
        Ok(n) => panic!("sender unexpectedly received {} bytes", n),
        Err(err) => assert!(matches!(err.kind(), std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut)),
    }
}

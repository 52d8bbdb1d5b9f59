use std::io::Read;
use std::time::Duration;

use serial_test::serial;

use crate::prelude::*;

/// Removing a runtime that has live connections with pending I/O must not
/// leave the daemon in a broken state: every connection observes a clean
/// EOF, the runtime disappears from the registry, and the control plane
/// keeps answering commands afterward (nothing panicked mid-teardown).
#[test]
#[serial]
fn remove_closes_connections_and_keeps_the_daemon_alive() {
    let daemon = Daemon::start();
    let port = next_port();
    daemon.create(&format!("create server web -p {port} -s"));

    let mut clients: Vec<_> = (0..20).map(|_| connect_tcp(port)).collect();

    let (status, body) = daemon.send("remove web");
    assert_eq!(status, 0, "remove should succeed: {body}");

    for client in clients.iter_mut() {
        client.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
        let mut buf = [0u8; 16];
        let result = client.read(&mut buf);
        match result {
            Ok(0) => {}
            Ok(n) => panic!("expected EOF after remove, got {n} bytes"),
            Err(err) => panic!("expected a clean EOF after remove, got {err}"),
        }
    }

    let (status, body) = daemon.send("ls -s");
    assert_eq!(status, 0, "control socket should still be alive: {body}");
    assert!(!body.contains("web"), "removed runtime should no longer be listed: {body}");

    // The daemon should happily accept new work after a removal under load.
    daemon.create(&format!("create server web2 -p {} -s", next_port()));
    let (status, _) = daemon.send("stop web2");
    assert_eq!(status, 0, "daemon should remain fully functional after remove");
}

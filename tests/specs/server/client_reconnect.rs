use std::time::Duration;

use serial_test::serial;

use crate::prelude::*;

/// A client pointed at a port nobody listens on retries with exponential
/// backoff and gives up after its configured attempt count, without ever
/// wedging the daemon's control plane (the reconnect loop runs on its own
/// spawned task, not on the accept loop or the control socket).
#[test]
#[serial]
fn client_exhausts_reconnect_attempts_without_blocking_the_daemon() {
    let daemon = Daemon::start();
    daemon.create("create client c -t 127.0.0.1:1 --reconnect 3 -s");

    // Backoff is 100ms, 200ms, 400ms between the three attempts; give it
    // comfortable headroom past that before asserting anything.
    std::thread::sleep(Duration::from_millis(900));

    let (status, body) = daemon.send("ps --name --status");
    assert_eq!(status, 0, "control socket should still answer: {body}");

    let (status, body) = daemon.send("stats c");
    assert_eq!(status, 0, "stats should still work after reconnect exhausted: {body}");
    assert!(body.contains("c:"), "unexpected stats body: {body}");

    // The runtime itself stays `running` — only its background reconnect
    // loop stops retrying; an operator can still `stop`/`remove` it.
    let (status, body) = daemon.send("stop c");
    assert_eq!(status, 0, "stop should succeed: {body}");
}

#[test]
#[serial]
fn client_reconnect_minus_one_disables_retry_entirely() {
    let daemon = Daemon::start();
    daemon.create("create client c -t 127.0.0.1:1 --reconnect -1 -s");

    // With reconnect disabled the single failed attempt must not loop;
    // give it time to have retried if it (incorrectly) did.
    std::thread::sleep(Duration::from_millis(300));

    let (status, body) = daemon.send("stats c");
    assert_eq!(status, 0, "control plane should remain responsive: {body}");
}

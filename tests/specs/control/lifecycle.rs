use serial_test::serial;

use crate::prelude::*;

#[test]
#[serial]
fn create_start_ls_stop_remove_round_trip() {
    let daemon = Daemon::start();
    let port = next_port();

    let (status, body) = daemon.send(&format!("create server web -p {port} -s"));
    assert_eq!(status, 0, "{body}");

    let (status, body) = daemon.send("ls");
    assert_eq!(status, 0);
    assert!(body.contains("web"));
    assert!(body.contains("Running"));

    let (status, body) = daemon.send("stop web");
    assert_eq!(status, 0, "{body}");
    assert!(body.contains("stopped: web"));

    let (status, body) = daemon.send("remove web");
    assert_eq!(status, 0, "{body}");
    assert!(body.contains("removed: web"));

    let (status, body) = daemon.send("ls");
    assert_eq!(status, 0);
    assert!(!body.contains("web"), "web should be gone after remove: {body}");
}

#[test]
#[serial]
fn duplicate_create_is_rejected() {
    let daemon = Daemon::start();
    let port = next_port();
    daemon.create(&format!("create server dup -p {port}"));

    let (status, body) = daemon.send(&format!("create server dup -p {port}"));
    assert_eq!(status, 1, "expected bad-input status, got {status}: {body}");
    assert!(body.contains("already exists"));
}

#[test]
#[serial]
fn stopping_an_unknown_runtime_is_bad_input() {
    let daemon = Daemon::start();
    let (status, body) = daemon.send("stop ghost");
    assert_eq!(status, 1, "{body}");
    assert!(body.contains("not found"));
}

#[test]
#[serial]
fn unknown_verb_is_bad_input() {
    let daemon = Daemon::start();
    let (status, body) = daemon.send("frobnicate everything");
    assert_eq!(status, 1, "{body}");
    assert!(body.contains("unknown command"));
}

#[test]
#[serial]
fn start_interactive_echoes_broadcasts_and_accepts_injected_lines() {
    use std::io::{Read, Write};

    let daemon = Daemon::start();
    let port = next_port();
    daemon.create(&format!("create server chat -p {port}"));

    let mut interactive = daemon.connect_raw();
    interactive.write_all(b"start chat -i\n").unwrap();
    let (status, body) = read_control_response(&mut interactive);
    assert_eq!(status, 0, "{body}");
    assert!(body.contains("started: chat"));

    // A message broadcast from a data-plane client is echoed to the
    // interactive session.
    let mut client = connect_tcp(port);
    client.write_all(b"hello room\n").unwrap();

    interactive.set_read_timeout(Some(std::time::Duration::from_secs(2))).unwrap();
    let mut buf = [0u8; 256];
    let n = interactive.read(&mut buf).expect("read broadcast on interactive socket");
    assert_eq!(&buf[..n], b"hello room\n");

    // A line typed into the interactive session is injected as if it came
    // from a data-plane client, and reaches the other connected client.
    interactive.write_all(b"from the operator\n").unwrap();
    let received = read_until_contains(&mut client, "from the operator", std::time::Duration::from_secs(2));
    assert!(received.contains("from the operator"));

    drop(interactive);
    drop(client);
}

#[test]
#[serial]
fn show_round_trips_through_json_and_reflects_edits() {
    let daemon = Daemon::start();
    let port = next_port();
    daemon.create(&format!("create server web -p {port} --max-connections 10"));

    let (status, body) = daemon.send("show web");
    assert_eq!(status, 0, "{body}");
    let before: serde_json::Value = serde_json::from_str(&body).expect("show body is valid json");
    assert_eq!(before["name"], "web");
    assert_eq!(before["port"], port);
    assert_eq!(before["max_connections"], 10);

    daemon.create("edit web --max-connections 20");

    let (status, body) = daemon.send("show web");
    assert_eq!(status, 0, "{body}");
    let after: serde_json::Value = serde_json::from_str(&body).expect("show body is valid json");
    assert_eq!(after["max_connections"], 20);

    let mut expected = before.clone();
    expected["max_connections"] = serde_json::json!(20);
    similar_asserts::assert_eq!(expected, after);
}

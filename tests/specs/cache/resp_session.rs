use std::io::Write;
use std::time::Duration;

use serial_test::serial;

use crate::prelude::*;

#[test]
#[serial]
fn set_then_get_over_resp2() {
    let daemon = Daemon::start();
    let port = next_port();
    daemon.create(&format!("create cache c -p {port} -s"));

    let mut stream = connect_tcp(port);
    stream.write_all(b"*3\r\n$3\r\nSET\r\n$1\r\nk\r\n$1\r\nv\r\n*2\r\n$3\r\nGET\r\n$1\r\nk\r\n").unwrap();

    let body = read_until_contains(&mut stream, "$1\r\nv\r\n", Duration::from_secs(2));
    assert_eq!(body, "+OK\r\n$1\r\nv\r\n");
}

#[test]
#[serial]
fn publish_subscribe_delivers_to_a_subscriber() {
    let daemon = Daemon::start();
    let port = next_port();
    daemon.create(&format!("create cache c -p {port} -s"));

    let mut subscriber = connect_tcp(port);
    subscriber.write_all(b"*2\r\n$9\r\nSUBSCRIBE\r\n$4\r\nroom\r\n").unwrap();
    let _ = read_until_contains(&mut subscriber, "+OK\r\n", Duration::from_secs(2));

    let mut publisher = connect_tcp(port);
    publisher.write_all(b"*3\r\n$7\r\nPUBLISH\r\n$4\r\nroom\r\n$2\r\nhi\r\n").unwrap();
    let _ = read_until_contains(&mut publisher, ":1\r\n", Duration::from_secs(2));

    let delivered = read_until_contains(&mut subscriber, "hi", Duration::from_secs(2));
    assert!(delivered.contains("room"));
    assert!(delivered.contains("hi"));
}

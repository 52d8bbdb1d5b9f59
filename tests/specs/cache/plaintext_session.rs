use std::io::Write;
use std::time::Duration;

use serial_test::serial;

use crate::prelude::*;

#[test]
#[serial]
fn set_get_and_type_conflict_over_plaintext() {
    let daemon = Daemon::start();
    let port = next_port();
    daemon.create(&format!("create cache c -p {port} -s"));

    let mut stream = connect_tcp(port);
    stream.write_all(b"SET a 1\nGET a\nLPUSH a z\n").unwrap();

    let body = read_until_contains(&mut stream, "type conflict", Duration::from_secs(2));
    assert_eq!(body, "ok\n1\nerror: type conflict\n");
}

#[test]
#[serial]
fn list_and_set_operations_round_trip() {
    let daemon = Daemon::start();
    let port = next_port();
    daemon.create(&format!("create cache c -p {port} -s"));

    let mut stream = connect_tcp(port);
    stream.write_all(b"RPUSH l a\nRPUSH l b\nLPOP l\nSADD s m\nSISMEMBER s m\nSREM s m\nSISMEMBER s m\n").unwrap();

    let body = read_until_contains(&mut stream, "0\n", Duration::from_secs(2));
    assert_eq!(body, "1\n2\na\n1\n1\n1\n0\n");
}

#[test]
#[serial]
fn expire_ttl_and_persist() {
    let daemon = Daemon::start();
    let port = next_port();
    daemon.create(&format!("create cache c -p {port} -s"));

    let mut stream = connect_tcp(port);
    stream.write_all(b"SET k v\nEXPIRE k 100\nPERSIST k\nTTL k\n").unwrap();

    let body = read_until_contains(&mut stream, "-1", Duration::from_secs(2));
    let lines: Vec<&str> = body.lines().collect();
    assert_eq!(lines, vec!["ok", "1", "1", "-1"]);
}

use std::io::Write;
use std::time::Duration;

use serial_test::serial;

use crate::prelude::*;

#[test]
#[serial]
fn path_prefix_is_stripped_before_reaching_the_backend() {
    let backend_dir = tempfile::tempdir().unwrap();
    std::fs::write(backend_dir.path().join("foo"), b"hello from backend").unwrap();

    let daemon = Daemon::start();
    let backend_port = next_port();
    let proxy_port = next_port();

    daemon.create(&format!("create server b -p {backend_port} --http {} -s", backend_dir.path().display()));
    daemon.create(&format!("create proxy p -p {proxy_port} --backend localhost:{backend_port} --protocol http -s"));

    let mut stream = connect_tcp(proxy_port);
    stream.write_all(b"GET /p/foo HTTP/1.1\r\nHost: x\r\n\r\n").unwrap();

    let response = read_until_contains(&mut stream, "hello from backend", Duration::from_secs(2));
    assert!(response.starts_with("HTTP/1.1 200"));
    assert!(response.contains("hello from backend"));
}

#[test]
#[serial]
fn unmatched_path_is_rejected_before_touching_the_backend() {
    let backend_dir = tempfile::tempdir().unwrap();
    std::fs::write(backend_dir.path().join("foo"), b"hello from backend").unwrap();

    let daemon = Daemon::start();
    let backend_port = next_port();
    let proxy_port = next_port();

    daemon.create(&format!("create server b -p {backend_port} --http {} -s", backend_dir.path().display()));
    daemon.create(&format!("create proxy p -p {proxy_port} --backend localhost:{backend_port} --protocol http -s"));

    let mut stream = connect_tcp(proxy_port);
    stream.write_all(b"GET /other/foo HTTP/1.1\r\nHost: x\r\n\r\n").unwrap();

    let response = read_until_contains(&mut stream, "404", Duration::from_secs(2));
    assert!(response.starts_with("HTTP/1.1 404"));
}

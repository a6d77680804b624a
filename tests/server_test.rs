// SPDX-License-Identifier: MIT
//! Capture server driven by a real HTTP client.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use mimewire::config::Config;
use mimewire::server::run_server;
use reqwest::StatusCode;
use reqwest::blocking::{Client, multipart};
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::mpsc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// A helper struct to manage a running test server.
struct TestServer {
    addr: SocketAddr,
    shutdown_tx: mpsc::Sender<()>,
    handle: Option<JoinHandle<()>>,
}

fn setup_test_server(max_body_size: u64) -> TestServer {
    let config = Config {
        listen: "127.0.0.1".to_string(),
        port: 0,
        threads: 2,
        wait_timeout: Duration::from_millis(300),
        max_body_size,
        ..Config::default()
    };

    let (shutdown_tx, shutdown_rx) = mpsc::channel();
    let (addr_tx, addr_rx) = mpsc::channel();

    let handle = thread::spawn(move || {
        if let Err(e) = run_server(config, Some(shutdown_rx), Some(addr_tx)) {
            eprintln!("Server thread failed: {e}");
        }
    });

    let addr = addr_rx.recv().unwrap();
    TestServer {
        addr,
        shutdown_tx,
        handle: Some(handle),
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.shutdown_tx.send(()).ok();
            handle.join().unwrap();
        }
    }
}

fn raw_exchange(addr: SocketAddr, request: &[u8]) -> String {
    let mut stream = TcpStream::connect(addr).unwrap();
    stream.write_all(request).unwrap();
    let mut response = String::new();
    stream.read_to_string(&mut response).unwrap();
    response
}

#[test]
fn test_multipart_upload_is_echoed_with_base64_file() {
    let server = setup_test_server(1024 * 1024);
    let payload: Vec<u8> = (0..=255u8).cycle().take(5000).collect();

    let form = multipart::Form::new()
        .text("title", "holiday")
        .part(
            "photo",
            multipart::Part::bytes(payload.clone())
                .file_name("photo.raw")
                .mime_str("application/octet-stream")
                .unwrap(),
        );

    let response = Client::new()
        .post(format!("http://{}/upload", server.addr))
        .multipart(form)
        .send()
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()["content-type"],
        "text/plain; charset=utf-8"
    );
    let text = response.text().unwrap();

    assert!(text.starts_with("POST /upload HTTP/1.1\n"));
    assert!(text.contains("name=\"title\"\r\n\r\nholiday\r\n"));

    let marker = "Content-Length: 5000\r\nContent-Encoding: base64\r\n\r\n";
    let start = text.find(marker).expect("file part headers") + marker.len();
    let end = start + text[start..].find("\r\n").unwrap();
    assert_eq!(STANDARD.decode(&text[start..end]).unwrap(), payload);
}

#[test]
fn test_plain_post_is_echoed() {
    let server = setup_test_server(1024);
    let response = Client::new()
        .post(format!("http://{}/form", server.addr))
        .body("a=1&b=2")
        .send()
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.text().unwrap().ends_with("\n\na=1&b=2"));
}

#[test]
fn test_oversized_body_is_rejected() {
    let server = setup_test_server(16);
    let response = raw_exchange(
        server.addr,
        b"POST / HTTP/1.1\r\nHost: x\r\nContent-Length: 17\r\n\r\n",
    );
    assert!(response.starts_with("HTTP/1.1 413 Payload Too Large\r\n"));
}

#[test]
fn test_oversized_header_block_is_rejected() {
    let server = setup_test_server(1024);
    let mut request = b"GET / HTTP/1.1\r\nX-Big: ".to_vec();
    request.extend(std::iter::repeat_n(b'a', 32 * 1024));
    request.extend_from_slice(b"\r\n\r\n");

    let response = raw_exchange(server.addr, &request);
    assert!(response.starts_with("HTTP/1.1 431 Request Header Fields Too Large\r\n"));
    assert!(response.contains("exceeds 8192 bytes"));
    // Nothing of the header block is echoed back
    assert!(response.len() < 1024);
}

#[test]
fn test_truncated_body_times_out() {
    let server = setup_test_server(1024);
    let mut stream = TcpStream::connect(server.addr).unwrap();
    stream
        .write_all(b"POST / HTTP/1.1\r\nContent-Length: 10\r\n\r\nabc")
        .unwrap();

    let mut response = String::new();
    stream.read_to_string(&mut response).unwrap();
    assert!(response.starts_with("HTTP/1.1 408 Request Timeout\r\n"));
    assert!(response.contains("Connection: close\r\n"));
}

#[test]
fn test_malformed_multipart_is_bad_request() {
    let server = setup_test_server(1024);
    let body = "--XYZ\r\nContent-Disposition: form-data; name=\"a\"\r\n\r\nno end";
    let request = format!(
        "POST / HTTP/1.1\r\nContent-Type: multipart/form-data; boundary=XYZ\r\nContent-Length: {}\r\n\r\n{body}",
        body.len()
    );
    let response = raw_exchange(server.addr, request.as_bytes());
    assert!(response.starts_with("HTTP/1.1 400 Bad Request\r\n"));
    assert!(response.contains("Malformed multipart body"));
}

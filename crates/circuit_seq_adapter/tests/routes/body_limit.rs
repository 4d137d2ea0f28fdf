#![forbid(unsafe_code)]

use std::io::{ErrorKind, Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use circuit_seq_adapter::routes::OWNER_HEADER;
use circuit_seq_adapter::{router, AdapterConfig, AdapterRuntime};
use tokio::net::TcpListener;

fn config(dir: &Path, max_upload_bytes: Option<usize>) -> AdapterConfig {
    AdapterConfig::from_lookup(|key| match key {
        "CIRCUIT_SEQ_DATA_ROOT" => Some(dir.display().to_string()),
        "CIRCUIT_SEQ_MAX_UPLOAD_BYTES" => max_upload_bytes.map(|v| v.to_string()),
        _ => None,
    })
}

async fn serve(config: AdapterConfig) -> SocketAddr {
    let runtime = AdapterRuntime::open(&config).unwrap();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router(Arc::new(runtime))).await.unwrap();
    });
    addr
}

struct RawResponse {
    status: u16,
    text: String,
}

// Plain HTTP/1.1 over a std socket; the server may close early on rejection,
// so write errors are ignored and whatever arrived before a reset is kept.
fn post_json(addr: SocketAddr, path: &str, body: Vec<u8>) -> RawResponse {
    let mut stream = TcpStream::connect(addr).unwrap();
    stream
        .set_read_timeout(Some(Duration::from_secs(20)))
        .unwrap();
    let head = format!(
        "POST {path} HTTP/1.1\r\nhost: {addr}\r\n{OWNER_HEADER}: a@lab.org\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n",
        body.len()
    );
    stream.write_all(head.as_bytes()).unwrap();
    let _ = stream.write_all(&body);
    let _ = stream.flush();

    let mut raw = Vec::new();
    let mut buf = [0_u8; 8192];
    loop {
        match stream.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => raw.extend_from_slice(&buf[..n]),
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(_) => break,
        }
    }
    let text = String::from_utf8_lossy(&raw).into_owned();
    let status = text
        .split_whitespace()
        .nth(1)
        .and_then(|code| code.parse().ok())
        .unwrap_or(0);
    RawResponse { status, text }
}

async fn post(addr: SocketAddr, path: &'static str, body: Vec<u8>) -> RawResponse {
    tokio::task::spawn_blocking(move || post_json(addr, path, body))
        .await
        .unwrap()
}

fn add_sample_body(name: &str, fasta: &[u8]) -> Vec<u8> {
    serde_json::to_vec(&serde_json::json!({
        "name": name,
        "file_name": "big.fasta",
        "file_base64": BASE64.encode(fasta),
    }))
    .unwrap()
}

fn fasta_of_len(len: usize) -> Vec<u8> {
    let mut fasta = b">big insert\n".to_vec();
    while fasta.len() < len {
        fasta.extend_from_slice(b"ACGTACGTACGTACGTACGTACGTACGTACGTACGTACGTACGTACGTACGTACGTACGTACG\n");
    }
    fasta.truncate(len);
    fasta
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn at_routes_http_01_upload_above_two_megabytes_is_accepted() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(dir.path(), None);
    assert_eq!(cfg.max_upload_bytes, 64_000_000);
    let addr = serve(cfg).await;

    let body = add_sample_body("pLarge", &fasta_of_len(3_000_000));
    assert!(body.len() > 4_000_000);
    let response = post(addr, "/addsample", body).await;
    assert_eq!(response.status, 201, "{}", response.text);
    assert!(response.text.contains("\"has_reference_sequence\":true"));
    assert!(response.text.contains("\"reference_sequence_description\":\"big insert\""));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn at_routes_http_02_body_over_configured_ceiling_gets_json_413() {
    let dir = tempfile::tempdir().unwrap();
    let addr = serve(config(dir.path(), Some(1_000))).await;

    let body = add_sample_body("pHuge", &fasta_of_len(60_000));
    assert!(body.len() > circuit_seq_adapter::request_body_limit(1_000));
    let response = post(addr, "/addsample", body).await;
    assert_eq!(response.status, 413, "{}", response.text);
    assert!(response.text.contains("\"outcome\":\"INVALID_INPUT\""));
    assert!(response.text.contains("\"reason_code\":\"0x53450010\""));

    // Nothing was allocated.
    let small = post(addr, "/addsample", add_sample_body("pSmall", b">s\nAC\n")).await;
    assert_eq!(small.status, 201, "{}", small.text);
    assert!(small.text.contains("\"primary_key\":\""));
    assert!(small.text.contains("-001\""));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn at_routes_http_03_malformed_json_is_structured_400() {
    let dir = tempfile::tempdir().unwrap();
    let addr = serve(config(dir.path(), None)).await;

    let response = post(addr, "/addsample", b"{\"name\":".to_vec()).await;
    assert_eq!(response.status, 400, "{}", response.text);
    assert!(response.text.contains("\"outcome\":\"INVALID_INPUT\""));
    assert!(response.text.contains("\"reason_code\":\"0x41440003\""));
}

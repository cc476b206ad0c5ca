//! Local listeners for probe and engine tests.

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

use crate::config::ProbeConfig;
use crate::config::PingMode;

/// Serves every request with `code` and an empty body. Returns the base URL.
pub async fn serve_status(code: u16) -> (String, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                if read_request(&mut socket).await.is_none() {
                    return;
                }
                let reason = if code == 200 { "OK" } else { "Not Found" };
                let response = format!(
                    "HTTP/1.1 {} {}\r\ncontent-length: 0\r\nconnection: close\r\n\r\n",
                    code, reason
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });
    (format!("http://{}/", addr), handle)
}

/// Reads one request, draining any `content-length` body so closing does not
/// reset the peer. Returns the method, the path with its query, and the body.
pub async fn read_request(socket: &mut TcpStream) -> Option<(String, String, Vec<u8>)> {
    let mut request = Vec::new();
    let mut chunk = [0u8; 1024];
    loop {
        let n = match socket.read(&mut chunk).await {
            Ok(0) | Err(_) => return None,
            Ok(n) => n,
        };
        request.extend_from_slice(&chunk[..n]);
        let Some(end) = request.windows(4).position(|w| w == b"\r\n\r\n") else {
            continue;
        };
        let head = String::from_utf8_lossy(&request[..end]).to_string();
        let body_len: usize = head
            .lines()
            .find_map(|line| {
                let (name, value) = line.split_once(':')?;
                name.trim().eq_ignore_ascii_case("content-length").then(|| value.trim().to_string())
            })
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);
        if request.len() >= end + 4 + body_len {
            let mut parts = head.split_whitespace();
            let method = parts.next()?.to_string();
            let path = parts.next()?.to_string();
            return Some((method, path, request[end + 4..end + 4 + body_len].to_vec()));
        }
    }
}

/// Accepts TCP connections and drops them.
pub async fn open_port() -> (u16, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let handle = tokio::spawn(async move {
        while listener.accept().await.is_ok() {}
    });
    (port, handle)
}

/// A loopback port with nothing listening on it.
pub async fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

pub fn probe_config() -> ProbeConfig {
    ProbeConfig {
        ping_timeout_ms: 500,
        port_timeout_ms: 1000,
        http_timeout_ms: 2000,
        ping_mode: PingMode::Command,
        http_proxy: false,
    }
}

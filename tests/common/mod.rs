#![allow(dead_code)]

use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// A loopback server that accepts and holds connections open.
pub async fn spawn_target() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut buf = [0u8; 1024];
                while let Ok(n) = stream.read(&mut buf).await {
                    if n == 0 {
                        break;
                    }
                }
            });
        }
    });
    addr
}

/// Status line returned by the HTTP proxy for `CONNECT target`.
pub async fn http_connect(proxy: SocketAddr, target: &str) -> String {
    let mut stream = TcpStream::connect(proxy).await.unwrap();
    let request = format!(
        "CONNECT {target} HTTP/1.1\r\nHost: {target}\r\n\r\n",
        target = target
    );
    stream.write_all(request.as_bytes()).await.unwrap();

    let mut buf = vec![0u8; 1024];
    let n = tokio::time::timeout(Duration::from_secs(5), stream.read(&mut buf))
        .await
        .unwrap()
        .unwrap();
    let response = String::from_utf8_lossy(&buf[..n]).to_string();
    response.lines().next().unwrap_or_default().to_string()
}

/// Reply code returned by the SOCKS5 proxy for a CONNECT to `host:port`.
pub async fn socks_connect(proxy: SocketAddr, host: &str, port: u16) -> u8 {
    let mut stream = TcpStream::connect(proxy).await.unwrap();
    stream.write_all(&[0x05, 0x01, 0x00]).await.unwrap();
    let mut method = [0u8; 2];
    stream.read_exact(&mut method).await.unwrap();
    assert_eq!(method, [0x05, 0x00]);

    let mut request = vec![0x05, 0x01, 0x00, 0x03, host.len() as u8];
    request.extend_from_slice(host.as_bytes());
    request.extend_from_slice(&port.to_be_bytes());
    stream.write_all(&request).await.unwrap();

    let mut reply = [0u8; 2];
    tokio::time::timeout(Duration::from_secs(5), stream.read_exact(&mut reply))
        .await
        .unwrap()
        .unwrap();
    reply[1]
}

/// Whether a process with `pid` still exists.
pub fn process_exists(pid: u32) -> bool {
    nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid as i32), None).is_ok()
}

/// Poll `condition` for up to five seconds.
pub async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..100 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    condition()
}

/// Whether host `path` is reachable at the same location inside the sandbox
/// built by a wrapped command's bubblewrap arguments.
///
/// Mounts are replayed in order; the last one covering `path` decides.
pub fn reaches_host(words: &[String], path: &std::path::Path) -> bool {
    let end = words.iter().position(|w| w == "--").unwrap_or(words.len());
    let mut visible = false;
    let mut i = 1;
    while i < end {
        match words[i].as_str() {
            "--bind" | "--ro-bind" => {
                let (source, dest) = (&words[i + 1], &words[i + 2]);
                if path.starts_with(dest) {
                    visible = source == dest;
                }
                i += 3;
            }
            "--tmpfs" | "--dev" | "--proc" => {
                if path.starts_with(&words[i + 1]) {
                    visible = false;
                }
                i += 2;
            }
            "--chdir" => i += 2,
            _ => i += 1,
        }
    }
    visible
}

/// Unix socket paths the inner script's bridges connect to.
pub fn bridge_sockets(words: &[String]) -> Vec<std::path::PathBuf> {
    let script = words
        .iter()
        .position(|w| w == "--")
        .and_then(|pos| words.get(pos + 3))
        .expect("inner script");
    script
        .split_whitespace()
        .filter_map(|word| word.trim_matches('\'').strip_prefix("UNIX-CONNECT:"))
        .map(std::path::PathBuf::from)
        .collect()
}

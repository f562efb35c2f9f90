//! The filtering proxy process.
//!
//! Runs as its own OS process (`srt-proxy`). It listens for HTTP and SOCKS5
//! clients on loopback TCP and, for the sandbox bridges, on Unix sockets. The
//! domain filter starts as deny-all and is only ever replaced by `update`
//! messages read from stdin.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;

use crate::config::NetworkPolicy;
use crate::error::SandboxError;
use crate::proxy::control::{encode_line, ControlEvent, ControlRequest};
use crate::proxy::filter::{DomainFilter, SharedFilter};
use crate::proxy::{http, socks5};

/// Listener configuration for the proxy process.
#[derive(Debug, Clone, Default)]
pub struct ProxyServerOptions {
    /// Unix socket for HTTP clients inside the sandbox.
    pub http_socket: Option<PathBuf>,
    /// Unix socket for SOCKS5 clients inside the sandbox.
    pub socks_socket: Option<PathBuf>,
}

/// Run the proxy until stdin closes or a shutdown request arrives.
pub async fn run(options: ProxyServerOptions) -> Result<(), SandboxError> {
    let filter: SharedFilter = Arc::new(RwLock::new(DomainFilter::deny_all()));

    let http_listener = TcpListener::bind("127.0.0.1:0").await?;
    let socks_listener = TcpListener::bind("127.0.0.1:0").await?;
    let http_addr = http_listener.local_addr()?;
    let socks_addr = socks_listener.local_addr()?;

    spawn_tcp_accept_loop("HTTP", http_listener, filter.clone(), serve_http);
    spawn_tcp_accept_loop("SOCKS5", socks_listener, filter.clone(), serve_socks);

    #[cfg(unix)]
    {
        if let Some(ref path) = options.http_socket {
            let listener = bind_unix(path)?;
            spawn_unix_accept_loop("HTTP", listener, filter.clone(), serve_http);
        }
        if let Some(ref path) = options.socks_socket {
            let listener = bind_unix(path)?;
            spawn_unix_accept_loop("SOCKS5", listener, filter.clone(), serve_socks);
        }
    }

    tracing::debug!(
        "Proxy listening (HTTP: {}, SOCKS5: {})",
        http_addr,
        socks_addr
    );

    let mut stdout = tokio::io::stdout();
    emit(
        &mut stdout,
        &ControlEvent::Ready {
            pid: std::process::id(),
            http_addr,
            socks_addr,
        },
    )
    .await?;

    let result = control_loop(tokio::io::stdin(), &mut stdout, &filter).await;

    for path in [&options.http_socket, &options.socks_socket].into_iter().flatten() {
        let _ = std::fs::remove_file(path);
    }

    result
}

/// Apply control requests until EOF or shutdown.
pub async fn control_loop<R, W>(
    input: R,
    output: &mut W,
    filter: &SharedFilter,
) -> Result<(), SandboxError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = BufReader::new(input).lines();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }

        match serde_json::from_str::<ControlRequest>(&line) {
            Ok(ControlRequest::Update {
                generation,
                allowed_domains,
                denied_domains,
            }) => {
                let policy = NetworkPolicy {
                    allowed_domains,
                    denied_domains,
                };
                *filter.write() = DomainFilter::from_policy(&policy);
                tracing::debug!(
                    "Applied policy generation {} (allowed: {:?}, denied: {:?})",
                    generation,
                    policy.allowed_domains,
                    policy.denied_domains
                );
                emit(output, &ControlEvent::Ack { generation }).await?;
            }
            Ok(ControlRequest::Shutdown) => {
                tracing::debug!("Proxy shutting down on request");
                return Ok(());
            }
            Err(e) => {
                tracing::warn!("Malformed control message: {}", e);
                emit(
                    output,
                    &ControlEvent::Error {
                        message: e.to_string(),
                    },
                )
                .await?;
            }
        }
    }

    tracing::debug!("Control channel closed; proxy exiting");
    Ok(())
}

async fn emit<W>(output: &mut W, event: &ControlEvent) -> Result<(), SandboxError>
where
    W: AsyncWrite + Unpin,
{
    let line = encode_line(event).map_err(|e| SandboxError::ProxyControl(e.to_string()))?;
    output.write_all(line.as_bytes()).await?;
    output.flush().await?;
    Ok(())
}

async fn serve_http<S>(stream: S, filter: SharedFilter)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    if let Err(e) = http::handle_connection(stream, filter).await {
        tracing::debug!("HTTP connection error: {}", e);
    }
}

async fn serve_socks<S>(stream: S, filter: SharedFilter)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    if let Err(e) = socks5::handle_client(stream, filter).await {
        tracing::debug!("SOCKS5 connection error: {}", e);
    }
}

fn spawn_tcp_accept_loop<F, Fut>(
    kind: &'static str,
    listener: TcpListener,
    filter: SharedFilter,
    serve: F,
) where
    F: Fn(tokio::net::TcpStream, SharedFilter) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((stream, _addr)) => {
                    tokio::spawn(serve(stream, filter.clone()));
                }
                Err(e) => {
                    tracing::error!("{} accept error: {}", kind, e);
                }
            }
        }
    });
}

#[cfg(unix)]
fn spawn_unix_accept_loop<F, Fut>(
    kind: &'static str,
    listener: tokio::net::UnixListener,
    filter: SharedFilter,
    serve: F,
) where
    F: Fn(tokio::net::UnixStream, SharedFilter) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((stream, _addr)) => {
                    tokio::spawn(serve(stream, filter.clone()));
                }
                Err(e) => {
                    tracing::error!("{} accept error: {}", kind, e);
                }
            }
        }
    });
}

#[cfg(unix)]
fn bind_unix(path: &Path) -> Result<tokio::net::UnixListener, SandboxError> {
    if path.exists() {
        std::fs::remove_file(path)?;
    }
    Ok(tokio::net::UnixListener::bind(path)?)
}

#[cfg(test)]
mod tests {
    use tokio::io::AsyncReadExt;

    use super::*;

    #[tokio::test]
    async fn test_control_loop_applies_updates_in_order() {
        let filter: SharedFilter = Arc::new(RwLock::new(DomainFilter::deny_all()));
        let input = concat!(
            "{\"type\":\"update\",\"generation\":1,\"allowedDomains\":[],\"deniedDomains\":[\"evil.example\"]}\n",
            "\n",
            "not json\n",
            "{\"type\":\"update\",\"generation\":2,\"allowedDomains\":[\"good.example\"],\"deniedDomains\":[]}\n",
        );
        let (mut out_writer, mut out_reader) = tokio::io::duplex(4096);

        control_loop(input.as_bytes(), &mut out_writer, &filter)
            .await
            .unwrap();
        drop(out_writer);

        let mut output = String::new();
        out_reader.read_to_string(&mut output).await.unwrap();
        let events: Vec<ControlEvent> = output
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();

        assert_eq!(events.len(), 3);
        assert_eq!(events[0], ControlEvent::Ack { generation: 1 });
        assert!(matches!(events[1], ControlEvent::Error { .. }));
        assert_eq!(events[2], ControlEvent::Ack { generation: 2 });

        let filter = filter.read();
        assert!(filter.is_allowed("good.example"));
        assert!(!filter.is_allowed("other.example"));
    }

    #[tokio::test]
    async fn test_control_loop_stops_on_shutdown() {
        let filter: SharedFilter = Arc::new(RwLock::new(DomainFilter::deny_all()));
        let input = concat!(
            "{\"type\":\"shutdown\"}\n",
            "{\"type\":\"update\",\"generation\":1,\"allowedDomains\":[],\"deniedDomains\":[]}\n",
        );
        let mut output = Vec::new();

        control_loop(input.as_bytes(), &mut output, &filter)
            .await
            .unwrap();

        assert!(output.is_empty());
        assert!(!filter.read().is_allowed("example.com"));
    }
}
